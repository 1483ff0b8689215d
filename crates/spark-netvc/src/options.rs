//! 连接建立参数。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 不同状态机对连接的要求各不相同（绑定方式、阻塞模式、SOCKS、套接字选项），若全部塞进
//!   建连方法签名会失控膨胀；统一收敛为 [`ConnectionOptions`]，只需显式设置关心的字段。
//! - 连接构造时复制一份选项（copy-on-construct），调用方之后修改手里的结构体不会影响已建立的连接。
//!
//! ## 契约（What）
//! - [`ConnectionOptions::reset`] 恢复文档化默认值：TCP、任意地址/端口、非阻塞、禁用 SOCKS、
//!   不显式设置缓冲区、不设置任何套接字选项；
//! - 地址轴（[`AddrBinding`]）与端口轴（[`PortBinding`]）各自互斥；
//! - [`AddrBinding::Foreign`] 表示透明绑定到非本机地址，调用方负责保证该地址可用于拦截，本层不校验归属。
//!
//! ## 实现（How）
//! - 全部类型派生 `serde`，`#[serde(default)]` 让部分配置表自动回落到 `reset()` 默认值；
//! - [`SockOptFlags`] 以具名标志集合表达位掩码，序列化为名称列表。

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    ops::{BitOr, BitOrAssign},
};

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result, codes};

/// 套接字使用的 IP 协议。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpProtocol {
    /// TCP（默认）。
    #[default]
    Tcp,
    /// UDP。
    Udp,
}

/// 本地端口的绑定方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortBinding {
    /// 由内核分配任意端口（默认）。
    #[default]
    Any,
    /// 绑定到指定端口。
    Fixed(u16),
}

/// 本地地址的绑定方式。
///
/// `Interface` 与 `Foreign` 的区别仅在于是否在套接字上启用透明代理：
/// 前者要求地址属于本机某个接口，后者属于外部主机。调用方需根据地址归属选择正确的变体。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrBinding {
    /// 不关心本地地址（默认）。
    #[default]
    Any,
    /// 绑定到本机接口地址。
    Interface(IpAddr),
    /// 透明绑定到外部地址。
    Foreign(IpAddr),
}

impl AddrBinding {
    /// 绑定方式的稳定名称，供日志与诊断使用。
    pub const fn style_name(&self) -> &'static str {
        match self {
            AddrBinding::Any => "any",
            AddrBinding::Interface(_) => "interface",
            AddrBinding::Foreign(_) => "foreign",
        }
    }

    /// 绑定的地址（`Any` 时为 `None`）。
    pub const fn addr(&self) -> Option<IpAddr> {
        match self {
            AddrBinding::Any => None,
            AddrBinding::Interface(addr) | AddrBinding::Foreign(addr) => Some(*addr),
        }
    }
}

impl fmt::Display for AddrBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.style_name())
    }
}

/// SOCKS 穿越开关。
///
/// 本层只建模 SOCKS 的"存在性"及其带来的地址覆盖效果，协议本身由外部实现。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocksSupport {
    /// 不使用 SOCKS（默认）。
    #[default]
    Disabled,
    /// 若可用则使用指定版本的 SOCKS。
    Enabled { version: u8 },
}

impl SocksSupport {
    /// 是否启用。
    pub const fn is_enabled(&self) -> bool {
        matches!(self, SocksSupport::Enabled { .. })
    }
}

/// 单个可配置的套接字选项。
///
/// 每个变体对应 [`SockOptFlags`] 中的一个独立位，位值必须保持 2 的幂。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SockOpt {
    /// `TCP_NODELAY`。
    NoDelay,
    /// `SO_KEEPALIVE`。
    KeepAlive,
}

impl SockOpt {
    /// 全部已知选项，按位值升序。
    pub const ALL: [SockOpt; 2] = [SockOpt::NoDelay, SockOpt::KeepAlive];

    /// 选项对应的掩码位。
    pub const fn bit(self) -> u32 {
        match self {
            SockOpt::NoDelay => 1,
            SockOpt::KeepAlive => 2,
        }
    }
}

/// 套接字选项集合。
///
/// 这些位并非内核选项值，而是专为配置定义的掩码；新增选项只需在 [`SockOpt`] 中追加变体。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<SockOpt>", into = "Vec<SockOpt>")]
pub struct SockOptFlags {
    bits: u32,
}

impl SockOptFlags {
    /// 空集合。
    pub const EMPTY: SockOptFlags = SockOptFlags { bits: 0 };
    /// 仅含 `NoDelay`。
    pub const NO_DELAY: SockOptFlags = SockOptFlags {
        bits: SockOpt::NoDelay.bit(),
    };
    /// 仅含 `KeepAlive`。
    pub const KEEP_ALIVE: SockOptFlags = SockOptFlags {
        bits: SockOpt::KeepAlive.bit(),
    };

    /// 原始掩码值。
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// 是否为空。
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// 是否包含指定选项。
    pub const fn contains(&self, opt: SockOpt) -> bool {
        self.bits & opt.bit() != 0
    }

    /// 加入选项。
    pub fn insert(&mut self, opt: SockOpt) {
        self.bits |= opt.bit();
    }

    /// 移除选项。
    pub fn remove(&mut self, opt: SockOpt) {
        self.bits &= !opt.bit();
    }

    /// 按位值升序遍历已设置的选项。
    pub fn iter(&self) -> impl Iterator<Item = SockOpt> + '_ {
        SockOpt::ALL.into_iter().filter(|opt| self.contains(*opt))
    }
}

impl BitOr for SockOptFlags {
    type Output = SockOptFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SockOptFlags {
            bits: self.bits | rhs.bits,
        }
    }
}

impl BitOrAssign for SockOptFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl From<SockOpt> for SockOptFlags {
    fn from(opt: SockOpt) -> Self {
        SockOptFlags { bits: opt.bit() }
    }
}

impl From<Vec<SockOpt>> for SockOptFlags {
    fn from(opts: Vec<SockOpt>) -> Self {
        opts.into_iter().fold(SockOptFlags::EMPTY, |acc, opt| acc | opt.into())
    }
}

impl From<SockOptFlags> for Vec<SockOpt> {
    fn from(flags: SockOptFlags) -> Self {
        flags.iter().collect()
    }
}

/// 连接应归属的执行器类别。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAffinity {
    /// 网络线程池（默认）。
    #[default]
    Net,
    /// TLS 线程池。
    Ssl,
    /// DNS 线程池。
    Dns,
    /// 宿主自定义的线程池编号。
    Custom(u8),
}

/// 由选项推导出的连接种类，是连接能力分派的封闭集合。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// 直连 TCP。
    Tcp,
    /// UDP。
    Udp,
    /// 经 SOCKS 代理的 TCP。
    Socks { version: u8 },
}

impl ConnectionKind {
    /// 稳定名称，用于日志字段。
    pub const fn name(&self) -> &'static str {
        match self {
            ConnectionKind::Tcp => "tcp",
            ConnectionKind::Udp => "udp",
            ConnectionKind::Socks { .. } => "socks",
        }
    }

    /// 是否支持带外数据。
    pub const fn supports_oob(&self) -> bool {
        !matches!(self, ConnectionKind::Udp)
    }
}

/// 建立连接时使用的参数集合。
///
/// 只需设置关心的字段，其余保持 [`Default`]（与 [`reset`](Self::reset) 相同）。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionOptions {
    /// IP 协议。
    pub protocol: IpProtocol,
    /// 本地端口绑定方式。
    pub local_port_binding: PortBinding,
    /// 本地地址绑定方式。
    pub local_addr_binding: AddrBinding,
    /// I/O 是否阻塞。基于事件循环的传输只接受 `false`。
    pub blocking: bool,
    /// 建连是否阻塞。
    pub blocking_connect: bool,
    /// SOCKS 开关。
    pub socks_support: SocksSupport,
    /// `SO_RCVBUF`，`None` 表示沿用内核默认。
    pub recv_bufsize: Option<u32>,
    /// `SO_SNDBUF`，`None` 表示沿用内核默认。
    pub send_bufsize: Option<u32>,
    /// 套接字选项集合。
    pub sockopt_flags: SockOptFlags,
    /// 执行器归属。
    pub execution_affinity: ExecutionAffinity,
}

impl ConnectionOptions {
    /// 创建默认选项。
    pub fn new() -> Self {
        Self::default()
    }

    /// 恢复全部字段为默认值。
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 批量设置套接字缓冲区与选项。
    pub fn set_sock_param(
        &mut self,
        recv_bufsize: Option<u32>,
        send_bufsize: Option<u32>,
        flags: SockOptFlags,
    ) {
        self.recv_bufsize = recv_bufsize;
        self.send_bufsize = send_bufsize;
        self.sockopt_flags = flags;
    }

    /// 从 TOML 文本解析并校验选项。
    ///
    /// 缺失的键回落到默认值，未知键会被拒绝。
    ///
    /// ```
    /// use spark_netvc::{ConnectionOptions, IpProtocol, SockOpt};
    ///
    /// let options = ConnectionOptions::from_toml_str(
    ///     r#"
    ///     protocol = "udp"
    ///     sockopt_flags = ["keep_alive"]
    ///     "#,
    /// )
    /// .expect("valid options");
    /// assert_eq!(options.protocol, IpProtocol::Udp);
    /// assert!(options.sockopt_flags.contains(SockOpt::KeepAlive));
    /// assert!(!options.blocking);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: ConnectionOptions = toml::from_str(text).map_err(|err| {
            NetError::configuration(codes::OPTIONS_PARSE, format!("connection options: {err}"))
        })?;
        options.validate()?;
        Ok(options)
    }

    /// 校验字段组合是否合法。
    pub fn validate(&self) -> Result<()> {
        if let SocksSupport::Enabled { version } = self.socks_support
            && !matches!(version, 4 | 5)
        {
            return Err(invalid(format!("unsupported SOCKS version {version}")));
        }
        if self.recv_bufsize == Some(0) || self.send_bufsize == Some(0) {
            return Err(invalid("socket buffer sizes must be positive"));
        }
        if let Some(addr) = self.local_addr_binding.addr()
            && addr.is_unspecified()
        {
            return Err(invalid(format!(
                "{} binding requires a concrete address",
                self.local_addr_binding
            )));
        }
        if self.local_port_binding == PortBinding::Fixed(0) {
            return Err(invalid("fixed port binding requires a non-zero port"));
        }
        Ok(())
    }

    /// 推导连接种类。UDP 不经过 SOCKS。
    pub fn connection_kind(&self) -> ConnectionKind {
        match (self.protocol, self.socks_support) {
            (IpProtocol::Udp, _) => ConnectionKind::Udp,
            (IpProtocol::Tcp, SocksSupport::Enabled { version }) => {
                ConnectionKind::Socks { version }
            }
            (IpProtocol::Tcp, SocksSupport::Disabled) => ConnectionKind::Tcp,
        }
    }

    /// 是否需要透明绑定。
    pub fn is_transparent(&self) -> bool {
        matches!(self.local_addr_binding, AddrBinding::Foreign(_))
    }

    /// 计算本地绑定地址；两条轴都是 `Any` 时返回 `None`，表示无需显式 bind。
    ///
    /// 地址轴为 `Any` 而端口固定时，使用与 `remote` 同族的未指定地址。
    pub fn local_bind_addr(&self, remote: SocketAddr) -> Option<SocketAddr> {
        let port = match self.local_port_binding {
            PortBinding::Any => 0,
            PortBinding::Fixed(port) => port,
        };
        match (self.local_addr_binding.addr(), port) {
            (None, 0) => None,
            (Some(ip), port) => Some(SocketAddr::new(ip, port)),
            (None, port) => {
                let unspecified = match remote {
                    SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                };
                Some(SocketAddr::new(unspecified, port))
            }
        }
    }
}

fn invalid(message: impl Into<std::borrow::Cow<'static, str>>) -> NetError {
    NetError::configuration(codes::INVALID_OPTIONS, message)
}
