//! 建立连接并为每条连接启动驱动任务。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 调用方只关心"按这组选项连到这个地址"；套接字创建、选项下发、端点与唤醒器的装配、
//!   驱动任务的启动都收敛在 [`NetProcessor`] 中。
//!
//! ## 契约（What）
//! - `connect` 先校验选项，非法选项返回 `Configuration` 错误且不触碰网络；
//! - Tokio 只驱动非阻塞套接字，`blocking = true` 返回 `Unsupported`（`blocking_connect` 不受影响）；
//! - 返回的 [`NetVConnection`] 已由后台任务驱动，调用方可以立即 `do_io_read`/`do_io_write`；
//! - `adopt_tcp` 接管外部建立的 TCP 流（例如监听器接受的连接），只支持 TCP 选项；
//! - 必须在 Tokio 运行时中调用。
//!
//! ## 风险与考量（Trade-offs）
//! - 选项中的 SOCKS 配置只体现在 [`ConnectionKind`](spark_netvc::ConnectionKind) 上，
//!   这里不执行 SOCKS 握手。

use std::{net::SocketAddr, sync::Arc};

use spark_netvc::{
    Clock, ConnectionOptions, IpProtocol, NetError, NetVConnection, SystemClock, codes,
};
use tokio::{net::TcpStream, sync::Notify};

use crate::{
    driver::{Driver, NotifyWaker},
    socket::{self, SocketIo},
};

/// 以 Tokio 为运行时的连接工厂。
#[derive(Clone)]
pub struct NetProcessor {
    clock: Arc<dyn Clock>,
}

impl NetProcessor {
    /// 使用系统时钟。
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 注入时钟，连接的超时判定与驱动任务的定时器都以它为准。
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// 按选项连接 `remote`。
    pub async fn connect(
        &self,
        remote: SocketAddr,
        options: &ConnectionOptions,
    ) -> Result<NetVConnection, NetError> {
        check_options(options)?;
        let io = match options.protocol {
            IpProtocol::Tcp => {
                SocketIo::Tcp(Arc::new(socket::connect_tcp(remote, options).await?))
            }
            IpProtocol::Udp => {
                SocketIo::Udp(Arc::new(socket::connect_udp(remote, options).await?))
            }
        };
        tracing::debug!(
            remote = %remote,
            protocol = ?options.protocol,
            kind = ?options.connection_kind(),
            "connection established"
        );
        self.spawn(io, options)
    }

    /// 接管已建立的 TCP 流。
    pub fn adopt_tcp(
        &self,
        stream: TcpStream,
        options: &ConnectionOptions,
    ) -> Result<NetVConnection, NetError> {
        check_options(options)?;
        if options.protocol != IpProtocol::Tcp {
            return Err(NetError::configuration(
                codes::INVALID_OPTIONS,
                "adopted streams require TCP options",
            ));
        }
        socket::configure_adopted(&stream, options)?;
        self.spawn(SocketIo::Tcp(Arc::new(stream)), options)
    }

    fn spawn(&self, io: SocketIo, options: &ConnectionOptions) -> Result<NetVConnection, NetError> {
        let wake = Arc::new(Notify::new());
        let (vc, port) = NetVConnection::builder(options)
            .endpoint(io.endpoint())
            .clock(Arc::clone(&self.clock))
            .notifier(Arc::new(NotifyWaker::new(&wake)))
            .build()?;
        let driver = Driver::new(port, io, wake, Arc::clone(&self.clock));
        tokio::spawn(driver.run());
        Ok(vc)
    }
}

fn check_options(options: &ConnectionOptions) -> Result<(), NetError> {
    options.validate()?;
    if options.blocking {
        return Err(NetError::unsupported(
            "blocking socket I/O cannot be driven by the tokio transport",
        ));
    }
    Ok(())
}

impl Default for NetProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NetProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetProcessor").finish_non_exhaustive()
    }
}
