//! 本地/远端地址缓存与透明覆盖。
//!
//! 地址在第一次查询时向传输端点解析，之后在连接生命周期内保持不变，
//! 除非调用方显式 `refresh_addresses`。透明覆盖是叠加层：它改变"有效远端"，
//! 但不改写端点报告的字面对端地址。

use std::{io, net::SocketAddr};

/// 能够报告套接字地址的传输端点。
pub trait SocketEndpoint: Send + Sync + 'static {
    /// 本地地址。
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// 对端地址。
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// 已解析地址的缓存。`None` 表示尚未解析。
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AddressCache {
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
    pub(crate) transparent_override: Option<SocketAddr>,
}

impl AddressCache {
    /// 有效远端：覆盖优先。
    pub(crate) fn effective_remote(&self) -> Option<SocketAddr> {
        self.transparent_override.or(self.remote)
    }

    /// 丢弃解析结果，保留覆盖。
    pub(crate) fn invalidate(&mut self) {
        self.local = None;
        self.remote = None;
    }
}

/// 地址的哪一端。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Local,
    Remote,
}

impl Side {
    pub(crate) fn cached(self, cache: &AddressCache) -> Option<SocketAddr> {
        match self {
            Side::Local => cache.local,
            Side::Remote => cache.remote,
        }
    }

    /// 首次写入者胜出，保证"只解析一次"的可见语义。
    pub(crate) fn store(self, cache: &mut AddressCache, addr: SocketAddr) -> SocketAddr {
        let slot = match self {
            Side::Local => &mut cache.local,
            Side::Remote => &mut cache.remote,
        };
        *slot.get_or_insert(addr)
    }

    pub(crate) fn query(self, endpoint: &dyn SocketEndpoint) -> io::Result<SocketAddr> {
        match self {
            Side::Local => endpoint.local_addr(),
            Side::Remote => endpoint.peer_addr(),
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }
}
