//! 以弱引用暴露套接字地址。
//!
//! 连接的地址缓存在首次查询时才向端点取值；端点若持有强引用，套接字会一直活到最后一个
//! 连接句柄被丢弃，中止关闭就无法及时发出 RST。因此端点只保留弱引用，驱动释放套接字后
//! 查询返回 `NotConnected`。

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Weak},
};

use spark_netvc::SocketEndpoint;
use tokio::net::{TcpStream, UdpSocket};

#[derive(Debug)]
pub(crate) enum WeakEndpoint {
    Tcp(Weak<TcpStream>),
    Udp(Weak<UdpSocket>),
}

impl WeakEndpoint {
    pub(crate) fn tcp(stream: &Arc<TcpStream>) -> Self {
        WeakEndpoint::Tcp(Arc::downgrade(stream))
    }

    pub(crate) fn udp(socket: &Arc<UdpSocket>) -> Self {
        WeakEndpoint::Udp(Arc::downgrade(socket))
    }

    fn query(
        &self,
        tcp: impl FnOnce(&TcpStream) -> io::Result<SocketAddr>,
        udp: impl FnOnce(&UdpSocket) -> io::Result<SocketAddr>,
    ) -> io::Result<SocketAddr> {
        match self {
            WeakEndpoint::Tcp(stream) => stream.upgrade().map(|stream| tcp(&stream)),
            WeakEndpoint::Udp(socket) => socket.upgrade().map(|socket| udp(&socket)),
        }
        .unwrap_or_else(|| Err(io::ErrorKind::NotConnected.into()))
    }
}

impl SocketEndpoint for WeakEndpoint {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.query(TcpStream::local_addr, UdpSocket::local_addr)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.query(TcpStream::peer_addr, UdpSocket::peer_addr)
    }
}
