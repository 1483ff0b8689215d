//! 按连接选项创建、配置并建立套接字。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - `ConnectionOptions` 描述"连接应当如何建立"；这里把它翻译成具体的套接字调用：
//!   缓冲区大小、`SO_KEEPALIVE`、`TCP_NODELAY`、本地绑定与透明代理所需的 `IP_TRANSPARENT`。
//!
//! ## 契约（What）
//! - 所有选项在 `connect` 之前生效（`TCP_NODELAY` 在建连后设置，效果等价）；
//! - `blocking_connect = true` 时在阻塞线程池上完成三次握手，完成后切回非阻塞交给 Tokio；
//! - SOCKS 协商不在本层：`socks_support` 只影响连接种类，这里直接连接目标地址。
//!
//! ## 实现（How）
//! - 用 `socket2::Socket` 创建原始套接字以便在 bind 之前设置选项，再转换为 Tokio 类型；
//! - [`SocketIo`] 封装驱动循环需要的非阻塞原语，TCP 与 UDP 共用同一套接口。

use std::{
    io,
    net::{Shutdown, SocketAddr},
    sync::Arc,
    time::Duration,
};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use spark_netvc::{AddrBinding, ConnectionOptions, NetError, SockOpt, SocketEndpoint};
use tokio::{
    io::Interest,
    net::{TcpSocket, TcpStream, UdpSocket},
};

use crate::{
    endpoint::WeakEndpoint,
    error::{self, map_io_error},
};

/// 驱动循环持有的套接字。
///
/// 驱动是唯一的强引用持有者：驱动结束即释放套接字，地址端点只保留弱引用。
#[derive(Debug)]
pub(crate) enum SocketIo {
    Tcp(Arc<TcpStream>),
    Udp(Arc<UdpSocket>),
}

impl SocketIo {
    /// 面向流的套接字：读到 0 字节表示对端关闭写方向。
    pub(crate) fn is_stream(&self) -> bool {
        matches!(self, SocketIo::Tcp(_))
    }

    pub(crate) async fn readable(&self) -> io::Result<()> {
        match self {
            SocketIo::Tcp(stream) => stream.readable().await,
            SocketIo::Udp(socket) => socket.readable().await,
        }
    }

    pub(crate) async fn writable(&self) -> io::Result<()> {
        match self {
            SocketIo::Tcp(stream) => stream.writable().await,
            SocketIo::Udp(socket) => socket.writable().await,
        }
    }

    pub(crate) fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SocketIo::Tcp(stream) => stream.try_read(buf),
            SocketIo::Udp(socket) => socket.try_recv(buf),
        }
    }

    pub(crate) fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketIo::Tcp(stream) => stream.try_write(buf),
            SocketIo::Udp(socket) => socket.try_send(buf),
        }
    }

    /// 以 `MSG_OOB` 发送；`WouldBlock` 会清除 Tokio 记录的写就绪。
    pub(crate) fn try_send_oob(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketIo::Tcp(stream) => stream.try_io(Interest::WRITABLE, || {
                SockRef::from(&**stream).send_out_of_band(buf)
            }),
            SocketIo::Udp(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "datagram sockets carry no out-of-band data",
            )),
        }
    }

    /// 半关闭。UDP 没有方向状态，直接忽略。
    pub(crate) fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match self {
            SocketIo::Tcp(stream) => SockRef::from(&**stream).shutdown(how),
            SocketIo::Udp(_) => Ok(()),
        }
    }

    /// 设置 `SO_LINGER = 0`，随后的释放会向对端发送 RST。
    pub(crate) fn abort(&self) -> io::Result<()> {
        match self {
            SocketIo::Tcp(stream) => SockRef::from(&**stream).set_linger(Some(Duration::ZERO)),
            SocketIo::Udp(_) => Ok(()),
        }
    }

    /// 只持有弱引用的地址端点。
    pub(crate) fn endpoint(&self) -> Arc<dyn SocketEndpoint> {
        let endpoint = match self {
            SocketIo::Tcp(stream) => WeakEndpoint::tcp(stream),
            SocketIo::Udp(socket) => WeakEndpoint::udp(socket),
        };
        Arc::new(endpoint)
    }
}

/// 按选项建立 TCP 连接。
pub(crate) async fn connect_tcp(
    remote: SocketAddr,
    options: &ConnectionOptions,
) -> Result<TcpStream, NetError> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| map_io_error(error::CONNECT, err))?;
    configure(&socket, options, true)?;
    bind_if_requested(&socket, options, remote)?;

    let stream = if options.blocking_connect {
        blocking_connect(socket, remote).await?
    } else {
        socket
            .set_nonblocking(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        TcpSocket::from_std_stream(socket.into())
            .connect(remote)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?
    };
    tune_stream(&stream, options)?;
    Ok(stream)
}

/// 按选项创建已连接的 UDP 套接字。未显式绑定时绑定到同族的任意地址。
pub(crate) async fn connect_udp(
    remote: SocketAddr,
    options: &ConnectionOptions,
) -> Result<UdpSocket, NetError> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|err| map_io_error(error::CONNECT, err))?;
    configure(&socket, options, false)?;
    let local = options
        .local_bind_addr(remote)
        .unwrap_or_else(|| unspecified_like(remote));
    bind(&socket, options, local)?;
    socket
        .set_nonblocking(true)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let socket =
        UdpSocket::from_std(socket.into()).map_err(|err| map_io_error(error::ADOPT, err))?;
    socket
        .connect(remote)
        .await
        .map_err(|err| map_io_error(error::CONNECT, err))?;
    Ok(socket)
}

/// 建连后才有意义的选项。
fn tune_stream(stream: &TcpStream, options: &ConnectionOptions) -> Result<(), NetError> {
    if options.sockopt_flags.contains(SockOpt::NoDelay) {
        stream
            .set_nodelay(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    }
    Ok(())
}

/// 对接管的流补齐缓冲区与保活选项。
pub(crate) fn configure_adopted(
    stream: &TcpStream,
    options: &ConnectionOptions,
) -> Result<(), NetError> {
    configure_ref(SockRef::from(stream), options, true)?;
    tune_stream(stream, options)
}

fn configure(socket: &Socket, options: &ConnectionOptions, stream: bool) -> Result<(), NetError> {
    configure_ref(SockRef::from(socket), options, stream)
}

fn configure_ref(
    sock: SockRef<'_>,
    options: &ConnectionOptions,
    stream: bool,
) -> Result<(), NetError> {
    let configure_err = |err| map_io_error(error::CONFIGURE, err);
    if let Some(size) = options.recv_bufsize {
        sock.set_recv_buffer_size(size as usize)
            .map_err(configure_err)?;
    }
    if let Some(size) = options.send_bufsize {
        sock.set_send_buffer_size(size as usize)
            .map_err(configure_err)?;
    }
    if stream && options.sockopt_flags.contains(SockOpt::KeepAlive) {
        sock.set_keepalive(true).map_err(configure_err)?;
    }
    Ok(())
}

fn bind_if_requested(
    socket: &Socket,
    options: &ConnectionOptions,
    remote: SocketAddr,
) -> Result<(), NetError> {
    match options.local_bind_addr(remote) {
        Some(local) => bind(socket, options, local),
        None => Ok(()),
    }
}

fn bind(socket: &Socket, options: &ConnectionOptions, local: SocketAddr) -> Result<(), NetError> {
    if let AddrBinding::Foreign(_) = options.local_addr_binding {
        enable_transparent(socket, local).map_err(|err| map_io_error(error::CONFIGURE, err))?;
    }
    socket
        .bind(&SockAddr::from(local))
        .map_err(|err| map_io_error(error::BIND, err))?;
    tracing::debug!(
        local = %local,
        binding = options.local_addr_binding.style_name(),
        "socket bound"
    );
    Ok(())
}

/// 允许绑定到不属于本机的地址，需要 `CAP_NET_ADMIN`。
#[cfg(target_os = "linux")]
fn enable_transparent(socket: &Socket, local: SocketAddr) -> io::Result<()> {
    match local {
        SocketAddr::V4(_) => socket.set_ip_transparent_v4(true),
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transparent binding is only available for IPv4",
        )),
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_transparent(_socket: &Socket, _local: SocketAddr) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "transparent binding requires IP_TRANSPARENT",
    ))
}

async fn blocking_connect(socket: Socket, remote: SocketAddr) -> Result<TcpStream, NetError> {
    let socket = tokio::task::spawn_blocking(move || {
        socket.connect(&SockAddr::from(remote))?;
        socket.set_nonblocking(true)?;
        Ok::<_, io::Error>(socket)
    })
    .await
    .map_err(|err| map_io_error(error::CONNECT, io::Error::other(err)))?
    .map_err(|err| map_io_error(error::CONNECT, err))?;
    TcpStream::from_std(socket.into()).map_err(|err| map_io_error(error::ADOPT, err))
}

fn unspecified_like(remote: SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
