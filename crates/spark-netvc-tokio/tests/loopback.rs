//! 回环地址上的端到端行为：读写、超时、半关闭、关闭方式与带外数据。
//!
//! 回调把事件种类送进 `mpsc` 通道，测试任务在通道上等待；`ReadReady`/`WriteReady`
//! 在回调内立即 `reenable`，模拟持续消费的状态机。

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use spark_netvc::{
    ByteCount, CloseCode, ConnectionOptions, Continuation, EventKind, EventOutcome, IoBuffer,
    IpProtocol, NetVConnection, ShutdownHowTo, VConnection, VcEvent, WriteSource, codes,
};
use spark_netvc_tokio::NetProcessor;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::mpsc::{self, UnboundedReceiver},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

fn channel_target() -> (Continuation, UnboundedReceiver<EventKind>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let target = Continuation::from_fn(move |vc, event| {
        if let VcEvent::ReadReady(ticket) | VcEvent::WriteReady(ticket) = &event {
            let _ = vc.reenable(ticket);
        }
        let _ = tx.send(event.kind());
        EventOutcome::Continue
    });
    (target, rx)
}

/// 等待直到收到 `kind`，返回途中看到的全部事件。
async fn wait_for(rx: &mut UnboundedReceiver<EventKind>, kind: EventKind) -> Vec<EventKind> {
    let mut seen = Vec::new();
    loop {
        let next = timeout(WAIT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("等待 {kind} 超时，已收到 {seen:?}"))
            .expect("事件通道不应提前关闭");
        seen.push(next);
        if next == kind {
            return seen;
        }
    }
}

async fn tcp_pair(options: &ConnectionOptions) -> (NetVConnection, TcpStream, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let processor = NetProcessor::new();
    let (vc, accepted) = tokio::join!(processor.connect(addr, options), listener.accept());
    let vc = vc.expect("回环连接必须成功");
    let (server, _) = accepted.unwrap();
    (vc, server, addr)
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_write_then_read_round_trip() {
    let (vc, mut server, _) = tcp_pair(&ConnectionOptions::default()).await;
    let (target, mut rx) = channel_target();

    vc.do_io_write(
        &target,
        ByteCount::Bounded(5),
        WriteSource::owned(Bytes::from_static(b"hello")),
    )
    .unwrap();
    let mut received = [0u8; 5];
    timeout(WAIT, server.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received, b"hello");
    wait_for(&mut rx, EventKind::WriteComplete).await;

    let buffer = IoBuffer::new();
    vc.do_io_read(&target, ByteCount::Bounded(5), buffer.clone())
        .unwrap();
    server.write_all(b"world").await.unwrap();
    wait_for(&mut rx, EventKind::ReadComplete).await;
    assert_eq!(buffer.take_all(), Bytes::from_static(b"world"));

    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn surplus_bytes_wait_for_the_next_read() {
    let (vc, mut server, _) = tcp_pair(&ConnectionOptions::default()).await;
    let (target, mut rx) = channel_target();
    server.write_all(b"abcdef").await.unwrap();

    let first = IoBuffer::new();
    vc.do_io_read(&target, ByteCount::Bounded(2), first.clone())
        .unwrap();
    wait_for(&mut rx, EventKind::ReadComplete).await;
    assert_eq!(first.take_all(), Bytes::from_static(b"ab"));

    let rest = IoBuffer::new();
    vc.do_io_read(&target, ByteCount::Bounded(4), rest.clone())
        .unwrap();
    wait_for(&mut rx, EventKind::ReadComplete).await;
    assert_eq!(rest.take_all(), Bytes::from_static(b"cdef"), "多读的字节不得丢失");

    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn inactivity_timeout_fires_on_an_idle_connection() {
    let (vc, _server, _) = tcp_pair(&ConnectionOptions::default()).await;
    let (target, mut rx) = channel_target();

    vc.do_io_read(&target, ByteCount::Unbounded, IoBuffer::new())
        .unwrap();
    {
        let _scope = vc.enter().unwrap();
        vc.set_inactivity_timeout(Duration::from_millis(100))
            .unwrap();
    }

    let seen = wait_for(&mut rx, EventKind::InactivityTimeout).await;
    assert_eq!(seen, vec![EventKind::InactivityTimeout]);
    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_close_delivers_eos() {
    let (vc, server, _) = tcp_pair(&ConnectionOptions::default()).await;
    let (target, mut rx) = channel_target();

    vc.do_io_read(&target, ByteCount::Unbounded, IoBuffer::new())
        .unwrap();
    drop(server);
    wait_for(&mut rx, EventKind::Eos).await;
    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn normal_close_sends_fin() {
    let (vc, mut server, _) = tcp_pair(&ConnectionOptions::default()).await;
    vc.do_io_close(CloseCode::Normal).unwrap();

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "协作关闭对端读到 EOF");
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_close_resets_the_peer() {
    let (vc, mut server, _) = tcp_pair(&ConnectionOptions::default()).await;
    vc.do_io_close(CloseCode::Abort).unwrap();

    let mut buf = [0u8; 8];
    let err = timeout(WAIT, server.read(&mut buf))
        .await
        .unwrap()
        .expect_err("中止关闭应当复位连接");
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_shutdown_reaches_the_peer() {
    let (vc, mut server, _) = tcp_pair(&ConnectionOptions::default()).await;
    vc.do_io_shutdown(ShutdownHowTo::Write).unwrap();

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    let (target, _rx) = channel_target();
    let err = vc
        .do_io_write(
            &target,
            ByteCount::Bounded(1),
            WriteSource::owned(Bytes::from_static(b"x")),
        )
        .unwrap_err();
    assert_eq!(err.code(), codes::DIRECTION_SHUTDOWN);
    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn addresses_come_from_the_socket() {
    let (vc, server, listen_addr) = tcp_pair(&ConnectionOptions::default()).await;

    assert_eq!(vc.get_remote_address().unwrap(), listen_addr);
    assert_eq!(vc.get_local_address().unwrap(), server.peer_addr().unwrap());
    assert_eq!(vc.remote_port().unwrap(), listen_addr.port());

    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_band_send_completes() {
    let (vc, _server, _) = tcp_pair(&ConnectionOptions::default()).await;
    let (target, mut rx) = channel_target();

    vc.send_oob(&target, Bytes::from_static(b"!")).unwrap();
    wait_for(&mut rx, EventKind::OobComplete).await;
    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn udp_datagrams_round_trip() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let options = ConnectionOptions {
        protocol: IpProtocol::Udp,
        ..ConnectionOptions::default()
    };
    let vc = NetProcessor::new()
        .connect(server.local_addr().unwrap(), &options)
        .await
        .unwrap();
    let (target, mut rx) = channel_target();

    let inbound = IoBuffer::new();
    vc.do_io_read(&target, ByteCount::Bounded(4), inbound.clone())
        .unwrap();
    vc.do_io_write(
        &target,
        ByteCount::Bounded(4),
        WriteSource::owned(Bytes::from_static(b"ping")),
    )
    .unwrap();

    let mut buf = [0u8; 16];
    let (n, peer) = timeout(WAIT, server.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(peer.port(), vc.local_port().unwrap());

    server.send_to(b"pong", peer).await.unwrap();
    wait_for(&mut rx, EventKind::ReadComplete).await;
    assert_eq!(inbound.take_all(), Bytes::from_static(b"pong"));
    vc.do_io_close(CloseCode::Normal).unwrap();
}

#[tokio::test]
async fn invalid_options_never_touch_the_network() {
    let options = ConnectionOptions {
        recv_bufsize: Some(0),
        ..ConnectionOptions::default()
    };
    let err = NetProcessor::new()
        .connect(SocketAddr::from(([127, 0, 0, 1], 9)), &options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_OPTIONS);
}

#[tokio::test]
async fn refused_connect_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = NetProcessor::new()
        .connect(addr, &ConnectionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), spark_netvc::ErrorKind::Transport);
    assert_eq!(err.code(), "spark.netvc.tokio.connect_failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_io_option_is_rejected() {
    let options = ConnectionOptions {
        blocking: true,
        ..ConnectionOptions::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let processor = NetProcessor::new();

    let err = processor.connect(addr, &options).await.unwrap_err();
    assert_eq!(err.code(), codes::UNSUPPORTED);
    assert_eq!(err.kind(), spark_netvc::ErrorKind::Unsupported);

    let (stream, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let err = processor
        .adopt_tcp(stream.unwrap(), &options)
        .unwrap_err();
    assert_eq!(err.code(), codes::UNSUPPORTED, "接管的流同样不能阻塞驱动");
}
