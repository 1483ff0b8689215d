//! 集成测试共用的桩件：事件记录器、可控端点与带释放计数的写源。
#![allow(dead_code)]

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use spark_netvc::{
    ConnectionOptions, Continuation, Direction, EventKind, EventOutcome, MockClock,
    NetVConnection, SocketEndpoint, TransportPort, VcEvent,
};

/// 使用虚拟时钟创建默认选项的连接。
pub fn connection() -> (NetVConnection, TransportPort, MockClock) {
    connection_with(&ConnectionOptions::default())
}

/// 使用虚拟时钟与指定选项创建连接。
pub fn connection_with(options: &ConnectionOptions) -> (NetVConnection, TransportPort, MockClock) {
    let clock = MockClock::new();
    let (vc, port) = NetVConnection::builder(options)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("默认选项必须能构造连接");
    (vc, port, clock)
}

/// 一次被观察到的投递。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seen {
    pub label: &'static str,
    pub kind: EventKind,
    pub direction: Option<Direction>,
}

/// 按投递顺序记录所有目标收到的事件。
#[derive(Clone, Default)]
pub struct EventLog {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl EventLog {
    pub fn record(&self, label: &'static str, event: &VcEvent) {
        self.seen.lock().push(Seen {
            label,
            kind: event.kind(),
            direction: event.ticket().map(|ticket| ticket.direction()),
        });
    }

    /// 只记录、固定返回 `outcome` 的目标。
    pub fn target(&self, label: &'static str, outcome: EventOutcome) -> Continuation {
        let log = self.clone();
        Continuation::from_fn(move |_vc, event| {
            log.record(label, &event);
            outcome
        })
    }

    /// 记录并在 `Ready` 事件上立即 `reenable` 的目标。
    pub fn reenabling_target(&self, label: &'static str) -> Continuation {
        let log = self.clone();
        Continuation::from_fn(move |vc, event| {
            log.record(label, &event);
            if let VcEvent::ReadReady(ticket) | VcEvent::WriteReady(ticket) = &event {
                spark_netvc::VConnection::reenable(vc, ticket).expect("回调内 reenable 必须合法");
            }
            EventOutcome::Continue
        })
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn kinds(&self) -> Vec<(&'static str, EventKind)> {
        self.seen
            .lock()
            .iter()
            .map(|seen| (seen.label, seen.kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// 固定地址、统计查询次数的端点。
pub struct StaticEndpoint {
    pub local: SocketAddr,
    pub peer: SocketAddr,
    pub queries: AtomicUsize,
}

impl StaticEndpoint {
    pub fn new(local: &str, peer: &str) -> Arc<Self> {
        Arc::new(Self {
            local: local.parse().expect("合法本地地址"),
            peer: peer.parse().expect("合法对端地址"),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SocketEndpoint for StaticEndpoint {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.local)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.peer)
    }
}

/// 析构时计数的写源，用于验证 `Owned` 缓冲恰好释放一次。
pub struct TrackedBuf {
    inner: Bytes,
    drops: Arc<AtomicUsize>,
}

impl TrackedBuf {
    pub fn new(len: usize, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            inner: Bytes::from(vec![0x5a; len]),
            drops: Arc::clone(drops),
        }
    }
}

impl Buf for TrackedBuf {
    fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.inner.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.inner.advance(cnt);
    }
}

impl Drop for TrackedBuf {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// 把 `sink` 收到的字节全部接收并追加到 `wire`。
pub fn accept_all(wire: &mut Vec<u8>) -> impl FnOnce(&[u8]) -> io::Result<usize> + '_ {
    move |chunk| {
        wire.extend_from_slice(chunk);
        Ok(chunk.len())
    }
}
