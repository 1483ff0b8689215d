//! 连接契约的随机序列性质。
//!
//! # 教案级说明
//!
//! - **Why**：票据取代、半关闭、关闭与超时交织在一起时，手写用例很难覆盖所有交错；
//!   这里用 proptest 生成任意操作序列，驱动真实的 `NetVConnection` 与 `TransportPort`。
//! - **What**：对任意序列断言三条性质：
//!   1. `do_io_close` 返回之后不再有任何回调；
//!   2. `do_io_shutdown` 返回之后不再有被关闭方向的事件；
//!   3. 每个方向最多一张活动票据，且事件只投递给当时的活动票据。
//! - **How**：回调目标把违规写入共享记录而不是直接 panic，避免回调中的 panic 污染连接锁；
//!   序列结束后统一断言。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use proptest::prelude::*;
use spark_netvc::{
    ByteCount, CloseCode, Continuation, Direction, EventOutcome, IoBuffer, ShutdownHowTo, Ticket,
    VConnection, VcEvent, WriteSource,
};

#[derive(Clone, Debug)]
enum Op {
    Read(Option<u8>),
    Write(u8),
    Feed(u8),
    Flush,
    Eof,
    Shutdown(ShutdownHowTo),
    Close,
    Arm(u8),
    Tick(u8),
    Drain,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => proptest::option::of(0u8..8).prop_map(Op::Read),
        3 => (0u8..8).prop_map(Op::Write),
        4 => (1u8..6).prop_map(Op::Feed),
        3 => Just(Op::Flush),
        1 => Just(Op::Eof),
        1 => prop_oneof![
            Just(ShutdownHowTo::Read),
            Just(ShutdownHowTo::Write),
            Just(ShutdownHowTo::Both),
        ]
        .prop_map(Op::Shutdown),
        1 => Just(Op::Close),
        2 => (1u8..4).prop_map(Op::Arm),
        2 => (0u8..4).prop_map(Op::Tick),
        4 => Just(Op::Drain),
    ]
}

#[derive(Default)]
struct Observations {
    closed: AtomicBool,
    read_shutdown: AtomicBool,
    write_shutdown: AtomicBool,
    violations: Mutex<Vec<String>>,
}

impl Observations {
    fn violate(&self, message: String) {
        self.violations.lock().push(message);
    }
}

fn observing_target(observations: &Arc<Observations>) -> Continuation {
    let observations = Arc::clone(observations);
    Continuation::from_fn(move |vc, event| {
        if observations.closed.load(Ordering::SeqCst) {
            observations.violate(format!("{} delivered after close", event.kind()));
        }
        if let Some(ticket) = event.ticket() {
            let shut = match ticket.direction() {
                Direction::Read => &observations.read_shutdown,
                Direction::Write => &observations.write_shutdown,
            };
            if shut.load(Ordering::SeqCst) {
                observations.violate(format!(
                    "{} delivered after {} shutdown",
                    event.kind(),
                    ticket.direction()
                ));
            }
            if ticket.progress().is_none() {
                observations.violate(format!("{} delivered to a stale ticket", event.kind()));
            }
        }
        if let VcEvent::ReadReady(ticket) | VcEvent::WriteReady(ticket) = &event
            && let Err(err) = vc.reenable(ticket)
        {
            observations.violate(format!("reenable inside callback failed: {err}"));
        }
        EventOutcome::Continue
    })
}

fn run(ops: Vec<Op>) -> Vec<String> {
    let (vc, port, clock) = support::connection();
    let observations = Arc::new(Observations::default());
    let target = observing_target(&observations);
    let mut issued: Vec<Ticket> = Vec::new();

    for op in ops {
        match op {
            Op::Read(n) => {
                let nbytes = n.map_or(ByteCount::Unbounded, |n| ByteCount::Bounded(n.into()));
                if let Ok(ticket) = vc.do_io_read(&target, nbytes, IoBuffer::new()) {
                    issued.push(ticket);
                }
            }
            Op::Write(n) => {
                let source = WriteSource::owned(Bytes::from(vec![0u8; usize::from(n)]));
                if let Ok(ticket) = vc.do_io_write(&target, ByteCount::Bounded(n.into()), source) {
                    issued.push(ticket);
                }
            }
            Op::Feed(n) => {
                port.on_read(&vec![1u8; usize::from(n)]);
            }
            Op::Flush => {
                let _ = port.write_with(|chunk| Ok(chunk.len().min(3)));
            }
            Op::Eof => port.on_read_eof(),
            Op::Shutdown(howto) => {
                if vc.do_io_shutdown(howto).is_ok() {
                    if howto.includes_read() {
                        observations.read_shutdown.store(true, Ordering::SeqCst);
                    }
                    if howto.includes_write() {
                        observations.write_shutdown.store(true, Ordering::SeqCst);
                    }
                }
            }
            Op::Close => {
                if vc.do_io_close(CloseCode::Normal).is_ok() {
                    observations.closed.store(true, Ordering::SeqCst);
                }
            }
            Op::Arm(secs) => {
                if let Ok(_scope) = vc.enter() {
                    let delay = Duration::from_secs(secs.into());
                    let _ = vc.set_inactivity_timeout(delay);
                }
            }
            Op::Tick(secs) => {
                clock.advance(Duration::from_secs(secs.into()));
                port.check_timeouts();
            }
            Op::Drain => {
                port.drain();
            }
        }

        for direction in [Direction::Read, Direction::Write] {
            let live = issued
                .iter()
                .filter(|ticket| ticket.direction() == direction && ticket.progress().is_some())
                .count();
            if live > 1 {
                observations.violate(format!("{live} live {direction} tickets"));
            }
        }
    }
    port.drain();

    let violations = observations.violations.lock().clone();
    violations
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_arbitrary_sequences_respect_the_lifecycle(
        ops in proptest::collection::vec(op_strategy(), 1..48)
    ) {
        let violations = run(ops);
        prop_assert!(violations.is_empty(), "违反契约：{violations:?}");
    }

    #[test]
    fn prop_operations_after_close_are_rejected(
        prefix in proptest::collection::vec(op_strategy(), 0..16)
    ) {
        let (vc, port, _clock) = support::connection();
        let observations = Arc::new(Observations::default());
        let target = observing_target(&observations);
        for op in prefix {
            if let Op::Read(n) = op {
                let nbytes = n.map_or(ByteCount::Unbounded, |n| ByteCount::Bounded(n.into()));
                let _ = vc.do_io_read(&target, nbytes, IoBuffer::new());
            }
        }
        vc.do_io_close(CloseCode::Abort).expect("首次关闭必须成功");
        observations.closed.store(true, Ordering::SeqCst);

        prop_assert_eq!(port.on_read(b"late"), 0);
        prop_assert!(!port.read_interest());
        prop_assert!(!port.write_interest());
        prop_assert!(vc.do_io_read(&target, ByteCount::Unbounded, IoBuffer::new()).is_err());
        prop_assert!(vc.do_io_close(CloseCode::Normal).unwrap_err().is_contract_violation());
        port.drain();
        prop_assert!(observations.violations.lock().is_empty());
    }
}
