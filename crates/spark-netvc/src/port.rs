//! 传输层端口：连接与底层套接字驱动之间的窄接口。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 连接本身不做 I/O。真正读写套接字、等待就绪、触发定时器的是传输层（事件循环、
//!   Tokio 任务或测试桩）。传输层通过 [`TransportPort`] 把进展"喂"给连接，再调用
//!   [`drain`](TransportPort::drain) 让连接把排队的事件投递给回调目标。
//!
//! ## 契约（What）
//! - `*_interest` 告诉传输层当前是否应当等待读/写就绪；
//! - `on_read`/`write_with`/`oob_send_with` 在持有数据时推进票据，并按需排队事件；
//! - `check_timeouts` 按注入时钟判定到期，`next_timeout_deadline` 给出下一次需要醒来的时刻；
//! - 所有钩子在连接关闭后都是无害的空操作；
//! - 任何会改变兴趣集合的状态变化都会调用 [`TransportNotifier::notify`]。
//!
//! ## 实现（How）
//! - 钩子只短暂持有状态锁；写源在真正写套接字时被临时取出，避免在锁内执行外部 I/O。

use std::{io, time::Instant};

use bytes::Buf;

use crate::{
    connection::{IoSignal, NetVConnection, Signal, TimeoutStage, VcState},
    event::{CloseCode, IoFailure},
    oob::OobOutcome,
    ticket::Direction,
};

/// 传输层唤醒器。
///
/// 连接在兴趣集合、定时器或生命周期发生变化时调用 `notify`，实现者应尽快让驱动循环重新检查端口。
pub trait TransportNotifier: Send + Sync + 'static {
    /// 唤醒驱动循环。
    fn notify(&self);
}

/// 一次排空的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainStatus {
    /// 队列已空（或连接已关闭）。
    Idle,
    /// 当前线程正在本连接的回调中，外层投递循环会在回调返回后继续。
    Deferred,
    /// 投递锁或目标锁被其它线程持有，稍后重试。
    Contended,
}

/// 连接两个方向的半关闭状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownState {
    pub read: bool,
    pub write: bool,
}

/// 传输层持有的连接端口。
#[derive(Clone, Debug)]
pub struct TransportPort {
    vc: NetVConnection,
}

impl TransportPort {
    pub(crate) fn new(vc: NetVConnection) -> Self {
        Self { vc }
    }

    /// 端口对应的连接。
    pub fn connection(&self) -> &NetVConnection {
        &self.vc
    }

    /// 是否应当等待读就绪。
    pub fn read_interest(&self) -> bool {
        let state = self.vc.shared.lock_state();
        !state.closed
            && !state.read_shutdown
            && state.read.as_ref().is_some_and(|slot| slot.meta.wants_io())
    }

    /// 当前读票据最多还能接收的字节数。
    pub fn read_capacity(&self) -> usize {
        let state = self.vc.shared.lock_state();
        if state.closed || state.read_shutdown {
            return 0;
        }
        state
            .read
            .as_ref()
            .filter(|slot| slot.meta.wants_io())
            .map_or(0, |slot| slot.meta.capacity())
    }

    /// 交付读到的字节，返回被接收的字节数。
    ///
    /// 超出票据剩余量或票据暂停时多余字节不会被接收，传输层需自行保留。
    pub fn on_read(&self, data: &[u8]) -> usize {
        let now = self.vc.shared.clock.now();
        let mut state = self.vc.shared.lock_state();
        if state.closed || state.read_shutdown {
            return 0;
        }
        let Some(slot) = state.read.as_mut().filter(|slot| slot.meta.wants_io()) else {
            return 0;
        };
        let accepted = data.len().min(slot.meta.capacity());
        if accepted == 0 {
            return 0;
        }
        slot.buffer.append(&data[..accepted]);
        slot.meta.ndone += accepted as u64;
        let signal = if slot.meta.nbytes.is_satisfied(slot.meta.ndone) {
            slot.meta.finished = true;
            IoSignal::Complete
        } else {
            slot.meta.enabled = false;
            IoSignal::Ready
        };
        let generation = slot.meta.generation();
        state.timeouts.record_activity(now);
        state.push(Direction::Read, generation, signal);
        drop(state);
        tracing::trace!(
            connection.id = self.vc.id(),
            direction = "read",
            bytes = accepted,
            "read progress"
        );
        accepted
    }

    /// 对端关闭了读方向。
    pub fn on_read_eof(&self) {
        let mut state = self.vc.shared.lock_state();
        if state.closed {
            return;
        }
        state.peer_eof = true;
        finish_with(&mut state, Direction::Read, IoSignal::Eos);
    }

    /// 读方向发生传输错误。
    pub fn on_read_error(&self, err: &io::Error) {
        self.on_error(Direction::Read, err);
    }

    /// 是否应当等待写就绪。
    pub fn write_interest(&self) -> bool {
        let state = self.vc.shared.lock_state();
        !state.closed
            && !state.write_shutdown
            && state.write.as_ref().is_some_and(|slot| slot.meta.wants_io())
    }

    /// 从写源取出下一段连续字节交给 `sink`，按其返回值推进票据。
    ///
    /// - 写源为空而票据未完成时，排队 `WriteReady` 并暂停票据，返回 `Ok(0)`；
    /// - `sink` 的错误原样返回，由传输层决定是否调用 [`on_write_error`](Self::on_write_error)；
    /// - 写入期间票据被取代或连接被关闭时，`Owned` 写源在这里被释放。
    pub fn write_with<F>(&self, sink: F) -> io::Result<usize>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        let (generation, limit, mut source) = {
            let mut state = self.vc.shared.lock_state();
            if state.closed || state.write_shutdown {
                return Ok(0);
            }
            let Some(slot) = state.write.as_mut().filter(|slot| slot.meta.wants_io()) else {
                return Ok(0);
            };
            let Some(source) = slot.source.take() else {
                return Ok(0);
            };
            (slot.meta.generation(), slot.meta.capacity(), source)
        };

        let result = if source.remaining() == 0 {
            Ok(0)
        } else {
            source.drain_into(limit, sink)
        };
        let exhausted = source.remaining() == 0;

        let now = self.vc.shared.clock.now();
        let mut released = None;
        {
            let mut state = self.vc.shared.lock_state();
            let closed = state.closed;
            match state
                .write
                .as_mut()
                .filter(|slot| !closed && slot.meta.generation() == generation)
            {
                None => released = Some(source),
                Some(slot) => {
                    let signal = match &result {
                        Ok(0) if exhausted => {
                            slot.meta.enabled = false;
                            Some(IoSignal::Ready)
                        }
                        Ok(n) if *n > 0 => {
                            slot.meta.ndone += *n as u64;
                            if slot.meta.nbytes.is_satisfied(slot.meta.ndone) {
                                slot.meta.finished = true;
                                Some(IoSignal::Complete)
                            } else {
                                None
                            }
                        }
                        _ => None,
                    };
                    if matches!(signal, Some(IoSignal::Complete)) {
                        released = Some(source);
                    } else {
                        slot.source = Some(source);
                    }
                    if matches!(result, Ok(n) if n > 0) {
                        state.timeouts.record_activity(now);
                    }
                    if let Some(signal) = signal {
                        state.push(Direction::Write, generation, signal);
                    }
                }
            }
        }
        drop(released);
        if let Ok(n) = result
            && n > 0
        {
            tracing::trace!(
                connection.id = self.vc.id(),
                direction = "write",
                bytes = n,
                "write progress"
            );
        }
        result
    }

    /// 写方向发生传输错误。
    pub fn on_write_error(&self, err: &io::Error) {
        self.on_error(Direction::Write, err);
    }

    /// 是否有待发送的带外数据。
    pub fn oob_pending(&self) -> bool {
        let state = self.vc.shared.lock_state();
        !state.closed
            && state
                .oob
                .as_ref()
                .is_some_and(|slot| slot.outcome.is_none())
    }

    /// 发送带外数据的剩余部分。全部发出后排队 `OobComplete`。
    pub fn oob_send_with<F>(&self, sink: F) -> io::Result<usize>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        let (id, data) = {
            let state = self.vc.shared.lock_state();
            if state.closed {
                return Ok(0);
            }
            match state.oob.as_ref().filter(|slot| slot.outcome.is_none()) {
                Some(slot) => (slot.id, slot.remaining.clone()),
                None => return Ok(0),
            }
        };
        let written = sink(&data)?.min(data.len());

        let mut state = self.vc.shared.lock_state();
        if state.closed {
            return Ok(written);
        }
        let completed = match state
            .oob
            .as_mut()
            .filter(|slot| slot.id == id && slot.outcome.is_none())
        {
            Some(slot) => {
                slot.remaining.advance(written.min(slot.remaining.len()));
                if slot.remaining.is_empty() {
                    slot.outcome = Some(OobOutcome::Sent);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if completed {
            state.queue.push_back(Signal::Oob { id });
        }
        Ok(written)
    }

    /// 带外发送期间对端关闭。
    pub fn on_oob_peer_closed(&self) {
        let mut state = self.vc.shared.lock_state();
        if state.closed {
            return;
        }
        let id = match state.oob.as_mut().filter(|slot| slot.outcome.is_none()) {
            Some(slot) => {
                slot.outcome = Some(OobOutcome::PeerClosed);
                slot.id
            }
            None => return,
        };
        state.queue.push_back(Signal::Oob { id });
    }

    /// 判定超时；返回本次触发的超时个数。
    ///
    /// 没有任何活动票据时到期的超时保持待触发，直到出现票据。
    pub fn check_timeouts(&self) -> usize {
        let now = self.vc.shared.clock.now();
        let mut state = self.vc.shared.lock_state();
        if state.closed || !state.has_live_ticket() {
            return 0;
        }
        let fired = state.timeouts.take_expired(now);
        for kind in &fired {
            state.queue.push_back(Signal::Timeout {
                kind: *kind,
                stage: TimeoutStage::ReadSide,
            });
        }
        drop(state);
        for kind in &fired {
            tracing::debug!(
                connection.id = self.vc.id(),
                timeout.kind = kind.as_str(),
                "timeout fired"
            );
        }
        fired.len()
    }

    /// 下一次需要检查超时的时刻；没有活动票据时为 `None`。
    pub fn next_timeout_deadline(&self) -> Option<Instant> {
        let state = self.vc.shared.lock_state();
        if state.closed || !state.has_live_ticket() {
            return None;
        }
        state.timeouts.next_deadline()
    }

    /// 投递排队的事件。
    pub fn drain(&self) -> DrainStatus {
        self.vc.drain()
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.vc.shared.lock_state().closed
    }

    /// 关闭方式；未关闭时为 `None`。
    pub fn close_code(&self) -> Option<CloseCode> {
        self.vc.shared.lock_state().close_code
    }

    /// 半关闭状态。
    pub fn shutdown_state(&self) -> ShutdownState {
        let state = self.vc.shared.lock_state();
        ShutdownState {
            read: state.read_shutdown,
            write: state.write_shutdown,
        }
    }

    fn on_error(&self, direction: Direction, err: &io::Error) {
        let mut state = self.vc.shared.lock_state();
        if state.closed {
            return;
        }
        let failure = IoFailure::from(err);
        if finish_with(&mut state, direction, IoSignal::Error(failure)) {
            drop(state);
            tracing::debug!(
                connection.id = self.vc.id(),
                direction = direction.as_str(),
                error = %err,
                "transport error"
            );
        }
    }
}

/// 结束某方向的活动票据并排队事件；没有可结束的票据时返回 `false`。
fn finish_with(state: &mut VcState, direction: Direction, signal: IoSignal) -> bool {
    if state.is_shutdown(direction) {
        return false;
    }
    let meta = match direction {
        Direction::Read => state.read.as_mut().map(|slot| &mut slot.meta),
        Direction::Write => state.write.as_mut().map(|slot| &mut slot.meta),
    };
    let Some(meta) = meta.filter(|meta| !meta.finished) else {
        return false;
    };
    meta.finished = true;
    let generation = meta.generation();
    state.push(direction, generation, signal);
    true
}
