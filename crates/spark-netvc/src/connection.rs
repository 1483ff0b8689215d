//! 连接生命周期状态机与事件投递。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 连接对外是一份契约：回调何时触发、以何种顺序、在哪把锁下、关闭之后还能做什么。
//!   这些约束一旦被破坏，就会出现关闭后回调、重复投递、丢失唤醒等并发缺陷。
//! - 因此本模块不直接执行 I/O，而是维护票据、半关闭、超时与带外状态，并由一个统一的
//!   投递循环决定"是否、以何种顺序、向谁"投递事件。
//!
//! ## 契约（What）
//! - 状态：`Active` → 各方向可独立进入 `Shutdown` → 终态 `Closed`（吸收态，只进入一次）；
//! - 每个方向同时最多一张票据，新的 `do_io_*` 取代旧票据；
//! - 方向半关闭后不再投递该方向的事件，关闭后不再投递任何事件；
//! - 超时与 `reenable` 只能在本连接的回调作用域内调用；
//! - 违反契约的调用返回 [`ErrorKind::ContractViolation`](crate::ErrorKind::ContractViolation)。
//!
//! ## 实现（How）
//! - 事件先入队（`Signal`），由投递循环出队并在投递时刻重新校验关闭标志、半关闭标志与票据代次；
//! - 投递循环持有连接的投递锁（`ReentrantMutex`）与目标锁，回调期间二者都不释放；
//!   `do_io_close`、`do_io_shutdown`、`do_io_read`/`do_io_write` 与带外取消都会先获取投递锁，
//!   因而要么等待其它线程上正在运行的回调结束，要么在回调内部重入；
//! - 同一线程上已有回调在运行时再次请求排空会得到 `Deferred`，外层循环在回调返回后继续投递，
//!   保证普通事件不重入；`reenable_re` 是唯一的显式重入入口。
//!
//! ## 风险提示（Trade-offs）
//! - 线程 A 在连接 X 的回调中关闭连接 Y，同时线程 B 在 Y 的回调中关闭 X，会互相等待对方的投递锁。
//!   跨连接的关闭应交给各自的回调或执行器完成。

use std::{
    cell::Cell,
    collections::VecDeque,
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, trace, warn};

use crate::{
    address::{AddressCache, Side, SocketEndpoint},
    buffer::{IoBuffer, WriteSource},
    clock::{Clock, SystemClock},
    continuation::Continuation,
    detailed_log::{DetailedLog, NoopDetailedLog},
    error::{ErrorKind, NetError, Result, codes},
    event::{CloseCode, EventOutcome, IoFailure, ShutdownHowTo, TimeoutKind, VcEvent},
    oob::{OobHandle, OobOutcome, OobSlot},
    options::{ConnectionKind, ConnectionOptions},
    port::{DrainStatus, TransportNotifier, TransportPort},
    ticket::{ByteCount, Direction, Progress, Ticket},
    timeout::TimeoutPair,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 通用连接能力：读、写、关闭、半关闭与票据重新启用。
pub trait VConnection {
    /// 登记读票据，取代同方向上的旧票据。
    fn do_io_read(
        &self,
        target: &Continuation,
        nbytes: ByteCount,
        buffer: IoBuffer,
    ) -> Result<Ticket>;

    /// 登记写票据，取代同方向上的旧票据；`source` 的变体决定缓冲由谁释放。
    fn do_io_write(
        &self,
        target: &Continuation,
        nbytes: ByteCount,
        source: WriteSource,
    ) -> Result<Ticket>;

    /// 终止连接并释放全部资源；返回后不再有任何回调。
    fn do_io_close(&self, code: CloseCode) -> Result<()>;

    /// 停止某个方向的 I/O 与事件投递，不释放资源。
    fn do_io_shutdown(&self, howto: ShutdownHowTo) -> Result<()>;

    /// 在回调中重新启用被暂停的票据。
    fn reenable(&self, ticket: &Ticket) -> Result<()>;

    /// 与 `reenable` 相同，但会在当前调用链上立即重入投递已排队的事件。
    fn reenable_re(&self, ticket: &Ticket) -> Result<()>;
}

/// 票据的公共簿记部分。
pub(crate) struct SlotMeta {
    pub(crate) ticket: Ticket,
    pub(crate) target: Continuation,
    pub(crate) nbytes: ByteCount,
    pub(crate) ndone: u64,
    /// `ReadReady`/`WriteReady` 之后为 `false`，直到 `reenable`。
    pub(crate) enabled: bool,
    /// 已完成、遇到 EOS 或出错，不再参与 I/O 与超时。
    pub(crate) finished: bool,
}

impl SlotMeta {
    fn new(ticket: Ticket, target: Continuation, nbytes: ByteCount) -> Self {
        let finished = nbytes.is_satisfied(0);
        Self {
            ticket,
            target,
            nbytes,
            ndone: 0,
            enabled: true,
            finished,
        }
    }

    pub(crate) fn wants_io(&self) -> bool {
        self.enabled && !self.finished
    }

    /// 本次最多还能搬运的字节数。
    pub(crate) fn capacity(&self) -> usize {
        match self.nbytes.remaining(self.ndone) {
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => usize::MAX,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.ticket.generation()
    }
}

pub(crate) struct ReadSlot {
    pub(crate) meta: SlotMeta,
    pub(crate) buffer: IoBuffer,
}

pub(crate) struct WriteSlot {
    pub(crate) meta: SlotMeta,
    /// 完成后置空；`Owned` 写源随之释放。I/O 进行中被传输层暂时取走。
    pub(crate) source: Option<WriteSource>,
}

/// 票据事件的负载。
#[derive(Clone, Copy, Debug)]
pub(crate) enum IoSignal {
    Ready,
    Complete,
    Eos,
    Error(IoFailure),
}

/// 超时仲裁的阶段。
#[derive(Clone, Debug)]
pub(crate) enum TimeoutStage {
    ReadSide,
    /// `skip` 为读侧已经通知过的目标。
    WriteSide { skip: Option<Continuation> },
}

/// 排队等待投递的信号。
#[derive(Clone, Debug)]
pub(crate) enum Signal {
    Io {
        direction: Direction,
        generation: u64,
        event: IoSignal,
    },
    Timeout {
        kind: TimeoutKind,
        stage: TimeoutStage,
    },
    Oob {
        id: u64,
    },
}

impl Signal {
    fn on_direction(&self, direction: Direction) -> bool {
        matches!(self, Signal::Io { direction: d, .. } if *d == direction)
    }
}

/// 由锁保护的连接状态。
pub(crate) struct VcState {
    pub(crate) closed: bool,
    pub(crate) close_code: Option<CloseCode>,
    pub(crate) read_shutdown: bool,
    pub(crate) write_shutdown: bool,
    /// 对端已关闭读方向，之后登记的读票据立即得到 `Eos`。
    pub(crate) peer_eof: bool,
    pub(crate) read: Option<ReadSlot>,
    pub(crate) write: Option<WriteSlot>,
    next_generation: u64,
    pub(crate) timeouts: TimeoutPair,
    pub(crate) addresses: AddressCache,
    pub(crate) oob: Option<OobSlot>,
    next_oob_id: u64,
    pub(crate) queue: VecDeque<Signal>,
    internal_request: bool,
    attributes: u32,
}

impl VcState {
    fn new() -> Self {
        Self {
            closed: false,
            close_code: None,
            read_shutdown: false,
            write_shutdown: false,
            peer_eof: false,
            read: None,
            write: None,
            next_generation: 1,
            timeouts: TimeoutPair::default(),
            addresses: AddressCache::default(),
            oob: None,
            next_oob_id: 1,
            queue: VecDeque::new(),
            internal_request: false,
            attributes: 0,
        }
    }

    pub(crate) fn is_shutdown(&self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read_shutdown,
            Direction::Write => self.write_shutdown,
        }
    }

    pub(crate) fn meta(&self, direction: Direction) -> Option<&SlotMeta> {
        match direction {
            Direction::Read => self.read.as_ref().map(|slot| &slot.meta),
            Direction::Write => self.write.as_ref().map(|slot| &slot.meta),
        }
    }

    fn meta_mut(&mut self, direction: Direction) -> Option<&mut SlotMeta> {
        match direction {
            Direction::Read => self.read.as_mut().map(|slot| &mut slot.meta),
            Direction::Write => self.write.as_mut().map(|slot| &mut slot.meta),
        }
    }

    /// 可以接收超时通知的票据：存在、未结束、方向未半关闭。
    fn timeout_candidate(&self, direction: Direction) -> Option<&SlotMeta> {
        if self.is_shutdown(direction) {
            return None;
        }
        self.meta(direction).filter(|meta| !meta.finished)
    }

    pub(crate) fn has_live_ticket(&self) -> bool {
        self.timeout_candidate(Direction::Read).is_some()
            || self.timeout_candidate(Direction::Write).is_some()
    }

    pub(crate) fn push(&mut self, direction: Direction, generation: u64, event: IoSignal) {
        self.queue.push_back(Signal::Io {
            direction,
            generation,
            event,
        });
    }

    fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// 在投递时刻解析信号：返回应当接收事件的目标，或 `None` 表示信号已失效。
    fn resolve(&self, shared: &Arc<Shared>, signal: &Signal) -> Option<Delivery> {
        match signal {
            Signal::Io {
                direction,
                generation,
                event,
            } => {
                if self.is_shutdown(*direction) {
                    return None;
                }
                let meta = self
                    .meta(*direction)
                    .filter(|meta| meta.generation() == *generation)?;
                let ticket = meta.ticket.clone();
                let event = match (event, direction) {
                    (IoSignal::Ready, Direction::Read) => VcEvent::ReadReady(ticket),
                    (IoSignal::Ready, Direction::Write) => VcEvent::WriteReady(ticket),
                    (IoSignal::Complete, Direction::Read) => VcEvent::ReadComplete(ticket),
                    (IoSignal::Complete, Direction::Write) => VcEvent::WriteComplete(ticket),
                    (IoSignal::Eos, _) => VcEvent::Eos(ticket),
                    (IoSignal::Error(failure), _) => VcEvent::Error(ticket, *failure),
                };
                Some(Delivery::event(meta.target.clone(), event))
            }
            Signal::Timeout {
                kind,
                stage: TimeoutStage::ReadSide,
            } => match self.timeout_candidate(Direction::Read) {
                Some(meta) => Some(Delivery {
                    target: meta.target.clone(),
                    pending: Pending::Event(timeout_event(*kind, meta.ticket.clone())),
                    follow_up: Some((*kind, meta.target.clone())),
                }),
                None => self.resolve_write_timeout(*kind, None),
            },
            Signal::Timeout {
                kind,
                stage: TimeoutStage::WriteSide { skip },
            } => self.resolve_write_timeout(*kind, skip.as_ref()),
            Signal::Oob { id } => {
                let slot = self.oob.as_ref().filter(|slot| slot.id == *id)?;
                let outcome = slot.outcome?;
                let handle = OobHandle::new(shared, slot.id);
                let event = match outcome {
                    OobOutcome::Sent => VcEvent::OobComplete(handle),
                    OobOutcome::PeerClosed => VcEvent::OobEos(handle),
                };
                Some(Delivery {
                    target: slot.target.clone(),
                    pending: Pending::Oob { id: *id, event },
                    follow_up: None,
                })
            }
        }
    }

    fn resolve_write_timeout(
        &self,
        kind: TimeoutKind,
        skip: Option<&Continuation>,
    ) -> Option<Delivery> {
        let meta = self.timeout_candidate(Direction::Write)?;
        if skip.is_some_and(|read_target| read_target.same_target(&meta.target)) {
            return None;
        }
        Some(Delivery::event(
            meta.target.clone(),
            timeout_event(kind, meta.ticket.clone()),
        ))
    }
}

fn timeout_event(kind: TimeoutKind, ticket: Ticket) -> VcEvent {
    match kind {
        TimeoutKind::Active => VcEvent::ActiveTimeout(ticket),
        TimeoutKind::Inactivity => VcEvent::InactivityTimeout(ticket),
    }
}

enum Pending {
    Event(VcEvent),
    /// 带外完成在取得目标锁后才从槽中取出。
    Oob { id: u64, event: VcEvent },
}

struct Delivery {
    target: Continuation,
    pending: Pending,
    /// 读侧超时通知之后，若结果为 `Continue`，继续以写侧阶段通知。
    follow_up: Option<(TimeoutKind, Continuation)>,
}

impl Delivery {
    fn event(target: Continuation, event: VcEvent) -> Self {
        Self {
            target,
            pending: Pending::Event(event),
            follow_up: None,
        }
    }
}

/// 回调嵌套深度计数，离开作用域时回退。
struct Dispatching<'a>(&'a Cell<u32>);

impl<'a> Dispatching<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

struct NoopNotifier;

impl TransportNotifier for NoopNotifier {
    fn notify(&self) {}
}

/// 连接的共享内核。
pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) kind: ConnectionKind,
    pub(crate) options: ConnectionOptions,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) endpoint: Option<Arc<dyn SocketEndpoint>>,
    pub(crate) notifier: Arc<dyn TransportNotifier>,
    pub(crate) log: Arc<dyn DetailedLog>,
    /// 投递锁；内部计数为当前持有线程上正在运行的回调层数。
    pub(crate) delivery: ReentrantMutex<Cell<u32>>,
    pub(crate) state: Mutex<VcState>,
}

impl Shared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, VcState> {
        self.state.lock()
    }

    pub(crate) fn detail(&self, message: impl FnOnce() -> String) {
        if self.log.enabled() {
            self.log.add(self.clock.now(), &message());
        }
    }

    /// 按编号取消带外发送；编号不匹配或连接已关闭时什么也不做。
    pub(crate) fn cancel_oob_id(&self, id: u64) {
        let _delivery = self.delivery.lock();
        let cancelled = {
            let mut state = self.lock_state();
            let matches = !state.closed && state.oob.as_ref().is_some_and(|slot| slot.id == id);
            if matches {
                state.oob.take()
            } else {
                None
            }
        };
        if let Some(slot) = cancelled {
            debug!(connection.id = self.id, oob.id = slot.id, "oob send cancelled");
            self.detail(|| format!("cancel_oob id={}", slot.id));
        }
    }
}

/// 网络连接句柄。
///
/// 克隆得到指向同一连接的句柄。连接的资源在 [`do_io_close`](VConnection::do_io_close)
/// 时释放，句柄本身只是引用。
#[derive(Clone)]
pub struct NetVConnection {
    pub(crate) shared: Arc<Shared>,
}

impl NetVConnection {
    /// 以给定选项开始构造连接；选项在此刻被复制。
    pub fn builder(options: &ConnectionOptions) -> NetVConnectionBuilder {
        NetVConnectionBuilder::new(options)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// 进程内唯一的连接编号。
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// 连接种类。
    pub fn kind(&self) -> ConnectionKind {
        self.shared.kind
    }

    /// 构造时复制的选项。
    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    /// 进入回调作用域，等价于在连接创建回调中执行。
    ///
    /// 作用域存续期间，本线程可以调用超时与 `reenable` 等只在回调中合法的操作，
    /// 且不会有事件与之并发投递。作用域结束时通知传输层继续投递。
    pub fn enter(&self) -> Result<CallbackScope<'_>> {
        let guard = self.shared.delivery.lock();
        if self.shared.lock_state().closed {
            return Err(self.violation(NetError::closed("enter")));
        }
        guard.set(guard.get() + 1);
        Ok(CallbackScope {
            vc: self,
            guard: Some(guard),
        })
    }

    /// 当前线程是否正在本连接的回调（或回调作用域）内。
    pub fn in_callback(&self) -> bool {
        self.shared
            .delivery
            .try_lock()
            .is_some_and(|depth| depth.get() > 0)
    }

    // ---- 超时 ----

    /// 设置活动超时；重复设置会以当前时刻为起点重新计算。
    pub fn set_active_timeout(&self, delay: Duration) -> Result<()> {
        self.set_timeout(TimeoutKind::Active, delay, "set_active_timeout")
    }

    /// 设置非活动超时。
    pub fn set_inactivity_timeout(&self, delay: Duration) -> Result<()> {
        self.set_timeout(TimeoutKind::Inactivity, delay, "set_inactivity_timeout")
    }

    /// 取消活动超时。
    pub fn cancel_active_timeout(&self) -> Result<()> {
        self.cancel_timeout(TimeoutKind::Active, "cancel_active_timeout")
    }

    /// 取消非活动超时。
    pub fn cancel_inactivity_timeout(&self) -> Result<()> {
        self.cancel_timeout(TimeoutKind::Inactivity, "cancel_inactivity_timeout")
    }

    /// 当前配置的活动超时，`None` 表示未武装。
    pub fn get_active_timeout(&self) -> Result<Option<Duration>> {
        self.with_timeouts("get_active_timeout", |timeouts, _| {
            timeouts.get(TimeoutKind::Active)
        })
    }

    /// 当前配置的非活动超时。
    pub fn get_inactivity_timeout(&self) -> Result<Option<Duration>> {
        self.with_timeouts("get_inactivity_timeout", |timeouts, _| {
            timeouts.get(TimeoutKind::Inactivity)
        })
    }

    fn set_timeout(&self, kind: TimeoutKind, delay: Duration, op: &'static str) -> Result<()> {
        self.with_timeouts(op, |timeouts, now| timeouts.set(kind, delay, now))?;
        debug!(
            connection.id = self.id(),
            timeout.kind = kind.as_str(),
            delay_ms = delay.as_millis() as u64,
            "timeout armed"
        );
        self.shared
            .detail(|| format!("{op} {}ms", delay.as_millis()));
        self.shared.notifier.notify();
        Ok(())
    }

    fn cancel_timeout(&self, kind: TimeoutKind, op: &'static str) -> Result<()> {
        self.with_timeouts(op, |timeouts, _| timeouts.cancel(kind))?;
        debug!(
            connection.id = self.id(),
            timeout.kind = kind.as_str(),
            "timeout cancelled"
        );
        self.shared.detail(|| op.to_owned());
        self.shared.notifier.notify();
        Ok(())
    }

    fn with_timeouts<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut TimeoutPair, Instant) -> R,
    ) -> Result<R> {
        let in_callback = self.in_callback();
        let now = self.shared.clock.now();
        let mut state = self.shared.lock_state();
        if state.closed {
            return Err(self.violation(NetError::closed(op)));
        }
        if !in_callback {
            return Err(self.violation(NetError::outside_callback(op)));
        }
        Ok(f(&mut state.timeouts, now))
    }

    // ---- 地址 ----

    /// 本地地址，首次查询后缓存。
    pub fn get_local_address(&self) -> Result<SocketAddr> {
        self.resolve_address(Side::Local, "get_local_address")
    }

    /// 有效远端地址：存在透明覆盖时返回覆盖地址。
    pub fn get_remote_address(&self) -> Result<SocketAddr> {
        {
            let state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("get_remote_address")));
            }
            if let Some(addr) = state.addresses.effective_remote() {
                return Ok(addr);
            }
        }
        self.resolve_address(Side::Remote, "get_remote_address")
    }

    /// 端点报告的字面对端地址，忽略透明覆盖。
    pub fn literal_remote_address(&self) -> Result<SocketAddr> {
        self.resolve_address(Side::Remote, "literal_remote_address")
    }

    /// 本地 IP。
    pub fn local_ip(&self) -> Result<IpAddr> {
        self.get_local_address().map(|addr| addr.ip())
    }

    /// 本地端口。
    pub fn local_port(&self) -> Result<u16> {
        self.get_local_address().map(|addr| addr.port())
    }

    /// 有效远端 IP。
    pub fn remote_ip(&self) -> Result<IpAddr> {
        self.get_remote_address().map(|addr| addr.ip())
    }

    /// 有效远端端口。
    pub fn remote_port(&self) -> Result<u16> {
        self.get_remote_address().map(|addr| addr.port())
    }

    /// 设置或清除透明覆盖地址。端点报告的对端地址不受影响。
    pub fn set_transparent_override(&self, addr: Option<SocketAddr>) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("set_transparent_override")));
            }
            state.addresses.transparent_override = addr;
        }
        debug!(
            connection.id = self.id(),
            transparent_override = ?addr,
            "transparent override updated"
        );
        Ok(())
    }

    /// 当前透明覆盖地址。
    pub fn transparent_override(&self) -> Result<Option<SocketAddr>> {
        let state = self.shared.lock_state();
        if state.closed {
            return Err(self.violation(NetError::closed("transparent_override")));
        }
        Ok(state.addresses.transparent_override)
    }

    /// 丢弃已缓存的本地/远端地址，下次查询重新向端点解析。透明覆盖保留。
    pub fn refresh_addresses(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.closed {
            return Err(self.violation(NetError::closed("refresh_addresses")));
        }
        state.addresses.invalidate();
        Ok(())
    }

    fn resolve_address(&self, side: Side, op: &'static str) -> Result<SocketAddr> {
        {
            let state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed(op)));
            }
            if let Some(addr) = side.cached(&state.addresses) {
                return Ok(addr);
            }
        }
        let endpoint = self.shared.endpoint.as_deref().ok_or_else(|| {
            NetError::new(
                codes::ADDRESS_UNAVAILABLE,
                ErrorKind::Transport,
                format!("{} address unavailable: connection has no endpoint", side.as_str()),
            )
        })?;
        let addr = side.query(endpoint).map_err(|err| {
            NetError::transport(
                codes::ADDRESS_UNAVAILABLE,
                format!("{} address query failed", side.as_str()),
                err,
            )
        })?;
        let mut state = self.shared.lock_state();
        if state.closed {
            return Err(self.violation(NetError::closed(op)));
        }
        Ok(side.store(&mut state.addresses, addr))
    }

    // ---- 带外 ----

    /// 发起带外发送。同一时刻最多一个；完成时通知 `target`。
    pub fn send_oob(&self, target: &Continuation, data: Bytes) -> Result<OobHandle> {
        let id = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("send_oob")));
            }
            if !self.shared.kind.supports_oob() {
                return Err(NetError::unsupported(format!(
                    "{} connections do not carry out-of-band data",
                    self.shared.kind.name()
                )));
            }
            if state.oob.is_some() {
                return Err(self.violation(NetError::contract(
                    codes::OOB_BUSY,
                    "an out-of-band send is already outstanding",
                )));
            }
            let id = state.next_oob_id;
            state.next_oob_id += 1;
            let mut slot = OobSlot::new(id, target.clone(), data);
            if slot.remaining.is_empty() {
                slot.outcome = Some(OobOutcome::Sent);
                state.queue.push_back(Signal::Oob { id });
            }
            state.oob = Some(slot);
            id
        };
        debug!(connection.id = self.id(), oob.id = id, "oob send issued");
        self.shared.detail(|| format!("send_oob id={id}"));
        self.shared.notifier.notify();
        Ok(OobHandle::new(&self.shared, id))
    }

    /// 取消当前带外发送；没有未完成发送时什么也不做。
    pub fn cancel_oob(&self) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let cancelled = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("cancel_oob")));
            }
            state.oob.take()
        };
        if let Some(slot) = cancelled {
            debug!(connection.id = self.id(), oob.id = slot.id, "oob send cancelled");
            self.shared.detail(|| format!("cancel_oob id={}", slot.id));
        }
        Ok(())
    }

    // ---- 杂项属性 ----

    /// 是否为内部请求（仅供上层参考）。
    pub fn is_internal_request(&self) -> bool {
        self.shared.lock_state().internal_request
    }

    /// 标记是否为内部请求。
    pub fn set_internal_request(&self, internal: bool) {
        self.shared.lock_state().internal_request = internal;
    }

    /// 不透明属性字。
    pub fn attributes(&self) -> u32 {
        self.shared.lock_state().attributes
    }

    /// 设置属性字。
    pub fn set_attributes(&self, attributes: u32) {
        self.shared.lock_state().attributes = attributes;
    }

    // ---- 详细日志 ----

    /// 详细日志是否在记录。
    pub fn logging_enabled(&self) -> bool {
        self.shared.log.enabled()
    }

    /// 追加一条详细日志。
    pub fn add_log_message(&self, message: &str) {
        self.shared.log.add(self.shared.clock.now(), message);
    }

    /// 输出详细日志。
    pub fn print_logs(&self) {
        self.shared.log.print(self.id());
    }

    /// 清空详细日志。
    pub fn clear_logs(&self) {
        self.shared.log.clear();
    }

    /// 详细日志首尾时间跨度。
    pub fn logs_total_time(&self) -> Duration {
        self.shared.log.total_time()
    }

    // ---- 内部 ----

    pub(crate) fn ticket_progress(&self, ticket: &Ticket) -> Option<Progress> {
        if ticket.connection_id() != self.id() {
            return None;
        }
        let state = self.shared.lock_state();
        if state.closed {
            return None;
        }
        state
            .meta(ticket.direction())
            .filter(|meta| meta.generation() == ticket.generation())
            .map(|meta| Progress {
                nbytes: meta.nbytes,
                ndone: meta.ndone,
            })
    }

    fn violation(&self, err: NetError) -> NetError {
        warn!(
            connection.id = self.id(),
            code = err.code(),
            "contract violation: {}",
            err.message()
        );
        err
    }

    fn reenable_ticket(&self, ticket: &Ticket, op: &'static str) -> Result<()> {
        let in_callback = self.in_callback();
        {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed(op)));
            }
            if !in_callback {
                return Err(self.violation(NetError::outside_callback(op)));
            }
            let direction = ticket.direction();
            if state.is_shutdown(direction) {
                return Err(self.violation(shutdown_error(op, direction)));
            }
            let id = self.id();
            let Some(meta) = state
                .meta_mut(direction)
                .filter(|meta| ticket.connection_id() == id && meta.ticket == *ticket)
            else {
                return Err(self.violation(NetError::contract(
                    codes::STALE_TICKET,
                    format!(
                        "{op}: {direction} ticket generation {} is not the live ticket of connection {id}",
                        ticket.generation()
                    ),
                )));
            };
            meta.enabled = true;
        }
        trace!(
            connection.id = self.id(),
            direction = ticket.direction().as_str(),
            generation = ticket.generation(),
            "{op}"
        );
        Ok(())
    }

    /// 传输层排空入口：当前线程已在回调中时返回 `Deferred`。
    pub(crate) fn drain(&self) -> DrainStatus {
        let Some(guard) = self.shared.delivery.try_lock() else {
            return DrainStatus::Contended;
        };
        if guard.get() > 0 {
            return DrainStatus::Deferred;
        }
        self.run_queue(&guard)
    }

    /// 逐个出队并投递。调用方必须持有投递锁。
    fn run_queue(&self, delivery: &ReentrantMutexGuard<'_, Cell<u32>>) -> DrainStatus {
        loop {
            let (signal, resolved) = {
                let mut state = self.shared.lock_state();
                if state.closed {
                    state.queue.clear();
                    return DrainStatus::Idle;
                }
                let Some(signal) = state.queue.pop_front() else {
                    return DrainStatus::Idle;
                };
                let resolved = state.resolve(&self.shared, &signal);
                (signal, resolved)
            };
            let Some(delivery_plan) = resolved else {
                trace!(connection.id = self.id(), ?signal, "stale signal dropped");
                continue;
            };

            let Some(_target) = delivery_plan.target.try_enter() else {
                self.shared.lock_state().queue.push_front(signal);
                return DrainStatus::Contended;
            };

            let event = match delivery_plan.pending {
                Pending::Event(event) => event,
                Pending::Oob { id, event } => {
                    let mut state = self.shared.lock_state();
                    if !state.oob.as_ref().is_some_and(|slot| slot.id == id) {
                        continue;
                    }
                    let slot = state.oob.take();
                    drop(state);
                    drop(slot);
                    event
                }
            };

            let kind = event.kind();
            trace!(connection.id = self.id(), event = kind.as_str(), "deliver");
            self.shared.detail(|| format!("deliver {kind}"));
            let outcome = {
                let _depth = Dispatching::enter(delivery);
                delivery_plan.target.invoke(self, event)
            };

            if let Some((timeout, read_target)) = delivery_plan.follow_up {
                if outcome == EventOutcome::Done {
                    trace!(
                        connection.id = self.id(),
                        timeout.kind = timeout.as_str(),
                        "read side handled the timeout, write side skipped"
                    );
                    continue;
                }
                let mut state = self.shared.lock_state();
                if !state.closed {
                    state.queue.push_front(Signal::Timeout {
                        kind: timeout,
                        stage: TimeoutStage::WriteSide {
                            skip: Some(read_target),
                        },
                    });
                }
            }
        }
    }
}

fn shutdown_error(op: &'static str, direction: Direction) -> NetError {
    NetError::contract(
        codes::DIRECTION_SHUTDOWN,
        format!("{op} on the {direction} direction after do_io_shutdown"),
    )
}

impl VConnection for NetVConnection {
    fn do_io_read(
        &self,
        target: &Continuation,
        nbytes: ByteCount,
        buffer: IoBuffer,
    ) -> Result<Ticket> {
        let _delivery = self.shared.delivery.lock();
        let now = self.shared.clock.now();
        let (ticket, superseded) = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("do_io_read")));
            }
            if state.read_shutdown {
                return Err(self.violation(shutdown_error("do_io_read", Direction::Read)));
            }
            let generation = state.allocate_generation();
            let ticket = Ticket::new(&self.shared, self.id(), Direction::Read, generation);
            let mut meta = SlotMeta::new(ticket.clone(), target.clone(), nbytes);
            if state.peer_eof && !meta.finished {
                meta.finished = true;
                state.push(Direction::Read, generation, IoSignal::Eos);
            }
            state.timeouts.record_activity(now);
            let superseded = state.read.replace(ReadSlot { meta, buffer });
            (ticket, superseded)
        };
        debug!(
            connection.id = self.id(),
            direction = "read",
            generation = ticket.generation(),
            nbytes = ?nbytes,
            superseded = superseded.is_some(),
            "do_io_read"
        );
        drop(superseded);
        self.shared
            .detail(|| format!("do_io_read gen={} nbytes={nbytes:?}", ticket.generation()));
        self.shared.notifier.notify();
        Ok(ticket)
    }

    fn do_io_write(
        &self,
        target: &Continuation,
        nbytes: ByteCount,
        source: WriteSource,
    ) -> Result<Ticket> {
        let _delivery = self.shared.delivery.lock();
        let now = self.shared.clock.now();
        let owns_buffer = source.owns_buffer();
        let (ticket, superseded, released) = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("do_io_write")));
            }
            if state.write_shutdown {
                return Err(self.violation(shutdown_error("do_io_write", Direction::Write)));
            }
            let generation = state.allocate_generation();
            let ticket = Ticket::new(&self.shared, self.id(), Direction::Write, generation);
            let meta = SlotMeta::new(ticket.clone(), target.clone(), nbytes);
            let (source, released) = if meta.finished {
                (None, Some(source))
            } else {
                (Some(source), None)
            };
            state.timeouts.record_activity(now);
            let superseded = state.write.replace(WriteSlot { meta, source });
            (ticket, superseded, released)
        };
        debug!(
            connection.id = self.id(),
            direction = "write",
            generation = ticket.generation(),
            nbytes = ?nbytes,
            owns_buffer,
            superseded = superseded.is_some(),
            "do_io_write"
        );
        drop(superseded);
        drop(released);
        self.shared
            .detail(|| format!("do_io_write gen={} nbytes={nbytes:?}", ticket.generation()));
        self.shared.notifier.notify();
        Ok(ticket)
    }

    fn do_io_close(&self, code: CloseCode) -> Result<()> {
        let delivery = self.shared.delivery.lock();
        let released = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("do_io_close")));
            }
            state.closed = true;
            state.close_code = Some(code);
            (
                state.read.take(),
                state.write.take(),
                state.oob.take(),
                std::mem::take(&mut state.queue),
            )
        };
        debug!(
            connection.id = self.id(),
            close.code = code.as_str(),
            dropped_signals = released.3.len(),
            "do_io_close"
        );
        drop(released);
        drop(delivery);
        self.shared
            .detail(|| format!("do_io_close {}", code.as_str()));
        self.shared.notifier.notify();
        Ok(())
    }

    fn do_io_shutdown(&self, howto: ShutdownHowTo) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(self.violation(NetError::closed("do_io_shutdown")));
            }
            if howto.includes_read() {
                state.read_shutdown = true;
                state.queue.retain(|signal| !signal.on_direction(Direction::Read));
            }
            if howto.includes_write() {
                state.write_shutdown = true;
                state.queue.retain(|signal| !signal.on_direction(Direction::Write));
            }
        }
        debug!(connection.id = self.id(), howto = ?howto, "do_io_shutdown");
        self.shared.detail(|| format!("do_io_shutdown {howto:?}"));
        self.shared.notifier.notify();
        Ok(())
    }

    fn reenable(&self, ticket: &Ticket) -> Result<()> {
        self.reenable_ticket(ticket, "reenable")?;
        self.shared.notifier.notify();
        Ok(())
    }

    fn reenable_re(&self, ticket: &Ticket) -> Result<()> {
        self.reenable_ticket(ticket, "reenable_re")?;
        let delivery = self.shared.delivery.lock();
        let status = self.run_queue(&delivery);
        drop(delivery);
        trace!(connection.id = self.id(), status = ?status, "reenable_re nested drain");
        self.shared.notifier.notify();
        Ok(())
    }
}

impl fmt::Debug for NetVConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetVConnection")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

/// 回调作用域守卫，见 [`NetVConnection::enter`]。
pub struct CallbackScope<'a> {
    vc: &'a NetVConnection,
    guard: Option<ReentrantMutexGuard<'a, Cell<u32>>>,
}

impl CallbackScope<'_> {
    /// 作用域所属连接。
    pub fn connection(&self) -> &NetVConnection {
        self.vc
    }
}

impl Drop for CallbackScope<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.set(guard.get().saturating_sub(1));
        }
        self.vc.shared.notifier.notify();
    }
}

/// [`NetVConnection`] 构造器。
pub struct NetVConnectionBuilder {
    options: ConnectionOptions,
    endpoint: Option<Arc<dyn SocketEndpoint>>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn DetailedLog>,
    notifier: Arc<dyn TransportNotifier>,
}

impl NetVConnectionBuilder {
    fn new(options: &ConnectionOptions) -> Self {
        Self {
            options: options.clone(),
            endpoint: None,
            clock: Arc::new(SystemClock),
            log: Arc::new(NoopDetailedLog),
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// 报告地址的传输端点。
    pub fn endpoint(mut self, endpoint: Arc<dyn SocketEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// 时间源，默认 [`SystemClock`]。
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 详细日志，默认 [`NoopDetailedLog`]。
    pub fn detailed_log(mut self, log: Arc<dyn DetailedLog>) -> Self {
        self.log = log;
        self
    }

    /// 传输层唤醒器，默认不做任何事。
    pub fn notifier(mut self, notifier: Arc<dyn TransportNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// 校验选项并创建连接及其传输端口。
    pub fn build(self) -> Result<(NetVConnection, TransportPort)> {
        self.options.validate()?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let kind = self.options.connection_kind();
        let shared = Arc::new(Shared {
            id,
            kind,
            options: self.options,
            clock: self.clock,
            endpoint: self.endpoint,
            notifier: self.notifier,
            log: self.log,
            delivery: ReentrantMutex::new(Cell::new(0)),
            state: Mutex::new(VcState::new()),
        });
        debug!(
            connection.id = id,
            kind = kind.name(),
            addr_binding = shared.options.local_addr_binding.style_name(),
            "connection created"
        );
        let vc = NetVConnection::from_shared(shared);
        let port = TransportPort::new(vc.clone());
        Ok((vc, port))
    }
}
