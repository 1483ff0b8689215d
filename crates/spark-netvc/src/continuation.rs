//! 回调目标（continuation）。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 连接对回调目标只有三项义务：一次只投递一个事件、在目标锁下投递、关闭后绝不投递。
//!   目标锁因此与目标本体绑定在一起，由 [`Continuation`] 统一持有。
//!
//! ## 契约（What）
//! - [`EventHandler::handle_event`] 在目标锁内被调用，可以在回调中对同一连接调用
//!   `do_io_read`/`do_io_write`/`do_io_close`/超时与 `reenable` 等操作；
//! - 目标身份由 [`Continuation::same_target`] 判定（指针相等），超时仲裁据此避免对同一目标通知两次。
//!
//! ## 实现（How）
//! - 目标锁为 `parking_lot::ReentrantMutex<()>`：同一线程上的嵌套投递（`reenable_re`、带外完成）
//!   可以重入，其它线程只能 `try_lock`，失败时事件留在队列里等待下一次排空。
//! - 闭包 `Fn(&NetVConnection, VcEvent) -> EventOutcome` 自动实现 [`EventHandler`]，测试与轻量目标可直接使用。

use std::{fmt, sync::Arc};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::{
    connection::NetVConnection,
    event::{EventOutcome, VcEvent},
};

/// 接收连接事件的状态机。
pub trait EventHandler: Send + Sync + 'static {
    /// 处理一个事件。
    fn handle_event(&self, vc: &NetVConnection, event: VcEvent) -> EventOutcome;
}

impl<F> EventHandler for F
where
    F: Fn(&NetVConnection, VcEvent) -> EventOutcome + Send + Sync + 'static,
{
    fn handle_event(&self, vc: &NetVConnection, event: VcEvent) -> EventOutcome {
        self(vc, event)
    }
}

struct Inner {
    lock: ReentrantMutex<()>,
    handler: Box<dyn EventHandler>,
}

/// 回调目标句柄，克隆共享同一把目标锁。
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<Inner>,
}

impl Continuation {
    /// 包装一个事件处理器。
    pub fn new(handler: impl EventHandler) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock: ReentrantMutex::new(()),
                handler: Box::new(handler),
            }),
        }
    }

    /// 以闭包构造目标。
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&NetVConnection, VcEvent) -> EventOutcome + Send + Sync + 'static,
    {
        Self::new(f)
    }

    /// 两个句柄是否指向同一目标。
    pub fn same_target(&self, other: &Continuation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 尝试获取目标锁；当前线程已持有时可重入成功。
    pub(crate) fn try_enter(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.inner.lock.try_lock()
    }

    /// 调用处理器，调用方必须已持有目标锁。
    pub(crate) fn invoke(&self, vc: &NetVConnection, event: VcEvent) -> EventOutcome {
        self.inner.handler.handle_event(vc, event)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Continuation")
            .field(&Arc::as_ptr(&self.inner))
            .finish()
    }
}
