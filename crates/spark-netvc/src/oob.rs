//! 带外（OOB）发送。
//!
//! 一条连接同时最多一个未完成的带外发送。完成（全部发出或对端关闭）以事件通知发送时指定的目标；
//! 取消是尽力而为的：已经交给传输层的字节无法收回，但取消之后不会再投递该次发送的完成事件。

use std::{
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;

use crate::{connection::Shared, continuation::Continuation};

/// 带外发送的完成方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OobOutcome {
    Sent,
    PeerClosed,
}

/// 连接内部的带外发送槽。
pub(crate) struct OobSlot {
    pub(crate) id: u64,
    pub(crate) target: Continuation,
    pub(crate) remaining: Bytes,
    /// 完成已确定、事件尚未投递。
    pub(crate) outcome: Option<OobOutcome>,
}

impl OobSlot {
    pub(crate) fn new(id: u64, target: Continuation, data: Bytes) -> Self {
        Self {
            id,
            target,
            remaining: data,
            outcome: None,
        }
    }
}

/// 可取消的带外发送句柄。
#[derive(Clone)]
pub struct OobHandle {
    owner: Weak<Shared>,
    id: u64,
}

impl OobHandle {
    pub(crate) fn new(owner: &Arc<Shared>, id: u64) -> Self {
        Self {
            owner: Arc::downgrade(owner),
            id,
        }
    }

    /// 发送编号，连接内唯一。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消本次发送；若已完成、已被取消或连接已释放则什么也不做。
    pub fn cancel(&self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.cancel_oob_id(self.id);
        }
    }
}

impl PartialEq for OobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.owner, &other.owner)
    }
}

impl Eq for OobHandle {}

impl fmt::Debug for OobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OobHandle").field("id", &self.id).finish()
    }
}
