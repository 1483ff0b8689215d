//! I/O 票据（VIO）。
//!
//! # 教案级说明
//! - **Why**：一次 `do_io_read`/`do_io_write` 产生一张票据，代表该方向上正在进行的操作。
//!   票据只是一个"身份"：字节计数、缓冲与目标都由连接持有，票据本身可以自由克隆并随事件传递。
//! - **What**：
//!   - 票据由（连接编号、方向、代次）唯一标识；同方向的新调用递增代次，旧票据随即失效；
//!   - [`Ticket::reenable`] 等价于在所属连接上调用 `reenable(ticket)`；
//!   - [`Ticket::progress`] 查询当前请求量与已完成量，票据失效后返回 `None`。
//! - **How**：票据通过 `Weak` 指回连接，不延长连接生命周期，连接释放后所有操作都返回
//!   `spark.netvc.closed`。

use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    connection::{NetVConnection, Shared, VConnection},
    error::{NetError, Result},
};

/// I/O 方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// 稳定名称。
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求字节数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteCount {
    /// 精确字节数；0 表示立即完成且不产生任何事件。
    Bounded(u64),
    /// 直到流结束。
    Unbounded,
}

impl ByteCount {
    /// 在已完成 `ndone` 字节后剩余的量，`None` 表示无上限。
    pub fn remaining(&self, ndone: u64) -> Option<u64> {
        match self {
            ByteCount::Bounded(n) => Some(n.saturating_sub(ndone)),
            ByteCount::Unbounded => None,
        }
    }

    /// 完成 `ndone` 字节后是否已满足请求。
    pub fn is_satisfied(&self, ndone: u64) -> bool {
        matches!(self, ByteCount::Bounded(n) if ndone >= *n)
    }
}

impl From<u64> for ByteCount {
    fn from(n: u64) -> Self {
        ByteCount::Bounded(n)
    }
}

/// 票据进度快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// 请求字节数。
    pub nbytes: ByteCount,
    /// 已完成字节数。
    pub ndone: u64,
}

/// 一次读或写操作的句柄。
#[derive(Clone)]
pub struct Ticket {
    owner: Weak<Shared>,
    connection_id: u64,
    direction: Direction,
    generation: u64,
}

impl Ticket {
    pub(crate) fn new(
        owner: &Arc<Shared>,
        connection_id: u64,
        direction: Direction,
        generation: u64,
    ) -> Self {
        Self {
            owner: Arc::downgrade(owner),
            connection_id,
            direction,
            generation,
        }
    }

    /// 所属连接编号。
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// 方向。
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 代次，同一连接同一方向上严格递增。
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 所属连接；连接已被释放时返回 `None`。
    pub fn connection(&self) -> Option<NetVConnection> {
        self.owner.upgrade().map(NetVConnection::from_shared)
    }

    /// 在所属连接上重新启用本票据。
    pub fn reenable(&self) -> Result<()> {
        self.with_connection("reenable", |vc| vc.reenable(self))
    }

    /// 在所属连接上以可重入方式重新启用本票据。
    pub fn reenable_re(&self) -> Result<()> {
        self.with_connection("reenable_re", |vc| vc.reenable_re(self))
    }

    /// 当前进度；票据已被取代或连接已关闭时返回 `None`。
    pub fn progress(&self) -> Option<Progress> {
        self.connection()?.ticket_progress(self)
    }

    fn with_connection(
        &self,
        operation: &'static str,
        f: impl FnOnce(&NetVConnection) -> Result<()>,
    ) -> Result<()> {
        match self.connection() {
            Some(vc) => f(&vc),
            None => Err(NetError::closed(operation)),
        }
    }
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
            && self.direction == other.direction
            && self.generation == other.generation
    }
}

impl Eq for Ticket {}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("connection_id", &self.connection_id)
            .field("direction", &self.direction)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_count_remaining_and_satisfied() {
        assert_eq!(ByteCount::Bounded(10).remaining(4), Some(6));
        assert_eq!(ByteCount::Bounded(10).remaining(12), Some(0));
        assert_eq!(ByteCount::Unbounded.remaining(1 << 40), None);
        assert!(ByteCount::Bounded(0).is_satisfied(0));
        assert!(!ByteCount::Unbounded.is_satisfied(u64::MAX));
    }
}
