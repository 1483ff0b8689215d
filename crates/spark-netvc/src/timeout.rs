//! 活动/非活动双超时的存储与到期判定。
//!
//! 仲裁（先读后写、`Done` 截断、同目标去重）在连接的投递循环中完成，
//! 这里只负责"何时到期"这一部分：
//! - 到期只触发一次：截止点被清空，但配置的延迟保留，直到调用方重新 `set` 或 `cancel`；
//! - 非活动截止点在读写取得进展时按当前延迟重新计算，已到期的不会被进展重新武装；
//! - 截止点超出 `Instant` 可表示范围时视为永不到期，延迟照常保留。

use std::time::{Duration, Instant};

use crate::event::TimeoutKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Slot {
    delay: Option<Duration>,
    deadline: Option<Instant>,
}

impl Slot {
    fn arm(&mut self, delay: Duration, now: Instant) {
        self.delay = Some(delay);
        self.deadline = now.checked_add(delay);
    }

    fn restart(&mut self, now: Instant) {
        if let (Some(delay), Some(_)) = (self.delay, self.deadline) {
            self.deadline = now.checked_add(delay);
        }
    }
}

/// 一条连接的两个超时槽。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TimeoutPair {
    active: Slot,
    inactivity: Slot,
}

impl TimeoutPair {
    fn slot(&self, kind: TimeoutKind) -> &Slot {
        match kind {
            TimeoutKind::Active => &self.active,
            TimeoutKind::Inactivity => &self.inactivity,
        }
    }

    fn slot_mut(&mut self, kind: TimeoutKind) -> &mut Slot {
        match kind {
            TimeoutKind::Active => &mut self.active,
            TimeoutKind::Inactivity => &mut self.inactivity,
        }
    }

    /// 以 `now` 为起点武装。
    pub(crate) fn set(&mut self, kind: TimeoutKind, delay: Duration, now: Instant) {
        self.slot_mut(kind).arm(delay, now);
    }

    /// 解除武装，不触发事件。
    pub(crate) fn cancel(&mut self, kind: TimeoutKind) {
        *self.slot_mut(kind) = Slot::default();
    }

    /// 当前配置的延迟。
    pub(crate) fn get(&self, kind: TimeoutKind) -> Option<Duration> {
        self.slot(kind).delay
    }

    /// 读写取得进展，或新调度了读写。
    pub(crate) fn record_activity(&mut self, now: Instant) {
        self.inactivity.restart(now);
    }

    /// 最早的未触发截止点。
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.active.deadline, self.inactivity.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// 取出所有已到期的超时（活动在前），并清空其截止点。
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<TimeoutKind> {
        let mut fired = Vec::with_capacity(2);
        for kind in [TimeoutKind::Active, TimeoutKind::Inactivity] {
            let slot = self.slot_mut(kind);
            if slot.deadline.is_some_and(|deadline| deadline <= now) {
                slot.deadline = None;
                fired.push(kind);
            }
        }
        fired
    }
}
