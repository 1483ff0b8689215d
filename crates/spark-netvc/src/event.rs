//! 投递给回调目标的事件词汇。
//!
//! 读侧：`ReadReady`、`ReadComplete`、`Eos`、`Error`；写侧：`WriteReady`、`WriteComplete`、`Error`；
//! 超时：`ActiveTimeout`、`InactivityTimeout`；带外：`OobComplete`、`OobEos`。
//! 每个事件都携带触发它的票据（或带外句柄），目标据此区分方向与代次。

use std::{fmt, io};

use crate::{oob::OobHandle, ticket::Ticket};

/// 投递给 [`EventHandler`](crate::EventHandler) 的事件。
#[derive(Clone, Debug)]
pub enum VcEvent {
    /// 读缓冲有新数据，票据在 `reenable` 前暂停。
    ReadReady(Ticket),
    /// 读票据达到请求字节数。
    ReadComplete(Ticket),
    /// 对端关闭读方向。
    Eos(Ticket),
    /// 传输层错误，票据对应出错的方向。
    Error(Ticket, IoFailure),
    /// 写源已耗尽但票据尚未完成，票据在 `reenable` 前暂停。
    WriteReady(Ticket),
    /// 写票据达到请求字节数。
    WriteComplete(Ticket),
    /// 活动超时到期。
    ActiveTimeout(Ticket),
    /// 非活动超时到期。
    InactivityTimeout(Ticket),
    /// 带外数据已全部发出。
    OobComplete(OobHandle),
    /// 带外发送期间对端关闭。
    OobEos(OobHandle),
}

impl VcEvent {
    /// 去掉负载后的事件种类。
    pub fn kind(&self) -> EventKind {
        match self {
            VcEvent::ReadReady(_) => EventKind::ReadReady,
            VcEvent::ReadComplete(_) => EventKind::ReadComplete,
            VcEvent::Eos(_) => EventKind::Eos,
            VcEvent::Error(..) => EventKind::Error,
            VcEvent::WriteReady(_) => EventKind::WriteReady,
            VcEvent::WriteComplete(_) => EventKind::WriteComplete,
            VcEvent::ActiveTimeout(_) => EventKind::ActiveTimeout,
            VcEvent::InactivityTimeout(_) => EventKind::InactivityTimeout,
            VcEvent::OobComplete(_) => EventKind::OobComplete,
            VcEvent::OobEos(_) => EventKind::OobEos,
        }
    }

    /// 事件关联的 I/O 票据；带外事件返回 `None`。
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            VcEvent::ReadReady(t)
            | VcEvent::ReadComplete(t)
            | VcEvent::Eos(t)
            | VcEvent::Error(t, _)
            | VcEvent::WriteReady(t)
            | VcEvent::WriteComplete(t)
            | VcEvent::ActiveTimeout(t)
            | VcEvent::InactivityTimeout(t) => Some(t),
            VcEvent::OobComplete(_) | VcEvent::OobEos(_) => None,
        }
    }
}

/// 事件种类，便于断言与日志。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReadReady,
    ReadComplete,
    Eos,
    Error,
    WriteReady,
    WriteComplete,
    ActiveTimeout,
    InactivityTimeout,
    OobComplete,
    OobEos,
}

impl EventKind {
    /// 稳定名称。
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReadReady => "read_ready",
            EventKind::ReadComplete => "read_complete",
            EventKind::Eos => "eos",
            EventKind::Error => "error",
            EventKind::WriteReady => "write_ready",
            EventKind::WriteComplete => "write_complete",
            EventKind::ActiveTimeout => "active_timeout",
            EventKind::InactivityTimeout => "inactivity_timeout",
            EventKind::OobComplete => "oob_complete",
            EventKind::OobEos => "oob_eos",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 回调处理结果。
///
/// 仅在超时仲裁中有意义：读侧目标返回 `Done` 时，本轮不再通知写侧目标。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventOutcome {
    /// 继续传播。
    #[default]
    Continue,
    /// 已完全处理。
    Done,
}

/// 关闭方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 协作关闭。
    #[default]
    Normal,
    /// 中止，传输层应尽快复位连接。
    Abort,
}

impl CloseCode {
    /// 稳定名称。
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseCode::Normal => "normal",
            CloseCode::Abort => "abort",
        }
    }
}

/// 半关闭方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownHowTo {
    Read,
    Write,
    Both,
}

impl ShutdownHowTo {
    /// 是否覆盖读方向。
    pub const fn includes_read(&self) -> bool {
        matches!(self, ShutdownHowTo::Read | ShutdownHowTo::Both)
    }

    /// 是否覆盖写方向。
    pub const fn includes_write(&self) -> bool {
        matches!(self, ShutdownHowTo::Write | ShutdownHowTo::Both)
    }
}

/// 超时类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Active,
    Inactivity,
}

impl TimeoutKind {
    /// 稳定名称。
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::Active => "active",
            TimeoutKind::Inactivity => "inactivity",
        }
    }
}

/// 随 `Error` 事件投递的传输失败描述。
///
/// `io::Error` 不可克隆，这里只保留种类与原始错误码，足以让目标做出处置决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoFailure {
    pub kind: io::ErrorKind,
    pub raw_os_error: Option<i32>,
}

impl IoFailure {
    /// 以种类构造。
    pub const fn new(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            raw_os_error: None,
        }
    }
}

impl From<&io::Error> for IoFailure {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            raw_os_error: err.raw_os_error(),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw_os_error {
            Some(code) => write!(f, "{} (os error {code})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
