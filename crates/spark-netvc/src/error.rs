//! 连接层统一错误域。
//!
//! # 教案级说明
//! - **Why**：连接契约区分两类失败：调用方违反契约（例如关闭后继续读写）与配置/传输层
//!   的同步失败。I/O 过程中的传输错误永远不会走这里，而是以 [`VcEvent::Error`](crate::VcEvent::Error)
//!   事件异步投递给回调目标。
//! - **What**：[`NetError`] 携带稳定错误码（`spark.netvc.*`）、[`ErrorKind`] 与可选的底层
//!   `io::Error`；[`Result`] 为本 crate 的统一返回别名。
//! - **How**：错误码集中在 [`codes`]，调用点通过 `NetError::contract(...)` 等构造器生成，
//!   避免散落的字符串常量。

use std::{borrow::Cow, io};

/// 本 crate 的统一返回别名。
pub type Result<T, E = NetError> = core::result::Result<T, E>;

/// 稳定错误码表。
///
/// 新增码值需遵循 `spark.netvc.<语义>` 命名，并保持已发布码值不变。
pub mod codes {
    /// 连接已关闭后仍被调用。
    pub const CLOSED: &str = "spark.netvc.closed";
    /// 在已半关闭的方向上发起 I/O。
    pub const DIRECTION_SHUTDOWN: &str = "spark.netvc.direction_shutdown";
    /// 票据已被同方向的新调用取代，或不属于该连接。
    pub const STALE_TICKET: &str = "spark.netvc.stale_ticket";
    /// 只能在回调作用域内调用的操作被在作用域外调用。
    pub const OUTSIDE_CALLBACK: &str = "spark.netvc.outside_callback";
    /// 已有一个未完成的带外发送。
    pub const OOB_BUSY: &str = "spark.netvc.oob_busy";
    /// 连接类型不支持该能力。
    pub const UNSUPPORTED: &str = "spark.netvc.unsupported";
    /// 连接选项非法。
    pub const INVALID_OPTIONS: &str = "spark.netvc.invalid_options";
    /// 连接选项无法解析。
    pub const OPTIONS_PARSE: &str = "spark.netvc.options_parse";
    /// 地址解析失败。
    pub const ADDRESS_UNAVAILABLE: &str = "spark.netvc.address_unavailable";
}

/// 错误的处置类别。
///
/// `ContractViolation` 与 `Transport` 永不混用：前者意味着调用方代码有缺陷，应当尽快暴露；
/// 后者是可观察的运行期失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 调用方违反连接契约。
    ContractViolation,
    /// 连接选项或配置文本非法。
    Configuration,
    /// 同步路径上的传输层失败（建连、绑定、地址查询）。
    Transport,
    /// 当前连接类型不支持请求的能力。
    Unsupported,
}

/// 连接层错误。
///
/// # 契约说明（What）
/// - `code()` 返回稳定码值，可直接用于日志聚合与告警规则；
/// - `kind()` 决定处置策略；
/// - 若由底层 `io::Error` 引起，可通过 [`std::error::Error::source`] 取得。
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct NetError {
    code: &'static str,
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<io::Error>,
}

impl NetError {
    /// 构造任意类别的错误。
    pub fn new(
        code: &'static str,
        kind: ErrorKind,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// 构造契约违例错误。
    pub fn contract(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorKind::ContractViolation, message)
    }

    /// 构造配置错误。
    pub fn configuration(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorKind::Configuration, message)
    }

    /// 构造不支持错误。
    pub fn unsupported(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::UNSUPPORTED, ErrorKind::Unsupported, message)
    }

    /// 以 `io::Error` 为底层原因构造传输错误。
    pub fn transport(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        source: io::Error,
    ) -> Self {
        Self {
            code,
            kind: ErrorKind::Transport,
            message: message.into(),
            source: Some(source),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 错误类别。
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否为契约违例。
    pub fn is_contract_violation(&self) -> bool {
        self.kind == ErrorKind::ContractViolation
    }

    pub(crate) fn closed(operation: &'static str) -> Self {
        Self::contract(codes::CLOSED, format!("{operation} invoked after do_io_close"))
    }

    pub(crate) fn outside_callback(operation: &'static str) -> Self {
        Self::contract(
            codes::OUTSIDE_CALLBACK,
            format!("{operation} is only legal inside a callback scope of this connection"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_carries_code_and_message() {
        let err = NetError::closed("do_io_read");
        assert_eq!(err.code(), codes::CLOSED);
        assert!(err.is_contract_violation());
        assert_eq!(
            err.to_string(),
            "[spark.netvc.closed] do_io_read invoked after do_io_close"
        );
    }

    #[test]
    fn transport_error_exposes_io_source() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = NetError::transport(codes::ADDRESS_UNAVAILABLE, "peer address", io_err);
        assert_eq!(err.kind(), ErrorKind::Transport);
        let source = err.source().expect("io source must be kept");
        assert_eq!(source.to_string(), "refused");
    }
}
