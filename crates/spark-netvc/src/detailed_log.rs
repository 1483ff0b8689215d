//! 连接级详细日志。
//!
//! # 教案级说明
//! - **Why**：排查单条连接的时序问题时，需要一条按时间排序、与该连接绑定的消息轨迹；
//!   但在常规运行中这份轨迹纯属开销。
//! - **What**：[`DetailedLog`] 以 trait 对象注入连接。默认 [`NoopDetailedLog`] 丢弃一切；
//!   [`RecordingDetailedLog`] 记录带时间戳的消息，并在 `print` 时经 `tracing` 输出。
//! - **How**：连接在生命周期转换时总是调用注入的日志，消息格式化只在 `enabled()` 为真时发生。

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 注入连接的详细日志组件。
pub trait DetailedLog: Send + Sync + 'static {
    /// 是否在记录。
    fn enabled(&self) -> bool;

    /// 记录一条消息。
    fn add(&self, at: Instant, message: &str);

    /// 把已记录的消息输出到 `tracing`。
    fn print(&self, connection_id: u64);

    /// 清空记录。
    fn clear(&self);

    /// 首尾两条消息之间的时间跨度。
    fn total_time(&self) -> Duration;
}

/// 不记录任何内容。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDetailedLog;

impl DetailedLog for NoopDetailedLog {
    fn enabled(&self) -> bool {
        false
    }

    fn add(&self, _at: Instant, _message: &str) {}

    fn print(&self, _connection_id: u64) {}

    fn clear(&self) {}

    fn total_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// 在内存中记录消息。
#[derive(Debug, Default)]
pub struct RecordingDetailedLog {
    entries: Mutex<Vec<(Instant, String)>>,
}

impl RecordingDetailedLog {
    /// 创建空记录。
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的消息文本，按记录顺序。
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl DetailedLog for RecordingDetailedLog {
    fn enabled(&self) -> bool {
        true
    }

    fn add(&self, at: Instant, message: &str) {
        self.entries.lock().push((at, message.to_owned()));
    }

    fn print(&self, connection_id: u64) {
        let entries = self.entries.lock();
        let Some((origin, _)) = entries.first() else {
            return;
        };
        for (at, message) in entries.iter() {
            tracing::info!(
                connection.id = connection_id,
                offset_us = at.saturating_duration_since(*origin).as_micros() as u64,
                "{message}"
            );
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn total_time(&self) -> Duration {
        let entries = self.entries.lock();
        match (entries.first(), entries.last()) {
            (Some((first, _)), Some((last, _))) => last.saturating_duration_since(*first),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_log_tracks_span_and_clears() {
        let log = RecordingDetailedLog::new();
        let start = Instant::now();
        log.add(start, "do_io_read");
        log.add(start + Duration::from_millis(40), "read_complete");

        assert_eq!(log.messages(), vec!["do_io_read", "read_complete"]);
        assert_eq!(log.total_time(), Duration::from_millis(40));

        log.clear();
        assert!(log.messages().is_empty());
        assert_eq!(log.total_time(), Duration::ZERO);
    }
}
