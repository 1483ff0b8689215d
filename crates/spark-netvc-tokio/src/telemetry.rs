//! 进程级日志安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：连接与驱动任务通过 `tracing` 输出生命周期日志；二进制或测试只需调用一次
//!   [`init_tracing`] 即可看到这些日志，而不必各自拼装 Subscriber。
//! - **逻辑（How）**：组装 `EnvFilter + fmt` 两层并设为全局 Subscriber，过滤规则读取 `RUST_LOG`，
//!   缺省为 `info`。
//! - **契约（What）**：成功安装一次后再次调用返回 [`TelemetryError::AlreadyInstalled`]；
//!   外部已设置全局 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]，不覆盖既有配置。

use std::sync::OnceLock;

use tracing::dispatcher::{self, SetGlobalDefaultError};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装日志时可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `init_tracing` 被重复调用。
    #[error("tracing 已完成安装，禁止重复调用 init_tracing")]
    AlreadyInstalled,
    /// 外部提前设置了全局 Subscriber。
    #[error("全局 tracing Subscriber 已存在，无法覆盖")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 失败。
    #[error("设置 tracing 全局 Subscriber 失败: {0}")]
    SetGlobalSubscriber(#[from] SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
pub fn init_tracing() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let first = init_tracing();
        assert!(
            first.is_ok() || matches!(first, Err(TelemetryError::SubscriberAlreadySet)),
            "首次安装只可能成功或遇到外部 Subscriber：{first:?}"
        );
        let second = init_tracing().expect_err("重复安装必须失败");
        assert!(matches!(
            second,
            TelemetryError::AlreadyInstalled | TelemetryError::SubscriberAlreadySet
        ));
    }
}
