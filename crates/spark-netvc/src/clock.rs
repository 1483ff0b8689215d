//! 可注入时间源。
//!
//! 连接只需要"当前单调时间"来计算超时截止点，真正的等待由传输层负责，
//! 因此这里的 [`Clock`] 只暴露 `now`，不引入任何运行时依赖。

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// 抽象时间源。
///
/// # 契约说明（What）
/// - `now` 必须单调不减；
/// - 实现需满足 `Send + Sync + 'static`，以便以 `Arc<dyn Clock>` 在连接与传输层之间共享。
///
/// # 使用指引（How）
/// - 生产环境使用 [`SystemClock`]；
/// - 测试注入 [`MockClock`]，通过 `advance` 精确控制超时到期时刻。
pub trait Clock: Send + Sync + 'static {
    /// 当前单调时间点。
    fn now(&self) -> Instant;
}

/// 直接委托 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的虚拟时钟。
///
/// 克隆共享同一时间轴，测试可以把一个副本交给连接，另一个留在手里推进。
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    origin: Instant,
    elapsed: Duration,
}

impl MockClock {
    /// 以当前系统时间为起点创建。
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// 以指定起点创建。
    pub fn with_start(origin: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                origin,
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// 推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let mut state = self.inner.lock();
        state.elapsed = state.elapsed.saturating_add(delta);
    }

    /// 自起点累积的虚拟时间。
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.origin + state.elapsed
    }
}
