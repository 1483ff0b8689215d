#![cfg(loom)]
//! 投递锁纪律的 Loom 影子模型。
//!
//! # 教案级说明
//! - **Why**：连接承诺 `do_io_close` 返回之后不再有回调，依靠的是一条锁纪律：投递循环在持有
//!   投递锁期间重新校验关闭标志并调用回调，关闭方先获取同一把投递锁。`parking_lot` 的锁无法被
//!   Loom 接管，这里把这条纪律抽成只含 Loom 原语的最小模型，穷举两条线程的全部交错。
//! - **What**：模型本身不是 `NetVConnection`；真实连接上的跨线程关闭由
//!   `lifecycle.rs::close_from_another_thread_waits_for_the_running_callback` 覆盖。
//! - **How**：`delivery` 对应连接的投递锁，`state` 对应状态锁；回调计数使用原子量，
//!   以便关闭线程在释放投递锁后读取。

use loom::{
    model,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

struct ShadowState {
    closed: bool,
    queued: usize,
}

struct ShadowConnection {
    delivery: Mutex<()>,
    state: Mutex<ShadowState>,
    callbacks: AtomicUsize,
}

impl ShadowConnection {
    fn new(queued: usize) -> Self {
        Self {
            delivery: Mutex::new(()),
            state: Mutex::new(ShadowState {
                closed: false,
                queued,
            }),
            callbacks: AtomicUsize::new(0),
        }
    }

    /// 投递循环：每次出队都在投递锁下重新校验关闭标志。
    fn drain(&self) {
        loop {
            let _delivery = self.delivery.lock().expect("投递锁不应中毒");
            {
                let mut state = self.state.lock().expect("状态锁不应中毒");
                if state.closed || state.queued == 0 {
                    state.queued = 0;
                    return;
                }
                state.queued -= 1;
            }
            self.callbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 关闭：先取投递锁，再置位关闭标志并清空队列；返回关闭时刻的回调次数。
    fn close(&self) -> usize {
        let _delivery = self.delivery.lock().expect("投递锁不应中毒");
        let mut state = self.state.lock().expect("状态锁不应中毒");
        state.closed = true;
        state.queued = 0;
        self.callbacks.load(Ordering::SeqCst)
    }
}

#[test]
fn no_callback_starts_after_close_returns() {
    model(|| {
        let vc = Arc::new(ShadowConnection::new(2));

        let driver = {
            let vc = Arc::clone(&vc);
            thread::spawn(move || vc.drain())
        };
        let closer = {
            let vc = Arc::clone(&vc);
            thread::spawn(move || vc.close())
        };

        let at_close = closer.join().expect("关闭线程不应 panic");
        driver.join().expect("投递线程不应 panic");

        assert_eq!(
            vc.callbacks.load(Ordering::SeqCst),
            at_close,
            "关闭返回之后不得再有回调"
        );
        assert!(at_close <= 2);
    });
}

#[test]
fn concurrent_drains_deliver_each_signal_once() {
    model(|| {
        let vc = Arc::new(ShadowConnection::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let vc = Arc::clone(&vc);
                thread::spawn(move || vc.drain())
            })
            .collect();
        for handle in handles {
            handle.join().expect("投递线程不应 panic");
        }
        assert_eq!(vc.callbacks.load(Ordering::SeqCst), 2, "每个信号恰好投递一次");
    });
}
