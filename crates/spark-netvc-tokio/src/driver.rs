//! 每条连接一个的 Tokio 驱动任务。
//!
//! # 教案级说明
//!
//! ## 意图（Why）
//! - 连接只维护状态机，真正的套接字 I/O 在这里发生：驱动任务等待就绪、把字节喂给
//!   [`TransportPort`]、检查超时，并调用 `drain` 让回调在本任务上执行。
//!
//! ## 契约（What）
//! - 每轮循环依次处理：关闭检测、半关闭下发、积压字节、超时、事件投递，然后等待下一次唤醒；
//! - 唤醒来源包括连接通知（[`NotifyWaker`]）、读写就绪以及最近的超时时刻；
//! - 连接关闭后任务结束并释放套接字；`CloseCode::Abort` 关闭时先设置 `SO_LINGER = 0`。
//!
//! ## 实现（How）
//! - 读到的字节若超出票据当前可接收量，保存在 `backlog` 中，等待 `reenable` 后继续交付；
//!   积压非空时不再等待可读，避免无界缓存；
//! - `Notify::notify_one` 在没有等待者时保存一个许可，兴趣检查与进入等待之间的通知不会丢失。
//!
//! ## 风险与考量（Trade-offs）
//! - 投递锁被其它线程持有时以短暂退避重试，而不是阻塞运行时线程；
//! - 调用方丢弃全部句柄却从未关闭连接时，驱动任务会一直存活，直到套接字出错或运行时退出。

use std::{io, net::Shutdown, sync::Arc, time::Duration};

use spark_netvc::{
    Clock, CloseCode, DrainStatus, ShutdownState, TransportNotifier, TransportPort,
};
use tokio::sync::Notify;

use crate::socket::SocketIo;

/// 单次读取使用的临时缓冲区大小。
const READ_CHUNK: usize = 16 * 1024;
/// 投递锁竞争时的退避间隔。
const CONTENDED_BACKOFF: Duration = Duration::from_millis(1);

/// 把连接的唤醒请求转交给驱动任务。
#[derive(Debug)]
pub(crate) struct NotifyWaker(Arc<Notify>);

impl NotifyWaker {
    pub(crate) fn new(wake: &Arc<Notify>) -> Self {
        Self(Arc::clone(wake))
    }
}

impl TransportNotifier for NotifyWaker {
    fn notify(&self) {
        self.0.notify_one();
    }
}

enum Wake {
    Notified,
    Timer,
    Readable(io::Result<()>),
    Writable(io::Result<()>),
}

pub(crate) struct Driver {
    port: TransportPort,
    io: SocketIo,
    wake: Arc<Notify>,
    clock: Arc<dyn Clock>,
    applied: ShutdownState,
    scratch: Vec<u8>,
    backlog: Vec<u8>,
}

impl Driver {
    pub(crate) fn new(
        port: TransportPort,
        io: SocketIo,
        wake: Arc<Notify>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            port,
            io,
            wake,
            clock,
            applied: ShutdownState::default(),
            scratch: vec![0; READ_CHUNK],
            backlog: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(
            connection.id = self.port.connection().id(),
            stream = self.io.is_stream(),
            "driver started"
        );
        loop {
            if self.port.is_closed() {
                break;
            }
            self.apply_shutdown();
            self.feed_backlog();
            self.port.check_timeouts();
            if self.port.drain() == DrainStatus::Contended {
                self.backoff().await;
                continue;
            }
            if self.port.is_closed() {
                break;
            }
            match self.wait().await {
                Wake::Notified | Wake::Timer => {}
                Wake::Readable(result) => self.on_readable(result),
                Wake::Writable(result) => self.on_writable(result),
            }
        }
        self.finish();
    }

    async fn wait(&self) -> Wake {
        let read = self.port.read_interest() && self.backlog.is_empty();
        let write = self.port.write_interest() || self.port.oob_pending();
        let delay = self
            .port
            .next_timeout_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()));
        let timer = async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.wake.notified() => Wake::Notified,
            result = self.io.readable(), if read => Wake::Readable(result),
            result = self.io.writable(), if write => Wake::Writable(result),
            _ = timer => Wake::Timer,
        }
    }

    async fn backoff(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(CONTENDED_BACKOFF) => {}
        }
    }

    fn on_readable(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            self.port.on_read_error(&err);
            return;
        }
        match self.io.try_read(&mut self.scratch) {
            Ok(0) if self.io.is_stream() => self.port.on_read_eof(),
            Ok(n) => {
                self.backlog.extend_from_slice(&self.scratch[..n]);
                self.feed_backlog();
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => self.port.on_read_error(&err),
        }
    }

    fn on_writable(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            self.port.on_write_error(&err);
            return;
        }
        if self.port.oob_pending() {
            match self.port.oob_send_with(|data| self.io.try_send_oob(data)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    tracing::debug!(
                        connection.id = self.port.connection().id(),
                        error = %err,
                        "out-of-band send failed"
                    );
                    self.port.on_oob_peer_closed();
                }
            }
        }
        match self.port.write_with(|chunk| self.io.try_write(chunk)) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => self.port.on_write_error(&err),
        }
    }

    fn feed_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }
        let accepted = self.port.on_read(&self.backlog);
        self.backlog.drain(..accepted);
    }

    /// 把连接上新出现的半关闭下发到套接字，每个方向只下发一次。
    fn apply_shutdown(&mut self) {
        let wanted = self.port.shutdown_state();
        let read = wanted.read && !self.applied.read;
        let write = wanted.write && !self.applied.write;
        let how = match (read, write) {
            (true, true) => Shutdown::Both,
            (true, false) => Shutdown::Read,
            (false, true) => Shutdown::Write,
            (false, false) => return,
        };
        if read {
            self.backlog.clear();
        }
        if let Err(err) = self.io.shutdown(how) {
            tracing::debug!(
                connection.id = self.port.connection().id(),
                error = %err,
                "socket shutdown failed"
            );
        }
        self.applied = wanted;
    }

    fn finish(self) {
        let code = self.port.close_code();
        if code == Some(CloseCode::Abort)
            && let Err(err) = self.io.abort()
        {
            tracing::debug!(
                connection.id = self.port.connection().id(),
                error = %err,
                "abortive close setup failed"
            );
        }
        tracing::debug!(
            connection.id = self.port.connection().id(),
            close.code = code.map_or("none", |code| code.as_str()),
            "driver finished"
        );
    }
}
