//! 读写暂存缓冲。
//!
//! # 教案级说明
//! - **Why**：连接只负责"把字节搬进/搬出缓冲"，缓冲本身由状态机持有并在回调中消费。
//!   读缓冲因此必须可共享（连接写入、目标读取）；写源则区分"连接拥有"与"调用方保留"两种所有权。
//! - **What**：
//!   - [`IoBuffer`]：可克隆的共享字节队列，克隆指向同一份数据；
//!   - [`SharedReader`]：调用方保留所有权的写源，连接只借用其游标；
//!   - [`WriteSource`]：写票据的数据来源，变体本身即 "owns buffer" 标志。
//! - **How**：以 `parking_lot::Mutex<BytesMut>` 承载数据；`Owned` 写源随票据完成、被取代或连接关闭
//!   而恰好析构一次，`Shared` 写源永不由连接释放。

use std::{fmt, sync::Arc};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

/// 调用方持有、连接借用的写源。
pub type SharedReader = Arc<Mutex<dyn Buf + Send>>;

/// 可克隆的共享字节队列。
#[derive(Clone, Default)]
pub struct IoBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl IoBuffer {
    /// 创建空缓冲。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以预留容量创建。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BytesMut::with_capacity(capacity))),
        }
    }

    /// 当前可读字节数。
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// 追加字节。
    pub fn append(&self, data: &[u8]) {
        self.inner.lock().put_slice(data);
    }

    /// 取走全部已缓冲字节。
    pub fn take_all(&self) -> Bytes {
        self.inner.lock().split().freeze()
    }

    /// 以本缓冲为数据源构造写源读端。
    ///
    /// 写入 `IoBuffer` 的字节随后会被连接按顺序消费，适合"边生产边发送"的场景。
    pub fn reader(&self) -> SharedReader {
        self.inner.clone()
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer").field("len", &self.len()).finish()
    }
}

/// 写票据的数据来源。
pub enum WriteSource {
    /// 所有权转移给连接，由连接负责释放。
    Owned(Box<dyn Buf + Send>),
    /// 所有权留在调用方，调用方需保证其存活到票据完成或连接关闭。
    Shared(SharedReader),
}

impl WriteSource {
    /// 把任意 `Buf` 的所有权交给连接。
    pub fn owned(buf: impl Buf + Send + 'static) -> Self {
        WriteSource::Owned(Box::new(buf))
    }

    /// 连接是否负责释放该写源。
    pub fn owns_buffer(&self) -> bool {
        matches!(self, WriteSource::Owned(_))
    }

    /// 剩余可发送字节数。
    pub fn remaining(&self) -> usize {
        match self {
            WriteSource::Owned(buf) => buf.remaining(),
            WriteSource::Shared(reader) => reader.lock().remaining(),
        }
    }

    /// 把最多 `limit` 个连续字节交给 `sink`，并按其返回值推进游标。
    pub(crate) fn drain_into<E>(
        &mut self,
        limit: usize,
        sink: impl FnOnce(&[u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        fn step<E>(
            buf: &mut (dyn Buf + Send),
            limit: usize,
            sink: impl FnOnce(&[u8]) -> Result<usize, E>,
        ) -> Result<usize, E> {
            let chunk = buf.chunk();
            let len = chunk.len().min(limit);
            if len == 0 {
                return Ok(0);
            }
            let written = sink(&chunk[..len])?.min(len);
            buf.advance(written);
            Ok(written)
        }

        match self {
            WriteSource::Owned(buf) => step(buf.as_mut(), limit, sink),
            WriteSource::Shared(reader) => step(&mut *reader.lock(), limit, sink),
        }
    }
}

impl fmt::Debug for WriteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSource")
            .field("owns_buffer", &self.owns_buffer())
            .field("remaining", &self.remaining())
            .finish()
    }
}
