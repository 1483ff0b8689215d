#![deny(unsafe_code)]
#![doc = r#"
# spark-netvc

## 设计动机（Why）
- **定位**：代理/缓存 I/O 核心中的异步网络连接句柄。它把一条双工字节流（TCP 或 UDP）
  抽象为统一、协议无关的连接，让多个独立状态机可以非阻塞地读写、仲裁两类超时，
  并在无竞态的前提下拆除连接。
- **架构角色**：本 crate 只定义契约与状态机，不依赖任何运行时；真正的套接字驱动由
  传输实现（例如 `spark-netvc-tokio`）通过 [`TransportPort`] 接入。
- **设计理念**：回调何时触发、以何种顺序、在哪把锁下、关闭后能做什么，全部由
  连接内部的投递循环统一裁决，而不是分散在各个调用点。

## 核心契约（What）
- 每个方向同时最多一张 [`Ticket`]，新的 `do_io_read`/`do_io_write` 取代旧票据；
- 方向半关闭后不再投递该方向事件，[`VConnection::do_io_close`] 返回后不再投递任何事件；
- 超时到期只通知一次：先读侧目标，读侧返回 [`EventOutcome::Done`] 时跳过写侧，
  读写目标相同时只通知一次；
- 调用方违反契约得到 [`ErrorKind::ContractViolation`]，I/O 过程中的传输错误以
  [`VcEvent::Error`] 事件异步送达。

## 实现策略（How）
- 连接状态由 `parking_lot::Mutex` 保护，事件投递由连接级 `ReentrantMutex` 与目标级
  `ReentrantMutex` 串行化；
- 时间来源（[`Clock`]）、详细日志（[`DetailedLog`]）、地址端点（[`SocketEndpoint`]）与
  传输唤醒器（[`TransportNotifier`]）均以 trait 对象注入，测试可完全确定性地驱动连接。

## 风险与考量（Trade-offs）
- 回调是同步函数，在传输层的驱动线程上执行；耗时逻辑应转交给其它执行器。
- 跨连接互相关闭存在等待环路的可能，详见 [`connection`] 模块说明。
"#]

pub mod address;
pub mod buffer;
pub mod clock;
pub mod connection;
pub mod continuation;
pub mod detailed_log;
pub mod error;
pub mod event;
pub mod oob;
pub mod options;
pub mod port;
pub mod ticket;
mod timeout;

pub use address::SocketEndpoint;
pub use buffer::{IoBuffer, SharedReader, WriteSource};
pub use clock::{Clock, MockClock, SystemClock};
pub use connection::{CallbackScope, NetVConnection, NetVConnectionBuilder, VConnection};
pub use continuation::{Continuation, EventHandler};
pub use detailed_log::{DetailedLog, NoopDetailedLog, RecordingDetailedLog};
pub use error::{ErrorKind, NetError, Result, codes};
pub use event::{
    CloseCode, EventKind, EventOutcome, IoFailure, ShutdownHowTo, TimeoutKind, VcEvent,
};
pub use oob::OobHandle;
pub use options::{
    AddrBinding, ConnectionKind, ConnectionOptions, ExecutionAffinity, IpProtocol, PortBinding,
    SockOpt, SockOptFlags, SocksSupport,
};
pub use port::{DrainStatus, ShutdownState, TransportNotifier, TransportPort};
pub use ticket::{ByteCount, Direction, Progress, Ticket};
