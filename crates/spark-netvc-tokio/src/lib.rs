#![deny(unsafe_code)]
#![doc = r#"
# spark-netvc-tokio

## 设计动机（Why）
- `spark-netvc` 只定义连接契约与状态机；本 crate 把它接到真实套接字上：
  用 `socket2` 按 [`ConnectionOptions`](spark_netvc::ConnectionOptions) 创建并配置套接字，
  再由每条连接一个的 Tokio 任务驱动读写、超时与事件投递。

## 核心契约（What）
- [`NetProcessor::connect`] 返回已被驱动的 [`NetVConnection`](spark_netvc::NetVConnection)；
- [`NetProcessor::adopt_tcp`] 接管外部建立的 TCP 流；
- 回调在驱动任务所在的运行时线程上同步执行；
- [`init_tracing`] 为二进制与测试提供一次性的日志安装入口。

## 实现策略（How）
- 驱动任务是套接字的唯一强引用持有者，连接关闭后任务退出并释放套接字；
- 地址端点只保留弱引用，`CloseCode::Abort` 关闭时先设置 `SO_LINGER = 0` 再释放。

## 风险与考量（Trade-offs）
- 不执行 SOCKS 握手，选项中的 SOCKS 配置只影响连接种类；
- 透明绑定依赖 Linux `IP_TRANSPARENT` 与 `CAP_NET_ADMIN`，其它平台返回传输错误。
"#]

mod driver;
mod endpoint;
mod error;
mod processor;
mod socket;
pub mod telemetry;

pub use processor::NetProcessor;
pub use telemetry::{TelemetryError, init_tracing};
