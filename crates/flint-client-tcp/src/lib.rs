#![doc = r#"
# flint-client-tcp

## 设计动机（Why）
- **定位**：该 crate 提供嵌入宿主 reactor 的单连接非阻塞 TCP 客户端，
  封装建连裁决、就绪驱动的读写、跨线程投递与有序关闭等底层细节。
- **架构角色**：客户端自带一个私有 `mio::Poll`，对外只暴露其原始描述符
  与一个绝不阻塞的事件处理入口，由宿主的多路复用循环嵌套驱动；
  它不拥有事件循环，也不创建任何线程。
- **设计理念**：强调“单写者状态机”与“就绪即契约”。套接字与全部会话
  状态归 reactor 线程独占；任意线程只通过有界队列与合并唤醒信号影响
  reactor，背压以同步布尔答案交付，绝不阻塞生产者。

## 核心契约（What）
- **生命周期**：`Disconnected → Connecting → Connected → Disconnecting →
  Disconnected`，迁移图见 `docs/state_machines.md`；
- **回调交付**：连接结果每次尝试恰好一次；断开每个会话恰好一次并区分
  对端/本地；写结果每条出队消息恰好一次；数据到达按就绪读取逐块交付；
- **背压**：待发队列有界（默认 32 条），入队占额、整条写完释放，满载
  时 `write` 返回 `false` 且无任何副作用；
- **误用与结局分开**：同步 `Result` 只报状态与参数误用，连接成败一律
  走回调，见 [`ClientError`] 与 [`ConnectionResult`]。

## 实现策略（How）
- **就绪后端**：`mio`（epoll/kqueue）承担注册与收割，兴趣采用一次性
  语义，事件消费后在分发尾部按状态统一重挂；
- **建连**：`socket2` 构造非阻塞套接字并按配置设置 `TCP_NODELAY`，
  `EINPROGRESS` 后由可写事件配合 `take_error` 裁决成败并分类；
- **跨线程**：`parking_lot` 的互斥与条件变量支撑 `wait_state`，
  `bytes::Bytes` 让队首视图与写游标零拷贝共享。

## 风险与考量（Trade-offs）
- **单连接**：本 crate 不做连接池与多路复用；需要多条连接时由宿主
  实例化多个客户端并各自嵌套其描述符；
- **无内建定时器**：connect 超时交给内核（`ETIMEDOUT`）或宿主的外部
  截止机制裁决；
- **回调纪律**：所有回调在 reactor 线程串行执行，回调内阻塞会停摆
  整个宿主循环；越界恐慌被遮断并强制关闭当前连接。
"#]

mod client;
mod config;
mod error;
mod handle;
mod hooks;
mod queue;
mod readiness;
mod state;
mod wakeup;

pub use client::TcpClient;
pub use config::ClientConfig;
pub use error::{ClientError, ConnectionResult, codes};
pub use handle::ClientHandle;
pub use hooks::ClientHooks;
pub use state::ConnectionState;
