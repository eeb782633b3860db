//! 任意线程侧的客户端句柄与其背后的共享单元。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use mio::Waker;

use crate::queue::SendQueue;
use crate::state::{ConnectionState, StateCell};
use crate::wakeup::WakeSignal;

/// 累计计数器。单调递增，reactor 线程写，任意线程读，跨会话不清零。
pub(crate) struct Counters {
    bytes_sent: AtomicU64,
    msgs_sent: AtomicU64,
    msgs_received: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            msgs_sent: AtomicU64::new(0),
            msgs_received: AtomicU64::new(0),
        }
    }

    pub(crate) fn add_bytes_sent(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn incr_msgs_sent(&self) {
        self.msgs_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_msgs_received(&self) {
        self.msgs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn msgs_sent(&self) -> u64 {
        self.msgs_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn msgs_received(&self) -> u64 {
        self.msgs_received.load(Ordering::Relaxed)
    }
}

/// reactor 与任意数量生产者线程之间的共享单元。
///
/// ## 契约 (What)
/// - 生产者可变的只有两样东西：待发队列与关闭标志，其余字段对生产者
///   只读；套接字、游标等可变资源完全留在 reactor 一侧；
/// - 任何会改变 reactor 工作量的操作（入队、请求关闭）之后必须
///   `raise` 唤醒信号。
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) queue: SendQueue,
    close_requested: AtomicBool,
    pub(crate) signal: WakeSignal,
    pub(crate) counters: Counters,
}

impl Shared {
    pub(crate) fn new(queue_capacity: usize, waker: Waker) -> Self {
        Self {
            state: StateCell::new(ConnectionState::Disconnected),
            queue: SendQueue::new(queue_capacity),
            close_requested: AtomicBool::new(false),
            signal: WakeSignal::new(waker),
            counters: Counters::new(),
        }
    }

    /// 非阻塞投递：仅在 `Connected` 且队列未满时接受。
    ///
    /// 状态检查与入队之间存在窗口：状态刚翻转时可能多收一条消息，
    /// 拆除路径统一清队列，语义不受影响。
    pub(crate) fn try_send(&self, payload: Bytes) -> bool {
        if self.state.load() != ConnectionState::Connected {
            return false;
        }
        if !self.queue.push(payload) {
            return false;
        }
        self.signal.raise();
        true
    }

    /// 标记关闭意图并唤醒 reactor；断开态下是无副作用的空操作。
    pub(crate) fn request_close(&self) {
        if self.state.load() == ConnectionState::Disconnected {
            return;
        }
        self.close_requested.store(true, Ordering::Release);
        self.signal.raise();
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub(crate) fn clear_close_request(&self) {
        self.close_requested.store(false, Ordering::Release);
    }
}

/// 可克隆的任意线程句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“生产消息”与“驱动套接字”两种角色拆开：reactor 线程独占
///   [`TcpClient`](crate::TcpClient)，句柄发给任意多个生产者线程；
/// - 句柄上的每个方法都保证不阻塞（[`wait_state`](Self::wait_state)
///   系列除外，那是给测试与运维探针的慢路径）。
///
/// ## 契约 (What)
/// - `write` 族：`Connected` 且队列有额度时整条入队并返回 `true`；
///   其余情况返回 `false`，载荷不产生任何副作用；
/// - `request_close`：幂等地标记关闭意图，已入队消息仍会先发完；
/// - 状态与计数读取允许读到瞬时旧值。
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// 投递一条消息，移动语义，零拷贝接受 `Bytes` / `Vec<u8>` 等。
    pub fn write(&self, payload: impl Into<Bytes>) -> bool {
        self.shared.try_send(payload.into())
    }

    /// 投递一条消息，从切片拷贝一份。
    pub fn write_slice(&self, data: &[u8]) -> bool {
        self.shared.try_send(Bytes::copy_from_slice(data))
    }

    /// 投递一条文本消息，按 UTF-8 字节拷贝。
    pub fn write_str(&self, text: &str) -> bool {
        self.write_slice(text.as_bytes())
    }

    /// 请求有序关闭：排空已入队消息后断开。
    pub fn request_close(&self) {
        self.shared.request_close();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// 是否处于唯一允许投递的 `Connected` 状态。
    pub fn can_send_messages(&self) -> bool {
        self.shared.state.load() == ConnectionState::Connected
    }

    /// 阻塞等待状态到达 `target`。不得在 reactor 线程上调用。
    pub fn wait_state(&self, target: ConnectionState) {
        self.shared.state.wait(target);
    }

    /// 带时限的状态等待，返回是否按时到达。
    pub fn wait_state_timeout(&self, target: ConnectionState, timeout: Duration) -> bool {
        self.shared.state.wait_timeout(target, timeout)
    }

    /// 内核已接受的累计字节数（含部分写入的消息）。
    pub fn bytes_sent(&self) -> u64 {
        self.shared.counters.bytes_sent()
    }

    /// 完整写完的累计消息条数。
    pub fn msgs_sent(&self) -> u64 {
        self.shared.counters.msgs_sent()
    }

    /// 已交付给数据回调的累计读取块数。
    pub fn msgs_received(&self) -> u64 {
        self.shared.counters.msgs_received()
    }

    /// 当前在待发队列中的消息条数（含正在部分写入的队首）。
    pub fn queued_messages(&self) -> usize {
        self.shared.queue.len()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("state", &self.state())
            .field("queued_messages", &self.queued_messages())
            .finish()
    }
}
