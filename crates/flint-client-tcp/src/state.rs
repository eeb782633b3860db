//! 连接状态机的状态定义与跨线程状态单元。
//!
//! 状态迁移图见 `docs/state_machines.md`。写入方只有 reactor 线程一个，
//! 任意线程的读取允许读到瞬时旧值。

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// 单个 TCP 连接的生命周期状态。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `Disconnected`：无描述符，允许 `init` / `connect` / 配置修改；
/// - `Connecting`：非阻塞 connect 已发起，等待可写事件裁决成败；
/// - `Connected`：可读写，唯一允许消息入队的状态；
/// - `Disconnecting`：收到本地关闭请求，正在清空待发队列。
///
/// ## 风险提示 (Trade-offs & Gotchas)
/// - 读取方可能看到落后于 reactor 的旧状态；依赖精确时序的调用方应
///   使用回调而非轮询状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// 状态单元：原子发布 + 条件变量等待。
///
/// ## 逻辑 (How)
/// - `set` 先对原子槽执行 Release 写，再短暂取锁后广播条件变量；
///   等待方在锁内重检原子槽，该顺序排除了丢失唤醒；
/// - `wait` 系列只在慢路径（测试、运维探针）使用，reactor 线程永远
///   不得调用，否则没有人再推进状态。
pub(crate) struct StateCell {
    current: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new(initial: ConnectionState) -> Self {
        Self {
            current: AtomicU8::new(initial as u8),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.current.load(Ordering::Acquire))
    }

    /// 发布新状态并唤醒所有等待者。仅 reactor 线程调用。
    pub(crate) fn set(&self, next: ConnectionState) {
        self.current.store(next as u8, Ordering::Release);
        drop(self.lock.lock());
        self.changed.notify_all();
    }

    /// 阻塞直到状态等于 `target`。
    pub(crate) fn wait(&self, target: ConnectionState) {
        let mut guard = self.lock.lock();
        while self.load() != target {
            self.changed.wait(&mut guard);
        }
    }

    /// 带时限的等待，返回是否在时限内到达 `target`。
    pub(crate) fn wait_timeout(&self, target: ConnectionState, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while self.load() != target {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let result = self.changed.wait_for(&mut guard, deadline - now);
            if result.timed_out() && self.load() != target {
                return false;
            }
        }
        true
    }
}
