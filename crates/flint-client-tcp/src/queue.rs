//! 跨线程待发队列：占用量即信用额度。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 把“信用计数”与“消息队列”收敛为同一个有界结构：入队成功即扣一份
//!   额度，整条消息写入内核后弹出队首才归还，砍掉两份状态之间的
//!   同步窗口；
//! - 生产者只需要一个布尔答案：要么整条入队，要么原样拒绝，绝不阻塞。
//!
//! ## 逻辑 (How)
//! - `parking_lot::Mutex<VecDeque<Bytes>>`，所有操作持锁时间为常数；
//! - 部分写期间队首保持在队列里，reactor 以 [`front_clone`]
//!   取一份廉价视图推进游标，写完才 [`pop_front`]；
//! - [`push`] 在 `len == capacity` 时拒绝，无任何副作用。
//!
//! ## 风险提示 (Trade-offs & Gotchas)
//! - 额度按消息条数而非字节数计，大小悬殊的消息混用时队列字节量
//!   没有上界，需要调用方自行约束消息尺寸。
//!
//! [`front_clone`]: SendQueue::front_clone
//! [`pop_front`]: SendQueue::pop_front
//! [`push`]: SendQueue::push

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

pub(crate) struct SendQueue {
    entries: Mutex<VecDeque<Bytes>>,
    capacity: usize,
}

impl SendQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// 入队一条消息；容量已满时拒绝并返回 `false`。
    pub(crate) fn push(&self, payload: Bytes) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(payload);
        true
    }

    /// 取队首的廉价克隆（共享底层存储），队列本身不变。
    pub(crate) fn front_clone(&self) -> Option<Bytes> {
        self.entries.lock().front().cloned()
    }

    /// 弹出队首并归还一份额度。仅在整条消息写完后调用。
    pub(crate) fn pop_front(&self) -> Option<Bytes> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
