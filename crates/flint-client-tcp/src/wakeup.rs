//! 跨线程唤醒桥：合并信号，工作量由状态重推导。
//!
//! 生产者只负责“捅一下” reactor；被唤醒后做什么，一律由 reactor 重新
//! 检查队列占用与关闭标志得出。信号本身不携带语义，丢合并不丢事实。

use std::sync::atomic::{AtomicBool, Ordering};

use mio::Waker;

/// 合并式唤醒信号。
///
/// ## 逻辑 (How)
/// - `raise` 用 `swap` 抢占脏标志，只有从净到脏的那一次真正写入
///   waker；其余并发调用直接返回，天然合并；
/// - waker 写失败时当场归还脏标志，占位不会滞留在没有事件兑现的
///   状态上，后续 `raise` 会重试唤醒；
/// - reactor 收到唤醒事件后先 [`acknowledge`](Self::acknowledge)
///   清脏，再去重推导工作；先清后查的顺序保证清洗之后发生的
///   `raise` 一定能产生新事件。
pub(crate) struct WakeSignal {
    waker: Waker,
    pending: AtomicBool,
}

impl WakeSignal {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            waker,
            pending: AtomicBool::new(false),
        }
    }

    /// 请求唤醒 reactor；重复调用合并为一次事件。
    pub(crate) fn raise(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.waker.wake() {
            // 占位必须随失败一起归还，否则后续 raise 全部静默。
            self.pending.store(false, Ordering::Release);
            tracing::warn!(?err, "waker write failed; signal released for retry");
        }
    }

    /// 消费当前信号，允许后续 `raise` 再次产生事件。
    pub(crate) fn acknowledge(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::time::Duration;

    const WAKE: Token = Token(9);

    fn wait_events(poll: &mut Poll, events: &mut Events) -> usize {
        poll.poll(events, Some(Duration::from_millis(500)))
            .expect("poll failed");
        events.iter().count()
    }

    /// 三次 raise 合并为一个唤醒事件；acknowledge 之后才能再次唤醒。
    #[test]
    fn raises_coalesce_until_acknowledged() {
        let mut poll = Poll::new().expect("poll");
        let waker = Waker::new(poll.registry(), WAKE).expect("waker");
        let signal = WakeSignal::new(waker);
        let mut events = Events::with_capacity(4);

        signal.raise();
        signal.raise();
        signal.raise();
        assert_eq!(wait_events(&mut poll, &mut events), 1);
        assert_eq!(
            events.iter().next().map(|event| event.token()),
            Some(WAKE)
        );

        signal.acknowledge();
        signal.raise();
        assert_eq!(wait_events(&mut poll, &mut events), 1);
    }

    /// 未 acknowledge 前的重复 raise 不产生新事件。
    #[test]
    fn unacknowledged_signal_stays_silent() {
        let mut poll = Poll::new().expect("poll");
        let waker = Waker::new(poll.registry(), WAKE).expect("waker");
        let signal = WakeSignal::new(waker);
        let mut events = Events::with_capacity(4);

        signal.raise();
        assert_eq!(wait_events(&mut poll, &mut events), 1);

        signal.raise();
        let count = poll
            .poll(&mut events, Some(Duration::from_millis(50)))
            .map(|_| events.iter().count())
            .unwrap_or(0);
        assert_eq!(count, 0);
    }

    /// 占位在手而事件未发时所有 raise 都静默；归还占位后必须恢复
    /// 唤醒能力。waker 写失败分支维持的正是这条协议。
    #[test]
    fn stale_claim_silences_raises_until_released() {
        let mut poll = Poll::new().expect("poll");
        let waker = Waker::new(poll.registry(), WAKE).expect("waker");
        let signal = WakeSignal::new(waker);
        let mut events = Events::with_capacity(4);

        // 构造"占位已占、事件没发出去"的现场。
        signal.pending.store(true, Ordering::Release);
        signal.raise();
        let silenced = poll
            .poll(&mut events, Some(Duration::from_millis(50)))
            .map(|_| events.iter().count())
            .unwrap_or(0);
        assert_eq!(silenced, 0);

        signal.pending.store(false, Ordering::Release);
        signal.raise();
        assert_eq!(wait_events(&mut poll, &mut events), 1);
    }
}
