//! 就绪注册适配层：私有 poll 实例上的一次性兴趣管理。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 客户端不拥有宿主事件循环，只拥有一个私有的 `mio::Poll`；对外暴露
//!   其原始描述符，宿主把它当作一个普通 fd 嵌套监听；
//! - 兴趣采用“一次性”语义：一个被消费的事件同时消费掉当时的兴趣，
//!   分发结束时必须显式重挂，杜绝“自以为还在监听”的悬空状态。
//!
//! ## 逻辑 (How)
//! - 一次性语义靠 `reregister` 模拟：epoll 的 `EPOLL_CTL_MOD` 会让仍然
//!   就绪的描述符在边沿模式下再次上报，因此对着旧兴趣原样重挂也是
//!   有意义的操作，不能被"值没变"的优化省掉；
//! - [`poll_once`](Readiness::poll_once) 始终以零超时轮询，从不阻塞
//!   调用线程；`Interrupted` 在内部重试；
//! - 事件缓冲以 take/recycle 轮转复用，避开借用冲突也避免每轮分配。
//!
//! ## 风险提示 (Trade-offs & Gotchas)
//! - 单次就绪读取是有界的，内核缓冲里多出来的数据不会再有新边沿；
//!   漏掉一次重挂就是一条饿死的连接，相关回归测试钉死了该行为。

use std::io;
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

/// 套接字事件令牌。
pub(crate) const SOCKET: Token = Token(0);
/// 跨线程唤醒事件令牌。
pub(crate) const WAKER: Token = Token(1);

const EVENT_BATCH: usize = 8;

pub(crate) struct Readiness {
    poll: Poll,
    events: Option<Events>,
}

impl Readiness {
    /// 创建私有 poll 实例，并在其上挂好唤醒源。
    pub(crate) fn new() -> io::Result<(Self, Waker)> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        Ok((
            Self {
                poll,
                events: Some(Events::with_capacity(EVENT_BATCH)),
            },
            waker,
        ))
    }

    /// 私有 poll 的原始描述符，供宿主多路复用器嵌套监听。
    #[cfg(unix)]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }

    pub(crate) fn register(&self, stream: &mut TcpStream, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(stream, SOCKET, interest)
    }

    /// 重挂兴趣。幂等：重复调用与调用一次效果相同，且对仍然就绪的
    /// 描述符会触发再次上报。
    pub(crate) fn rearm(&self, stream: &mut TcpStream, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(stream, SOCKET, interest)
    }

    pub(crate) fn deregister(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    /// 零超时收割一批事件；空批意味着当前没有任何就绪工作。
    pub(crate) fn poll_once(&mut self) -> io::Result<Events> {
        let mut events = self
            .events
            .take()
            .unwrap_or_else(|| Events::with_capacity(EVENT_BATCH));
        loop {
            match self.poll.poll(&mut events, Some(Duration::ZERO)) {
                Ok(()) => return Ok(events),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.events = Some(events);
                    return Err(err);
                }
            }
        }
    }

    /// 归还事件缓冲，供下一轮 [`poll_once`](Self::poll_once) 复用。
    pub(crate) fn recycle(&mut self, events: Events) {
        self.events = Some(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for_socket_event(readiness: &mut Readiness) -> bool {
        let deadline = Instant::now() + Duration::from_millis(300);
        loop {
            let events = readiness.poll_once().expect("poll_once failed");
            let hit = events.iter().any(|event| event.token() == SOCKET);
            readiness.recycle(events);
            if hit {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let local = std::net::TcpStream::connect(addr).expect("connect");
        local.set_nonblocking(true).expect("nonblocking");
        let (peer, _) = listener.accept().expect("accept");
        (TcpStream::from_std(local), peer)
    }

    /// 消费一个事件后不重挂就不会再有上报；显式重挂必须让仍然就绪的
    /// 套接字再次上报。这是防饿死契约的回归测试。
    #[test]
    fn rearm_rereports_a_still_ready_socket() {
        let (mut readiness, _waker) = Readiness::new().expect("readiness");
        let (mut stream, _peer) = connected_pair();

        readiness
            .register(&mut stream, Interest::WRITABLE)
            .expect("register");
        assert!(
            wait_for_socket_event(&mut readiness),
            "initial registration must report a writable socket"
        );

        assert!(
            !wait_for_socket_event(&mut readiness),
            "consumed edge must stay silent without a rearm"
        );

        readiness
            .rearm(&mut stream, Interest::WRITABLE)
            .expect("rearm");
        assert!(
            wait_for_socket_event(&mut readiness),
            "rearm must re-report a still-ready socket"
        );
    }

    /// 重挂是幂等的：背靠背两次重挂不报错，事件照常到达。
    #[test]
    fn rearm_is_idempotent() {
        let (mut readiness, _waker) = Readiness::new().expect("readiness");
        let (mut stream, _peer) = connected_pair();

        readiness
            .register(&mut stream, Interest::WRITABLE)
            .expect("register");
        readiness
            .rearm(&mut stream, Interest::WRITABLE)
            .expect("first rearm");
        readiness
            .rearm(&mut stream, Interest::WRITABLE)
            .expect("second rearm");
        assert!(wait_for_socket_event(&mut readiness));
    }
}
