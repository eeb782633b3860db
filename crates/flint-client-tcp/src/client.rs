//! 单连接 TCP 客户端：状态机、I/O 引擎与 reactor 入口。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 在宿主 reactor 的单线程里驱动一条 TCP 连接的完整生命周期：解析与
//!   建连、就绪驱动的读写、有序关闭；对外只暴露回调，从不阻塞宿主；
//! - 把跨线程可变面压缩到待发队列与关闭标志两处，其余全部归 reactor
//!   线程独占，省掉整个套接字路径上的锁。
//!
//! ## 逻辑 (How)
//! - 宿主把 [`TcpClient::readiness_fd`] 当普通 fd 监听，可读时调用
//!   [`TcpClient::service_events`]；后者零超时收割私有 poll 里的事件，
//!   批量分发后进入一次 `reconcile`：推进关闭意图、排空待发队列、
//!   结算关闭、最后统一重挂兴趣；
//! - 兴趣完全由状态推导：`Connecting` 挂可写；`Connected` /
//!   `Disconnecting` 恒挂可读，写方向只在上一次写被内核顶回
//!   （`WouldBlock`）时追加；
//! - 唤醒事件不携带语义，收到后仅清脏标志，工作量一律从队列占用与
//!   关闭标志重推导，信号合并不会丢失事实。
//!
//! ## 契约 (What)
//! - [`service_events`](TcpClient::service_events) 绝不阻塞、绝不向外
//!   恐慌；回调越界恐慌被遮断并走故障收尾；
//! - 每次 `connect()` 尝试恰好一次连接结果回调；每个会话恰好一次断开
//!   回调；每条出队消息恰好一次写结果回调；
//! - 回调均在 reactor 线程串行执行，顺序与事件顺序一致。
//!
//! ## 风险提示 (Trade-offs & Gotchas)
//! - 单次就绪读取有上界（`recv_buffer_size`），靠分发尾部的重挂让仍有
//!   存量的内核缓冲再次上报；漏挂即饿死，见 `readiness` 模块的回归
//!   测试；
//! - 本 crate 不设 connect 定时器，超时裁决交给内核（`ETIMEDOUT`）。

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mio::Interest;
use mio::event::Event;
use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::ClientConfig;
use crate::error::{ClientError, ConnectionResult, classify_connect_error};
use crate::handle::{ClientHandle, Shared};
use crate::hooks::{self, ClientHooks, HookResult};
use crate::readiness::{Readiness, SOCKET, WAKER};
use crate::state::ConnectionState;

/// 连接目标：延迟解析的 `host:port` 或已解析的地址。
enum Target {
    HostPort { host: String, port: u16 },
    Addr(SocketAddr),
}

impl Target {
    /// 每次 connect 尝试现场解析，DNS 失败按本次尝试汇报。
    fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        match self {
            Target::Addr(addr) => Ok(vec![*addr]),
            Target::HostPort { host, port } => {
                Ok((host.as_str(), *port).to_socket_addrs()?.collect())
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::HostPort { host, port } => write!(f, "{host}:{port}"),
            Target::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// 队首消息的写入游标：payload 是队首的廉价视图，written 是已被内核
/// 接受的前缀长度。整条写完之前消息留在队列里占着额度。
struct WriteCursor {
    payload: Bytes,
    written: usize,
}

impl WriteCursor {
    fn new(payload: Bytes) -> Self {
        Self {
            payload,
            written: 0,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.payload[self.written..]
    }

    fn is_done(&self) -> bool {
        self.written >= self.payload.len()
    }
}

/// 嵌入宿主 reactor 的非阻塞 TCP 客户端。
///
/// reactor 线程独占本结构；生产者线程通过 [`handle`](Self::handle)
/// 取得的 [`ClientHandle`] 投递消息与请求关闭。
pub struct TcpClient {
    config: ClientConfig,
    hooks: ClientHooks,
    readiness: Readiness,
    shared: Arc<Shared>,
    target: Option<Target>,
    resolved: Vec<SocketAddr>,
    stream: Option<TcpStream>,
    cursor: Option<WriteCursor>,
    write_blocked: bool,
    scratch: Vec<u8>,
}

impl TcpClient {
    /// 以给定配置与回调集构造客户端。配置在此一次性固化。
    pub fn new(config: ClientConfig, hooks: ClientHooks) -> Result<Self, ClientError> {
        config.validate()?;
        let (readiness, waker) = Readiness::new()?;
        let shared = Arc::new(Shared::new(config.max_in_flight, waker));
        let scratch = vec![0u8; config.recv_buffer_size];
        Ok(Self {
            hooks,
            readiness,
            shared,
            target: None,
            resolved: Vec::new(),
            stream: None,
            cursor: None,
            write_blocked: false,
            scratch,
            config,
        })
    }

    /// 绑定 `host:port` 形式的目标，容忍 `tcp://` 前缀与 `[v6]` 括号。
    pub fn init(&mut self, target: &str) -> Result<(), ClientError> {
        let parsed = parse_target(target)?;
        self.bind_target(parsed)
    }

    /// 绑定主机名与端口。
    pub fn init_host_port(
        &mut self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), ClientError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ClientError::BadTarget {
                input: host,
                reason: "host must not be empty",
            });
        }
        self.bind_target(Target::HostPort { host, port })
    }

    /// 绑定已解析的套接字地址，connect 时跳过 DNS。
    pub fn init_addr(&mut self, addr: SocketAddr) -> Result<(), ClientError> {
        self.bind_target(Target::Addr(addr))
    }

    /// 设置是否保留 Nagle 算法，下一次 `connect()` 时生效。
    pub fn set_use_nagle(&mut self, use_nagle: bool) -> Result<(), ClientError> {
        self.ensure_disconnected("set_use_nagle")?;
        self.config.use_nagle = use_nagle;
        Ok(())
    }

    /// 发起一次非阻塞连接尝试。
    ///
    /// 返回 `Ok(())` 仅表示尝试已发起（或失败已由连接结果回调汇报）；
    /// `Err` 只用于状态或参数误用。
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.ensure_disconnected("connect")?;
        if self.target.is_none() {
            return Err(ClientError::NotInitialized);
        }
        self.reset_session();

        let Some(target) = self.target.as_ref() else {
            return Err(ClientError::NotInitialized);
        };
        let addrs = match target.resolve() {
            Ok(addrs) => addrs,
            Err(err) => return self.report_host_unknown(Some(err)),
        };
        let Some(&addr) = addrs.first() else {
            return self.report_host_unknown(None);
        };

        self.resolved = addrs;
        self.shared.state.set(ConnectionState::Connecting);
        tracing::info!(%addr, "tcp connect initiated");
        match self.open_stream(addr) {
            Ok(mut stream) => {
                if let Err(err) = self.readiness.register(&mut stream, Interest::WRITABLE) {
                    self.fail_connect(ConnectionResult::UnknownError, &err);
                    return Ok(());
                }
                self.stream = Some(stream);
                Ok(())
            }
            Err(err) => {
                self.fail_connect(classify_connect_error(&err), &err);
                Ok(())
            }
        }
    }

    /// 私有 poll 的原始描述符；宿主把它当普通 fd 监听可读。
    #[cfg(unix)]
    pub fn readiness_fd(&self) -> RawFd {
        self.readiness.raw_fd()
    }

    /// 处理当前所有就绪事件。绝不阻塞，绝不向外恐慌。
    ///
    /// 返回是否处理过至少一个事件，宿主可据此区分真实工作与外层的
    /// 虚假就绪。以零超时反复收割直到空批，保证边沿触发的外层注册
    /// 不会积压。
    pub fn service_events(&mut self) -> bool {
        let mut handled_any = false;
        loop {
            let events = match self.readiness.poll_once() {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(%err, "readiness poll failed");
                    break;
                }
            };
            if events.is_empty() {
                self.readiness.recycle(events);
                break;
            }
            for event in events.iter() {
                handled_any = true;
                match event.token() {
                    SOCKET => self.on_socket_event(event),
                    WAKER => self.shared.signal.acknowledge(),
                    other => {
                        tracing::warn!(token = other.0, "event on unknown token ignored");
                    }
                }
            }
            self.readiness.recycle(events);
            self.reconcile();
        }
        handled_any
    }

    /// 生产者线程用的可克隆句柄。
    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(Arc::clone(&self.shared))
    }

    /// 同 [`ClientHandle::write`]。
    pub fn write(&self, payload: impl Into<Bytes>) -> bool {
        self.shared.try_send(payload.into())
    }

    /// 同 [`ClientHandle::write_slice`]。
    pub fn write_slice(&self, data: &[u8]) -> bool {
        self.shared.try_send(Bytes::copy_from_slice(data))
    }

    /// 同 [`ClientHandle::write_str`]。
    pub fn write_str(&self, text: &str) -> bool {
        self.write_slice(text.as_bytes())
    }

    /// 同 [`ClientHandle::request_close`]。
    pub fn request_close(&self) {
        self.shared.request_close();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

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

    pub fn bytes_sent(&self) -> u64 {
        self.shared.counters.bytes_sent()
    }

    pub fn msgs_sent(&self) -> u64 {
        self.shared.counters.msgs_sent()
    }

    pub fn msgs_received(&self) -> u64 {
        self.shared.counters.msgs_received()
    }

    pub fn queued_messages(&self) -> usize {
        self.shared.queue.len()
    }

    fn ensure_disconnected(&self, operation: &'static str) -> Result<(), ClientError> {
        let actual = self.shared.state.load();
        if actual != ConnectionState::Disconnected {
            return Err(ClientError::Busy { operation, actual });
        }
        Ok(())
    }

    fn bind_target(&mut self, target: Target) -> Result<(), ClientError> {
        self.ensure_disconnected("init")?;
        tracing::debug!(%target, "target bound");
        self.target = Some(target);
        Ok(())
    }

    /// 解析失败：无描述符，同步回调 `HostUnknown`，状态保持断开。
    fn report_host_unknown(&mut self, err: Option<io::Error>) -> Result<(), ClientError> {
        tracing::warn!(
            code = ConnectionResult::HostUnknown.code(),
            err = ?err,
            "target resolution failed"
        );
        let outcome = self
            .hooks
            .notify_connection_result(ConnectionResult::HostUnknown, &[]);
        self.guard_hook(outcome);
        Ok(())
    }

    /// 建非阻塞套接字并发起 connect；`EINPROGRESS` 是正常的进行中。
    fn open_stream(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_tcp_nodelay(!self.config.use_nagle)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
        Ok(TcpStream::from_std(socket.into()))
    }

    fn on_socket_event(&mut self, event: &Event) {
        match self.shared.state.load() {
            ConnectionState::Connecting => {
                if event.is_writable() || event.is_error() {
                    self.complete_connect();
                }
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                if event.is_writable() {
                    self.write_blocked = false;
                }
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    self.read_step();
                }
            }
            ConnectionState::Disconnected => {
                tracing::trace!("socket event after teardown ignored");
            }
        }
    }

    /// 可写事件裁决 connect 成败：`take_error` 是第一判据。
    fn complete_connect(&mut self) {
        let taken = match self.stream.as_mut() {
            Some(stream) => stream.take_error(),
            None => return,
        };
        match taken {
            Ok(Some(err)) => self.fail_connect(classify_connect_error(&err), &err),
            Err(err) => self.fail_connect(ConnectionResult::UnknownError, &err),
            Ok(None) => self.finish_connect(),
        }
    }

    fn finish_connect(&mut self) {
        let peer = match self.stream.as_mut() {
            Some(stream) => stream.peer_addr(),
            None => return,
        };
        match peer {
            Ok(peer_addr) => {
                // 先发布状态再回调：回调体里即可开始投递消息。
                self.shared.state.set(ConnectionState::Connected);
                tracing::info!(peer = %peer_addr, "tcp connection established");
                let outcome = self
                    .hooks
                    .notify_connection_result(ConnectionResult::Success, &self.resolved);
                self.guard_hook(outcome);
            }
            Err(err)
                if err.kind() == io::ErrorKind::NotConnected
                    || err.raw_os_error() == Some(libc::EINPROGRESS) =>
            {
                tracing::trace!("connect still pending");
            }
            Err(err) => self.fail_connect(classify_connect_error(&err), &err),
        }
    }

    /// 连接失败收尾：先关描述符再回调，失败时地址列表为空。
    fn fail_connect(&mut self, result: ConnectionResult, err: &io::Error) {
        self.close_stream();
        self.reset_session();
        self.shared.state.set(ConnectionState::Disconnected);
        tracing::warn!(code = result.code(), %err, "tcp connect failed");
        let outcome = self.hooks.notify_connection_result(result, &[]);
        self.guard_hook(outcome);
    }

    /// 单次有界读取。零字节是对端的有序关闭。
    fn read_step(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.read(&mut self.scratch) {
            Ok(0) => {
                tracing::debug!("peer closed the connection");
                self.teardown(true);
            }
            Ok(count) => {
                self.shared.counters.incr_msgs_received();
                tracing::trace!(len = count, "chunk received");
                let outcome = self.hooks.notify_received(&self.scratch[..count]);
                self.guard_hook(outcome);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!("spurious read readiness");
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::warn!(%err, "read failed; closing connection");
                self.teardown(true);
            }
        }
    }

    /// 排空待发队列：队首整条写完才弹出，部分写留游标等下一次可写。
    fn drain_queue(&mut self) {
        loop {
            if self.write_blocked {
                break;
            }
            let mut cursor = match self.cursor.take() {
                Some(cursor) => cursor,
                None => match self.shared.queue.front_clone() {
                    Some(payload) => WriteCursor::new(payload),
                    None => break,
                },
            };
            if cursor.is_done() {
                // 零长度消息不触碰内核，直接结算。
                if !self.settle_sent(&cursor) {
                    break;
                }
                continue;
            }
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            match stream.write(cursor.remaining()) {
                Ok(0) => {
                    self.write_blocked = true;
                    self.cursor = Some(cursor);
                    break;
                }
                Ok(count) => {
                    cursor.written += count;
                    self.shared.counters.add_bytes_sent(count as u64);
                    tracing::trace!(len = count, "bytes handed to the kernel");
                    if cursor.is_done() {
                        if !self.settle_sent(&cursor) {
                            break;
                        }
                    } else {
                        self.cursor = Some(cursor);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.write_blocked = true;
                    self.cursor = Some(cursor);
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    self.cursor = Some(cursor);
                }
                Err(err) => {
                    tracing::warn!(%err, written = cursor.written, "write failed; closing connection");
                    let outcome =
                        self.hooks
                            .notify_write_result(Some(&err), &cursor.payload, cursor.written);
                    if self.guard_hook(outcome) {
                        self.teardown(true);
                    }
                    break;
                }
            }
        }
    }

    /// 整条消息写完的结算：弹队首归还额度、计数、回调。
    /// 返回 `false` 表示回调恐慌，故障收尾已经执行。
    fn settle_sent(&mut self, cursor: &WriteCursor) -> bool {
        self.shared.queue.pop_front();
        self.shared.counters.incr_msgs_sent();
        let outcome = self
            .hooks
            .notify_write_result(None, &cursor.payload, cursor.written);
        self.guard_hook(outcome)
    }

    /// 分发尾部的统一收束：推进关闭意图、排空队列、结算关闭、重挂。
    fn reconcile(&mut self) {
        if self.shared.close_requested() && self.shared.state.load() == ConnectionState::Connected
        {
            tracing::debug!(
                pending = self.shared.queue.len(),
                "close requested; draining pending messages"
            );
            self.shared.state.set(ConnectionState::Disconnecting);
        }
        if matches!(
            self.shared.state.load(),
            ConnectionState::Connected | ConnectionState::Disconnecting
        ) {
            self.drain_queue();
        }
        if self.shared.state.load() == ConnectionState::Disconnecting
            && self.cursor.is_none()
            && self.shared.queue.is_empty()
        {
            tracing::info!("tcp connection closed locally");
            self.teardown(false);
        }
        self.rearm_interest();
    }

    /// 从状态推导期望兴趣并重挂。对仍然就绪的描述符，重挂本身就是
    /// 下一次上报的来源，不能省。
    fn rearm_interest(&mut self) {
        let desired = match self.shared.state.load() {
            ConnectionState::Connecting => Some(Interest::WRITABLE),
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                if self.write_blocked {
                    Some(Interest::READABLE | Interest::WRITABLE)
                } else {
                    Some(Interest::READABLE)
                }
            }
            ConnectionState::Disconnected => None,
        };
        let armed = match (desired, self.stream.as_mut()) {
            (Some(interest), Some(stream)) => self.readiness.rearm(stream, interest),
            _ => Ok(()),
        };
        if let Err(err) = armed {
            tracing::error!(%err, "failed to re-arm socket interest; closing connection");
            // Connecting 阶段尚未汇报连接结果，按本次尝试失败结算。
            if self.shared.state.load() == ConnectionState::Connecting {
                self.fail_connect(ConnectionResult::UnknownError, &err);
            } else {
                self.teardown(true);
            }
        }
    }

    /// 会话收尾：关描述符、清会话残留、发布断开、回调。
    fn teardown(&mut self, from_peer: bool) {
        self.close_stream();
        self.reset_session();
        self.shared.state.set(ConnectionState::Disconnected);
        let outcome = self.hooks.notify_disconnected(from_peer);
        self.guard_hook(outcome);
    }

    fn reset_session(&mut self) {
        self.cursor = None;
        self.write_blocked = false;
        self.shared.queue.clear();
        self.shared.clear_close_request();
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = self.readiness.deregister(&mut stream) {
                tracing::debug!(%err, "socket deregistration failed during close");
            }
        }
    }

    fn guard_hook(&mut self, outcome: HookResult) -> bool {
        match outcome {
            Ok(()) => true,
            Err(payload) => {
                self.on_hook_panic(payload);
                false
            }
        }
    }

    /// 回调恐慌的故障收尾：强制关闭、丢弃未发送消息、回到断开态。
    /// 断开回调仅在确实存在会话时补发，且其自身的恐慌只记录不扩散。
    fn on_hook_panic(&mut self, payload: Box<dyn Any + Send>) {
        tracing::error!(
            panic = hooks::panic_message(payload.as_ref()),
            "hook panicked inside the reactor; force closing the connection"
        );
        let had_session = self.stream.is_some();
        self.close_stream();
        self.reset_session();
        self.shared.state.set(ConnectionState::Disconnected);
        self.hooks.notify_fault(payload);
        if had_session && self.hooks.notify_disconnected(false).is_err() {
            tracing::error!("disconnected hook panicked during fault recovery; panic dropped");
        }
    }
}

impl Drop for TcpClient {
    /// 非断开态析构属于调用方缺陷：强制关闭描述符，不补发任何回调。
    fn drop(&mut self) {
        let state = self.shared.state.load();
        if state != ConnectionState::Disconnected {
            tracing::warn!(?state, "client dropped while active; force closing the socket");
            self.close_stream();
            self.shared.state.set(ConnectionState::Disconnected);
        }
    }
}

fn parse_target(raw: &str) -> Result<Target, ClientError> {
    let trimmed = raw.strip_prefix("tcp://").unwrap_or(raw);
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Ok(Target::Addr(addr));
    }
    let Some((host, port)) = trimmed.rsplit_once(':') else {
        return Err(ClientError::BadTarget {
            input: raw.to_string(),
            reason: "expected `host:port`",
        });
    };
    let port: u16 = port.parse().map_err(|_| ClientError::BadTarget {
        input: raw.to_string(),
        reason: "port must be an integer in 0..=65535",
    })?;
    let host = host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(ClientError::BadTarget {
            input: raw.to_string(),
            reason: "host must not be empty",
        });
    }
    Ok(Target::HostPort {
        host: host.to_string(),
        port,
    })
}
