//! 回环集成测试的公共支撑：回调录音机与嵌套 reactor 驱动线程。
#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flint_client_tcp::{ClientHooks, ConnectionResult, TcpClient};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use parking_lot::{Condvar, Mutex};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// 按发生顺序记录的回调事件。
#[derive(Clone, Debug, PartialEq)]
pub enum HookEvent {
    ConnectionResult {
        result: ConnectionResult,
        addrs: usize,
    },
    Disconnected {
        from_peer: bool,
    },
    WriteResult {
        ok: bool,
        payload: Vec<u8>,
        written: usize,
    },
    Received {
        chunk: Vec<u8>,
    },
    Fault {
        message: String,
    },
}

struct RecorderInner {
    events: Mutex<Vec<HookEvent>>,
    changed: Condvar,
}

/// 线程安全的回调录音机：回调推入事件，测试线程按谓词等待。
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                events: Mutex::new(Vec::new()),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn push(&self, event: HookEvent) {
        let mut events = self.inner.events.lock();
        events.push(event);
        self.inner.changed.notify_all();
    }

    pub fn snapshot(&self) -> Vec<HookEvent> {
        self.inner.events.lock().clone()
    }

    /// 阻塞直到事件序列满足谓词，或超时返回 `false`。
    pub fn wait_until(
        &self,
        timeout: Duration,
        predicate: impl Fn(&[HookEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.inner.events.lock();
        while !predicate(&events) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let result = self.inner.changed.wait_for(&mut events, deadline - now);
            if result.timed_out() && !predicate(&events) {
                return false;
            }
        }
        true
    }

    /// 全量回调都接入录音机的便捷构造。
    pub fn hooks(&self) -> ClientHooks {
        let on_result = self.clone();
        let on_drop = self.clone();
        let on_write = self.clone();
        let on_data = self.clone();
        let on_fault = self.clone();
        ClientHooks::new()
            .on_connection_result(move |result, addrs| {
                on_result.push(HookEvent::ConnectionResult {
                    result,
                    addrs: addrs.len(),
                });
            })
            .on_disconnected(move |from_peer| {
                on_drop.push(HookEvent::Disconnected { from_peer });
            })
            .on_write_result(move |error, payload, written| {
                on_write.push(HookEvent::WriteResult {
                    ok: error.is_none(),
                    payload: payload.to_vec(),
                    written,
                });
            })
            .on_received_data(move |chunk| {
                on_data.push(HookEvent::Received {
                    chunk: chunk.to_vec(),
                });
            })
            .on_fault(move |payload| {
                on_fault.push(HookEvent::Fault {
                    message: fault_text(payload),
                });
            })
    }

    /// 所有已交付数据块按顺序拼接。
    pub fn received_bytes(&self) -> Vec<u8> {
        let mut all = Vec::new();
        for event in self.inner.events.lock().iter() {
            if let HookEvent::Received { chunk } = event {
                all.extend_from_slice(chunk);
            }
        }
        all
    }

    /// 成功写结果的载荷长度序列，用于核对发送次序。
    pub fn write_result_sizes(&self) -> Vec<usize> {
        self.inner
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                HookEvent::WriteResult { ok: true, payload, .. } => Some(payload.len()),
                _ => None,
            })
            .collect()
    }
}

pub fn fault_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// 把客户端的 poll fd 注册进一个外层 mio 循环并在独立线程驱动。
/// 这正是生产宿主嵌套本客户端的方式。
pub struct Driver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<TcpClient>>,
}

impl Driver {
    pub fn spawn(client: TcpClient) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || run_reactor(client, flag));
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// 停止反应器并取回客户端。
    pub fn shutdown(mut self) -> TcpClient {
        self.stop.store(true, Ordering::Release);
        self.thread
            .take()
            .expect("driver already joined")
            .join()
            .expect("reactor thread panicked")
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_reactor(mut client: TcpClient, stop: Arc<AtomicBool>) -> TcpClient {
    let mut poll = Poll::new().expect("outer poll");
    let mut events = Events::with_capacity(4);
    let fd = client.readiness_fd();
    poll.registry()
        .register(&mut SourceFd(&fd), Token(0), Interest::READABLE)
        .expect("register client poll fd");
    while !stop.load(Ordering::Acquire) {
        let _ = poll.poll(&mut events, Some(Duration::from_millis(10)));
        client.service_events();
    }
    client
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
