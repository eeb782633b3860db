//! 生命周期回调集合与越界恐慌的遮断层。

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;

use crate::error::ConnectionResult;

/// 回调执行结果：`Err` 携带越界恐慌的载荷。
pub(crate) type HookResult = Result<(), Box<dyn Any + Send>>;

type ConnectionResultFn = Box<dyn FnMut(ConnectionResult, &[SocketAddr]) + Send>;
type DisconnectedFn = Box<dyn FnMut(bool) + Send>;
type WriteResultFn = Box<dyn FnMut(Option<&io::Error>, &Bytes, usize) + Send>;
type ReceivedDataFn = Box<dyn FnMut(&[u8]) + Send>;
type FaultFn = Box<dyn FnMut(Box<dyn Any + Send>) + Send>;

/// 以值注入的回调能力集。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 客户端对外只暴露就绪驱动的回调，不暴露任何阻塞调用；回调以
///   闭包值注入而非继承覆写，调用方据此组合自己的上层协议。
///
/// ## 契约 (What)
/// - `on_connection_result`：每次 `connect()` 尝试恰好回调一次；成功时
///   携带完整解析地址列表，失败时列表为空；
/// - `on_disconnected(from_peer)`：每个会话结束恰好一次，`true` 表示对端
///   先关闭或出现不可恢复 IO 错误，`false` 表示本地 `request_close()`
///   排空后的收尾（故障强制关闭也归入 `false`）；
/// - `on_write_result(error, payload, written)`：每条出队消息一次；
///   `error` 为 `None` 时 `written == payload.len()`，否则 `written` 是
///   该消息已被内核接受的字节数；
/// - `on_received_data(chunk)`：每次就绪读取一次，借用仅在回调期间有效，
///   需要留存必须自行拷贝；
/// - `on_fault(panic)`：某个回调越界恐慌时接管其载荷；随后连接被强制
///   关闭，未发送消息丢弃，状态回到断开。
///
/// ## 风险提示 (Trade-offs & Gotchas)
/// - 所有回调都在 reactor 线程串行执行：回调内可以调用句柄上的
///   `write` / `request_close`，但绝不能阻塞等待网络进度，否则整个
///   反应器停摆；
/// - `on_fault` 自身再恐慌只会被记录日志后丢弃，不再二次分发。
#[derive(Default)]
pub struct ClientHooks {
    connection_result: Option<ConnectionResultFn>,
    disconnected: Option<DisconnectedFn>,
    write_result: Option<WriteResultFn>,
    received_data: Option<ReceivedDataFn>,
    fault: Option<FaultFn>,
}

impl ClientHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接结果回调。
    pub fn on_connection_result(
        mut self,
        hook: impl FnMut(ConnectionResult, &[SocketAddr]) + Send + 'static,
    ) -> Self {
        self.connection_result = Some(Box::new(hook));
        self
    }

    /// 注册断开回调，参数表示是否由对端（或 IO 错误）触发。
    pub fn on_disconnected(mut self, hook: impl FnMut(bool) + Send + 'static) -> Self {
        self.disconnected = Some(Box::new(hook));
        self
    }

    /// 注册单条消息的写结果回调。
    pub fn on_write_result(
        mut self,
        hook: impl FnMut(Option<&io::Error>, &Bytes, usize) + Send + 'static,
    ) -> Self {
        self.write_result = Some(Box::new(hook));
        self
    }

    /// 注册数据到达回调。
    pub fn on_received_data(mut self, hook: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.received_data = Some(Box::new(hook));
        self
    }

    /// 注册回调恐慌的接管回调。
    pub fn on_fault(
        mut self,
        hook: impl FnMut(Box<dyn Any + Send>) + Send + 'static,
    ) -> Self {
        self.fault = Some(Box::new(hook));
        self
    }

    pub(crate) fn notify_connection_result(
        &mut self,
        outcome: ConnectionResult,
        addrs: &[SocketAddr],
    ) -> HookResult {
        match self.connection_result.as_mut() {
            Some(hook) => shielded(|| hook(outcome, addrs)),
            None => Ok(()),
        }
    }

    pub(crate) fn notify_disconnected(&mut self, from_peer: bool) -> HookResult {
        match self.disconnected.as_mut() {
            Some(hook) => shielded(|| hook(from_peer)),
            None => Ok(()),
        }
    }

    pub(crate) fn notify_write_result(
        &mut self,
        error: Option<&io::Error>,
        payload: &Bytes,
        written: usize,
    ) -> HookResult {
        match self.write_result.as_mut() {
            Some(hook) => shielded(|| hook(error, payload, written)),
            None => Ok(()),
        }
    }

    pub(crate) fn notify_received(&mut self, chunk: &[u8]) -> HookResult {
        match self.received_data.as_mut() {
            Some(hook) => shielded(|| hook(chunk)),
            None => Ok(()),
        }
    }

    /// 分发恐慌载荷；二次恐慌只记录，不再向外传播。
    pub(crate) fn notify_fault(&mut self, payload: Box<dyn Any + Send>) {
        match self.fault.as_mut() {
            Some(hook) => {
                if shielded(|| hook(payload)).is_err() {
                    tracing::error!("fault hook panicked; secondary panic dropped");
                }
            }
            None => {
                tracing::error!(
                    panic = panic_message(payload.as_ref()),
                    "hook panicked and no fault hook is installed"
                );
            }
        }
    }
}

impl fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHooks")
            .field("connection_result", &self.connection_result.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("write_result", &self.write_result.is_some())
            .field("received_data", &self.received_data.is_some())
            .field("fault", &self.fault.is_some())
            .finish()
    }
}

fn shielded(hook: impl FnOnce()) -> HookResult {
    catch_unwind(AssertUnwindSafe(hook))
}

/// 尽力从恐慌载荷中取出人类可读的描述。
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
