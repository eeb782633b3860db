//! 错误契约：同步误用错误与一次连接尝试的结果分类。
//!
//! 两条通道严格分开：[`ClientError`] 只描述调用方在错误的状态或参数下
//! 调用 API 的失败，立即以 `Result` 返回；[`ConnectionResult`] 描述一次
//! 连接尝试的最终结局，只通过连接结果回调交付，每次尝试恰好一次。

use std::io;

use thiserror::Error;

use crate::state::ConnectionState;

/// 稳定错误码表。
///
/// 码值遵循 `<域>.<语义>` 约定，一经发布不再更名，供日志检索与
/// 告警规则直接引用。
pub mod codes {
    /// 连接建立成功。
    pub const CONNECT_OK: &str = "client.connect_ok";
    /// 未能归类的连接失败。
    pub const CONNECT_UNKNOWN: &str = "client.connect_unknown";
    /// 对端拒绝或网络不可达。
    pub const CONNECT_UNREACHABLE: &str = "client.connect_unreachable";
    /// 目标主机名无法解析。
    pub const HOST_UNKNOWN: &str = "client.host_unknown";
    /// 内核连接超时（`ETIMEDOUT`）。
    pub const CONNECT_TIMEOUT: &str = "client.connect_timeout";

    /// 调用前未绑定目标地址。
    pub const NOT_INITIALIZED: &str = "client.not_initialized";
    /// 当前状态不允许该操作。
    pub const BUSY: &str = "client.busy";
    /// 目标地址字符串无法解析。
    pub const BAD_TARGET: &str = "client.bad_target";
    /// 配置取值非法。
    pub const BAD_CONFIG: &str = "client.bad_config";
    /// 就绪后端（poll/waker）初始化或注册失败。
    pub const IO: &str = "client.io";
}

/// 一次连接尝试的结局分类。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把散落在 errno 里的失败原因收敛成少数几个调用方可以直接决策的
///   类别：重试、换地址、报警或放弃；
/// - 连接结局只在 `Connecting` 退出时产生一次，通过连接结果回调交付，
///   不混入同步 `Result` 通道。
///
/// ## 契约 (What)
/// - `Success`：套接字已可读写，回调携带完整解析地址列表；
/// - `CouldNotConnect`：对端拒绝或路由不可达（`ECONNREFUSED`、
///   `EHOSTUNREACH` 等）；
/// - `HostUnknown`：域名解析失败，此时从未创建过描述符；
/// - `Timeout`：内核对 connect 的时限裁决（`ETIMEDOUT`），本 crate 自身
///   不设额外定时器；
/// - `UnknownError`：其余一切，调用方应按不可重试处理。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionResult {
    Success,
    UnknownError,
    CouldNotConnect,
    HostUnknown,
    Timeout,
}

impl ConnectionResult {
    /// 是否为成功结局。
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionResult::Success)
    }

    /// 对应的稳定错误码，见 [`codes`]。
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionResult::Success => codes::CONNECT_OK,
            ConnectionResult::UnknownError => codes::CONNECT_UNKNOWN,
            ConnectionResult::CouldNotConnect => codes::CONNECT_UNREACHABLE,
            ConnectionResult::HostUnknown => codes::HOST_UNKNOWN,
            ConnectionResult::Timeout => codes::CONNECT_TIMEOUT,
        }
    }
}

/// 同步 API 误用与初始化失败的错误类型。
///
/// 连接结局永远不会出现在这里：`connect()` 返回 `Ok(())` 仅表示尝试已
/// 发起，成败由连接结果回调汇报。
#[derive(Debug, Error)]
pub enum ClientError {
    /// 尚未通过任一 `init` 变体绑定目标地址。
    #[error("client target is not initialized; call one of the init methods first")]
    NotInitialized,
    /// 操作要求客户端处于断开态。
    #[error("operation `{operation}` is not allowed while the client is {actual:?}")]
    Busy {
        operation: &'static str,
        actual: ConnectionState,
    },
    /// 目标地址字符串不符合 `host:port` 约定。
    #[error("invalid target address `{input}`: {reason}")]
    BadTarget { input: String, reason: &'static str },
    /// 配置取值非法，构造阶段即拒绝。
    #[error("invalid configuration: {reason}")]
    BadConfig { reason: &'static str },
    /// 就绪后端初始化或套接字注册失败。
    #[error("readiness backend failure: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// 对应的稳定错误码，见 [`codes`]。
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::NotInitialized => codes::NOT_INITIALIZED,
            ClientError::Busy { .. } => codes::BUSY,
            ClientError::BadTarget { .. } => codes::BAD_TARGET,
            ClientError::BadConfig { .. } => codes::BAD_CONFIG,
            ClientError::Io(_) => codes::IO,
        }
    }
}

/// 将 connect 阶段的 `io::Error` 归类为 [`ConnectionResult`]。
///
/// ## 逻辑 (How)
/// - 优先按原始 errno 判定，这是内核裁决的第一手信息；
/// - 无 errno 时退回 `io::ErrorKind`，覆盖被上层包装过的错误；
/// - 其余一律归入 `UnknownError`，宁可保守也不误报可达性问题。
pub(crate) fn classify_connect_error(err: &io::Error) -> ConnectionResult {
    if let Some(code) = err.raw_os_error() {
        return match code {
            libc::ECONNREFUSED
            | libc::ECONNRESET
            | libc::ECONNABORTED
            | libc::EHOSTUNREACH
            | libc::ENETUNREACH
            | libc::ENETDOWN => ConnectionResult::CouldNotConnect,
            libc::ETIMEDOUT => ConnectionResult::Timeout,
            _ => ConnectionResult::UnknownError,
        };
    }
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::NetworkDown => ConnectionResult::CouldNotConnect,
        io::ErrorKind::TimedOut => ConnectionResult::Timeout,
        _ => ConnectionResult::UnknownError,
    }
}
