//! 客户端容量与套接字选项配置。

use crate::error::ClientError;

/// 构造期一次性固化的客户端配置。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `max_in_flight`：待发队列的容量上限，入队即占一份额度，整条消息
///   写完才释放；默认 32；
/// - `recv_buffer_size`：单次就绪读取的暂存缓冲大小，默认 65536 字节；
/// - `use_nagle`：是否保留 Nagle 算法（`true` 表示不设置
///   `TCP_NODELAY`），默认 `true`，在下一次建连时生效。
///
/// ## 风险提示 (Trade-offs & Gotchas)
/// - 两个容量字段必须为正，[`validate`](Self::validate) 在构造客户端时
///   拒绝零值；
/// - 连接建立后配置不可再变，重配置的正确路径是断开后重建。
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub max_in_flight: usize,
    pub recv_buffer_size: usize,
    pub use_nagle: bool,
}

pub(crate) const DEFAULT_MAX_IN_FLIGHT: usize = 32;
pub(crate) const DEFAULT_RECV_BUFFER_SIZE: usize = 65536;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            use_nagle: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置待发队列容量上限。
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// 设置单次读取的暂存缓冲大小。
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// 设置是否保留 Nagle 算法。
    pub fn with_use_nagle(mut self, use_nagle: bool) -> Self {
        self.use_nagle = use_nagle;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.max_in_flight == 0 {
            return Err(ClientError::BadConfig {
                reason: "max_in_flight must be at least 1",
            });
        }
        if self.recv_buffer_size == 0 {
            return Err(ClientError::BadConfig {
                reason: "recv_buffer_size must be at least 1",
            });
        }
        Ok(())
    }
}
