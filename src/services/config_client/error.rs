use crate::services::diff::ProtocolError;
use crate::services::failover::FailoverError;
use crate::services::scheduler::SchedulerError;

/// 配置客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
    #[error("No right to access config: {0}")]
    Forbidden(String),
    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Timeout error")]
    Timeout,
    #[error("Filter error: {0}")]
    Filter(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failover error: {0}")]
    Failover(#[from] FailoverError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl ConfigError {
    /// 鉴权失败不是瞬时错误，必须透传给调用方
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ConfigError::Forbidden(_))
    }
}
