//! 领域模型错误定义
//!
//! 领域层只产生校验类错误；存储相关的失败由 `RepositoryError` 表达，
//! 由持久化端口的实现返回。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 会话参与者数量不符合会话类型
    #[error("{kind} chat requires {expected}, got {actual} participants")]
    InvalidParticipants {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
    },
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化端口错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// 记录不存在
    #[error("record not found")]
    NotFound,

    /// 唯一约束冲突
    #[error("record conflict")]
    Conflict,

    /// 存储层调用超时
    #[error("storage timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// 存储层错误
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
