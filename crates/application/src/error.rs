use domain::{DomainError, ErrorCode, RepositoryError};
use thiserror::Error;

use crate::rate_limiter::RateLimitError;

/// 协调器对外暴露的错误分类
///
/// 除 `Authentication` 外，所有错误都只回报给发起请求的连接，从不广播。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed")]
    Authentication,
    #[error("access denied: {0}")]
    Denied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("persistence error: {0}")]
    Persistence(RepositoryError),
}

impl ApplicationError {
    pub fn denied(message: impl Into<String>) -> Self {
        ApplicationError::Denied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApplicationError::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ApplicationError::Invalid(message.into())
    }

    /// 对应 `error` 事件中的错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            ApplicationError::Authentication => ErrorCode::Unauthenticated,
            ApplicationError::Denied(_) => ErrorCode::Denied,
            ApplicationError::NotFound(_) => ErrorCode::NotFound,
            ApplicationError::Invalid(_) => ErrorCode::Invalid,
            ApplicationError::RateLimited(_) => ErrorCode::RateLimited,
            ApplicationError::Persistence(_) => ErrorCode::Persistence,
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Invalid(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("record not found".into()),
            other => ApplicationError::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_to_taxonomy() {
        let not_found: ApplicationError = RepositoryError::NotFound.into();
        assert_eq!(not_found.code(), ErrorCode::NotFound);

        let timeout: ApplicationError = RepositoryError::Timeout { millis: 5000 }.into();
        assert_eq!(timeout.code(), ErrorCode::Persistence);

        let invalid: ApplicationError = DomainError::invalid_argument("content", "empty").into();
        assert_eq!(invalid.code(), ErrorCode::Invalid);
    }
}
