use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("credential expired")]
    Expired,
}

/// 认证端口：把不透明的凭证映射成稳定的用户身份
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}
