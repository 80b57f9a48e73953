//! Redis 广播错误类型定义

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// 连接错误
    #[error("redis connection error: {message}")]
    Connection { message: String },

    /// 发布错误
    #[error("redis publish error: {message}")]
    Publish { message: String },

    /// 订阅错误
    #[error("redis subscribe error: {message}")]
    Subscribe { message: String },

    /// 信封编解码错误
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::Connection {
            message: err.to_string(),
        }
    }
}
