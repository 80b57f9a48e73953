//! 传输层抽象
//!
//! `EventTransport` 负责把事件写到本进程的某个连接上；
//! `EventRelay` 是可选的跨进程发布订阅通道，用于多实例部署。

use async_trait::async_trait;
use domain::{ChatId, ConnectionId, ServerEvent, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    /// 连接已经关闭或从未附加
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("transport failed: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 发送到单个本地连接
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, connection_id: ConnectionId, event: ServerEvent)
        -> Result<(), TransportError>;
}

/// 跨进程广播的投递范围
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayScope {
    /// 会话房间内的所有订阅连接（可排除发起连接）
    Room {
        chat_id: ChatId,
        except: Option<ConnectionId>,
    },
    /// 某个用户的所有连接
    User { user_id: UserId },
    /// 全部连接
    All,
}

/// 在实例之间传递的广播信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// 发布实例的 id，订阅方据此忽略自己发出的信封
    pub origin: Uuid,
    pub scope: RelayScope,
    pub event: ServerEvent,
}

#[async_trait]
pub trait EventRelay: Send + Sync {
    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), TransportError>;
}
