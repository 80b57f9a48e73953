//! 事件扇出
//!
//! 把服务端事件投递给本地连接，并在配置了中继时发布到其他实例。
//! 单个连接写入失败（连接已关闭）只记录日志，不影响其余接收者。

use std::sync::Arc;

use domain::{ChatId, ConnectionId, ServerEvent, UserId};
use uuid::Uuid;

use crate::broadcaster::{EventRelay, EventTransport, RelayEnvelope, RelayScope};
use crate::registry::ConnectionRegistry;

pub struct Fanout {
    instance_id: Uuid,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn EventTransport>,
    relay: Option<Arc<dyn EventRelay>>,
}

impl Fanout {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn EventTransport>,
        relay: Option<Arc<dyn EventRelay>>,
    ) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            registry,
            transport,
            relay,
        }
    }

    /// 本实例在中继信封里使用的 id
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn to_connection(&self, connection_id: ConnectionId, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.transport.send(connection_id, event).await {
            tracing::debug!(
                connection_id = %connection_id,
                event = name,
                error = %err,
                "skipping closed connection"
            );
        }
    }

    pub async fn to_connections(
        &self,
        connections: impl IntoIterator<Item = ConnectionId>,
        event: &ServerEvent,
    ) {
        for connection_id in connections {
            self.to_connection(connection_id, event.clone()).await;
        }
    }

    /// 发给会话房间内的订阅连接，返回本地实际投递的连接
    pub async fn to_room(
        &self,
        chat_id: ChatId,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Vec<ConnectionId> {
        let targets = self.local_room_targets(chat_id, except).await;
        self.to_connections(targets.iter().copied(), &event).await;
        self.publish(RelayScope::Room { chat_id, except }, event).await;
        targets
    }

    pub async fn to_user(&self, user_id: UserId, event: ServerEvent) {
        let targets = self.registry.connections_of(user_id).await;
        self.to_connections(targets, &event).await;
        self.publish(RelayScope::User { user_id }, event).await;
    }

    pub async fn to_all(&self, event: ServerEvent) {
        let targets = self.registry.all_connections().await;
        self.to_connections(targets, &event).await;
        self.publish(RelayScope::All, event).await;
    }

    /// 处理来自其他实例的信封，只投递给本地连接
    pub async fn deliver_relayed(&self, envelope: RelayEnvelope) {
        if envelope.origin == self.instance_id {
            return;
        }
        let event = envelope.event;
        match envelope.scope {
            RelayScope::Room { chat_id, except } => {
                let targets = self.local_room_targets(chat_id, except).await;
                self.to_connections(targets, &event).await;
            }
            RelayScope::User { user_id } => {
                let targets = self.registry.connections_of(user_id).await;
                self.to_connections(targets, &event).await;
            }
            RelayScope::All => {
                let targets = self.registry.all_connections().await;
                self.to_connections(targets, &event).await;
            }
        }
    }

    async fn local_room_targets(
        &self,
        chat_id: ChatId,
        except: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        self.registry
            .room_members(chat_id)
            .await
            .into_iter()
            .filter(|connection_id| Some(*connection_id) != except)
            .collect()
    }

    async fn publish(&self, scope: RelayScope, event: ServerEvent) {
        let Some(relay) = &self.relay else {
            return;
        };
        let envelope = RelayEnvelope {
            origin: self.instance_id,
            scope,
            event,
        };
        if let Err(err) = relay.publish(envelope).await {
            tracing::warn!(error = %err, "failed to publish event to relay");
        }
    }
}
