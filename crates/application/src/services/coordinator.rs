//! 实时聊天协调器
//!
//! 把一条已认证的连接和它发来的客户端事件转换成经过授权、
//! 已持久化的状态变化与扇出通知。每个入站事件对应一次 `handle` 调用，
//! 不同连接之间的调用可以并发执行。

use std::sync::Arc;
use std::time::Duration;

use config::ChatConfig;
use domain::{ChatId, ClientEvent, ConnectionId, ServerEvent, UserId};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broadcaster::{EventRelay, EventTransport, RelayEnvelope};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::rate_limiter::EventRateLimiter;
use crate::registry::{ConnectionRegistry, Disconnection};
use crate::repository::ChatStore;
use crate::services::access::{Caller, TimeoutChatStore};
use crate::services::membership::{registry_error, RoomMembershipManager};
use crate::services::message_pipeline::{MessagePipeline, SendMessageRequest};
use crate::services::presence::PresenceBroadcaster;
use crate::services::reactions::ReactionProcessor;
use crate::services::read_receipts::ReadReceiptProcessor;
use crate::services::typing::TypingRelay;

/// 协调器的行为参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub max_content_length: usize,
    pub persistence_timeout: Duration,
    pub typing_max_events: u32,
    pub typing_window: Duration,
    pub message_max_per_window: u32,
    pub message_window: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for CoordinatorSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_content_length: config.max_content_length,
            persistence_timeout: Duration::from_millis(config.persistence_timeout_ms),
            typing_max_events: config.typing_max_events,
            typing_window: Duration::from_secs(config.typing_window_secs),
            message_max_per_window: config.message_max_per_window,
            message_window: Duration::from_secs(config.message_window_secs),
        }
    }
}

/// 限流器当前跟踪的键数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitUsage {
    pub senders: usize,
    pub typing: usize,
}

pub struct ChatCoordinatorDependencies {
    pub store: Arc<dyn ChatStore>,
    pub transport: Arc<dyn EventTransport>,
    pub relay: Option<Arc<dyn EventRelay>>,
    pub clock: Arc<dyn Clock>,
    pub settings: CoordinatorSettings,
}

pub struct ChatCoordinator {
    registry: Arc<ConnectionRegistry>,
    fanout: Arc<Fanout>,
    membership: RoomMembershipManager,
    pipeline: MessagePipeline,
    receipts: ReadReceiptProcessor,
    reactions: ReactionProcessor,
    presence: PresenceBroadcaster,
    typing: TypingRelay,
}

impl ChatCoordinator {
    pub fn new(deps: ChatCoordinatorDependencies) -> Self {
        let settings = deps.settings;
        let store: Arc<dyn ChatStore> = Arc::new(TimeoutChatStore::new(
            deps.store,
            settings.persistence_timeout,
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(Fanout::new(registry.clone(), deps.transport, deps.relay));

        Self {
            membership: RoomMembershipManager::new(store.clone(), fanout.clone()),
            pipeline: MessagePipeline::new(
                store.clone(),
                fanout.clone(),
                deps.clock.clone(),
                EventRateLimiter::new(settings.message_max_per_window, settings.message_window),
                settings.max_content_length,
            ),
            receipts: ReadReceiptProcessor::new(store.clone(), fanout.clone()),
            reactions: ReactionProcessor::new(store.clone(), fanout.clone(), deps.clock.clone()),
            presence: PresenceBroadcaster::new(store.clone(), fanout.clone(), deps.clock),
            typing: TypingRelay::new(
                store,
                fanout.clone(),
                EventRateLimiter::new(settings.typing_max_events, settings.typing_window),
            ),
            registry,
            fanout,
        }
    }

    /// 登记一个已通过认证的连接；用户的第一个连接会触发上线广播
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let first_connection = self
            .registry
            .register(connection_id, user_id)
            .await
            .map_err(registry_error)?;
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            first_connection,
            "connection registered"
        );

        if first_connection {
            if let Err(err) = self.presence.sync_with_registry(user_id).await {
                tracing::warn!(user_id = %user_id, error = %err, "failed to publish online status");
            }
        }
        Ok(())
    }

    /// 注销连接，隐式离开它加入的所有房间（不逐个发送 `user-left`）；
    /// 用户的最后一个连接断开时广播下线
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Disconnection, ApplicationError> {
        let disconnection = self
            .registry
            .unregister(connection_id)
            .await
            .map_err(|err| ApplicationError::not_found(err.to_string()))?;
        self.typing.forget(connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %disconnection.user_id,
            rooms = disconnection.joined_chats.len(),
            last_connection = disconnection.last_connection,
            "connection unregistered"
        );

        if disconnection.last_connection {
            if let Err(err) = self.presence.sync_with_registry(disconnection.user_id).await {
                tracing::warn!(
                    user_id = %disconnection.user_id,
                    error = %err,
                    "failed to publish offline status"
                );
            }
        }
        Ok(disconnection)
    }

    /// 处理一个入站事件；失败只以 `error` 事件回报给发起连接
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        let name = event.name();
        if let Err(err) = self.dispatch(connection_id, event).await {
            tracing::debug!(
                connection_id = %connection_id,
                event = name,
                error = %err,
                "client event rejected"
            );
            self.fanout
                .to_connection(connection_id, ServerEvent::error(err.code(), err.to_string()))
                .await;
        }
    }

    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        let caller = self.caller(connection_id).await?;

        match event {
            ClientEvent::JoinChat(chat_id) => self.membership.join(caller, chat_id).await,
            ClientEvent::LeaveChat(chat_id) => self.membership.leave(caller, chat_id).await,
            ClientEvent::Typing { chat_id, is_typing } => {
                self.typing.typing(caller, chat_id, is_typing).await
            }
            ClientEvent::SendMessage {
                chat_id,
                content,
                message_type,
                reply_to,
                metadata,
            } => {
                let request = SendMessageRequest {
                    chat_id,
                    content,
                    kind: message_type,
                    metadata,
                    reply_to,
                };
                self.pipeline.send(caller, request).await.map(|_| ())
            }
            ClientEvent::MarkRead {
                chat_id,
                message_ids,
            } => self
                .receipts
                .mark_read(caller, chat_id, message_ids)
                .await
                .map(|_| ()),
            ClientEvent::ReactToMessage { message_id, emoji } => {
                self.reactions.react(caller, message_id, emoji).await
            }
            ClientEvent::RemoveReaction { message_id } => {
                self.reactions.unreact(caller, message_id).await
            }
            ClientEvent::UpdateStatus {
                status,
                custom_status,
            } => self
                .presence
                .set_status(caller.user_id, status.is_online(), custom_status)
                .await
                .map(|_| ()),
            ClientEvent::Ping => {
                self.fanout
                    .to_connection(connection_id, ServerEvent::Pong)
                    .await;
                Ok(())
            }
        }
    }

    /// 释放已过期的限流记录，返回清理后仍在跟踪的键数
    pub fn prune_rate_limits(&self) -> RateLimitUsage {
        let usage = RateLimitUsage {
            senders: self.pipeline.prune_rate_limits(),
            typing: self.typing.prune_rate_limits(),
        };
        tracing::debug!(
            senders = usage.senders,
            typing = usage.typing,
            "rate limit quotas pruned"
        );
        usage
    }

    /// 按固定周期清理限流记录，直到任务被取消
    pub fn spawn_rate_limit_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match coordinator.upgrade() {
                    Some(coordinator) => {
                        coordinator.prune_rate_limits();
                    }
                    None => break,
                }
            }
        })
    }

    /// 来自其他实例的广播
    pub async fn deliver_relayed(&self, envelope: RelayEnvelope) {
        self.fanout.deliver_relayed(envelope).await;
    }

    pub fn instance_id(&self) -> uuid::Uuid {
        self.fanout.instance_id()
    }

    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.registry.user_of(connection_id).await
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.registry.is_online(user_id).await
    }

    pub async fn is_joined(&self, connection_id: ConnectionId, chat_id: ChatId) -> bool {
        self.registry.is_joined(connection_id, chat_id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    pub async fn online_user_count(&self) -> usize {
        self.registry.online_user_count().await
    }

    pub async fn active_room_count(&self) -> usize {
        self.registry.active_room_count().await
    }

    async fn caller(&self, connection_id: ConnectionId) -> Result<Caller, ApplicationError> {
        let user_id = self
            .registry
            .user_of(connection_id)
            .await
            .ok_or(ApplicationError::Authentication)?;
        Ok(Caller {
            connection_id,
            user_id,
        })
    }
}
