//! 消息发送流水线
//!
//! 顺序保证：授权 → 校验 → 限流 → 持久化 → 扇出。
//! 持久化失败（包括超时）时不会有任何事件发出。

use std::sync::Arc;

use domain::{ChatId, Message, MessageContent, MessageId, MessageKind, ServerEvent, UserId};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::rate_limiter::EventRateLimiter;
use crate::repository::ChatStore;
use crate::services::access::{authorize, Caller};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
    pub reply_to: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn text(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            kind: MessageKind::Text,
            metadata: None,
            reply_to: None,
        }
    }
}

pub struct MessagePipeline {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
    clock: Arc<dyn Clock>,
    limiter: EventRateLimiter<UserId>,
    max_content_length: usize,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ChatStore>,
        fanout: Arc<Fanout>,
        clock: Arc<dyn Clock>,
        limiter: EventRateLimiter<UserId>,
        max_content_length: usize,
    ) -> Self {
        Self {
            store,
            fanout,
            clock,
            limiter,
            max_content_length,
        }
    }

    /// 清理过期的发送配额，返回仍在跟踪的发送者数
    pub fn prune_rate_limits(&self) -> usize {
        self.limiter.cleanup_expired();
        self.limiter.tracked_keys()
    }

    pub async fn send(
        &self,
        caller: Caller,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let chat = authorize(self.store.as_ref(), request.chat_id, caller.user_id).await?;
        let content = MessageContent::parse(request.content, self.max_content_length)?;

        if let Some(reply_to) = request.reply_to {
            let original = self.store.get_message(reply_to).await?;
            if original.map(|message| message.chat_id) != Some(chat.id) {
                return Err(ApplicationError::invalid(format!(
                    "reply target {reply_to} is not a message of this chat"
                )));
            }
        }

        self.limiter.check(&caller.user_id)?;

        let draft = Message::draft(
            MessageId::generate(),
            chat.id,
            caller.user_id,
            content,
            request.kind,
            request.metadata.unwrap_or(serde_json::Value::Null),
            request.reply_to,
            self.clock.now(),
        );
        let recipients = chat.unread_recipients(caller.user_id);

        let saved = self.store.save_message(draft, recipients).await?;
        let message = saved.message;
        tracing::info!(
            chat_id = %chat.id,
            message_id = %message.id,
            sender = %caller.user_id,
            sequence = message.sequence,
            "message persisted"
        );

        let delivered = self
            .fanout
            .to_room(
                chat.id,
                None,
                ServerEvent::NewMessage {
                    message: message.clone(),
                    chat_id: chat.id,
                },
            )
            .await;

        // 发送者不在房间里时单独回执一次，保证恰好收到一次自己的消息
        if !delivered.contains(&caller.connection_id) {
            self.fanout
                .to_connection(
                    caller.connection_id,
                    ServerEvent::NewMessage {
                        message: message.clone(),
                        chat_id: chat.id,
                    },
                )
                .await;
        }

        let chat_updated = ServerEvent::ChatUpdated {
            chat_id: chat.id,
            last_message: Some(saved.last_message),
            unread_counts: Some(saved.unread_counts),
        };
        for participant in &chat.participants {
            self.fanout.to_user(*participant, chat_updated.clone()).await;
        }

        Ok(message)
    }
}
