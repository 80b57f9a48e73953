use std::sync::Arc;

use domain::{Emoji, Message, MessageId, Reaction, ServerEvent};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::repository::ChatStore;
use crate::services::access::{authorize, Caller};

/// 表情回应处理器，每个（消息，用户）最多一条回应
pub struct ReactionProcessor {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
    clock: Arc<dyn Clock>,
}

impl ReactionProcessor {
    pub fn new(store: Arc<dyn ChatStore>, fanout: Arc<Fanout>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            fanout,
            clock,
        }
    }

    pub async fn react(
        &self,
        caller: Caller,
        message_id: MessageId,
        emoji: String,
    ) -> Result<(), ApplicationError> {
        let message = self.authorized_message(caller, message_id).await?;
        let emoji = Emoji::parse(emoji)?;

        let reaction = Reaction {
            emoji: emoji.clone(),
            reacted_at: self.clock.now(),
        };
        self.store
            .upsert_reaction(message_id, caller.user_id, reaction)
            .await?;

        self.fanout
            .to_room(
                message.chat_id,
                None,
                ServerEvent::MessageReaction {
                    message_id,
                    chat_id: message.chat_id,
                    user_id: caller.user_id,
                    emoji: Some(emoji),
                },
            )
            .await;
        Ok(())
    }

    /// 没有回应可删时直接返回，不广播
    pub async fn unreact(&self, caller: Caller, message_id: MessageId) -> Result<(), ApplicationError> {
        let message = self.authorized_message(caller, message_id).await?;

        let removed = self
            .store
            .remove_reaction(message_id, caller.user_id)
            .await?;
        if !removed {
            return Ok(());
        }

        self.fanout
            .to_room(
                message.chat_id,
                None,
                ServerEvent::MessageReaction {
                    message_id,
                    chat_id: message.chat_id,
                    user_id: caller.user_id,
                    emoji: None,
                },
            )
            .await;
        Ok(())
    }

    async fn authorized_message(
        &self,
        caller: Caller,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("message {message_id} not found")))?;
        authorize(self.store.as_ref(), message.chat_id, caller.user_id).await?;
        Ok(message)
    }
}
