//! 各处理器共用的调用方身份、参与者授权以及带超时的持久化包装

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Chat, ChatId, ConnectionId, Message, MessageId, Reaction, RepositoryError, Timestamp, UserId,
    UserPresence,
};

use crate::error::ApplicationError;
use crate::repository::{ChatStore, ReadMarks, SavedMessage};

/// 已认证的调用方：发起事件的连接及其用户
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// 读取会话并确认调用方是参与者
pub async fn authorize(
    store: &dyn ChatStore,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<Chat, ApplicationError> {
    let chat = store
        .get_chat(chat_id)
        .await?
        .ok_or_else(|| ApplicationError::not_found(format!("chat {chat_id} not found")))?;
    if !chat.is_participant(user_id) {
        return Err(ApplicationError::denied(format!(
            "not a participant of chat {chat_id}"
        )));
    }
    Ok(chat)
}

/// 给每次持久化调用加上超时，超时视为存储失败
pub struct TimeoutChatStore {
    inner: Arc<dyn ChatStore>,
    timeout: Duration,
}

impl TimeoutChatStore {
    pub fn new(inner: Arc<dyn ChatStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, RepositoryError>> + Send,
    ) -> Result<T, RepositoryError> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                tracing::warn!(operation, millis, "persistence call timed out");
                Err(RepositoryError::Timeout { millis })
            }
        }
    }
}

#[async_trait]
impl ChatStore for TimeoutChatStore {
    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        self.bounded("get_chat", self.inner.get_chat(chat_id)).await
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, RepositoryError> {
        self.bounded("get_message", self.inner.get_message(message_id))
            .await
    }

    async fn get_messages(
        &self,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.bounded("get_messages", self.inner.get_messages(message_ids))
            .await
    }

    async fn save_message(
        &self,
        message: Message,
        unread_recipients: Vec<UserId>,
    ) -> Result<SavedMessage, RepositoryError> {
        self.bounded(
            "save_message",
            self.inner.save_message(message, unread_recipients),
        )
        .await
    }

    async fn mark_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    ) -> Result<ReadMarks, RepositoryError> {
        self.bounded(
            "mark_read",
            self.inner.mark_read(chat_id, user_id, message_ids),
        )
        .await
    }

    async fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        reaction: Reaction,
    ) -> Result<(), RepositoryError> {
        self.bounded(
            "upsert_reaction",
            self.inner.upsert_reaction(message_id, user_id, reaction),
        )
        .await
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        self.bounded(
            "remove_reaction",
            self.inner.remove_reaction(message_id, user_id),
        )
        .await
    }

    async fn set_user_status(
        &self,
        user_id: UserId,
        online: bool,
        last_seen: Timestamp,
        custom_status: Option<String>,
    ) -> Result<UserPresence, RepositoryError> {
        self.bounded(
            "set_user_status",
            self.inner
                .set_user_status(user_id, online, last_seen, custom_status),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockChatStore;
    use chrono::Utc;

    #[tokio::test]
    async fn authorize_distinguishes_missing_and_foreign_chats() {
        let (a, b, outsider) = (UserId::generate(), UserId::generate(), UserId::generate());
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).unwrap();
        let chat_id = chat.id;

        let mut store = MockChatStore::new();
        store
            .expect_get_chat()
            .returning(move |id| Ok((id == chat_id).then(|| chat.clone())));

        assert!(authorize(&store, chat_id, a).await.is_ok());
        assert!(matches!(
            authorize(&store, chat_id, outsider).await,
            Err(ApplicationError::Denied(_))
        ));
        assert!(matches!(
            authorize(&store, ChatId::generate(), a).await,
            Err(ApplicationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn slow_store_times_out_as_persistence_error() {
        struct Slow;

        #[async_trait]
        impl ChatStore for Slow {
            async fn get_chat(&self, _: ChatId) -> Result<Option<Chat>, RepositoryError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
            async fn get_message(&self, _: MessageId) -> Result<Option<Message>, RepositoryError> {
                Ok(None)
            }
            async fn get_messages(&self, _: Vec<MessageId>) -> Result<Vec<Message>, RepositoryError> {
                Ok(vec![])
            }
            async fn save_message(
                &self,
                _: Message,
                _: Vec<UserId>,
            ) -> Result<SavedMessage, RepositoryError> {
                Err(RepositoryError::storage("unused"))
            }
            async fn mark_read(
                &self,
                _: ChatId,
                _: UserId,
                _: Vec<MessageId>,
            ) -> Result<ReadMarks, RepositoryError> {
                Err(RepositoryError::storage("unused"))
            }
            async fn upsert_reaction(
                &self,
                _: MessageId,
                _: UserId,
                _: Reaction,
            ) -> Result<(), RepositoryError> {
                Ok(())
            }
            async fn remove_reaction(&self, _: MessageId, _: UserId) -> Result<bool, RepositoryError> {
                Ok(false)
            }
            async fn set_user_status(
                &self,
                user_id: UserId,
                online: bool,
                last_seen: Timestamp,
                _: Option<String>,
            ) -> Result<UserPresence, RepositoryError> {
                Ok(UserPresence::new(user_id, online, last_seen))
            }
        }

        let store = TimeoutChatStore::new(Arc::new(Slow), Duration::from_millis(20));
        let result = store.get_chat(ChatId::generate()).await;
        assert_eq!(result, Err(RepositoryError::Timeout { millis: 20 }));

        let error: ApplicationError = result.unwrap_err().into();
        assert_eq!(error.code(), domain::ErrorCode::Persistence);
    }
}
