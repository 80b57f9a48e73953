//! 进程内持久化实现
//!
//! 所有状态放在同一把异步互斥锁后面，每个端口方法持锁完成，
//! 因此天然满足端口要求的原子性。用于开发环境和测试。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Chat, ChatId, Message, MessageId, Reaction, RepositoryError, Timestamp, UserId, UserPresence,
};
use tokio::sync::Mutex;

use crate::repository::{ChatStore, ReadMarks, SavedMessage};

#[derive(Debug, Default)]
struct MemoryState {
    chats: HashMap<ChatId, Chat>,
    messages: HashMap<MessageId, Message>,
    /// 每个会话的消息 id，按序号排列
    timelines: HashMap<ChatId, Vec<MessageId>>,
    sequences: HashMap<ChatId, u64>,
    presence: HashMap<UserId, UserPresence>,
}

#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    state: Mutex<MemoryState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 外部的会话创建流程写入会话
    pub async fn insert_chat(&self, chat: Chat) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.chats.contains_key(&chat.id) {
            return Err(RepositoryError::Conflict);
        }
        state.chats.insert(chat.id, chat);
        Ok(())
    }

    /// 会话内的全部消息，按序号升序
    pub async fn messages_in(&self, chat_id: ChatId) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .timelines
            .get(&chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn presence_of(&self, user_id: UserId) -> Option<UserPresence> {
        self.state.lock().await.presence.get(&user_id).cloned()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        Ok(self.state.lock().await.chats.get(&chat_id).cloned())
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.state.lock().await.messages.get(&message_id).cloned())
    }

    async fn get_messages(
        &self,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(message_ids
            .iter()
            .filter_map(|id| state.messages.get(id).cloned())
            .collect())
    }

    async fn save_message(
        &self,
        mut message: Message,
        unread_recipients: Vec<UserId>,
    ) -> Result<SavedMessage, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        if !state.chats.contains_key(&message.chat_id) {
            return Err(RepositoryError::NotFound);
        }

        let sequence = state.sequences.entry(message.chat_id).or_insert(0);
        *sequence += 1;
        message.sequence = *sequence;

        let chat = state
            .chats
            .get_mut(&message.chat_id)
            .ok_or(RepositoryError::NotFound)?;
        let last_message = chat.record_message(&message, &unread_recipients);
        let unread_counts = chat.unread_count.clone();

        state
            .timelines
            .entry(message.chat_id)
            .or_default()
            .push(message.id);
        state.messages.insert(message.id, message.clone());

        Ok(SavedMessage {
            message,
            last_message,
            unread_counts,
        })
    }

    async fn mark_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    ) -> Result<ReadMarks, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.chats.contains_key(&chat_id) {
            return Err(RepositoryError::NotFound);
        }

        let mut newly_read = Vec::new();
        for id in message_ids {
            if let Some(message) = state.messages.get_mut(&id) {
                if message.mark_read_by(user_id) {
                    newly_read.push(id);
                }
            }
        }

        let chat = state
            .chats
            .get_mut(&chat_id)
            .ok_or(RepositoryError::NotFound)?;
        chat.reset_unread(user_id);
        Ok(ReadMarks {
            newly_read,
            unread_counts: chat.unread_count.clone(),
        })
    }

    async fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        reaction: Reaction,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(RepositoryError::NotFound)?;
        message.upsert_reaction(user_id, reaction);
        Ok(())
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(message.remove_reaction(user_id))
    }

    async fn set_user_status(
        &self,
        user_id: UserId,
        online: bool,
        last_seen: Timestamp,
        custom_status: Option<String>,
    ) -> Result<UserPresence, RepositoryError> {
        let mut state = self.state.lock().await;
        let presence = state
            .presence
            .entry(user_id)
            .or_insert_with(|| UserPresence::new(user_id, online, last_seen));
        presence.apply(online, last_seen, custom_status);
        Ok(presence.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{MessageContent, MessageKind};

    fn draft(chat_id: ChatId, sender: UserId, text: &str) -> Message {
        Message::draft(
            MessageId::generate(),
            chat_id,
            sender,
            MessageContent::parse(text, 5000).unwrap(),
            MessageKind::Text,
            serde_json::Value::Null,
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_assigns_sequence_and_updates_counters() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).unwrap();
        let chat_id = chat.id;
        store.insert_chat(chat).await.unwrap();

        let first = store
            .save_message(draft(chat_id, a, "one"), vec![b])
            .await
            .unwrap();
        let second = store
            .save_message(draft(chat_id, a, "two"), vec![b])
            .await
            .unwrap();

        assert_eq!(first.message.sequence, 1);
        assert_eq!(second.message.sequence, 2);
        assert_eq!(second.unread_counts[&b], 2);
        assert_eq!(second.unread_counts[&a], 0);
        assert_eq!(second.last_message.content_preview, "two");

        let timeline = store.messages_in(chat_id).await;
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].content, "one");
    }

    #[tokio::test]
    async fn save_into_missing_chat_leaves_no_trace() {
        let store = InMemoryChatStore::new();
        let chat_id = ChatId::generate();
        let result = store
            .save_message(draft(chat_id, UserId::generate(), "lost"), vec![])
            .await;
        assert_eq!(result, Err(RepositoryError::NotFound));
        assert!(store.messages_in(chat_id).await.is_empty());
    }

    #[tokio::test]
    async fn mark_read_reports_only_new_entries_and_resets_unread() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).unwrap();
        let chat_id = chat.id;
        store.insert_chat(chat).await.unwrap();
        let saved = store
            .save_message(draft(chat_id, a, "hi"), vec![b])
            .await
            .unwrap();
        let id = saved.message.id;
        assert_eq!(saved.unread_counts[&b], 1);

        let marks = store.mark_read(chat_id, b, vec![id]).await.unwrap();
        assert_eq!(marks.newly_read, vec![id]);
        assert_eq!(marks.unread_counts[&b], 0);

        let again = store.mark_read(chat_id, b, vec![id]).await.unwrap();
        assert!(again.newly_read.is_empty());
        assert!(store
            .mark_read(chat_id, b, vec![MessageId::generate()])
            .await
            .unwrap()
            .newly_read
            .is_empty());
    }

    #[tokio::test]
    async fn mark_read_on_missing_chat_changes_nothing() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).unwrap();
        let chat_id = chat.id;
        store.insert_chat(chat).await.unwrap();
        let id = store
            .save_message(draft(chat_id, a, "hi"), vec![b])
            .await
            .unwrap()
            .message
            .id;

        let result = store.mark_read(ChatId::generate(), b, vec![id]).await;
        assert_eq!(result, Err(RepositoryError::NotFound));
        let message = store.get_message(id).await.unwrap().unwrap();
        assert!(!message.read_by.contains(&b));
    }

    #[tokio::test]
    async fn status_keeps_custom_status_unless_replaced() {
        let store = InMemoryChatStore::new();
        let user = UserId::generate();

        store
            .set_user_status(user, true, Utc::now(), Some("busy".into()))
            .await
            .unwrap();
        let offline = store
            .set_user_status(user, false, Utc::now(), None)
            .await
            .unwrap();
        assert!(!offline.online);
        assert_eq!(offline.custom_status.as_deref(), Some("busy"));

        let stored = store.presence_of(user).await.unwrap();
        assert_eq!(stored, offline);
    }
}
