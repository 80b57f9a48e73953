use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use domain::{ChatId, MessageId, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::repository::ChatStore;
use crate::services::access::{authorize, Caller};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// 属于该会话且不是调用方自己发送的消息
    pub applicable: Vec<MessageId>,
    /// 其中本次新写入已读集合的消息
    pub newly_read: Vec<MessageId>,
    pub unread_counts: HashMap<UserId, u32>,
}

/// 已读回执处理器
///
/// 已读集合的写入是幂等的；完成一批已读后调用方的未读计数直接归零，
/// 而不是按批量大小递减。
pub struct ReadReceiptProcessor {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
}

impl ReadReceiptProcessor {
    pub fn new(store: Arc<dyn ChatStore>, fanout: Arc<Fanout>) -> Self {
        Self { store, fanout }
    }

    pub async fn mark_read(
        &self,
        caller: Caller,
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    ) -> Result<ReadOutcome, ApplicationError> {
        authorize(self.store.as_ref(), chat_id, caller.user_id).await?;

        let requested: Vec<MessageId> = message_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let applicable: Vec<MessageId> = if requested.is_empty() {
            Vec::new()
        } else {
            self.store
                .get_messages(requested)
                .await?
                .into_iter()
                .filter(|message| message.is_readable_by(chat_id, caller.user_id))
                .map(|message| message.id)
                .collect()
        };

        let marks = self
            .store
            .mark_read(chat_id, caller.user_id, applicable.clone())
            .await?;
        let (newly_read, unread_counts) = (marks.newly_read, marks.unread_counts);

        tracing::debug!(
            chat_id = %chat_id,
            user_id = %caller.user_id,
            applicable = applicable.len(),
            newly_read = newly_read.len(),
            "messages marked read"
        );

        if !applicable.is_empty() {
            self.fanout
                .to_room(
                    chat_id,
                    Some(caller.connection_id),
                    ServerEvent::MessagesRead {
                        chat_id,
                        user_id: caller.user_id,
                        message_ids: applicable.clone(),
                    },
                )
                .await;
        }
        self.fanout
            .to_room(
                chat_id,
                None,
                ServerEvent::ChatUpdated {
                    chat_id,
                    last_message: None,
                    unread_counts: Some(unread_counts.clone()),
                },
            )
            .await;

        Ok(ReadOutcome {
            applicable,
            newly_read,
            unread_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_broadcast::LocalTransport;
    use crate::registry::ConnectionRegistry;
    use crate::repository::MockChatStore;
    use chrono::Utc;
    use domain::{Chat, ConnectionId, Message, MessageContent, MessageKind, RepositoryError};

    #[tokio::test]
    async fn failed_read_marking_reports_error_and_broadcasts_nothing() {
        let (sender, reader) = (UserId::generate(), UserId::generate());
        let chat = Chat::direct(ChatId::generate(), sender, reader, Utc::now()).unwrap();
        let chat_id = chat.id;
        let message = Message::draft(
            MessageId::generate(),
            chat_id,
            sender,
            MessageContent::parse("hi", 5000).unwrap(),
            MessageKind::Text,
            serde_json::Value::Null,
            None,
            Utc::now(),
        );
        let message_id = message.id;

        let mut store = MockChatStore::new();
        store
            .expect_get_chat()
            .returning(move |_| Ok(Some(chat.clone())));
        store
            .expect_get_messages()
            .returning(move |_| Ok(vec![message.clone()]));
        store
            .expect_mark_read()
            .times(1)
            .withf(move |chat, user, ids| {
                *chat == chat_id && *user == reader && *ids == vec![message_id]
            })
            .returning(|_, _, _| Err(RepositoryError::Timeout { millis: 50 }));

        let registry = Arc::new(ConnectionRegistry::new());
        let transport = Arc::new(LocalTransport::new());
        let fanout = Arc::new(Fanout::new(registry.clone(), transport.clone(), None));
        let (sender_conn, reader_conn) = (ConnectionId::generate(), ConnectionId::generate());
        registry.register(sender_conn, sender).await.unwrap();
        registry.register(reader_conn, reader).await.unwrap();
        registry.join_room(sender_conn, chat_id).await.unwrap();
        registry.join_room(reader_conn, chat_id).await.unwrap();
        let mut sender_rx = transport.attach(sender_conn).await;
        let mut reader_rx = transport.attach(reader_conn).await;

        let processor = ReadReceiptProcessor::new(Arc::new(store), fanout);
        let result = processor
            .mark_read(
                Caller {
                    connection_id: reader_conn,
                    user_id: reader,
                },
                chat_id,
                vec![message_id, message_id],
            )
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::Persistence(RepositoryError::Timeout { .. }))
        ));
        assert!(sender_rx.try_recv().is_err());
        assert!(reader_rx.try_recv().is_err());
    }
}
