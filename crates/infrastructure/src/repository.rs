//! PostgreSQL 持久化实现
//!
//! `save_message` 在一个事务里先对 `chats` 行自增序号（行锁串行化同一会话的并发发送），
//! 再写入消息、更新最后一条消息快照和未读计数。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use application::{ChatStore, ReadMarks, SavedMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Chat, ChatId, ChatKind, Emoji, LastMessage, Message, MessageId, MessageKind, Reaction,
    RepositoryError, Timestamp, UserId, UserPresence,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn uuids<T: Into<Uuid> + Copy>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[derive(Debug, FromRow)]
struct ChatRecord {
    id: Uuid,
    kind: String,
    last_message_id: Option<Uuid>,
    last_message_sender: Option<Uuid>,
    last_message_preview: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    user_id: Uuid,
    unread_count: i32,
}

impl ChatRecord {
    fn into_chat(self, participants: Vec<ParticipantRecord>) -> Result<Chat, RepositoryError> {
        let kind: ChatKind = self
            .kind
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        let mut chat = Chat::new(
            ChatId::from(self.id),
            kind,
            participants.iter().map(|p| UserId::from(p.user_id)),
            self.created_at,
        )
        .map_err(|err| invalid_data(err.to_string()))?;

        chat.unread_count = participants
            .iter()
            .map(|p| (UserId::from(p.user_id), p.unread_count.max(0) as u32))
            .collect();
        chat.last_message = match (
            self.last_message_id,
            self.last_message_sender,
            self.last_message_preview,
            self.last_message_at,
        ) {
            (Some(id), Some(sender), Some(preview), Some(at)) => Some(LastMessage {
                message_id: MessageId::from(id),
                sender: UserId::from(sender),
                content_preview: preview,
                timestamp: at,
            }),
            _ => None,
        };
        Ok(chat)
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    metadata: serde_json::Value,
    reply_to: Option<Uuid>,
    is_edited: bool,
    is_deleted: bool,
    sequence: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let kind: MessageKind = value
            .message_type
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            chat_id: ChatId::from(value.chat_id),
            sender_id: UserId::from(value.sender_id),
            content: value.content,
            kind,
            metadata: value.metadata,
            read_by: BTreeSet::new(),
            reactions: BTreeMap::new(),
            reply_to: value.reply_to.map(MessageId::from),
            is_edited: value.is_edited,
            is_deleted: value.is_deleted,
            created_at: value.created_at,
            sequence: value.sequence.max(0) as u64,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReadRecord {
    message_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
    reacted_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PresenceRecord {
    user_id: Uuid,
    online: bool,
    last_seen: DateTime<Utc>,
    custom_status: Option<String>,
}

impl From<PresenceRecord> for UserPresence {
    fn from(value: PresenceRecord) -> Self {
        UserPresence {
            user_id: UserId::from(value.user_id),
            online: value.online,
            last_seen: value.last_seen,
            custom_status: value.custom_status,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, message_type, metadata, reply_to, \
                               is_edited, is_deleted, sequence, created_at";

#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 外部的会话创建流程写入会话及参与者
    pub async fn insert_chat(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query("INSERT INTO chats (id, kind, created_at) VALUES ($1, $2, $3)")
            .bind(Uuid::from(chat.id))
            .bind(chat.kind.as_str())
            .bind(chat.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let participants: Vec<UserId> = chat.participants.iter().copied().collect();
        sqlx::query(
            r#"
            INSERT INTO chat_participants (chat_id, user_id, unread_count)
            SELECT $1::uuid, user_id, 0 FROM UNNEST($2::uuid[]) AS t(user_id)
            "#,
        )
        .bind(Uuid::from(chat.id))
        .bind(uuids(&participants))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn unread_counts(
        tx: &mut Transaction<'_, Postgres>,
        chat_id: ChatId,
    ) -> Result<HashMap<UserId, u32>, RepositoryError> {
        let rows = sqlx::query_as::<_, ParticipantRecord>(
            "SELECT user_id, unread_count FROM chat_participants WHERE chat_id = $1",
        )
        .bind(Uuid::from(chat_id))
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|row| (UserId::from(row.user_id), row.unread_count.max(0) as u32))
            .collect())
    }

    /// 读取消息并补齐已读集合与回应
    async fn load_messages(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = uuids(ids);

        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1) ORDER BY chat_id, sequence"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let reads = sqlx::query_as::<_, ReadRecord>(
            "SELECT message_id, user_id FROM message_reads WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let reactions = sqlx::query_as::<_, ReactionRecord>(
            r#"
            SELECT message_id, user_id, emoji, reacted_at
            FROM message_reactions WHERE message_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut messages = records
            .into_iter()
            .map(|record| Message::try_from(record).map(|message| (message.id, message)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        for read in reads {
            if let Some(message) = messages.get_mut(&MessageId::from(read.message_id)) {
                message.read_by.insert(UserId::from(read.user_id));
            }
        }
        for row in reactions {
            let emoji = Emoji::parse(row.emoji).map_err(|err| invalid_data(err.to_string()))?;
            if let Some(message) = messages.get_mut(&MessageId::from(row.message_id)) {
                message.reactions.insert(
                    UserId::from(row.user_id),
                    Reaction {
                        emoji,
                        reacted_at: row.reacted_at,
                    },
                );
            }
        }

        let mut messages: Vec<Message> = messages.into_values().collect();
        messages.sort_by_key(|message| (message.chat_id, message.sequence));
        Ok(messages)
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT id, kind, last_message_id, last_message_sender, last_message_preview,
                   last_message_at, created_at
            FROM chats WHERE id = $1
            "#,
        )
        .bind(Uuid::from(chat_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };

        let participants = sqlx::query_as::<_, ParticipantRecord>(
            "SELECT user_id, unread_count FROM chat_participants WHERE chat_id = $1",
        )
        .bind(Uuid::from(chat_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.into_chat(participants).map(Some)
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.load_messages(&[message_id]).await?.into_iter().next())
    }

    async fn get_messages(
        &self,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.load_messages(&message_ids).await
    }

    async fn save_message(
        &self,
        mut message: Message,
        unread_recipients: Vec<UserId>,
    ) -> Result<SavedMessage, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let chat_id = Uuid::from(message.chat_id);

        let sequence: i64 = sqlx::query_scalar(
            "UPDATE chats SET message_seq = message_seq + 1 WHERE id = $1 RETURNING message_seq",
        )
        .bind(chat_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;
        message.sequence = sequence.max(0) as u64;

        sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(Uuid::from(message.id))
        .bind(chat_id)
        .bind(Uuid::from(message.sender_id))
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.metadata)
        .bind(message.reply_to.map(Uuid::from))
        .bind(message.is_edited)
        .bind(message.is_deleted)
        .bind(sequence)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let last_message = LastMessage::of(&message);
        sqlx::query(
            r#"
            UPDATE chats
            SET last_message_id = $2, last_message_sender = $3,
                last_message_preview = $4, last_message_at = $5
            WHERE id = $1
            "#,
        )
        .bind(chat_id)
        .bind(Uuid::from(last_message.message_id))
        .bind(Uuid::from(last_message.sender))
        .bind(&last_message.content_preview)
        .bind(last_message.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            UPDATE chat_participants SET unread_count = unread_count + 1
            WHERE chat_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(chat_id)
        .bind(uuids(&unread_recipients))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let unread_counts = Self::unread_counts(&mut tx, message.chat_id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

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
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM chats WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(chat_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let newly_read: Vec<Uuid> = if message_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO message_reads (message_id, user_id)
                SELECT m.id, $2::uuid FROM messages m WHERE m.id = ANY($1)
                ON CONFLICT (message_id, user_id) DO NOTHING
                RETURNING message_id
                "#,
            )
            .bind(uuids(&message_ids))
            .bind(Uuid::from(user_id))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
        };

        sqlx::query(
            "UPDATE chat_participants SET unread_count = 0 WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(Uuid::from(chat_id))
        .bind(Uuid::from(user_id))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let unread_counts = Self::unread_counts(&mut tx, chat_id).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(ReadMarks {
            newly_read: newly_read.into_iter().map(MessageId::from).collect(),
            unread_counts,
        })
    }

    async fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        reaction: Reaction,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
            SELECT id, $2::uuid, $3::text, $4::timestamptz FROM messages WHERE id = $1
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET emoji = EXCLUDED.emoji, reacted_at = EXCLUDED.reacted_at
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(reaction.emoji.as_str())
        .bind(reaction.reacted_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2")
                .bind(Uuid::from(message_id))
                .bind(Uuid::from(user_id))
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_user_status(
        &self,
        user_id: UserId,
        online: bool,
        last_seen: Timestamp,
        custom_status: Option<String>,
    ) -> Result<UserPresence, RepositoryError> {
        let replace_status = custom_status.is_some();
        let status = custom_status.map(|status| status.trim().to_owned());

        // $5 为 false 时保留原来的自定义状态；空字符串写成 NULL
        let record = sqlx::query_as::<_, PresenceRecord>(
            r#"
            INSERT INTO user_presence (user_id, online, last_seen, custom_status)
            VALUES ($1, $2, $3, NULLIF($4, ''))
            ON CONFLICT (user_id) DO UPDATE SET
                online = EXCLUDED.online,
                last_seen = EXCLUDED.last_seen,
                custom_status = CASE WHEN $5 THEN NULLIF($4, '') ELSE user_presence.custom_status END
            RETURNING user_id, online, last_seen, custom_status
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(online)
        .bind(last_seen)
        .bind(status)
        .bind(replace_status)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
