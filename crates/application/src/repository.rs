use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Chat, ChatId, LastMessage, Message, MessageId, Reaction, RepositoryError, Timestamp,
    UserId, UserPresence,
};

/// 一次原子发送的结果：已分配序号的消息，以及更新后的会话快照
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMessage {
    pub message: Message,
    pub last_message: LastMessage,
    pub unread_counts: HashMap<UserId, u32>,
}

/// 一次原子已读标记的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMarks {
    /// 本次新写入已读集合的消息 id
    pub newly_read: Vec<MessageId>,
    pub unread_counts: HashMap<UserId, u32>,
}

/// 持久化端口
///
/// 每个方法在实现内部都是原子的。`save_message` 在同一事务里完成
/// 消息写入、最后一条消息快照更新以及对 `unread_recipients` 的未读计数 +1，
/// 同一会话的并发发送不会丢失计数。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError>;

    async fn get_message(&self, message_id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 批量读取，不存在的 id 直接跳过
    async fn get_messages(
        &self,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn save_message(
        &self,
        message: Message,
        unread_recipients: Vec<UserId>,
    ) -> Result<SavedMessage, RepositoryError>;

    /// 幂等地把用户加入这些消息的已读集合，并把该用户在会话中的未读计数置零。
    /// 两步在同一事务里完成，失败时都不生效。
    async fn mark_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    ) -> Result<ReadMarks, RepositoryError>;

    async fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        reaction: Reaction,
    ) -> Result<(), RepositoryError>;

    /// 返回是否确实删除了一条回应
    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    /// `custom_status` 为 `None` 时保留已存储的值，空字符串表示清除
    async fn set_user_status(
        &self,
        user_id: UserId,
        online: bool,
        last_seen: Timestamp,
        custom_status: Option<String>,
    ) -> Result<UserPresence, RepositoryError>;
}
