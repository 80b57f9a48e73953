//! 消息实体定义
//!
//! 已读集合与表情回应的变化都以纯函数表达（返回是否发生了变化），
//! 真正的持久化由持久化端口的原子操作完成。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatId, Emoji, MessageContent, MessageId, Timestamp, UserId};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
    Location,
    Sticker,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::Location => "location",
            MessageKind::Sticker => "sticker",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            "audio" => Ok(MessageKind::Audio),
            "video" => Ok(MessageKind::Video),
            "location" => Ok(MessageKind::Location),
            "sticker" => Ok(MessageKind::Sticker),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown type {other}"),
            )),
        }
    }
}

/// 单个用户对消息的表情回应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: Emoji,
    pub reacted_at: Timestamp,
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    /// 每个用户最多一条回应
    #[serde(default)]
    pub reactions: BTreeMap<UserId, Reaction>,
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: Timestamp,
    /// 会话内单调递增的位置，由持久化端口分配（0 表示尚未持久化）
    #[serde(default)]
    pub sequence: u64,
}

impl Message {
    /// 构造一条尚未持久化的消息
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        content: MessageContent,
        kind: MessageKind,
        metadata: serde_json::Value,
        reply_to: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            chat_id,
            sender_id,
            content: content.into_inner(),
            kind,
            metadata,
            read_by: BTreeSet::new(),
            reactions: BTreeMap::new(),
            reply_to,
            is_edited: false,
            is_deleted: false,
            created_at,
            sequence: 0,
        }
    }

    /// 该消息是否可以被 `reader` 标记为已读：同一会话、且不是自己发的
    pub fn is_readable_by(&self, chat_id: ChatId, reader: UserId) -> bool {
        self.chat_id == chat_id && self.sender_id != reader
    }

    pub fn is_unread_by(&self, user_id: UserId) -> bool {
        self.sender_id != user_id && !self.read_by.contains(&user_id)
    }

    /// 幂等地加入已读集合，返回是否新加入
    pub fn mark_read_by(&mut self, reader: UserId) -> bool {
        if reader == self.sender_id {
            return false;
        }
        self.read_by.insert(reader)
    }

    /// 覆盖式写入回应，返回旧的表情（如有）
    pub fn upsert_reaction(&mut self, user_id: UserId, reaction: Reaction) -> Option<Emoji> {
        self.reactions
            .insert(user_id, reaction)
            .map(|previous| previous.emoji)
    }

    pub fn remove_reaction(&mut self, user_id: UserId) -> bool {
        self.reactions.remove(&user_id).is_some()
    }

    pub fn reaction_of(&self, user_id: UserId) -> Option<&Reaction> {
        self.reactions.get(&user_id)
    }

    /// 外部审核路径使用的软删除：替换内容并打标记
    pub fn soft_delete(&mut self) {
        self.content = "This message was deleted".to_owned();
        self.metadata = serde_json::Value::Null;
        self.is_deleted = true;
    }
}
