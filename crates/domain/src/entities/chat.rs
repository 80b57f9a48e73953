//! 会话实体定义
//!
//! 会话由外部的创建流程建立，核心只读取参与者列表、
//! 并通过持久化端口更新未读计数和最后一条消息快照。

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::entities::message::Message;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{preview_of, ChatId, MessageId, Timestamp, UserId};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// 两人私聊
    Direct,
    /// 群聊
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Direct => "direct",
            ChatKind::Group => "group",
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ChatKind::Direct),
            "group" => Ok(ChatKind::Group),
            other => Err(DomainError::invalid_argument(
                "chat_kind",
                format!("unknown kind {other}"),
            )),
        }
    }
}

/// 最后一条消息快照，用于会话列表展示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sender: UserId,
    pub content_preview: String,
    pub timestamp: Timestamp,
}

impl LastMessage {
    pub fn of(message: &Message) -> Self {
        Self {
            message_id: message.id,
            sender: message.sender_id,
            content_preview: preview_of(&message.content),
            timestamp: message.created_at,
        }
    }
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub participants: BTreeSet<UserId>,
    pub unread_count: HashMap<UserId, u32>,
    pub last_message: Option<LastMessage>,
    pub created_at: Timestamp,
}

impl Chat {
    /// 创建会话，私聊必须恰好两个不同的参与者，群聊至少两个
    pub fn new(
        id: ChatId,
        kind: ChatKind,
        participants: impl IntoIterator<Item = UserId>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let participants: BTreeSet<UserId> = participants.into_iter().collect();
        match kind {
            ChatKind::Direct if participants.len() != 2 => {
                return Err(DomainError::InvalidParticipants {
                    kind: "direct",
                    expected: "exactly 2",
                    actual: participants.len(),
                });
            }
            ChatKind::Group if participants.len() < 2 => {
                return Err(DomainError::InvalidParticipants {
                    kind: "group",
                    expected: "at least 2",
                    actual: participants.len(),
                });
            }
            _ => {}
        }

        let unread_count = participants.iter().map(|user| (*user, 0)).collect();
        Ok(Self {
            id,
            kind,
            participants,
            unread_count,
            last_message: None,
            created_at,
        })
    }

    pub fn direct(id: ChatId, a: UserId, b: UserId, created_at: Timestamp) -> DomainResult<Self> {
        Self::new(id, ChatKind::Direct, [a, b], created_at)
    }

    pub fn group(
        id: ChatId,
        participants: impl IntoIterator<Item = UserId>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        Self::new(id, ChatKind::Group, participants, created_at)
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// 一条新消息需要增加未读计数的参与者（除发送者以外的所有人）
    pub fn unread_recipients(&self, sender: UserId) -> Vec<UserId> {
        self.participants
            .iter()
            .copied()
            .filter(|user| *user != sender)
            .collect()
    }

    pub fn unread_for(&self, user_id: UserId) -> u32 {
        self.unread_count.get(&user_id).copied().unwrap_or(0)
    }

    /// 应用一条已持久化消息带来的变化：更新快照，`recipients` 的未读 +1
    pub fn record_message(&mut self, message: &Message, recipients: &[UserId]) -> LastMessage {
        for user in recipients {
            *self.unread_count.entry(*user).or_insert(0) += 1;
        }
        let last = LastMessage::of(message);
        self.last_message = Some(last.clone());
        last
    }

    /// 读者批量已读后未读计数直接归零
    pub fn reset_unread(&mut self, user_id: UserId) {
        if self.is_participant(user_id) {
            self.unread_count.insert(user_id, 0);
        }
    }
}
