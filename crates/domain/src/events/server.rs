use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entities::{LastMessage, Message};
use crate::value_objects::{ChatId, Emoji, MessageId, Timestamp, UserId};

/// `error` 事件携带的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthenticated,
    Denied,
    NotFound,
    Invalid,
    RateLimited,
    Persistence,
}

/// 服务器 → 客户端事件（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage {
        message: Message,
        chat_id: ChatId,
    },
    ChatUpdated {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_message: Option<LastMessage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unread_counts: Option<HashMap<UserId, u32>>,
    },
    UserTyping {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },
    MessagesRead {
        chat_id: ChatId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    },
    /// `emoji` 为空表示该用户移除了回应
    MessageReaction {
        message_id: MessageId,
        chat_id: ChatId,
        user_id: UserId,
        emoji: Option<Emoji>,
    },
    UserStatusChanged {
        user_id: UserId,
        online: bool,
        last_seen: Timestamp,
        custom_status: Option<String>,
    },
    UserJoined {
        chat_id: ChatId,
        user_id: UserId,
    },
    UserLeft {
        chat_id: ChatId,
        user_id: UserId,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::ChatUpdated { .. } => "chat-updated",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::MessageReaction { .. } => "message-reaction",
            ServerEvent::UserStatusChanged { .. } => "user-status-changed",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserLeft { .. } => "user-left",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_event_shape() {
        let value = serde_json::to_value(ServerEvent::error(ErrorCode::NotFound, "chat not found"))
            .unwrap();
        assert_eq!(
            value,
            json!({"event": "error", "data": {"message": "chat not found", "code": "NOT_FOUND"}})
        );
    }

    #[test]
    fn reaction_removal_serializes_null_emoji() {
        let message_id = MessageId::generate();
        let chat_id = ChatId::generate();
        let user_id = UserId::generate();
        let value = serde_json::to_value(ServerEvent::MessageReaction {
            message_id,
            chat_id,
            user_id,
            emoji: None,
        })
        .unwrap();

        assert_eq!(value["event"], "message-reaction");
        assert_eq!(value["data"]["messageId"], message_id.to_string());
        assert_eq!(value["data"]["userId"], user_id.to_string());
        assert!(value["data"]["emoji"].is_null());
    }

    #[test]
    fn chat_updated_omits_absent_parts() {
        let chat_id = ChatId::generate();
        let reader = UserId::generate();
        let value = serde_json::to_value(ServerEvent::ChatUpdated {
            chat_id,
            last_message: None,
            unread_counts: Some(HashMap::from([(reader, 0)])),
        })
        .unwrap();

        let data = value["data"].as_object().unwrap();
        assert!(!data.contains_key("lastMessage"));
        assert_eq!(data["unreadCounts"][reader.to_string()], 0);

        let parsed: ServerEvent = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed, ServerEvent::ChatUpdated { last_message: None, .. }));
    }

    #[test]
    fn pong_has_no_payload() {
        let value = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(value, json!({"event": "pong"}));
    }
}
