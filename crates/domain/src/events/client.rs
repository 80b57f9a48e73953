use serde::{Deserialize, Serialize};

use crate::entities::MessageKind;
use crate::value_objects::{ChatId, MessageId};

/// 客户端可以声明的在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

/// 客户端 → 服务器事件（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinChat(ChatId),
    LeaveChat(ChatId),
    Typing {
        chat_id: ChatId,
        is_typing: bool,
    },
    SendMessage {
        chat_id: ChatId,
        content: String,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    MarkRead {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
    ReactToMessage {
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        message_id: MessageId,
    },
    UpdateStatus {
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_status: Option<String>,
    },
    Ping,
}

impl ClientEvent {
    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat(_) => "join-chat",
            ClientEvent::LeaveChat(_) => "leave-chat",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::MarkRead { .. } => "mark-read",
            ClientEvent::ReactToMessage { .. } => "react-to-message",
            ClientEvent::RemoveReaction { .. } => "remove-reaction",
            ClientEvent::UpdateStatus { .. } => "update-status",
            ClientEvent::Ping => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_chat_with_bare_id() {
        let chat_id = ChatId::generate();
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "join-chat", "data": chat_id.to_string()}))
                .unwrap();
        assert_eq!(event, ClientEvent::JoinChat(chat_id));
    }

    #[test]
    fn send_message_defaults_to_text() {
        let chat_id = ChatId::generate();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send-message",
            "data": {"chatId": chat_id, "content": "hi"}
        }))
        .unwrap();

        match event {
            ClientEvent::SendMessage {
                chat_id: parsed,
                message_type,
                reply_to,
                metadata,
                ..
            } => {
                assert_eq!(parsed, chat_id);
                assert_eq!(message_type, MessageKind::Text);
                assert!(reply_to.is_none());
                assert!(metadata.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_update_status_and_ping() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "update-status",
            "data": {"status": "offline", "customStatus": "away"}
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::UpdateStatus {
                status: PresenceStatus::Offline,
                custom_status: Some("away".into()),
            }
        );

        let ping: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn rejects_unknown_event() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"event":"drop-table","data":{}}"#);
        assert!(result.is_err());
    }
}
