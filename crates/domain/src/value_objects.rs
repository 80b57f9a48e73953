use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 会话最后一条消息预览的最大字符数
pub const CONTENT_PREVIEW_CHARS: usize = 100;

/// 表情回应的最大字符数
pub const MAX_EMOJI_CHARS: usize = 32;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// 生成随机 ID（v4）
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识（由外部认证系统分配）。
    UserId
);
uuid_id!(
    /// 会话唯一标识。
    ChatId
);
uuid_id!(
    /// 消息唯一标识。
    MessageId
);
uuid_id!(
    /// 进程内连接标识，连接断开后失效。
    ConnectionId
);

/// 经过校验的消息内容。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    /// 去除首尾空白后内容不能为空，且字符数不超过 `max_chars`。
    pub fn parse(value: impl Into<String>, max_chars: usize) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        let length = trimmed.chars().count();
        if length > max_chars {
            return Err(DomainError::invalid_argument(
                "content",
                format!("too long: {length} > {max_chars} characters"),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// 截取前 `CONTENT_PREVIEW_CHARS` 个字符作为预览
    pub fn preview(&self) -> String {
        preview_of(&self.0)
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn preview_of(content: &str) -> String {
    content.chars().take(CONTENT_PREVIEW_CHARS).collect()
}

/// 经过校验的表情回应。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Emoji(String);

impl Emoji {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("emoji", "cannot be empty"));
        }
        if value.chars().count() > MAX_EMOJI_CHARS {
            return Err(DomainError::invalid_argument("emoji", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed_and_bounded() {
        let content = MessageContent::parse("  hi  ", 10).unwrap();
        assert_eq!(content.as_str(), "hi");

        assert!(MessageContent::parse("   ", 10).is_err());
        assert!(MessageContent::parse("a".repeat(11), 10).is_err());
        // 按字符计数而不是字节
        assert!(MessageContent::parse("你好你好你好", 6).is_ok());
    }

    #[test]
    fn preview_truncates_long_content() {
        let content = MessageContent::parse("x".repeat(500), 1000).unwrap();
        assert_eq!(content.preview().chars().count(), CONTENT_PREVIEW_CHARS);
    }

    #[test]
    fn emoji_rejects_blank() {
        assert!(Emoji::parse("").is_err());
        assert_eq!(Emoji::parse(" 👍 ").unwrap().as_str(), "👍");
    }

    #[test]
    fn ids_parse_from_strings() {
        let raw = Uuid::new_v4();
        let parsed: ChatId = raw.to_string().parse().unwrap();
        assert_eq!(parsed, ChatId::from(raw));
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }
}
