//! 领域实体定义
//!
//! 会话、消息和在线状态。

pub mod chat;
pub mod message;
pub mod presence;

pub use chat::{Chat, ChatKind, LastMessage};
pub use message::{Message, MessageKind, Reaction};
pub use presence::UserPresence;
