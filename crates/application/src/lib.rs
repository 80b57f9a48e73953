//! 应用层实现。
//!
//! 实时消息协调器：连接注册、房间订阅、消息发送、已读回执、
//! 表情回应、在线状态与输入状态，以及对持久化、认证和传输端口的抽象。

pub mod auth;
pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod fanout;
pub mod local_broadcast;
pub mod memory;
pub mod rate_limiter;
pub mod registry;
pub mod repository;
pub mod services;

pub use auth::{AuthError, TokenVerifier};
pub use broadcaster::{EventRelay, EventTransport, RelayEnvelope, RelayScope, TransportError};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use fanout::Fanout;
pub use local_broadcast::LocalTransport;
pub use memory::InMemoryChatStore;
pub use rate_limiter::{EventRateLimiter, RateLimitError};
pub use registry::{ConnectionRegistry, Disconnection, RegistryError};
pub use repository::{ChatStore, ReadMarks, SavedMessage};
pub use services::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, MessagePipeline,
    PresenceBroadcaster, RateLimitUsage, ReactionProcessor, ReadOutcome, ReadReceiptProcessor,
    RoomMembershipManager, SendMessageRequest, TypingRelay,
};
