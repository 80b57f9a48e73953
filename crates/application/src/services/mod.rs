mod access;
mod coordinator;
mod membership;
mod message_pipeline;
mod presence;
mod reactions;
mod read_receipts;
mod typing;

pub use access::{authorize, Caller, TimeoutChatStore};
pub use coordinator::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, RateLimitUsage,
};
pub use membership::RoomMembershipManager;
pub use message_pipeline::{MessagePipeline, SendMessageRequest};
pub use presence::PresenceBroadcaster;
pub use reactions::ReactionProcessor;
pub use read_receipts::{ReadOutcome, ReadReceiptProcessor};
pub use typing::TypingRelay;
