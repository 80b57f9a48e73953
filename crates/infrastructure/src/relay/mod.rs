//! Redis Pub/Sub 跨实例广播
//!
//! 所有实例发布到同一个频道 `<prefix>events`，订阅方忽略自己发出的信封。

pub mod error;
pub mod publisher;
pub mod subscriber;

pub use error::{RelayError, RelayResult};
pub use publisher::RedisEventRelay;
pub use subscriber::RedisRelaySubscriber;

/// 广播频道名
pub fn events_channel(prefix: &str) -> String {
    format!("{prefix}events")
}
