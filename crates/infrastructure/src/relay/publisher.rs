//! Redis 广播发布者

use application::{EventRelay, RelayEnvelope, TransportError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

use super::{events_channel, RelayError, RelayResult};

/// 通过 `ConnectionManager` 发布信封，断线时由它自动重连
#[derive(Clone)]
pub struct RedisEventRelay {
    connection: ConnectionManager,
    channel: String,
}

impl RedisEventRelay {
    pub async fn connect(url: &str, channel_prefix: &str) -> RelayResult<Self> {
        let client = Client::open(url).map_err(|e| RelayError::Connection {
            message: format!("invalid redis url: {e}"),
        })?;
        let connection = client.get_connection_manager().await?;
        let channel = events_channel(channel_prefix);
        info!(channel = %channel, "redis relay publisher ready");
        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn publish_envelope(&self, envelope: &RelayEnvelope) -> RelayResult<u32> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.connection.clone();
        let receivers: u32 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::Publish {
                message: e.to_string(),
            })?;
        Ok(receivers)
    }
}

#[async_trait]
impl EventRelay for RedisEventRelay {
    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), TransportError> {
        let receivers = self
            .publish_envelope(&envelope)
            .await
            .map_err(|err| TransportError::failed(err.to_string()))?;
        debug!(
            channel = %self.channel,
            event = envelope.event.name(),
            receivers,
            "relay envelope published"
        );
        Ok(())
    }
}
