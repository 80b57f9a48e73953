use std::sync::Arc;

use application::{ChatStore, EventRelay, InMemoryChatStore, TokenVerifier};
use config::{AppConfig, StorageDriver};
use thiserror::Error;

use crate::{
    auth::JwtTokenVerifier,
    migrations::MIGRATOR,
    relay::{RedisEventRelay, RedisRelaySubscriber, RelayError},
    repository::{create_pg_pool, PgChatStore},
    retry::{retry_async, RetryConfig},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}

/// 按配置装配好的适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<dyn ChatStore>,
    pub verifier: Arc<JwtTokenVerifier>,
    pub relay: Option<Arc<RedisEventRelay>>,
    /// 仅在配置了 Redis 时存在
    pub relay_subscriber: Option<Arc<RedisRelaySubscriber>>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let store: Arc<dyn ChatStore> = match config.storage.driver {
            StorageDriver::Memory => {
                tracing::info!("using in-memory chat store");
                Arc::new(InMemoryChatStore::new())
            }
            StorageDriver::Postgres => {
                let retry = RetryConfig::default();
                let pool = retry_async(&retry, "connect postgres", || {
                    create_pg_pool(&config.database.url, config.database.max_connections)
                })
                .await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(
                    max_connections = config.database.max_connections,
                    "postgres chat store ready"
                );
                Arc::new(PgChatStore::new(pool))
            }
        };

        let (relay, relay_subscriber) = match config.redis.url.as_deref() {
            Some(url) => {
                let prefix = &config.redis.channel_prefix;
                let retry = RetryConfig::default();
                let relay =
                    retry_async(&retry, "connect redis", || RedisEventRelay::connect(url, prefix))
                        .await?;
                let subscriber = RedisRelaySubscriber::new(url, prefix)?;
                (Some(Arc::new(relay)), Some(Arc::new(subscriber)))
            }
            None => (None, None),
        };

        Ok(Self {
            store,
            verifier: Arc::new(JwtTokenVerifier::new(&config.jwt)),
            relay,
            relay_subscriber,
        })
    }

    pub fn verifier_trait(&self) -> Arc<dyn TokenVerifier> {
        self.verifier.clone()
    }

    pub fn relay_trait(&self) -> Option<Arc<dyn EventRelay>> {
        self.relay
            .clone()
            .map(|relay| relay as Arc<dyn EventRelay>)
    }
}
