//! 基础设施层实现。
//!
//! 提供 PostgreSQL 持久化、JWT 认证和 Redis 跨实例广播等适配器，
//! 实现应用层定义的端口。

pub mod auth;
pub mod builder;
pub mod migrations;
pub mod relay;
pub mod repository;
pub mod retry;

pub use auth::{Claims, JwtTokenVerifier};
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use relay::{RedisEventRelay, RedisRelaySubscriber, RelayError};
pub use repository::{create_pg_pool, PgChatStore};
pub use retry::{retry_async, Backoff, RetryConfig};
