//! 统一配置中心
//!
//! 加载顺序：内置默认值 → 可选的 YAML 文件 → `CHATLINE_` 前缀的环境变量。
//! 嵌套字段在环境变量中用双下划线分隔，例如 `CHATLINE_DATABASE__URL`。

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHATLINE_";
/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHATLINE_CONFIG_FILE";
/// 默认配置文件，不存在时忽略
pub const DEFAULT_CONFIG_FILE: &str = "chatline.yaml";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub chat: ChatConfig,
    pub redis: RedisConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// 持久化驱动
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// 进程内存储，重启即丢失，用于开发和测试
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub driver: StorageDriver,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 实时聊天协调器的行为参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 消息内容最大字符数
    pub max_content_length: usize,
    /// 单次持久化调用的超时时间
    pub persistence_timeout_ms: u64,
    /// 每个连接在每个会话中一个窗口内允许的输入状态信号数
    pub typing_max_events: u32,
    pub typing_window_secs: u64,
    /// 每个用户一个窗口内允许发送的消息数
    pub message_max_per_window: u32,
    pub message_window_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_content_length: 5000,
            persistence_timeout_ms: 5000,
            typing_max_events: 10,
            typing_window_secs: 5,
            message_max_per_window: 120,
            message_window_secs: 60,
        }
    }
}

/// Redis配置，设置 `url` 后启用跨进程广播
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub channel_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: "chatline:".to_string(),
        }
    }
}

impl AppConfig {
    /// 组合所有配置来源
    pub fn figment() -> Figment {
        let file = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config_file"]).split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }

        if self.storage.driver == StorageDriver::Postgres {
            if self.database.url.is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "database url is required for the postgres driver".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max connections must be greater than 0".to_string(),
                ));
            }
        }

        // 至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration hours must be positive".to_string(),
            ));
        }

        let chat = &self.chat;
        let limits = [
            ("max_content_length", chat.max_content_length as u64),
            ("persistence_timeout_ms", chat.persistence_timeout_ms),
            ("typing_max_events", u64::from(chat.typing_max_events)),
            ("typing_window_secs", chat.typing_window_secs),
            ("message_max_per_window", u64::from(chat.message_max_per_window)),
            ("message_window_secs", chat.message_window_secs),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidChatConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        if let Some(url) = &self.redis.url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidRedisConfig(format!(
                    "unsupported redis url: {url}"
                )));
            }
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid chat configuration: {0}")]
    InvalidChatConfig(String),
    #[error("Invalid redis configuration: {0}")]
    InvalidRedisConfig(String),
}
