use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 用户在线状态（用户实体本身由外部系统维护，这里只关心在线相关字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: Timestamp,
    pub custom_status: Option<String>,
}

impl UserPresence {
    pub fn new(user_id: UserId, online: bool, last_seen: Timestamp) -> Self {
        Self {
            user_id,
            online,
            last_seen,
            custom_status: None,
        }
    }

    /// 应用一次状态变化。`custom_status` 为 `None` 时保留原值，空字符串表示清除。
    pub fn apply(&mut self, online: bool, last_seen: Timestamp, custom_status: Option<String>) {
        self.online = online;
        self.last_seen = last_seen;
        if let Some(status) = custom_status {
            let status = status.trim().to_owned();
            self.custom_status = if status.is_empty() { None } else { Some(status) };
        }
    }
}
