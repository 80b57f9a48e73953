use std::sync::Arc;

use domain::{ServerEvent, UserId, UserPresence};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::repository::ChatStore;

const PRESENCE_LOCK_STRIPES: usize = 64;

/// 在线状态广播器
///
/// 持久化状态后向所有连接广播 `user-status-changed`，不按联系人过滤。
/// 同一用户的状态变化通过分段锁串行化，连接/断开交错时最终写入的
/// 总是注册表里的实际在线情况。
pub struct PresenceBroadcaster {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
    clock: Arc<dyn Clock>,
    locks: Vec<Mutex<()>>,
}

impl PresenceBroadcaster {
    pub fn new(store: Arc<dyn ChatStore>, fanout: Arc<Fanout>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            fanout,
            clock,
            locks: (0..PRESENCE_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// 客户端显式设置状态
    pub async fn set_status(
        &self,
        user_id: UserId,
        online: bool,
        custom_status: Option<String>,
    ) -> Result<UserPresence, ApplicationError> {
        let _guard = self.lock_for(user_id).lock().await;
        self.persist_and_broadcast(user_id, online, custom_status)
            .await
    }

    /// 连接建立或断开后，按注册表的当前状态同步在线标记，保留自定义状态
    pub async fn sync_with_registry(&self, user_id: UserId) -> Result<UserPresence, ApplicationError> {
        let _guard = self.lock_for(user_id).lock().await;
        let online = self.fanout.registry().is_online(user_id).await;
        self.persist_and_broadcast(user_id, online, None).await
    }

    async fn persist_and_broadcast(
        &self,
        user_id: UserId,
        online: bool,
        custom_status: Option<String>,
    ) -> Result<UserPresence, ApplicationError> {
        let presence = self
            .store
            .set_user_status(user_id, online, self.clock.now(), custom_status)
            .await?;

        tracing::info!(
            user_id = %user_id,
            online = presence.online,
            "user status changed"
        );

        self.fanout
            .to_all(ServerEvent::UserStatusChanged {
                user_id,
                online: presence.online,
                last_seen: presence.last_seen,
                custom_status: presence.custom_status.clone(),
            })
            .await;
        Ok(presence)
    }

    fn lock_for(&self, user_id: UserId) -> &Mutex<()> {
        let index = (user_id.0.as_u128() % self.locks.len() as u128) as usize;
        &self.locks[index]
    }
}
