use std::sync::Arc;

use domain::{ChatId, ServerEvent};

use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::registry::RegistryError;
use crate::repository::ChatStore;
use crate::services::access::{authorize, Caller};

/// 房间订阅管理：按会话参与者列表授权加入和离开
pub struct RoomMembershipManager {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
}

impl RoomMembershipManager {
    pub fn new(store: Arc<dyn ChatStore>, fanout: Arc<Fanout>) -> Self {
        Self { store, fanout }
    }

    /// 重复加入同一房间是幂等的，只有第一次会通知其他订阅者
    pub async fn join(&self, caller: Caller, chat_id: ChatId) -> Result<(), ApplicationError> {
        authorize(self.store.as_ref(), chat_id, caller.user_id).await?;

        let newly_joined = self
            .fanout
            .registry()
            .join_room(caller.connection_id, chat_id)
            .await
            .map_err(registry_error)?;

        if newly_joined {
            tracing::debug!(
                connection_id = %caller.connection_id,
                user_id = %caller.user_id,
                chat_id = %chat_id,
                "joined chat room"
            );
            self.fanout
                .to_room(
                    chat_id,
                    Some(caller.connection_id),
                    ServerEvent::UserJoined {
                        chat_id,
                        user_id: caller.user_id,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// 离开未加入的房间不是错误
    pub async fn leave(&self, caller: Caller, chat_id: ChatId) -> Result<(), ApplicationError> {
        let was_joined = self
            .fanout
            .registry()
            .leave_room(caller.connection_id, chat_id)
            .await
            .map_err(registry_error)?;

        if was_joined {
            tracing::debug!(
                connection_id = %caller.connection_id,
                chat_id = %chat_id,
                "left chat room"
            );
            self.fanout
                .to_room(
                    chat_id,
                    None,
                    ServerEvent::UserLeft {
                        chat_id,
                        user_id: caller.user_id,
                    },
                )
                .await;
        }
        Ok(())
    }
}

pub(crate) fn registry_error(error: RegistryError) -> ApplicationError {
    match error {
        RegistryError::UnknownConnection(_) => ApplicationError::Authentication,
        RegistryError::AlreadyRegistered(id) => {
            ApplicationError::invalid(format!("connection {id} is already registered"))
        }
    }
}
