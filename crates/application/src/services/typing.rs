use std::sync::Arc;

use domain::{ChatId, ConnectionId, ServerEvent};

use crate::error::ApplicationError;
use crate::fanout::Fanout;
use crate::rate_limiter::EventRateLimiter;
use crate::repository::ChatStore;
use crate::services::access::{authorize, Caller};

/// 输入状态中继：不持久化，投递失败和超额信号都直接丢弃
pub struct TypingRelay {
    store: Arc<dyn ChatStore>,
    fanout: Arc<Fanout>,
    limiter: EventRateLimiter<(ConnectionId, ChatId)>,
}

impl TypingRelay {
    pub fn new(
        store: Arc<dyn ChatStore>,
        fanout: Arc<Fanout>,
        limiter: EventRateLimiter<(ConnectionId, ChatId)>,
    ) -> Self {
        Self {
            store,
            fanout,
            limiter,
        }
    }

    pub async fn typing(
        &self,
        caller: Caller,
        chat_id: ChatId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        match authorize(self.store.as_ref(), chat_id, caller.user_id).await {
            Ok(_) => {}
            Err(ApplicationError::Persistence(err)) => {
                tracing::warn!(chat_id = %chat_id, error = %err, "typing authorization unavailable");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self.limiter.check(&(caller.connection_id, chat_id)) {
            tracing::debug!(
                connection_id = %caller.connection_id,
                chat_id = %chat_id,
                error = %err,
                "dropping typing signal"
            );
            return Ok(());
        }

        self.fanout
            .to_room(
                chat_id,
                Some(caller.connection_id),
                ServerEvent::UserTyping {
                    chat_id,
                    user_id: caller.user_id,
                    is_typing,
                },
            )
            .await;
        Ok(())
    }

    /// 清理过期的输入状态配额，返回仍在跟踪的键数
    pub fn prune_rate_limits(&self) -> usize {
        self.limiter.cleanup_expired();
        self.limiter.tracked_keys()
    }

    /// 连接断开后释放它的限流记录
    pub fn forget(&self, connection_id: ConnectionId) {
        self.limiter
            .forget_where(|(connection, _)| *connection == connection_id);
    }
}
