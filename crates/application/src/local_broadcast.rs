// 进程内传输：每个连接一个无界通道，由 WebSocket 写任务消费
use std::collections::HashMap;

use async_trait::async_trait;
use domain::{ConnectionId, ServerEvent};
use tokio::sync::{mpsc, RwLock};

use crate::broadcaster::{EventTransport, TransportError};

#[derive(Default)]
pub struct LocalTransport {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为连接创建出站通道，重复附加会替换旧通道
    pub async fn attach(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.write().await.insert(connection_id, sender);
        receiver
    }

    pub async fn detach(&self, connection_id: ConnectionId) {
        self.senders.write().await.remove(&connection_id);
    }
}

#[async_trait]
impl EventTransport for LocalTransport {
    async fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<(), TransportError> {
        let senders = self.senders.read().await;
        let sender = senders
            .get(&connection_id)
            .ok_or(TransportError::Closed(connection_id))?;
        sender
            .send(event)
            .map_err(|_| TransportError::Closed(connection_id))
    }
}
