use std::sync::Arc;

use application::{ChatCoordinator, LocalTransport, TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ChatCoordinator>,
    /// 本进程连接的写通道，由 WebSocket 连接附加和移除
    pub transport: Arc<LocalTransport>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ChatCoordinator>,
        transport: Arc<LocalTransport>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            coordinator,
            transport,
            verifier,
        }
    }
}
