//! Web API 层。
//!
//! 提供 Axum 路由：健康检查和 WebSocket 入口。连接在握手前完成认证，
//! 之后的每个文本帧都交给应用层的 `ChatCoordinator` 处理。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
