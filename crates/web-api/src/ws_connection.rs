use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ConnectionId, ErrorCode, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use application::EventTransport;

use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 一个已认证的 WebSocket 对应协调器里的一个连接：
/// - 发送任务把协调器投递给该连接的事件写到 socket
/// - 接收循环按到达顺序逐个处理客户端事件
/// - 写方向失败时只在两帧之间停止接收，正在处理的事件会完整执行
/// - 任一方向结束后注销连接并移除写通道
pub struct WebSocketConnection {
    state: AppState,
    connection_id: ConnectionId,
    user_id: UserId,
}

/// 事件之外的写操作
#[derive(Debug)]
enum WsCommand {
    SendPong(axum::body::Bytes),
}

enum Inbound {
    Continue,
    Close,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user_id: UserId) -> Self {
        Self {
            state,
            connection_id: ConnectionId::generate(),
            user_id,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let connection_id = self.connection_id;
        let mut events = self.state.transport.attach(connection_id).await;

        if let Err(err) = self
            .state
            .coordinator
            .connect(connection_id, self.user_id)
            .await
        {
            tracing::error!(connection_id = %connection_id, error = %err, "failed to register connection");
            self.state.transport.detach(connection_id).await;
            return;
        }
        tracing::info!(connection_id = %connection_id, user_id = %self.user_id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = events.recv() => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize server event");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                    },
                    else => break,
                }
            }
        });

        // 接收循环：同一连接的事件串行处理，保证按到达顺序生效
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = self.state.clone();
        let mut recv_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    frame = incoming.next() => match frame {
                        Some(Ok(message)) => message,
                        _ => break,
                    },
                };
                match Self::handle_incoming(&state, connection_id, message, &cmd_tx).await {
                    Inbound::Continue => {}
                    Inbound::Close => break,
                }
            }
        });

        let writer_closed_first = tokio::select! {
            _ = &mut send_task => true,
            _ = &mut recv_task => false,
        };
        if writer_closed_first {
            // 写方向已断开，但当前事件的持久化和扇出仍要完成
            let _ = shutdown_tx.send(true);
            if let Err(err) = recv_task.await {
                tracing::warn!(connection_id = %connection_id, error = %err, "receive task failed");
            }
        } else {
            send_task.abort();
        }

        match self.state.coordinator.disconnect(connection_id).await {
            Ok(disconnection) => tracing::info!(
                connection_id = %connection_id,
                user_id = %self.user_id,
                last_connection = disconnection.last_connection,
                "WebSocket 连接已断开"
            ),
            Err(err) => tracing::warn!(connection_id = %connection_id, error = %err, "disconnect failed"),
        }
        self.state.transport.detach(connection_id).await;
    }

    async fn handle_incoming(
        state: &AppState,
        connection_id: ConnectionId,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Inbound {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => state.coordinator.handle(connection_id, event).await,
                Err(err) => {
                    tracing::debug!(connection_id = %connection_id, error = %err, "unparseable client frame");
                    let reply = ServerEvent::error(
                        ErrorCode::Invalid,
                        format!("unrecognized event: {err}"),
                    );
                    if state.transport.send(connection_id, reply).await.is_err() {
                        return Inbound::Close;
                    }
                }
            },
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    return Inbound::Close;
                }
            }
            WsMessage::Close(_) => return Inbound::Close,
            WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
        Inbound::Continue
    }
}
