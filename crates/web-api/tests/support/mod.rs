#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, InMemoryChatStore,
    LocalTransport, SystemClock,
};
use chrono::Utc;
use config::JwtConfig;
use domain::{Chat, ChatId, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::JwtTokenVerifier;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 真实监听端口上的服务器，内存存储
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryChatStore>,
    pub verifier: Arc<JwtTokenVerifier>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(InMemoryChatStore::new());
        let transport = Arc::new(LocalTransport::new());
        let verifier = Arc::new(JwtTokenVerifier::new(&JwtConfig {
            secret: "integration-test-secret-0123456789".to_string(),
            expiration_hours: 1,
        }));
        let coordinator = Arc::new(ChatCoordinator::new(ChatCoordinatorDependencies {
            store: store.clone(),
            transport: transport.clone(),
            relay: None,
            clock: Arc::new(SystemClock),
            settings: CoordinatorSettings::default(),
        }));
        let app = router(AppState::new(coordinator, transport, verifier.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            verifier,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn token(&self, user: UserId) -> String {
        self.verifier.issue_token(user).expect("token")
    }

    pub async fn direct_chat(&self, a: UserId, b: UserId) -> ChatId {
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).expect("chat");
        let id = chat.id;
        self.store.insert_chat(chat).await.expect("insert chat");
        id
    }

    pub async fn connect(&self, user: UserId) -> WsStream {
        let (stream, _) = connect_async(self.ws_url(&self.token(user)))
            .await
            .expect("websocket handshake");
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(TungsteniteMessage::text(value.to_string()))
        .await
        .expect("send frame");
}

/// 读取帧直到出现指定事件，其余事件跳过
pub async fn expect_event(ws: &mut WsStream, name: &str) -> Value {
    let wait = async {
        while let Some(frame) = ws.next().await {
            if let TungsteniteMessage::Text(text) = frame.expect("frame") {
                let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if value["event"] == name {
                    return value;
                }
            }
        }
        panic!("socket closed while waiting for {name}");
    };
    tokio::time::timeout(Duration::from_secs(3), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}
