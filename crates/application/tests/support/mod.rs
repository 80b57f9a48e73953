#![allow(dead_code)]

use std::sync::Arc;

use application::{
    ChatCoordinator, ChatCoordinatorDependencies, ChatStore, CoordinatorSettings,
    InMemoryChatStore, LocalTransport, SystemClock,
};
use chrono::Utc;
use domain::{Chat, ChatId, ClientEvent, ConnectionId, ServerEvent, UserId};
use tokio::sync::mpsc::UnboundedReceiver;

/// 进程内的协调器 + 内存存储 + 本地传输
pub struct Harness {
    pub store: Arc<InMemoryChatStore>,
    pub transport: Arc<LocalTransport>,
    pub coordinator: Arc<ChatCoordinator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(CoordinatorSettings::default())
    }

    pub fn with_settings(settings: CoordinatorSettings) -> Self {
        let store = Arc::new(InMemoryChatStore::new());
        let transport = Arc::new(LocalTransport::new());
        let coordinator = Arc::new(ChatCoordinator::new(ChatCoordinatorDependencies {
            store: store.clone(),
            transport: transport.clone(),
            relay: None,
            clock: Arc::new(SystemClock),
            settings,
        }));
        Self {
            store,
            transport,
            coordinator,
        }
    }

    pub async fn direct_chat(&self, a: UserId, b: UserId) -> ChatId {
        let chat = Chat::direct(ChatId::generate(), a, b, Utc::now()).unwrap();
        let id = chat.id;
        self.store.insert_chat(chat).await.unwrap();
        id
    }

    pub async fn group_chat(&self, users: &[UserId]) -> ChatId {
        let chat = Chat::group(ChatId::generate(), users.iter().copied(), Utc::now()).unwrap();
        let id = chat.id;
        self.store.insert_chat(chat).await.unwrap();
        id
    }

    pub async fn chat(&self, chat_id: ChatId) -> Chat {
        self.store.get_chat(chat_id).await.unwrap().unwrap()
    }

    /// 建立一个已认证连接，并清空连接时收到的状态广播
    pub async fn connect(&self, user_id: UserId) -> Client {
        let connection_id = ConnectionId::generate();
        let events = self.transport.attach(connection_id).await;
        self.coordinator
            .connect(connection_id, user_id)
            .await
            .unwrap();
        let mut client = Client {
            connection_id,
            user_id,
            events,
            coordinator: self.coordinator.clone(),
        };
        client.drain();
        client
    }
}

pub struct Client {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    events: UnboundedReceiver<ServerEvent>,
    coordinator: Arc<ChatCoordinator>,
}

impl Client {
    pub async fn send(&self, event: ClientEvent) {
        self.coordinator.handle(self.connection_id, event).await;
    }

    pub async fn join(&mut self, chat_id: ChatId) {
        self.send(ClientEvent::JoinChat(chat_id)).await;
        let errors = self.errors();
        assert!(errors.is_empty(), "join failed: {errors:?}");
    }

    pub async fn say(&self, chat_id: ChatId, content: &str) {
        self.send(ClientEvent::SendMessage {
            chat_id,
            content: content.to_string(),
            message_type: Default::default(),
            reply_to: None,
            metadata: None,
        })
        .await;
    }

    /// 取出当前已经投递到该连接的全部事件
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn named(&mut self, name: &str) -> Vec<ServerEvent> {
        self.drain()
            .into_iter()
            .filter(|event| event.name() == name)
            .collect()
    }

    pub fn errors(&mut self) -> Vec<ServerEvent> {
        self.named("error")
    }
}

pub fn error_code(event: &ServerEvent) -> Option<domain::ErrorCode> {
    match event {
        ServerEvent::Error { code, .. } => Some(*code),
        _ => None,
    }
}
