//! 连接注册表
//!
//! 进程内唯一的可变共享状态：连接 → 用户、用户 → 连接集合，
//! 以及每个会话房间的订阅连接。三者放在同一把锁里，
//! 注销连接时可以一次性清理它加入过的所有房间。

use std::collections::{BTreeSet, HashMap, HashSet};

use domain::{ChatId, ConnectionId, UserId};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
    user_id: UserId,
    joined_chats: BTreeSet<ChatId>,
}

/// 注销连接的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    pub user_id: UserId,
    pub joined_chats: BTreeSet<ChatId>,
    /// 是否是该用户的最后一个连接
    pub last_connection: bool,
}

/// 每个会话当前订阅事件的连接集合
#[derive(Debug, Default)]
pub struct RoomSubscriptions {
    rooms: HashMap<ChatId, HashSet<ConnectionId>>,
}

impl RoomSubscriptions {
    fn subscribe(&mut self, chat_id: ChatId, connection_id: ConnectionId) -> bool {
        self.rooms.entry(chat_id).or_default().insert(connection_id)
    }

    fn unsubscribe(&mut self, chat_id: ChatId, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(&chat_id) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(&chat_id);
        }
        removed
    }

    fn members(&self, chat_id: ChatId) -> Vec<ConnectionId> {
        self.rooms
            .get(&chat_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
    rooms: RoomSubscriptions,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个已认证的连接，返回这是否是该用户的第一个连接
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        if state.connections.contains_key(&connection_id) {
            return Err(RegistryError::AlreadyRegistered(connection_id));
        }
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                joined_chats: BTreeSet::new(),
            },
        );
        let owned = state.users.entry(user_id).or_default();
        owned.insert(connection_id);
        Ok(owned.len() == 1)
    }

    /// 移除连接以及它的全部房间订阅
    pub async fn unregister(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Disconnection, RegistryError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .remove(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        for chat_id in &entry.joined_chats {
            state.rooms.unsubscribe(*chat_id, connection_id);
        }

        let last_connection = match state.users.get_mut(&entry.user_id) {
            Some(owned) => {
                owned.remove(&connection_id);
                owned.is_empty()
            }
            None => true,
        };
        if last_connection {
            state.users.remove(&entry.user_id);
        }

        Ok(Disconnection {
            user_id: entry.user_id,
            joined_chats: entry.joined_chats,
            last_connection,
        })
    }

    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.user_id)
    }

    pub async fn connections_of(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.read().await.users.contains_key(&user_id)
    }

    /// 订阅会话房间，返回是否为新加入
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        chat_id: ChatId,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;
        let newly_joined = entry.joined_chats.insert(chat_id);
        state.rooms.subscribe(chat_id, connection_id);
        Ok(newly_joined)
    }

    /// 退订会话房间，返回连接此前是否在房间内
    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        chat_id: ChatId,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;
        let was_joined = entry.joined_chats.remove(&chat_id);
        state.rooms.unsubscribe(chat_id, connection_id);
        Ok(was_joined)
    }

    pub async fn is_joined(&self, connection_id: ConnectionId, chat_id: ChatId) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .is_some_and(|entry| entry.joined_chats.contains(&chat_id))
    }

    pub async fn joined_chats(&self, connection_id: ConnectionId) -> BTreeSet<ChatId> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.joined_chats.clone())
            .unwrap_or_default()
    }

    pub async fn room_members(&self, chat_id: ChatId) -> Vec<ConnectionId> {
        self.state.read().await.rooms.members(chat_id)
    }

    pub async fn all_connections(&self) -> Vec<ConnectionId> {
        self.state.read().await.connections.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn active_room_count(&self) -> usize {
        self.state.read().await.rooms.room_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_and_last_connection_transitions() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        let phone = ConnectionId::generate();
        let laptop = ConnectionId::generate();

        assert!(registry.register(phone, user).await.unwrap());
        assert!(!registry.register(laptop, user).await.unwrap());
        assert!(registry.is_online(user).await);
        assert_eq!(registry.connections_of(user).await.len(), 2);
        assert_eq!(registry.online_user_count().await, 1);
        assert_eq!(registry.connection_count().await, 2);

        let first = registry.unregister(phone).await.unwrap();
        assert_eq!(first.user_id, user);
        assert!(!first.last_connection);
        assert!(registry.is_online(user).await);

        let second = registry.unregister(laptop).await.unwrap();
        assert!(second.last_connection);
        assert!(!registry.is_online(user).await);
        assert_eq!(registry.online_user_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_connections_are_rejected() {
        let registry = ConnectionRegistry::new();
        let connection = ConnectionId::generate();

        assert_eq!(
            registry.unregister(connection).await,
            Err(RegistryError::UnknownConnection(connection))
        );

        registry.register(connection, UserId::generate()).await.unwrap();
        assert_eq!(
            registry.register(connection, UserId::generate()).await,
            Err(RegistryError::AlreadyRegistered(connection))
        );
    }

    #[tokio::test]
    async fn unregister_clears_room_subscriptions() {
        let registry = ConnectionRegistry::new();
        let connection = ConnectionId::generate();
        let other = ConnectionId::generate();
        let chat = ChatId::generate();

        registry.register(connection, UserId::generate()).await.unwrap();
        registry.register(other, UserId::generate()).await.unwrap();
        assert!(registry.join_room(connection, chat).await.unwrap());
        assert!(!registry.join_room(connection, chat).await.unwrap());
        registry.join_room(other, chat).await.unwrap();
        assert_eq!(registry.room_members(chat).await.len(), 2);

        let gone = registry.unregister(connection).await.unwrap();
        assert!(gone.joined_chats.contains(&chat));
        assert_eq!(registry.room_members(chat).await, vec![other]);

        assert!(registry.leave_room(other, chat).await.unwrap());
        assert!(registry.room_members(chat).await.is_empty());
        assert_eq!(registry.active_room_count().await, 0);
    }
}
