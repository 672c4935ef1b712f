//! Room-scoped broadcaster for real-time clients.
//!
//! Connections join named rooms and receive only the events broadcast to
//! those rooms. Rooms are plain string keys: they appear on the first join
//! and disappear when their last member leaves. Nothing is persisted and
//! nothing is replayed; a full or closed connection simply misses events.
//!
//! # Usage
//!
//! Transports (WebSocket, SSE):
//!   let mut conn = hub.connect().await;
//!   hub.join(conn.id(), "expenses").await?;
//!   while let Some(event) = conn.recv().await { ... }
//!
//! Producers (resource service, jobs):
//!   hub.broadcast("expenses", "created", json!({...})).await;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use crate::common::ConnectionId;

/// Room the statistics job publishes to.
pub const STATISTICS_ROOM: &str = "statistics";

const MAX_ROOM_KEY_LEN: usize = 200;

/// One server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomEvent {
    pub room: String,
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("invalid room key: {0}")]
    InvalidRoom(String),
}

/// Who may interact with rooms. Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomAccess {
    /// Every connection must present a valid token before joining.
    #[default]
    TokenRequired,
    /// Connections without a token may join rooms of kinds whose read
    /// permission is public.
    AnonymousReadOnly,
}

impl FromStr for RoomAccess {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::TokenRequired),
            "anonymous" => Ok(Self::AnonymousReadOnly),
            other => anyhow::bail!("ROOM_ACCESS must be 'token' or 'anonymous', got '{}'", other),
        }
    }
}

impl fmt::Display for RoomAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenRequired => f.write_str("token"),
            Self::AnonymousReadOnly => f.write_str("anonymous"),
        }
    }
}

/// A parsed room key: `<scope>` or `<scope>:<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKey {
    pub scope: String,
    pub key: Option<String>,
}

impl RoomKey {
    pub fn parse(raw: &str) -> Result<Self, RoomError> {
        let invalid = || RoomError::InvalidRoom(raw.to_string());
        if raw.is_empty()
            || raw.len() > MAX_ROOM_KEY_LEN
            || raw.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(invalid());
        }

        match raw.split_once(':') {
            None => Ok(Self {
                scope: raw.to_string(),
                key: None,
            }),
            Some((scope, key)) if !scope.is_empty() && !key.is_empty() => Ok(Self {
                scope: scope.to_string(),
                key: Some(key.to_string()),
            }),
            Some(_) => Err(invalid()),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}:{}", self.scope, key),
            None => f.write_str(&self.scope),
        }
    }
}

struct Member {
    tx: mpsc::Sender<RoomEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Member>,
}

impl Registry {
    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(member) = self.connections.remove(&id) else {
            return false;
        };
        for room in member.rooms {
            self.remove_from_room(&room, id);
        }
        true
    }

    fn remove_from_room(&mut self, room: &str, id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Cloneable handle to the room membership table.
#[derive(Clone)]
pub struct RoomHub {
    registry: Arc<RwLock<Registry>>,
    capacity: usize,
}

impl RoomHub {
    /// Hub with a 256-event buffer per connection.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new connection. It starts in no rooms.
    pub async fn connect(&self) -> RoomConnection {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = ConnectionId::new();
        self.registry.write().await.connections.insert(
            id,
            Member {
                tx,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(connection = %id, "Room connection opened");

        RoomConnection {
            id,
            rx,
            hub: Some(self.clone()),
        }
    }

    /// Add a connection to a room. Returns `false` if it was already a member.
    pub async fn join(&self, id: ConnectionId, room: &str) -> Result<bool, RoomError> {
        RoomKey::parse(room)?;
        let mut registry = self.registry.write().await;
        let member = registry
            .connections
            .get_mut(&id)
            .ok_or(RoomError::UnknownConnection(id))?;
        if !member.rooms.insert(room.to_string()) {
            return Ok(false);
        }
        registry.rooms.entry(room.to_string()).or_default().insert(id);
        tracing::debug!(connection = %id, room, "Joined room");
        Ok(true)
    }

    /// Remove a connection from a room. Returns `false` if it was not a member.
    pub async fn leave(&self, id: ConnectionId, room: &str) -> Result<bool, RoomError> {
        let mut registry = self.registry.write().await;
        let member = registry
            .connections
            .get_mut(&id)
            .ok_or(RoomError::UnknownConnection(id))?;
        if !member.rooms.remove(room) {
            return Ok(false);
        }
        registry.remove_from_room(room, id);
        tracing::debug!(connection = %id, room, "Left room");
        Ok(true)
    }

    /// Leave every room and forget the connection. Idempotent.
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.registry.write().await.remove_connection(id) {
            tracing::debug!(connection = %id, "Room connection closed");
        }
    }

    /// Deliver an event to every current member of `room`.
    ///
    /// Best-effort: members whose buffer is full miss the event, members
    /// whose receiver is gone are dropped from the hub. Returns the number
    /// of connections the event was queued for.
    pub async fn broadcast(&self, room: &str, event: &str, data: Value) -> usize {
        let message = RoomEvent {
            room: room.to_string(),
            event: event.to_string(),
            data,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let registry = self.registry.read().await;
            let Some(members) = registry.rooms.get(room) else {
                return 0;
            };
            for id in members {
                let Some(member) = registry.connections.get(id) else {
                    continue;
                };
                match member.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(connection = %id, room, event, "Connection buffer full; event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.write().await;
            for id in closed {
                registry.remove_connection(id);
            }
        }

        tracing::trace!(room, event, delivered, "Broadcast");
        delivered
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn members(&self, room: &str) -> Vec<ConnectionId> {
        let registry = self.registry.read().await;
        let mut members: Vec<ConnectionId> = registry
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving end of one connection.
///
/// Call [`RoomConnection::close`] when the transport ends. If the value is
/// dropped instead, cleanup is spawned onto the current runtime.
pub struct RoomConnection {
    id: ConnectionId,
    rx: mpsc::Receiver<RoomEvent>,
    hub: Option<RoomHub>,
}

impl RoomConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next event for this connection. `None` once the hub dropped it.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RoomEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn close(mut self) {
        if let Some(hub) = self.hub.take() {
            hub.disconnect(self.id).await;
        }
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        let Some(hub) = self.hub.take() else {
            return;
        };
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { hub.disconnect(id).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_members_receive_room_events_only() {
        let hub = RoomHub::new();
        let mut a = hub.connect().await;
        let mut b = hub.connect().await;
        hub.join(a.id(), "budgets:1").await.unwrap();
        hub.join(b.id(), "budgets:2").await.unwrap();

        let delivered = hub.broadcast("budgets:1", "updated", json!({ "n": 1 })).await;
        assert_eq!(delivered, 1);

        let event = a.recv().await.unwrap();
        assert_eq!(event.room, "budgets:1");
        assert_eq!(event.event, "updated");
        assert_eq!(event.data, json!({ "n": 1 }));
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room_is_noop() {
        let hub = RoomHub::new();
        assert_eq!(hub.broadcast("nobody", "created", json!({})).await, 0);
    }

    #[tokio::test]
    async fn test_rooms_created_on_join_and_removed_on_last_leave() {
        let hub = RoomHub::new();
        let a = hub.connect().await;
        let b = hub.connect().await;

        assert!(hub.join(a.id(), "expenses").await.unwrap());
        assert!(!hub.join(a.id(), "expenses").await.unwrap());
        hub.join(b.id(), "expenses").await.unwrap();
        assert_eq!(hub.room_count().await, 1);
        assert_eq!(hub.members("expenses").await.len(), 2);

        assert!(hub.leave(a.id(), "expenses").await.unwrap());
        assert_eq!(hub.room_count().await, 1);
        hub.leave(b.id(), "expenses").await.unwrap();
        assert_eq!(hub.room_count().await, 0);
        assert!(!hub.leave(b.id(), "expenses").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_leaves_every_room() {
        let hub = RoomHub::new();
        let a = hub.connect().await;
        hub.join(a.id(), "expenses").await.unwrap();
        hub.join(a.id(), "budgets").await.unwrap();

        let id = a.id();
        a.close().await;

        assert_eq!(hub.room_count().await, 0);
        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(
            hub.join(id, "expenses").await,
            Err(RoomError::UnknownConnection(id))
        );
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let hub = RoomHub::with_capacity(1);
        let mut a = hub.connect().await;
        hub.join(a.id(), "r").await.unwrap();

        assert_eq!(hub.broadcast("r", "one", json!(1)).await, 1);
        assert_eq!(hub.broadcast("r", "two", json!(2)).await, 0);
        assert_eq!(a.recv().await.unwrap().event, "one");
        assert!(a.try_recv().is_none());
        assert_eq!(hub.members("r").await.len(), 1);
    }

    #[test]
    fn test_room_key_parsing() {
        assert_eq!(
            RoomKey::parse("expenses").unwrap(),
            RoomKey { scope: "expenses".into(), key: None }
        );
        let key = RoomKey::parse("budgets:abc").unwrap();
        assert_eq!(key.key.as_deref(), Some("abc"));
        assert_eq!(key.to_string(), "budgets:abc");

        assert!(RoomKey::parse("").is_err());
        assert!(RoomKey::parse("budgets:").is_err());
        assert!(RoomKey::parse(":abc").is_err());
        assert!(RoomKey::parse("two words").is_err());
    }

    #[test]
    fn test_room_access_from_env_value() {
        assert_eq!("token".parse::<RoomAccess>().unwrap(), RoomAccess::TokenRequired);
        assert_eq!(" Anonymous ".parse::<RoomAccess>().unwrap(), RoomAccess::AnonymousReadOnly);
        assert!("open".parse::<RoomAccess>().is_err());
    }
}
