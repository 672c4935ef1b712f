//! WebSocket room transport.
//!
//! GET /ws?token=JWT
//!
//! Client messages:
//!   {"event": "join-expenses", "data": "<id>"}   -> room "expenses:<id>"
//!   {"event": "join-expenses"}                   -> room "expenses"
//!   {"event": "join", "data": "statistics"}      -> room "statistics"
//!   "leave-…" / "leave" mirror the above.
//!
//! Server messages are `{"room", "event", "data"}`: broadcasts, plus
//! `joined` / `left` / `error` replies to the client's own commands.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use super::room_access::{authorize_room, canonical_room, room_caller};
use crate::common::error::AppError;
use crate::common::ConnectionId;
use crate::kernel::rooms::RoomEvent;
use crate::kernel::ServerDeps;
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SocketQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RoomCommand {
    Join(String),
    Leave(String),
}

/// Upgrade to a WebSocket once the caller passes the room policy.
pub async fn socket_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let caller = room_caller(&state.deps, query.token.as_deref(), &headers)?;
    let deps = state.deps.clone();
    Ok(ws.on_upgrade(move |socket| run_socket(socket, deps, caller)))
}

async fn run_socket(socket: WebSocket, deps: ServerDeps, caller: Option<AuthUser>) {
    let (sender, receiver) = socket.split();
    serve_connection(sender, receiver, deps, caller).await;
}

/// Pump one client: commands in, replies and room broadcasts out, until
/// either side closes. The hub membership is dropped on the way out.
async fn serve_connection<Tx, Rx, E>(
    mut sender: Tx,
    mut receiver: Rx,
    deps: ServerDeps,
    caller: Option<AuthUser>,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut conn = deps.rooms.connect().await;
    let conn_id = conn.id();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text(&deps, conn_id, caller.as_ref(), &text).await;
                    if !send(&mut sender, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %conn_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            event = conn.recv() => match event {
                Some(event) => {
                    if !send(&mut sender, &event).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    conn.close().await;
}

/// Returns `false` once the client can no longer be written to.
async fn send<Tx: Sink<Message> + Unpin>(sender: &mut Tx, event: &RoomEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::warn!(room = %event.room, error = %e, "Dropping unserializable room event");
            true
        }
    }
}

async fn handle_text(
    deps: &ServerDeps,
    conn_id: ConnectionId,
    caller: Option<&AuthUser>,
    text: &str,
) -> RoomEvent {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(message) => return reply("", "error", json!({ "message": message })),
    };

    match command {
        RoomCommand::Join(room) => {
            let room = match authorize_room(deps, caller, &room) {
                Ok(key) => key.to_string(),
                Err(e) => return reply(&room, "error", json!({ "message": e.to_string() })),
            };
            match deps.rooms.join(conn_id, &room).await {
                Ok(_) => reply(&room, "joined", Value::Null),
                Err(e) => reply(&room, "error", json!({ "message": e.to_string() })),
            }
        }
        RoomCommand::Leave(room) => {
            let room = match canonical_room(&room) {
                Ok(key) => key.to_string(),
                Err(e) => return reply(&room, "error", json!({ "message": e.to_string() })),
            };
            match deps.rooms.leave(conn_id, &room).await {
                Ok(_) => reply(&room, "left", Value::Null),
                Err(e) => reply(&room, "error", json!({ "message": e.to_string() })),
            }
        }
    }
}

fn reply(room: &str, event: &str, data: Value) -> RoomEvent {
    RoomEvent {
        room: room.to_string(),
        event: event.to_string(),
        data,
    }
}

/// Turn a client message into a join or leave of one room key.
pub(crate) fn parse_command(text: &str) -> Result<RoomCommand, String> {
    let message: ClientMessage =
        serde_json::from_str(text).map_err(|_| "expected {\"event\", \"data\"}".to_string())?;

    let (join, scope) = if let Some(scope) = message.event.strip_prefix("join-") {
        (true, Some(scope))
    } else if let Some(scope) = message.event.strip_prefix("leave-") {
        (false, Some(scope))
    } else if message.event == "join" {
        (true, None)
    } else if message.event == "leave" {
        (false, None)
    } else {
        return Err(format!("unknown event '{}'", message.event));
    };

    let key = match &message.data {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => return Err("data must be a room key string".to_string()),
    };

    let room = match (scope, key) {
        (Some(scope), Some(key)) if !scope.is_empty() => format!("{}:{}", scope, key),
        (Some(scope), None) if !scope.is_empty() => scope.to_string(),
        (None, Some(key)) => key,
        _ => return Err("missing room key".to_string()),
    };

    Ok(if join {
        RoomCommand::Join(room)
    } else {
        RoomCommand::Leave(room)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResourceId;
    use crate::domains::auth::JwtService;
    use crate::domains::resources::{Catalog, InMemoryResourceStore};
    use crate::kernel::rooms::{RoomAccess, RoomHub, STATISTICS_ROOM};
    use futures::channel::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn deps() -> ServerDeps {
        ServerDeps::new(
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(Catalog::budget().unwrap()),
            RoomHub::new(),
            Arc::new(JwtService::new("secret", "kamu".to_string())),
            RoomAccess::TokenRequired,
        )
    }

    fn clerk() -> AuthUser {
        AuthUser {
            user_id: "clerk-1".into(),
            roles: vec![],
            is_admin: false,
        }
    }

    /// Client side of a socket served by `serve_connection`.
    struct TestSocket {
        to_server: mpsc::UnboundedSender<Result<Message, axum::Error>>,
        from_server: mpsc::UnboundedReceiver<Message>,
        task: tokio::task::JoinHandle<()>,
    }

    impl TestSocket {
        fn open(deps: &ServerDeps, caller: Option<AuthUser>) -> Self {
            let (to_server, incoming) = mpsc::unbounded();
            let (outgoing, from_server) = mpsc::unbounded();
            let task = tokio::spawn(serve_connection(outgoing, incoming, deps.clone(), caller));
            Self {
                to_server,
                from_server,
                task,
            }
        }

        fn send(&self, message: Value) {
            self.to_server
                .unbounded_send(Ok(Message::Text(message.to_string())))
                .unwrap();
        }

        fn send_close(&self) {
            self.to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
        }

        async fn next(&mut self) -> Value {
            let message = tokio::time::timeout(Duration::from_secs(2), self.from_server.next())
                .await
                .expect("no message from server")
                .expect("server closed");
            match message {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_join_receives_broadcasts_until_leave() {
        let deps = deps();
        let id = ResourceId::new();
        let room = format!("budgets:{}", id);
        let mut socket = TestSocket::open(&deps, Some(clerk()));

        socket.send(json!({ "event": "join-budgets", "data": id.to_string().to_uppercase() }));
        let joined = socket.next().await;
        assert_eq!(joined["event"], "joined");
        assert_eq!(joined["room"], room.as_str());

        assert_eq!(deps.rooms.broadcast(&room, "updated", json!({ "n": 1 })).await, 1);
        let event = socket.next().await;
        assert_eq!(event, json!({ "room": &room, "event": "updated", "data": { "n": 1 } }));

        socket.send(json!({ "event": "leave-budgets", "data": id.to_string() }));
        assert_eq!(socket.next().await["event"], "left");
        assert_eq!(deps.rooms.broadcast(&room, "updated", json!({ "n": 2 })).await, 0);
    }

    #[tokio::test]
    async fn test_denied_and_unknown_rooms_reply_with_error() {
        let deps = deps();
        let mut anonymous = TestSocket::open(&deps, None);

        anonymous.send(json!({ "event": "join-budgets" }));
        let denied = anonymous.next().await;
        assert_eq!(denied["event"], "error");
        assert_eq!(denied["room"], "budgets");

        anonymous.send(json!({ "event": "join", "data": STATISTICS_ROOM }));
        assert_eq!(anonymous.next().await["event"], "error");

        let mut signed_in = TestSocket::open(&deps, Some(clerk()));
        signed_in.send(json!({ "event": "join-weather" }));
        assert_eq!(signed_in.next().await["event"], "error");
        signed_in.send(json!({ "event": "subscribe", "data": "budgets" }));
        assert_eq!(signed_in.next().await["event"], "error");

        assert_eq!(deps.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_drops_membership() {
        let deps = deps();
        let mut socket = TestSocket::open(&deps, Some(clerk()));
        socket.send(json!({ "event": "join-expenses" }));
        assert_eq!(socket.next().await["event"], "joined");
        assert_eq!(deps.rooms.connection_count().await, 1);
        assert_eq!(deps.rooms.members("expenses").await.len(), 1);

        socket.send_close();
        tokio::time::timeout(Duration::from_secs(2), socket.task)
            .await
            .expect("connection did not end")
            .unwrap();

        assert_eq!(deps.rooms.connection_count().await, 0);
        assert_eq!(deps.rooms.room_count().await, 0);
    }

    #[test]
    fn test_scoped_join_builds_room_key() {
        assert_eq!(
            parse_command(r#"{"event":"join-expenses","data":"abc"}"#),
            Ok(RoomCommand::Join("expenses:abc".into()))
        );
        assert_eq!(
            parse_command(r#"{"event":"leave-expenses","data":"abc"}"#),
            Ok(RoomCommand::Leave("expenses:abc".into()))
        );
    }

    #[test]
    fn test_scope_alone_is_collection_room() {
        assert_eq!(
            parse_command(r#"{"event":"join-expenses"}"#),
            Ok(RoomCommand::Join("expenses".into()))
        );
        assert_eq!(
            parse_command(r#"{"event":"join","data":"statistics"}"#),
            Ok(RoomCommand::Join("statistics".into()))
        );
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(parse_command("not json").is_err());
        assert!(parse_command(r#"{"event":"subscribe","data":"x"}"#).is_err());
        assert!(parse_command(r#"{"event":"join"}"#).is_err());
        assert!(parse_command(r#"{"event":"join-","data":"x"}"#).is_err());
        assert!(parse_command(r#"{"event":"join-a","data":{"x":1}}"#).is_err());
    }
}
