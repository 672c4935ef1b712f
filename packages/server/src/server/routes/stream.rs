//! SSE room endpoint.
//!
//! GET /api/rooms/:room/events?token=JWT
//!
//! Joins exactly one room for the life of the response and forwards its
//! broadcasts as SSE events named after the room event. EventSource can't
//! send custom headers, so the token may come as `?token=`; the
//! Authorization header is used otherwise.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::room_access::{authorize_room, room_caller};
use crate::common::error::AppError;
use crate::server::app::AxumAppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    /// JWT token for authentication
    token: Option<String>,
}

pub async fn room_events_handler(
    Extension(state): Extension<AxumAppState>,
    Path(room): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let caller = room_caller(&state.deps, query.token.as_deref(), &headers)?;
    let room = authorize_room(&state.deps, caller.as_ref(), &room)?.to_string();

    let conn = state.deps.rooms.connect().await;
    state
        .deps
        .rooms
        .join(conn.id(), &room)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let connected = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("connected").data(room))
    });

    // Dropping the response drops `conn`, which leaves the room.
    let events = stream::unfold(conn, |mut conn| async move {
        let event = conn.recv().await?;
        let sse = Event::default()
            .event(event.event.clone())
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event("error").data("unserializable event"));
        Some((Ok(sse), conn))
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}
