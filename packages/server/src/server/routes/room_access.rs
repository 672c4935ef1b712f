//! Who may open a room transport and which rooms they may join.
//!
//! Shared by the WebSocket and SSE endpoints. Browsers cannot set headers on
//! either, so the token may also come as `?token=`.

use axum::http::HeaderMap;

use crate::common::auth::Access;
use crate::common::error::{AppError, ValidationErrors};
use crate::common::ResourceId;
use crate::kernel::rooms::{RoomAccess, RoomKey, STATISTICS_ROOM};
use crate::kernel::ServerDeps;
use crate::server::middleware::{authenticate, bearer_token, AuthUser};

/// Resolve the caller of a room transport under the deployment's policy.
///
/// A presented token must verify. Without one, only `AnonymousReadOnly`
/// deployments let the connection through.
pub fn room_caller(
    deps: &ServerDeps,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Option<AuthUser>, AppError> {
    let token = query_token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers));

    match token {
        Some(token) => authenticate(&deps.jwt_service, token)
            .map(Some)
            .ok_or(AppError::Authentication),
        None => match deps.room_access {
            RoomAccess::TokenRequired => Err(AppError::Authentication),
            RoomAccess::AnonymousReadOnly => Ok(None),
        },
    }
}

/// Parse `room` into the form the resource service broadcasts to.
///
/// Resource ids are accepted in any spelling `uuid` understands (uppercase,
/// simple, braced, urn) and rewritten as lowercase hyphenated, so
/// `budgets:{01A1…}` and `budgets:01a1…` name the same room.
pub fn canonical_room(room: &str) -> Result<RoomKey, AppError> {
    let invalid = |message: String| AppError::Validation(ValidationErrors::single("room", message));
    let mut key = RoomKey::parse(room).map_err(|e| invalid(e.to_string()))?;

    if key.scope == STATISTICS_ROOM {
        if key.key.is_some() {
            return Err(invalid(format!("{} takes no key", STATISTICS_ROOM)));
        }
        return Ok(key);
    }
    if let Some(raw) = &key.key {
        let id = ResourceId::parse(raw).map_err(|_| invalid(format!("'{}' is not a resource id", raw)))?;
        key.key = Some(id.to_string());
    }
    Ok(key)
}

/// Check that `caller` may receive events for `room` and return the
/// canonical key to join.
///
/// Rooms are `<kind>` or `<kind>:<id>` for catalog kinds, gated by the
/// kind's read permission, plus the `statistics` room for signed-in callers.
pub fn authorize_room(
    deps: &ServerDeps,
    caller: Option<&AuthUser>,
    room: &str,
) -> Result<RoomKey, AppError> {
    let key = canonical_room(room)?;

    if key.scope == STATISTICS_ROOM {
        Access::Authenticated.check(caller, "watch statistics")?;
        return Ok(key);
    }

    let definition = deps
        .catalog
        .definition(&key.scope)
        .ok_or_else(|| AppError::not_found("room scope", &key.scope))?;
    definition
        .permissions
        .read
        .check(caller, &format!("watch {}", key.scope))?;
    Ok(key)
}
