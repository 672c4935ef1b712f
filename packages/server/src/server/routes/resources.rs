//! REST endpoints for catalog resources.
//!
//! GET    /api/:resource            list (`?limit=&after=`)
//! POST   /api/:resource            create
//! GET    /api/:resource/:id        fetch
//! PUT    /api/:resource/:id        replace all writable fields
//! PATCH  /api/:resource/:id        merge fields (`null` clears)
//! DELETE /api/:resource/:id        soft or hard delete, per definition

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::common::error::{AppError, AppResult, ValidationErrors};
use crate::common::pagination::{Page, PageArgs};
use crate::common::ResourceId;
use crate::domains::resources::{Resource, WriteMode};
use crate::server::app::AxumAppState;
use crate::server::middleware::Caller;

pub async fn list_handler(
    Extension(state): Extension<AxumAppState>,
    Path(kind): Path<String>,
    Caller(auth): Caller,
    query: Result<Query<PageArgs>, QueryRejection>,
) -> AppResult<Json<Page<Resource>>> {
    let Query(args) = query.map_err(|e| invalid("query", e.body_text()))?;
    let page = args.validate()?;
    let page = state.resources.list(&kind, page, auth.as_ref()).await?;
    Ok(Json(page))
}

pub async fn create_handler(
    Extension(state): Extension<AxumAppState>,
    Path(kind): Path<String>,
    Caller(auth): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Resource>)> {
    let Json(body) = body.map_err(|e| invalid("body", e.body_text()))?;
    let resource = state.resources.create(&kind, body, auth.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

pub async fn get_handler(
    Extension(state): Extension<AxumAppState>,
    Path((kind, id)): Path<(String, String)>,
    Caller(auth): Caller,
) -> AppResult<Json<Resource>> {
    let id = resource_id(&state, &kind, &id)?;
    let resource = state.resources.get(&kind, id, auth.as_ref()).await?;
    Ok(Json(resource))
}

pub async fn replace_handler(
    Extension(state): Extension<AxumAppState>,
    Path((kind, id)): Path<(String, String)>,
    Caller(auth): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Resource>> {
    update(state, kind, id, auth, body, WriteMode::Replace).await
}

pub async fn patch_handler(
    Extension(state): Extension<AxumAppState>,
    Path((kind, id)): Path<(String, String)>,
    Caller(auth): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Resource>> {
    update(state, kind, id, auth, body, WriteMode::Merge).await
}

pub async fn delete_handler(
    Extension(state): Extension<AxumAppState>,
    Path((kind, id)): Path<(String, String)>,
    Caller(auth): Caller,
) -> AppResult<StatusCode> {
    let id = resource_id(&state, &kind, &id)?;
    state.resources.delete(&kind, id, auth.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update(
    state: AxumAppState,
    kind: String,
    id: String,
    auth: Option<crate::server::middleware::AuthUser>,
    body: Result<Json<Value>, JsonRejection>,
    mode: WriteMode,
) -> AppResult<Json<Resource>> {
    let id = resource_id(&state, &kind, &id)?;
    let Json(body) = body.map_err(|e| invalid("body", e.body_text()))?;
    let resource = state
        .resources
        .update(&kind, id, body, mode, auth.as_ref())
        .await?;
    Ok(Json(resource))
}

/// An id that does not parse cannot exist, so it is a 404 like any other
/// missing id. Unknown kinds are reported first.
fn resource_id(state: &AxumAppState, kind: &str, raw: &str) -> AppResult<ResourceId> {
    state.resources.definition(kind)?;
    ResourceId::parse(raw).map_err(|_| AppError::not_found(kind, raw))
}

fn invalid(field: &str, message: String) -> AppError {
    AppError::Validation(ValidationErrors::single(field, message))
}
