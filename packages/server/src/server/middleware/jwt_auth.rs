use crate::common::error::AppError;
use crate::domains::auth::{Claims, JwtService};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Authenticated caller information from JWT
#[derive(Clone, Debug, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            roles: claims.roles,
            is_admin: claims.is_admin,
        }
    }
}

/// Marker left in request extensions when a token was presented but did
/// not verify (expired, wrong signature, wrong issuer).
#[derive(Clone, Copy, Debug)]
pub struct InvalidToken;

/// JWT authentication middleware
///
/// Extracts the token from the Authorization header and verifies it. A valid
/// token adds `AuthUser` to request extensions; an invalid one adds
/// `InvalidToken`. Requests without a token continue anonymously.
pub async fn jwt_auth_middleware(
    jwt_service: Arc<JwtService>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match bearer_token(request.headers()) {
        None => debug!("No authentication token"),
        Some(token) => match authenticate(&jwt_service, token) {
            Some(user) => {
                debug!("Authenticated user: {} (admin: {})", user.user_id, user.is_admin);
                request.extensions_mut().insert(user);
            }
            None => {
                debug!("Rejected authentication token");
                request.extensions_mut().insert(InvalidToken);
            }
        },
    }

    next.run(request).await
}

/// Token from an Authorization header, with or without the `Bearer ` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth_str = headers.get("authorization")?.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();
    (!token.is_empty()).then_some(token)
}

/// Verify a raw token.
pub fn authenticate(jwt_service: &JwtService, token: &str) -> Option<AuthUser> {
    jwt_service.verify_token(token).ok().map(AuthUser::from)
}

/// The caller of a handler: `None` for anonymous requests.
///
/// Rejects with 401 when the request carried a token that failed
/// verification, so a stale session is never silently downgraded to
/// anonymous access.
#[derive(Clone, Debug)]
pub struct Caller(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if parts.extensions.get::<InvalidToken>().is_some() {
            return Err(AppError::Authentication);
        }
        Ok(Caller(parts.extensions.get::<AuthUser>().cloned()))
    }
}
