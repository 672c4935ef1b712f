// Rate limiting middleware using tower-governor
//
// Configuration:
// - Per client IP, taken from X-Forwarded-For / X-Real-IP / Forwarded and
//   falling back to the peer address
// - RATE_LIMIT_PER_SECOND replenish rate, RATE_LIMIT_BURST bucket size
// - Applied in app.rs to the /api routes only; /health and /ws are exempt
//
// Governor answers with a plain-text 429. `normalize_rate_limit` rewrites
// that into the JSON error body every other endpoint uses, keeping the
// x-ratelimit-* and retry-after headers.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Router,
};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};

use crate::common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_second: 10,
            burst_size: 20,
        }
    }
}

/// Wrap `router` in a per-IP governor.
pub fn apply_rate_limit<S>(router: Router<S>, settings: RateLimitSettings) -> anyhow::Result<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let config = GovernorConfigBuilder::default()
        .per_second(settings.per_second)
        .burst_size(settings.burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .use_headers()
        .finish()
        .context("rate limit settings must be non-zero")?;

    Ok(router.layer(GovernorLayer {
        config: Arc::new(config),
    }))
}

/// Replace a non-JSON 429 with the standard error body.
pub async fn normalize_rate_limit(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::TOO_MANY_REQUESTS || is_json(&response) {
        return response;
    }

    let mut normalized = AppError::RateLimited.into_response();
    for (name, value) in response.headers() {
        let keep = name == header::RETRY_AFTER || name.as_str().starts_with("x-ratelimit");
        if keep {
            normalized.headers_mut().insert(name.clone(), value.clone());
        }
    }
    normalized
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}
