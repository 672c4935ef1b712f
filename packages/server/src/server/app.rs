//! Application setup and server configuration.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domains::resources::ResourceService;
use crate::kernel::ServerDeps;
use crate::server::middleware::{
    apply_rate_limit, expose_error_trace, jwt_auth_middleware, normalize_rate_limit,
    RateLimitSettings,
};
use crate::server::routes::{
    create_handler, delete_handler, get_handler, health_handler, list_handler, patch_handler,
    replace_handler, room_events_handler, socket_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub deps: ServerDeps,
    pub resources: ResourceService,
}

impl AxumAppState {
    pub fn new(deps: ServerDeps) -> Self {
        let resources = deps.resources();
        Self { deps, resources }
    }
}

/// HTTP-level options that are not part of `ServerDeps`.
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Exact origins, or `*` for any.
    pub allowed_origins: Vec<String>,
    /// `None` disables rate limiting (tests, local tooling).
    pub rate_limit: Option<RateLimitSettings>,
    /// Append internal error chains to 500 bodies.
    pub expose_error_traces: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            rate_limit: Some(RateLimitSettings::default()),
            expose_error_traces: false,
        }
    }
}

/// Build the Axum application router
pub fn build_app(deps: ServerDeps, options: AppOptions) -> anyhow::Result<Router> {
    let jwt_service = deps.jwt_service.clone();
    let app_state = AxumAppState::new(deps);

    let mut api = Router::new()
        .route("/api/rooms/:room/events", get(room_events_handler))
        .route("/api/:resource", get(list_handler).post(create_handler))
        .route(
            "/api/:resource/:id",
            get(get_handler)
                .put(replace_handler)
                .patch(patch_handler)
                .delete(delete_handler),
        );

    if let Some(settings) = options.rate_limit {
        api = apply_rate_limit(api, settings)?.layer(middleware::from_fn(normalize_rate_limit));
    }

    let mut app = Router::new()
        .merge(api)
        // Health check and sockets are not rate limited
        .route("/health", get(health_handler))
        .route("/ws", get(socket_handler));

    if options.expose_error_traces {
        app = app.layer(middleware::from_fn(expose_error_trace));
    }

    // Middleware layers (applied in reverse order - last added runs first)
    let app = app
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service.clone(), req, next)
        }))
        .layer(Extension(app_state))
        .layer(cors_layer(&options.allowed_origins)?)
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

fn cors_layer(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin '{}'", origin))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}
