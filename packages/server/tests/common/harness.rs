//! Test harnesses for integration testing.
//!
//! `TestHarness` drives the full router over the in-memory store, so most
//! suites need no containers. `PostgresHarness` shares one Postgres
//! container across the run; containers and migrations are initialized once
//! on first use, then reused.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use kamu_core::domains::auth::JwtService;
use kamu_core::domains::resources::{
    Catalog, InMemoryResourceStore, PostgresResourceStore, ResourceService,
};
use kamu_core::kernel::{RoomAccess, RoomHub, ServerDeps};
use kamu_core::server::{build_app, AppOptions};
use serde_json::Value;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "test_secret";
pub const TEST_JWT_ISSUER: &str = "kamu";

fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A decoded HTTP response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Full application over the in-memory store and the budget catalog.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let res = ctx.post("/api/budgets", Some(&ctx.admin_token()), body).await;
/// }
/// ```
pub struct TestHarness {
    pub deps: ServerDeps,
    pub store: Arc<InMemoryResourceStore>,
    pub app: Router,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().expect("Failed to create test harness")
    }
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_catalog(Catalog::budget()?, RoomAccess::TokenRequired)
    }

    pub fn with_catalog(catalog: Catalog, room_access: RoomAccess) -> Result<Self> {
        init_tracing();

        let store = Arc::new(InMemoryResourceStore::new());
        let deps = ServerDeps::new(
            store.clone(),
            Arc::new(catalog),
            RoomHub::new(),
            Arc::new(JwtService::new(TEST_JWT_SECRET, TEST_JWT_ISSUER.to_string())),
            room_access,
        );
        let app = build_app(
            deps.clone(),
            AppOptions {
                allowed_origins: vec!["*".to_string()],
                rate_limit: None,
                expose_error_traces: true,
            },
        )?;

        Ok(Self { deps, store, app })
    }

    /// Service over the same store and rooms, for setup that skips HTTP.
    pub fn resources(&self) -> ResourceService {
        self.deps.resources()
    }

    pub fn admin_token(&self) -> String {
        self.token("admin-1", true, chrono::Duration::hours(1))
    }

    pub fn clerk_token(&self) -> String {
        self.token("clerk-1", false, chrono::Duration::hours(1))
    }

    pub fn expired_token(&self) -> String {
        self.token("admin-1", true, chrono::Duration::hours(-2))
    }

    fn token(&self, user: &str, is_admin: bool, ttl: chrono::Duration) -> String {
        self.deps
            .jwt_service
            .create_token_with_ttl(user, vec![], is_admin, ttl)
            .expect("token should encode")
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::DELETE, uri, token, None).await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let raw = body.map(|b| b.to_string());
        self.send_raw(method, uri, token, raw).await
    }

    /// Send `raw` verbatim as a JSON body, e.g. to exercise malformed input.
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        raw: Option<String>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match raw {
            Some(raw) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(raw)
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).expect("request should build"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}

/// Shared test infrastructure that persists across all tests.
/// The container is started once and reused, migrations run once.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Postgres-backed store on the shared container.
///
/// Tests share one database, so each should work with resource kinds or ids
/// of its own rather than assume an empty table.
pub struct PostgresHarness {
    pub db_pool: PgPool,
    pub store: PostgresResourceStore,
}

impl AsyncTestContext for PostgresHarness {
    async fn setup() -> Self {
        Self::new()
            .await
            .expect("Failed to create Postgres harness")
    }
}

impl PostgresHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        Ok(Self {
            store: PostgresResourceStore::new(db_pool.clone()),
            db_pool,
        })
    }
}
