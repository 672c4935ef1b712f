// Main entry point for API server

use std::sync::Arc;

use anyhow::{Context, Result};
use kamu_core::domains::auth::JwtService;
use kamu_core::domains::resources::{
    BaseResourceStore, Catalog, InMemoryResourceStore, PostgresResourceStore,
};
use kamu_core::kernel::panics::install_panic_hook;
use kamu_core::kernel::{builtin_jobs, start_scheduler, RoomHub, ServerDeps};
use kamu_core::server::{build_app, AppOptions};
use kamu_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kamu_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_panic_hook();

    tracing::info!("Starting Kamu resource API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(env = %config.app_env, room_access = %config.room_access, "Configuration loaded");

    let catalog = match &config.resource_catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::budget()?,
    };
    tracing::info!(kinds = ?catalog.kinds().collect::<Vec<_>>(), "Resource catalog loaded");

    let store: Arc<dyn BaseResourceStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");

            Arc::new(PostgresResourceStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; resources are kept in memory and lost on exit");
            Arc::new(InMemoryResourceStore::new())
        }
    };

    let deps = ServerDeps::new(
        store,
        Arc::new(catalog),
        RoomHub::new(),
        Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone())),
        config.room_access,
    );

    let mut scheduler = start_scheduler(builtin_jobs(&deps, config.soft_delete_retention()))
        .await
        .context("Failed to start scheduled tasks")?;

    let app = build_app(
        deps,
        AppOptions {
            allowed_origins: config.allowed_origins.clone(),
            rate_limit: Some(config.rate_limit),
            expose_error_traces: !config.is_production(),
        },
    )?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = ?e, "Scheduler did not shut down cleanly");
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
