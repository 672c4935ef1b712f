// HTTP server setup (Axum + WebSocket/SSE rooms)
pub mod app;
pub mod middleware;
pub mod routes;

pub use app::*;
