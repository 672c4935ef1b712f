// Kamu - API Core
//
// Catalog-driven resource backend: schema-validated REST resources, status
// transition rules that maintain aggregate totals, room-scoped real-time
// broadcast over WebSocket/SSE, and scheduled maintenance jobs.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
