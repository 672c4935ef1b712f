//! Resources domain: catalog-defined records with validation, transition
//! rules and room broadcast.
//!
//! - `models`: definitions, catalog, the stored `Resource`
//! - `validation`: field checks against a definition
//! - `transitions`: status rules that adjust aggregate targets
//! - `store`, `memory`, `postgres`: persistence
//! - `service`: the application service every handler goes through
//! - `jobs`: scheduled maintenance passes

pub mod jobs;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod service;
pub mod store;
pub mod transitions;
pub mod validation;

pub use memory::InMemoryResourceStore;
pub use models::{Catalog, ChangeSet, Resource, ResourceDefinition};
pub use postgres::PostgresResourceStore;
pub use service::ResourceService;
pub use store::{BaseResourceStore, StoreError, StoreResult};
pub use transitions::{AggregateAdjustment, TransitionRule};
pub use validation::WriteMode;
