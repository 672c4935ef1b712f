// Common types and utilities shared across the application

pub mod auth;
pub mod decimal;
pub mod error;
pub mod id;
pub mod pagination;

pub use error::{AppError, AppResult, ValidationErrors};
pub use id::{ConnectionId, Id, ResourceId, V4, V7};
