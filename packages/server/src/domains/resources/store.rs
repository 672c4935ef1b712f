// Storage trait for resources.
//
// INFRASTRUCTURE only: the store persists what it is given and enforces
// optimistic versioning. Validation, transitions and broadcasting live in
// the service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{ChangeSet, Resource};
use crate::common::decimal;
use crate::common::error::AppError;
use crate::common::pagination::PageRequest;
use crate::common::ResourceId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: ResourceId },

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: String, id: ResourceId },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: &str, id: ResourceId) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id,
        }
    }

    pub fn conflict(kind: &str, id: ResourceId) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            id,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => AppError::not_found(kind, id),
            conflict @ StoreError::Conflict { .. } => AppError::Conflict(conflict.to_string()),
            StoreError::Database(e) => AppError::Internal(e.into()),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

#[async_trait]
pub trait BaseResourceStore: Send + Sync {
    /// Load one resource, soft-deleted ones included.
    async fn fetch(&self, kind: &str, id: ResourceId) -> StoreResult<Option<Resource>>;

    /// Live resources of `kind` in id order after `page.after`.
    ///
    /// Returns up to `page.limit + 1` rows so callers can tell whether
    /// another page exists.
    async fn list(&self, kind: &str, page: PageRequest) -> StoreResult<Vec<Resource>>;

    /// Every live resource of `kind`. Used by background jobs.
    async fn list_all(&self, kind: &str) -> StoreResult<Vec<Resource>>;

    /// Apply a change set atomically: either the primary write and every
    /// adjustment land, or none do.
    ///
    /// Fails with `NotFound` when the primary (update) or an adjustment
    /// target is missing or soft-deleted, and with `Conflict` when the
    /// primary is not at the expected version or, for inserts, already
    /// exists. Returns the adjusted targets in their new state.
    async fn commit(&self, changes: &ChangeSet) -> StoreResult<Vec<Resource>>;

    /// Remove a resource permanently.
    async fn remove(&self, kind: &str, id: ResourceId) -> StoreResult<()>;

    /// Permanently remove resources soft-deleted before `before`.
    async fn purge_deleted(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    /// Count of live resources per kind.
    async fn count_by_kind(&self) -> StoreResult<BTreeMap<String, u64>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Apply `delta` to a numeric field, treating an absent field as zero.
///
/// The sum is exact; it fails only when it leaves the `Decimal` range.
pub(crate) fn adjusted_value(
    current: Option<&serde_json::Value>,
    delta: Decimal,
) -> StoreResult<serde_json::Value> {
    let base = current.and_then(decimal::from_json).unwrap_or(Decimal::ZERO);
    let total = base.checked_add(delta).ok_or_else(|| {
        StoreError::Other(anyhow::anyhow!("aggregate total {} + {} overflows", base, delta))
    })?;
    Ok(decimal::to_json(total))
}
