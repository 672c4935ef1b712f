//! Postgres-backed resource store.
//!
//! All kinds share the `resources` table with fields in a JSONB column.
//! `commit` runs in one transaction and locks adjustment targets with
//! `SELECT ... FOR UPDATE`, so concurrent transitions against the same
//! target serialize instead of losing increments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::resource::now;
use super::models::{ChangeSet, Resource};
use super::store::{adjusted_value, BaseResourceStore, StoreError, StoreResult};
use crate::common::pagination::PageRequest;
use crate::common::ResourceId;

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: ResourceId,
    kind: String,
    fields: Json<Map<String, Value>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            fields: row.fields.0,
        }
    }
}

#[derive(Clone)]
pub struct PostgresResourceStore {
    pool: PgPool,
}

impl PostgresResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_primary(
        tx: &mut Transaction<'_, Postgres>,
        changes: &ChangeSet,
    ) -> StoreResult<()> {
        let primary = &changes.primary;

        if changes.is_insert() {
            let inserted = sqlx::query(
                r#"
                INSERT INTO resources (id, kind, fields, version, created_at, updated_at, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(primary.id)
            .bind(&primary.kind)
            .bind(Json(&primary.fields))
            .bind(primary.version)
            .bind(primary.created_at)
            .bind(primary.updated_at)
            .bind(primary.deleted_at)
            .execute(&mut **tx)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(StoreError::conflict(&primary.kind, primary.id));
            }
            return Ok(());
        }

        let updated = sqlx::query(
            r#"
            UPDATE resources
            SET fields = $3, version = $4, updated_at = $5, deleted_at = $6
            WHERE id = $1 AND kind = $2 AND version = $7 AND deleted_at IS NULL
            "#,
        )
        .bind(primary.id)
        .bind(&primary.kind)
        .bind(Json(&primary.fields))
        .bind(primary.version)
        .bind(primary.updated_at)
        .bind(primary.deleted_at)
        .bind(changes.expected_version())
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        // Tell a missing row apart from a stale version.
        let live: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM resources WHERE id = $1 AND kind = $2 AND deleted_at IS NULL",
        )
        .bind(primary.id)
        .bind(&primary.kind)
        .fetch_optional(&mut **tx)
        .await?;

        match live {
            Some(_) => Err(StoreError::conflict(&primary.kind, primary.id)),
            None => Err(StoreError::not_found(&primary.kind, primary.id)),
        }
    }
}

#[async_trait]
impl BaseResourceStore for PostgresResourceStore {
    async fn fetch(&self, kind: &str, id: ResourceId) -> StoreResult<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE id = $1 AND kind = $2",
        )
        .bind(id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, kind: &str, page: PageRequest) -> StoreResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT * FROM resources
            WHERE kind = $1
              AND deleted_at IS NULL
              AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(kind)
        .bind(page.after)
        .bind((page.limit + 1) as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_all(&self, kind: &str) -> StoreResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE kind = $1 AND deleted_at IS NULL ORDER BY id",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn commit(&self, changes: &ChangeSet) -> StoreResult<Vec<Resource>> {
        let mut tx = self.pool.begin().await?;

        Self::write_primary(&mut tx, changes).await?;

        let mut targets: Vec<Resource> = Vec::with_capacity(changes.adjustments.len());
        for adjustment in &changes.adjustments {
            let row = sqlx::query_as::<_, ResourceRow>(
                r#"
                SELECT * FROM resources
                WHERE id = $1 AND kind = $2 AND deleted_at IS NULL
                FOR UPDATE
                "#,
            )
            .bind(adjustment.target_id)
            .bind(&adjustment.target_kind)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(&adjustment.target_kind, adjustment.target_id))?;

            let mut target: Resource = row.into();
            let value = adjusted_value(target.fields.get(&adjustment.field), adjustment.delta)?;
            target.fields.insert(adjustment.field.clone(), value);

            let updated = sqlx::query_as::<_, ResourceRow>(
                r#"
                UPDATE resources
                SET fields = $2, version = version + 1, updated_at = $3
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(target.id)
            .bind(Json(&target.fields))
            .bind(now())
            .fetch_one(&mut *tx)
            .await?;

            let updated: Resource = updated.into();
            targets.retain(|t| !(t.kind == updated.kind && t.id == updated.id));
            targets.push(updated);
        }

        // Dropping `tx` on an early return above rolls everything back.
        tx.commit().await?;
        Ok(targets)
    }

    async fn remove(&self, kind: &str, id: ResourceId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(kind)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(kind, id));
        }
        Ok(())
    }

    async fn purge_deleted(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM resources WHERE deleted_at IS NOT NULL AND deleted_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_kind(&self) -> StoreResult<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM resources WHERE deleted_at IS NULL GROUP BY kind",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(kind, count)| (kind, count.max(0) as u64))
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
