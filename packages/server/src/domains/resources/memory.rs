//! In-process resource store.
//!
//! Used when no `DATABASE_URL` is configured and by the test suite. One
//! write lock covers a whole change set, which gives the same all-or-nothing
//! behaviour as the Postgres transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::resource::now;
use super::models::{ChangeSet, Resource};
use super::store::{adjusted_value, BaseResourceStore, StoreError, StoreResult};
use crate::common::pagination::PageRequest;
use crate::common::ResourceId;

#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    // kind -> id -> resource; BTreeMap keeps ids (V7) in creation order
    resources: Arc<RwLock<HashMap<String, BTreeMap<ResourceId, Resource>>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored field without going through a change set.
    ///
    /// Simulates an out-of-band database edit; only the aggregate audit and
    /// its tests have a use for it.
    pub async fn force_field(
        &self,
        kind: &str,
        id: ResourceId,
        field: &str,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        let mut resources = self.resources.write().await;
        let resource = resources
            .get_mut(kind)
            .and_then(|by_id| by_id.get_mut(&id))
            .ok_or_else(|| StoreError::not_found(kind, id))?;
        resource.fields.insert(field.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl BaseResourceStore for InMemoryResourceStore {
    async fn fetch(&self, kind: &str, id: ResourceId) -> StoreResult<Option<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources.get(kind).and_then(|by_id| by_id.get(&id)).cloned())
    }

    async fn list(&self, kind: &str, page: PageRequest) -> StoreResult<Vec<Resource>> {
        let resources = self.resources.read().await;
        let Some(by_id) = resources.get(kind) else {
            return Ok(Vec::new());
        };

        let after = page.after.map(ResourceId::from_uuid);
        Ok(by_id
            .values()
            .filter(|r| !r.is_deleted())
            .filter(|r| after.map_or(true, |after| r.id > after))
            .take(page.limit + 1)
            .cloned()
            .collect())
    }

    async fn list_all(&self, kind: &str) -> StoreResult<Vec<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .get(kind)
            .map(|by_id| by_id.values().filter(|r| !r.is_deleted()).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, changes: &ChangeSet) -> StoreResult<Vec<Resource>> {
        let mut resources = self.resources.write().await;
        let primary = &changes.primary;

        // Check everything before touching anything.
        let stored = resources.get(&primary.kind).and_then(|by_id| by_id.get(&primary.id));
        match (changes.is_insert(), stored) {
            (true, Some(_)) => return Err(StoreError::conflict(&primary.kind, primary.id)),
            (true, None) => {}
            (false, None) => return Err(StoreError::not_found(&primary.kind, primary.id)),
            (false, Some(existing)) if existing.is_deleted() => {
                return Err(StoreError::not_found(&primary.kind, primary.id))
            }
            (false, Some(existing)) if existing.version != changes.expected_version() => {
                return Err(StoreError::conflict(&primary.kind, primary.id))
            }
            (false, Some(_)) => {}
        }

        // Adjusted targets are staged on copies so a failed sum leaves the
        // map untouched.
        let mut targets: Vec<Resource> = Vec::with_capacity(changes.adjustments.len());
        for adjustment in &changes.adjustments {
            // A self-adjustment would be applied to the row being replaced.
            let is_primary = adjustment.target_kind == primary.kind && adjustment.target_id == primary.id;
            let missing = || StoreError::not_found(&adjustment.target_kind, adjustment.target_id);
            if is_primary {
                return Err(missing());
            }

            let index = match targets
                .iter()
                .position(|t| t.kind == adjustment.target_kind && t.id == adjustment.target_id)
            {
                Some(index) => index,
                None => {
                    let target = resources
                        .get(&adjustment.target_kind)
                        .and_then(|by_id| by_id.get(&adjustment.target_id))
                        .filter(|target| !target.is_deleted())
                        .cloned()
                        .ok_or_else(missing)?;
                    targets.push(target);
                    targets.len() - 1
                }
            };

            let target = &mut targets[index];
            let value = adjusted_value(target.fields.get(&adjustment.field), adjustment.delta)?;
            target.fields.insert(adjustment.field.clone(), value);
            target.version += 1;
            target.updated_at = now();
        }

        resources
            .entry(primary.kind.clone())
            .or_default()
            .insert(primary.id, primary.clone());
        for target in &targets {
            resources
                .entry(target.kind.clone())
                .or_default()
                .insert(target.id, target.clone());
        }

        Ok(targets)
    }

    async fn remove(&self, kind: &str, id: ResourceId) -> StoreResult<()> {
        let mut resources = self.resources.write().await;
        resources
            .get_mut(kind)
            .and_then(|by_id| by_id.remove(&id))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(kind, id))
    }

    async fn purge_deleted(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut resources = self.resources.write().await;
        let mut purged = 0u64;
        for by_id in resources.values_mut() {
            let len = by_id.len();
            by_id.retain(|_, r| r.deleted_at.map_or(true, |at| at >= before));
            purged += (len - by_id.len()) as u64;
        }
        Ok(purged)
    }

    async fn count_by_kind(&self) -> StoreResult<BTreeMap<String, u64>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .map(|(kind, by_id)| {
                let live = by_id.values().filter(|r| !r.is_deleted()).count() as u64;
                (kind.clone(), live)
            })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::resources::transitions::AggregateAdjustment;
    use rust_decimal::Decimal;
    use serde_json::{json, Map, Value};

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn insert(store: &InMemoryResourceStore, resource: &Resource) {
        store.commit(&ChangeSet::new(resource.clone())).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_then_fetch() {
        let store = InMemoryResourceStore::new();
        let budget = Resource::new("budgets", fields(json!({ "total": 0 })));
        insert(&store, &budget).await;

        assert_eq!(store.fetch("budgets", budget.id).await.unwrap(), Some(budget.clone()));
        assert_eq!(store.fetch("expenses", budget.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_double_insert_conflicts() {
        let store = InMemoryResourceStore::new();
        let budget = Resource::new("budgets", Map::new());
        insert(&store, &budget).await;
        assert!(matches!(
            store.commit(&ChangeSet::new(budget)).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryResourceStore::new();
        let budget = Resource::new("budgets", Map::new());
        insert(&store, &budget).await;

        let first = budget.revise(fields(json!({ "name": "a" })));
        let second = budget.revise(fields(json!({ "name": "b" })));
        store.commit(&ChangeSet::new(first)).await.unwrap();
        assert!(matches!(
            store.commit(&ChangeSet::new(second)).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_adjustment_applies_with_primary() {
        let store = InMemoryResourceStore::new();
        let budget = Resource::new("budgets", fields(json!({ "total": 100 })));
        let expense = Resource::new("expenses", fields(json!({ "amount": 50 })));
        insert(&store, &budget).await;
        insert(&store, &expense).await;

        let changes = ChangeSet::new(expense.revise(fields(json!({ "amount": 50, "status": "approved" }))))
            .with_adjustments(vec![AggregateAdjustment {
                target_kind: "budgets".into(),
                target_id: budget.id,
                field: "total".into(),
                delta: Decimal::from(50),
            }]);
        let targets = store.commit(&changes).await.unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].number("total"), Some(150.0));
        assert_eq!(targets[0].version, 2);
        let stored = store.fetch("expenses", expense.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_missing_target_aborts_whole_change_set() {
        let store = InMemoryResourceStore::new();
        let expense = Resource::new("expenses", fields(json!({ "amount": 50 })));
        insert(&store, &expense).await;

        let changes = ChangeSet::new(expense.revise(fields(json!({ "amount": 50, "status": "approved" }))))
            .with_adjustments(vec![AggregateAdjustment {
                target_kind: "budgets".into(),
                target_id: ResourceId::new(),
                field: "total".into(),
                delta: Decimal::from(50),
            }]);
        assert!(matches!(store.commit(&changes).await, Err(StoreError::NotFound { .. })));

        let stored = store.fetch("expenses", expense.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.fields.get("status").is_none());
    }

    #[tokio::test]
    async fn test_overflowing_total_aborts_whole_change_set() {
        let store = InMemoryResourceStore::new();
        let budget = Resource::new("budgets", fields(json!({ "total": 1 })));
        let expense = Resource::new("expenses", fields(json!({ "amount": 50 })));
        insert(&store, &budget).await;
        insert(&store, &expense).await;

        let changes = ChangeSet::new(expense.revise(fields(json!({ "status": "approved" }))))
            .with_adjustments(vec![AggregateAdjustment {
                target_kind: "budgets".into(),
                target_id: budget.id,
                field: "total".into(),
                delta: Decimal::MAX,
            }]);
        assert!(matches!(store.commit(&changes).await, Err(StoreError::Other(_))));

        assert_eq!(store.fetch("expenses", expense.id).await.unwrap().unwrap().version, 1);
        assert_eq!(store.fetch("budgets", budget.id).await.unwrap(), Some(budget));
    }

    #[tokio::test]
    async fn test_list_pages_skip_deleted() {
        let store = InMemoryResourceStore::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let r = Resource::new("notes", fields(json!({ "n": i })));
            ids.push(r.id);
            insert(&store, &r).await;
        }
        let deleted = store.fetch("notes", ids[1]).await.unwrap().unwrap().soft_deleted();
        store.commit(&ChangeSet::new(deleted)).await.unwrap();

        let first = store
            .list("notes", PageRequest { limit: 1, after: None })
            .await
            .unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[0], ids[2]]);

        let rest = store
            .list("notes", PageRequest { limit: 10, after: Some(ids[2].into_uuid()) })
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3]]);
    }

    #[tokio::test]
    async fn test_purge_and_counts() {
        let store = InMemoryResourceStore::new();
        let keep = Resource::new("notes", Map::new());
        let gone = Resource::new("notes", Map::new());
        insert(&store, &keep).await;
        insert(&store, &gone).await;
        store.commit(&ChangeSet::new(gone.soft_deleted())).await.unwrap();

        assert_eq!(store.count_by_kind().await.unwrap().get("notes"), Some(&1));
        assert_eq!(store.purge_deleted(Utc::now() - chrono::Duration::days(1)).await.unwrap(), 0);
        assert_eq!(store.purge_deleted(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(), 1);
        assert!(store.fetch("notes", gone.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = InMemoryResourceStore::new();
        assert!(matches!(
            store.remove("notes", ResourceId::new()).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
