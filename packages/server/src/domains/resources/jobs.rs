// Background work over the resource store.
//
// Called by the scheduler in kernel/scheduled_tasks.rs; each function is a
// single pass and safe to run again.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use super::models::Catalog;
use super::store::BaseResourceStore;
use crate::common::ResourceId;
use crate::kernel::rooms::{RoomHub, STATISTICS_ROOM};

/// Event name used on the statistics room.
pub const STATISTICS_EVENT: &str = "statistics";

/// Permanently remove resources soft-deleted more than `retention` ago.
pub async fn purge_soft_deleted(store: &dyn BaseResourceStore, retention: Duration) -> Result<u64> {
    let cutoff = Utc::now() - retention;
    let purged = store.purge_deleted(cutoff).await?;
    tracing::info!(purged, cutoff = %cutoff, "Purged soft-deleted resources");
    Ok(purged)
}

/// Count live resources per kind and push the counts to the statistics room.
///
/// Kinds with no rows are reported as zero. Returns the number of
/// connections the update reached.
pub async fn publish_statistics(
    store: &dyn BaseResourceStore,
    catalog: &Catalog,
    rooms: &RoomHub,
) -> Result<usize> {
    let stored = store.count_by_kind().await?;
    let counts: BTreeMap<&str, u64> = catalog
        .kinds()
        .map(|kind| (kind, stored.get(kind).copied().unwrap_or(0)))
        .collect();

    let delivered = rooms
        .broadcast(
            STATISTICS_ROOM,
            STATISTICS_EVENT,
            json!({ "counts": counts, "generatedAt": Utc::now() }),
        )
        .await;
    tracing::debug!(kinds = counts.len(), delivered, "Published resource statistics");
    Ok(delivered)
}

/// A target whose stored total disagrees with its contributing resources.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDrift {
    pub target_kind: String,
    pub target_id: ResourceId,
    pub field: String,
    pub expected: Decimal,
    pub actual: Decimal,
}

/// Recompute every rule's target totals from live contributing resources
/// and report the targets that disagree. Read-only: nothing is corrected.
///
/// A resource contributes when its watched value is one of the rule's
/// settled values. Rules sharing a target field are summed.
pub async fn audit_aggregates(
    store: &dyn BaseResourceStore,
    catalog: &Catalog,
) -> Result<Vec<AggregateDrift>> {
    // (target kind, target field) -> target id -> expected total
    let mut expected: BTreeMap<(String, String), HashMap<ResourceId, Decimal>> = BTreeMap::new();

    for rule in catalog.rules() {
        let totals = expected
            .entry((rule.target_resource.clone(), rule.target_field.clone()))
            .or_default();

        for source in store.list_all(&rule.resource).await? {
            if !rule.is_settled(source.fields.get(&rule.watch_field)) {
                continue;
            }
            let Some(amount) = source.decimal(&rule.amount_field) else {
                continue;
            };
            let Some(target_id) = source
                .fields
                .get(&rule.target_reference)
                .and_then(|v| v.as_str())
                .and_then(|raw| ResourceId::parse(raw).ok())
            else {
                continue;
            };
            let total = totals.entry(target_id).or_insert(Decimal::ZERO);
            *total = total.saturating_add(rule.signed(amount));
        }
    }

    let mut drift = Vec::new();
    for ((target_kind, field), totals) in expected {
        for target in store.list_all(&target_kind).await? {
            let expected = totals.get(&target.id).copied().unwrap_or(Decimal::ZERO);
            let actual = target.decimal(&field).unwrap_or(Decimal::ZERO);
            if expected != actual {
                tracing::warn!(
                    kind = %target_kind,
                    id = %target.id,
                    field = %field,
                    %expected,
                    %actual,
                    "Aggregate drift detected"
                );
                drift.push(AggregateDrift {
                    target_kind: target_kind.clone(),
                    target_id: target.id,
                    field: field.clone(),
                    expected,
                    actual,
                });
            }
        }
    }

    if drift.is_empty() {
        tracing::debug!("Aggregate audit found no drift");
    }
    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::resources::memory::InMemoryResourceStore;
    use crate::domains::resources::models::{ChangeSet, Resource};
    use serde_json::Value;

    fn fields(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn seed(store: &InMemoryResourceStore, total: f64, statuses: &[(&str, f64)]) -> ResourceId {
        let budget = Resource::new(
            "budgets",
            fields(json!({ "name": "IT", "fiscalYear": 2025, "totalActualExpense": total })),
        );
        store.commit(&ChangeSet::new(budget.clone())).await.unwrap();
        for (status, amount) in statuses {
            let expense = Resource::new(
                "expenses",
                fields(json!({
                    "title": "x",
                    "amount": amount,
                    "status": status,
                    "budget": budget.id.to_string()
                })),
            );
            store.commit(&ChangeSet::new(expense)).await.unwrap();
        }
        budget.id
    }

    #[tokio::test]
    async fn test_consistent_totals_report_no_drift() {
        let store = InMemoryResourceStore::new();
        let catalog = Catalog::budget().unwrap();
        seed(&store, 300.0, &[("approved", 100.0), ("paid", 200.0), ("pending", 50.0)]).await;

        assert!(audit_aggregates(&store, &catalog).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fractional_totals_compare_exactly() {
        let store = InMemoryResourceStore::new();
        let catalog = Catalog::budget().unwrap();
        let budget = seed(&store, 0.3, &[("approved", 0.1), ("approved", 0.2)]).await;
        assert!(audit_aggregates(&store, &catalog).await.unwrap().is_empty());

        // One cent off is drift; there is no tolerance.
        store
            .force_field("budgets", budget, "totalActualExpense", json!(0.31))
            .await
            .unwrap();
        let drift = audit_aggregates(&store, &catalog).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].expected, "0.3".parse::<Decimal>().unwrap());
    }

    #[tokio::test]
    async fn test_out_of_band_edit_is_reported() {
        let store = InMemoryResourceStore::new();
        let catalog = Catalog::budget().unwrap();
        let budget = seed(&store, 100.0, &[("approved", 100.0)]).await;
        store
            .force_field("budgets", budget, "totalActualExpense", json!(40))
            .await
            .unwrap();

        let drift = audit_aggregates(&store, &catalog).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].target_id, budget);
        assert_eq!(drift[0].expected, Decimal::from(100));
        assert_eq!(drift[0].actual, Decimal::from(40));
    }

    #[tokio::test]
    async fn test_statistics_reach_statistics_room() {
        let store = InMemoryResourceStore::new();
        let catalog = Catalog::budget().unwrap();
        let rooms = RoomHub::new();
        seed(&store, 0.0, &[("pending", 1.0), ("pending", 2.0)]).await;

        let mut conn = rooms.connect().await;
        rooms.join(conn.id(), STATISTICS_ROOM).await.unwrap();

        assert_eq!(publish_statistics(&store, &catalog, &rooms).await.unwrap(), 1);
        let event = conn.recv().await.unwrap();
        assert_eq!(event.event, STATISTICS_EVENT);
        assert_eq!(event.data["counts"]["expenses"], json!(2));
        assert_eq!(event.data["counts"]["budgets"], json!(1));
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let store = InMemoryResourceStore::new();
        let note = Resource::new("budgets", fields(json!({ "name": "old" })));
        store.commit(&ChangeSet::new(note.clone())).await.unwrap();
        store.commit(&ChangeSet::new(note.soft_deleted())).await.unwrap();

        assert_eq!(purge_soft_deleted(&store, Duration::days(30)).await.unwrap(), 0);
        assert_eq!(purge_soft_deleted(&store, Duration::seconds(-1)).await.unwrap(), 1);
    }
}
