//! Resource application service.
//!
//! Every write goes through here: permission check, validation against the
//! kind's definition, reference existence, transition rules, one atomic
//! commit, then broadcast to the kind's rooms. Store and broadcaster are
//! injected handles.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::models::{Catalog, ChangeSet, Resource, ResourceDefinition};
use super::store::{BaseResourceStore, StoreError};
use super::transitions::{evaluate, AggregateAdjustment};
use super::validation::{validate_fields, WriteMode};
use crate::common::error::{AppError, AppResult, ValidationErrors};
use crate::common::pagination::{Page, PageRequest};
use crate::common::ResourceId;
use crate::kernel::rooms::RoomHub;
use crate::server::middleware::AuthUser;

/// Optimistic-version retries before an update gives up with a conflict.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Event names pushed to rooms.
pub mod events {
    pub const CREATED: &str = "created";
    pub const UPDATED: &str = "updated";
    pub const DELETED: &str = "deleted";
    pub const AGGREGATE_UPDATED: &str = "aggregateUpdated";
}

#[derive(Clone)]
pub struct ResourceService {
    store: Arc<dyn BaseResourceStore>,
    catalog: Arc<Catalog>,
    rooms: RoomHub,
}

impl ResourceService {
    pub fn new(store: Arc<dyn BaseResourceStore>, catalog: Arc<Catalog>, rooms: RoomHub) -> Self {
        Self {
            store,
            catalog,
            rooms,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn definition(&self, kind: &str) -> AppResult<&ResourceDefinition> {
        self.catalog
            .definition(kind)
            .ok_or_else(|| AppError::not_found("resource type", kind))
    }

    pub async fn create(
        &self,
        kind: &str,
        body: Value,
        auth: Option<&AuthUser>,
    ) -> AppResult<Resource> {
        let definition = self.definition(kind)?;
        definition
            .permissions
            .write
            .check(auth, &format!("create {}", kind))?;

        let input = into_object(body)?;
        let fields = validate_fields(definition, &input, WriteMode::Create, None)
            .map_err(AppError::Validation)?;
        self.check_references(definition, &fields, None).await?;

        let resource = Resource::new(kind, fields);
        let adjustments = self.adjustments(kind, None, &resource.fields);
        let targets = self
            .store
            .commit(&ChangeSet::new(resource.clone()).with_adjustments(adjustments))
            .await?;

        tracing::info!(kind, id = %resource.id, "Resource created");
        self.publish(events::CREATED, &resource).await;
        self.publish_aggregates(&targets).await;
        Ok(resource)
    }

    pub async fn get(
        &self,
        kind: &str,
        id: ResourceId,
        auth: Option<&AuthUser>,
    ) -> AppResult<Resource> {
        let definition = self.definition(kind)?;
        definition
            .permissions
            .read
            .check(auth, &format!("read {}", kind))?;
        self.fetch_live(kind, id).await
    }

    pub async fn list(
        &self,
        kind: &str,
        page: PageRequest,
        auth: Option<&AuthUser>,
    ) -> AppResult<Page<Resource>> {
        let definition = self.definition(kind)?;
        definition
            .permissions
            .read
            .check(auth, &format!("list {}", kind))?;

        let rows = self.store.list(kind, page).await?;
        Ok(Page::from_overfetch(rows, page.limit, |r| r.id.into_uuid()))
    }

    /// Replace (`PUT`) or merge (`PATCH`) a resource's fields.
    ///
    /// Transition rules see the stored fields as "before" and the validated
    /// result as "after"; any adjustment commits together with the write.
    pub async fn update(
        &self,
        kind: &str,
        id: ResourceId,
        body: Value,
        mode: WriteMode,
        auth: Option<&AuthUser>,
    ) -> AppResult<Resource> {
        let definition = self.definition(kind)?;
        definition
            .permissions
            .write
            .check(auth, &format!("update {}", kind))?;
        let input = into_object(body)?;

        let mut attempt = 1;
        loop {
            let current = self.fetch_live(kind, id).await?;
            let fields = validate_fields(definition, &input, mode, Some(&current.fields))
                .map_err(AppError::Validation)?;
            self.check_references(definition, &fields, Some(&current.fields))
                .await?;

            let adjustments = self.adjustments(kind, Some(&current.fields), &fields);
            let fired = adjustments.len();
            let next = current.revise(fields);

            match self
                .store
                .commit(&ChangeSet::new(next.clone()).with_adjustments(adjustments))
                .await
            {
                Ok(targets) => {
                    tracing::info!(kind, id = %id, version = next.version, transitions = fired, "Resource updated");
                    self.publish(events::UPDATED, &next).await;
                    self.publish_aggregates(&targets).await;
                    return Ok(next);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(kind, id = %id, attempt, "Concurrent update; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Soft-delete when the definition asks for it, otherwise remove the row.
    ///
    /// Aggregates the resource already contributed to are left as they are.
    pub async fn delete(
        &self,
        kind: &str,
        id: ResourceId,
        auth: Option<&AuthUser>,
    ) -> AppResult<()> {
        let definition = self.definition(kind)?;
        definition
            .permissions
            .delete
            .check(auth, &format!("delete {}", kind))?;

        let mut attempt = 1;
        let deleted = loop {
            let current = self.fetch_live(kind, id).await?;

            if !definition.soft_delete {
                self.store.remove(kind, id).await?;
                break current;
            }

            match self.store.commit(&ChangeSet::new(current.soft_deleted())).await {
                Ok(_) => break current,
                Err(StoreError::Conflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(kind, id = %id, soft = definition.soft_delete, "Resource deleted");
        let payload = json!({ "id": deleted.id, "kind": deleted.kind });
        self.rooms
            .broadcast(kind, events::DELETED, payload.clone())
            .await;
        self.rooms
            .broadcast(&deleted.room(), events::DELETED, payload)
            .await;
        Ok(())
    }

    async fn fetch_live(&self, kind: &str, id: ResourceId) -> AppResult<Resource> {
        match self.store.fetch(kind, id).await? {
            Some(resource) if !resource.is_deleted() => Ok(resource),
            _ => Err(AppError::not_found(kind, id)),
        }
    }

    /// Every reference field that is set, and new or changed, must point at
    /// a live resource of its target kind.
    async fn check_references(
        &self,
        definition: &ResourceDefinition,
        fields: &Map<String, Value>,
        previous: Option<&Map<String, Value>>,
    ) -> AppResult<()> {
        let mut errors = ValidationErrors::new();

        for (field, target_kind) in definition.reference_fields() {
            let Some(value) = fields.get(&field.name) else {
                continue;
            };
            if previous.and_then(|p| p.get(&field.name)) == Some(value) {
                continue;
            }
            let Some(target_id) = value.as_str().and_then(|raw| ResourceId::parse(raw).ok()) else {
                errors.add(field.name.clone(), format!("must be the id of a {} resource", target_kind));
                continue;
            };

            let live = self
                .store
                .fetch(target_kind, target_id)
                .await?
                .is_some_and(|target| !target.is_deleted());
            if !live {
                errors.add(field.name.clone(), format!("references a missing {} resource", target_kind));
            }
        }

        errors.into_result()
    }

    fn adjustments(
        &self,
        kind: &str,
        previous: Option<&Map<String, Value>>,
        next: &Map<String, Value>,
    ) -> Vec<AggregateAdjustment> {
        self.catalog
            .rules_for(kind)
            .filter_map(|rule| evaluate(rule, previous, next))
            .collect()
    }

    async fn publish(&self, event: &str, resource: &Resource) {
        let payload = match serde_json::to_value(resource) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, kind = %resource.kind, "Failed to serialize broadcast payload");
                return;
            }
        };
        self.rooms
            .broadcast(&resource.kind, event, payload.clone())
            .await;
        self.rooms.broadcast(&resource.room(), event, payload).await;
    }

    async fn publish_aggregates(&self, targets: &[Resource]) {
        for target in targets {
            tracing::debug!(kind = %target.kind, id = %target.id, "Aggregate target adjusted");
            self.publish(events::AGGREGATE_UPDATED, target).await;
        }
    }
}

fn into_object(body: Value) -> AppResult<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Validation(ValidationErrors::single(
            "body",
            "must be a JSON object",
        ))),
    }
}
