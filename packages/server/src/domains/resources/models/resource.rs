use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{decimal, ResourceId};
use crate::domains::resources::transitions::AggregateAdjustment;

/// A persisted resource of any kind.
///
/// Serializes as a flat document: the platform keys (`id`, `kind`,
/// `version`, timestamps) sit next to the definition's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub kind: String,
    /// Starts at 1 and grows by one with every committed write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    /// A new, not yet committed resource. `created_at == updated_at`.
    pub fn new(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        let now = now();
        Self {
            id: ResourceId::new(),
            kind: kind.into(),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            fields,
        }
    }

    /// The next version of this resource carrying `fields`.
    pub fn revise(&self, fields: Map<String, Value>) -> Self {
        Self {
            fields,
            version: self.version + 1,
            updated_at: now(),
            ..self.clone()
        }
    }

    /// The next version of this resource, flagged as deleted.
    pub fn soft_deleted(&self) -> Self {
        let now = now();
        Self {
            version: self.version + 1,
            updated_at: now,
            deleted_at: Some(now),
            ..self.clone()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// A numeric field read exactly, for money totals.
    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        self.fields.get(field).and_then(decimal::from_json)
    }

    pub fn room(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// Timestamps are kept at microsecond precision so they survive a Postgres
/// round-trip unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One atomic unit of work: a primary write plus the aggregate adjustments
/// it triggered.
///
/// `primary.version == 1` means insert; anything higher is an update that
/// only applies if the stored row is still at `primary.version - 1`.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub primary: Resource,
    pub adjustments: Vec<AggregateAdjustment>,
}

impl ChangeSet {
    pub fn new(primary: Resource) -> Self {
        Self {
            primary,
            adjustments: Vec::new(),
        }
    }

    pub fn with_adjustments(mut self, adjustments: Vec<AggregateAdjustment>) -> Self {
        self.adjustments = adjustments;
        self
    }

    pub fn is_insert(&self) -> bool {
        self.primary.version == 1
    }

    pub fn expected_version(&self) -> i64 {
        self.primary.version - 1
    }
}
