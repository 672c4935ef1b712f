//! Status transition rules.
//!
//! A rule watches one field of one resource kind. When a write moves that
//! field to the trigger value, the resource's amount is added to (or taken
//! from) a numeric field on the referenced target. The adjustment is
//! returned as data; the service commits it together with the primary
//! write so the two can never drift apart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{decimal, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentEffect {
    #[default]
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRule {
    pub resource: String,
    pub watch_field: String,
    pub trigger: Value,
    pub amount_field: String,
    /// Reference field on `resource` naming the target.
    pub target_reference: String,
    pub target_resource: String,
    pub target_field: String,
    #[serde(default)]
    pub effect: AdjustmentEffect,
    /// Values of `watch_field` whose amount the target total is expected to
    /// include. Only the aggregate audit reads this; defaults to the trigger.
    #[serde(default)]
    pub settled_values: Vec<Value>,
}

impl TransitionRule {
    pub fn is_settled(&self, value: Option<&Value>) -> bool {
        match value {
            None => false,
            Some(v) if self.settled_values.is_empty() => *v == self.trigger,
            Some(v) => self.settled_values.contains(v),
        }
    }

    /// Signed contribution of `amount` under this rule.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self.effect {
            AdjustmentEffect::Increment => amount,
            AdjustmentEffect::Decrement => -amount,
        }
    }
}

/// One compensating write against an aggregate target.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateAdjustment {
    pub target_kind: String,
    pub target_id: ResourceId,
    pub field: String,
    pub delta: Decimal,
}

/// Decide whether moving from `previous` to `next` fires `rule`.
///
/// Fires only when the watched value changed and the new value equals the
/// trigger. `previous` is `None` for a freshly created resource, so creating
/// one directly in the trigger state fires as well.
pub fn evaluate(
    rule: &TransitionRule,
    previous: Option<&Map<String, Value>>,
    next: &Map<String, Value>,
) -> Option<AggregateAdjustment> {
    let before = previous.and_then(|fields| fields.get(&rule.watch_field));
    let after = next.get(&rule.watch_field)?;

    if before == Some(after) || *after != rule.trigger {
        return None;
    }

    let amount = match next.get(&rule.amount_field).and_then(decimal::from_json) {
        Some(amount) => amount,
        None => {
            tracing::warn!(
                resource = %rule.resource,
                field = %rule.amount_field,
                "Transition fired without a numeric amount; skipping adjustment"
            );
            return None;
        }
    };

    let target_id = match next
        .get(&rule.target_reference)
        .and_then(Value::as_str)
        .and_then(|raw| ResourceId::parse(raw).ok())
    {
        Some(id) => id,
        None => {
            tracing::warn!(
                resource = %rule.resource,
                field = %rule.target_reference,
                "Transition fired without a target reference; skipping adjustment"
            );
            return None;
        }
    };

    Some(AggregateAdjustment {
        target_kind: rule.target_resource.clone(),
        target_id,
        field: rule.target_field.clone(),
        delta: rule.signed(amount),
    })
}
