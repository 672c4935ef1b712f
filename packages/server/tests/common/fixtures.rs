//! Request bodies for the built-in budget catalog.

use serde_json::{json, Value};

pub fn budget_body(name: &str) -> Value {
    json!({ "name": name, "fiscalYear": 2025, "totalAllocated": 10000 })
}

pub fn expense_body(budget_id: &str, title: &str, amount: f64) -> Value {
    json!({
        "title": title,
        "amount": amount,
        "budget": budget_id,
    })
}

/// The `id` of a created resource body.
pub fn id_of(body: &Value) -> String {
    body["id"]
        .as_str()
        .expect("response body has an id")
        .to_string()
}

/// A numeric field as f64, so `500` and `500.0` compare equal.
pub fn number(body: &Value, field: &str) -> f64 {
    body[field]
        .as_f64()
        .unwrap_or_else(|| panic!("{} is not a number in {}", field, body))
}
