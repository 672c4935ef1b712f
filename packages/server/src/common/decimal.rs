//! Exact arithmetic on JSON numbers.
//!
//! Aggregate totals are sums of money amounts, so they are added as
//! `Decimal` from the number's text form rather than as `f64`.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Number, Value};

/// Read a JSON number as a `Decimal`. Non-numbers yield `None`.
pub fn from_json(value: &Value) -> Option<Decimal> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Write a `Decimal` back as a JSON number.
///
/// Whole values become integers. Fractions go through their shortest
/// decimal text, so `0.3` is stored as `0.3`.
pub fn to_json(value: Decimal) -> Value {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Ok(i) = i64::try_from(value.mantissa()) {
            return Value::from(i);
        }
    }
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
