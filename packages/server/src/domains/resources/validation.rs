//! Field validation against a [`ResourceDefinition`].
//!
//! Produces the complete, normalized field map that will be stored, or the
//! per-field failures. Reference existence needs the store and is checked by
//! the service afterwards.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use super::models::{FieldDefinition, FieldType, ResourceDefinition};
use crate::common::error::ValidationErrors;
use crate::common::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// POST: defaults fill absent fields.
    Create,
    /// PUT: the body is the complete new field set.
    Replace,
    /// PATCH: the body is merged over the stored fields; `null` removes.
    Merge,
}

/// Validate `input` and return the field map to persist.
///
/// `existing` must be the stored fields for `Replace` and `Merge`.
/// Read-only fields are never taken from `input`: they keep their stored
/// value (or default on create).
pub fn validate_fields(
    definition: &ResourceDefinition,
    input: &Map<String, Value>,
    mode: WriteMode,
    existing: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for key in input.keys() {
        match definition.field(key) {
            None => errors.add(key.clone(), "is not a known field"),
            Some(field) if field.rules.read_only => {
                errors.add(key.clone(), "is maintained by the server and cannot be written")
            }
            Some(_) => {}
        }
    }

    let mut candidate = Map::new();
    for field in &definition.fields {
        let stored = existing.and_then(|fields| fields.get(&field.name));
        let supplied = input.get(&field.name);

        let value = if field.rules.read_only {
            match mode {
                WriteMode::Create => field.rules.default.clone(),
                WriteMode::Replace | WriteMode::Merge => {
                    stored.cloned().or_else(|| field.rules.default.clone())
                }
            }
        } else {
            match (mode, supplied) {
                (_, Some(Value::Null)) => None,
                (_, Some(value)) => Some(value.clone()),
                (WriteMode::Merge, None) => stored.cloned(),
                (WriteMode::Create | WriteMode::Replace, None) => field.rules.default.clone(),
            }
        };

        match value {
            Some(value) => match check_value(field, &value) {
                Ok(normalized) => {
                    candidate.insert(field.name.clone(), normalized);
                }
                Err(message) => errors.add(field.name.clone(), message),
            },
            None if field.rules.required => errors.add(field.name.clone(), "is required"),
            None => {}
        }
    }

    if errors.is_empty() {
        Ok(candidate)
    } else {
        Err(errors)
    }
}

/// Type-check one value and apply the field's rules. Returns the value in
/// its stored form.
fn check_value(field: &FieldDefinition, value: &Value) -> Result<Value, String> {
    let rules = &field.rules;

    let normalized = match &field.field_type {
        FieldType::String => {
            let s = value.as_str().ok_or("must be a string")?;
            let len = s.chars().count();
            if let Some(min) = rules.min_length {
                if len < min {
                    return Err(format!("must be at least {} characters", min));
                }
            }
            if let Some(max) = rules.max_length {
                if len > max {
                    return Err(format!("must be at most {} characters", max));
                }
            }
            if let Some(pattern) = field.pattern_regex() {
                if !pattern.is_match(s) {
                    return Err(format!("must match pattern {}", pattern.as_str()));
                }
            }
            value.clone()
        }
        FieldType::Number => {
            let n = value.as_f64().ok_or("must be a number")?;
            check_range(rules.min, rules.max, n)?;
            value.clone()
        }
        FieldType::Integer => {
            let n = as_integer(value).ok_or("must be an integer")?;
            check_range(rules.min, rules.max, n as f64)?;
            Value::Number(Number::from(n))
        }
        FieldType::Boolean => {
            value.as_bool().ok_or("must be a boolean")?;
            value.clone()
        }
        FieldType::Datetime => {
            let raw = value.as_str().ok_or("must be an RFC 3339 timestamp")?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|_| "must be an RFC 3339 timestamp".to_string())?;
            Value::String(parsed.with_timezone(&Utc).to_rfc3339())
        }
        FieldType::Status { values } => {
            let s = value.as_str().ok_or("must be a string")?;
            if !values.iter().any(|v| v == s) {
                return Err(format!("must be one of: {}", values.join(", ")));
            }
            value.clone()
        }
        FieldType::Reference { resource } => {
            let raw = value
                .as_str()
                .ok_or_else(|| format!("must be the id of a {} resource", resource))?;
            let id = ResourceId::parse(raw)
                .map_err(|_| format!("must be the id of a {} resource", resource))?;
            Value::String(id.to_string())
        }
    };

    Ok(normalized)
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn check_range(min: Option<f64>, max: Option<f64>, n: f64) -> Result<(), String> {
    if let Some(min) = min {
        if n < min {
            return Err(format!("must be at least {}", min));
        }
    }
    if let Some(max) = max {
        if n > max {
            return Err(format!("must be at most {}", max));
        }
    }
    Ok(())
}
