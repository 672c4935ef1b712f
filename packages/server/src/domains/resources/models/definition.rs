//! Declarative resource definitions.
//!
//! One definition format is shared by every deployment: a resource is a
//! name, an ordered list of `field name → type → rules`, a delete mode and
//! per-operation access levels.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::auth::Access;

/// Keys the platform owns on every document. Definitions may not reuse them.
pub const RESERVED_FIELDS: &[&str] = &["id", "kind", "version", "createdAt", "updatedAt", "deletedAt"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    /// RFC 3339 timestamp, normalized to UTC on write.
    Datetime,
    /// Closed set of string tags.
    Status { values: Vec<String> },
    /// Id of another resource of the named kind.
    Reference { resource: String },
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Integer)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldRules {
    pub required: bool,
    /// Maintained by the server (aggregate targets); clients may not write it.
    pub read_only: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub default: Option<Value>,
    #[serde(skip)]
    pub(crate) compiled_pattern: Option<Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(flatten)]
    pub rules: FieldRules,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            rules: FieldRules::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.rules.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.rules.read_only = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.rules.default = Some(value);
        self
    }

    pub fn pattern_regex(&self) -> Option<&Regex> {
        self.rules.compiled_pattern.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Permissions {
    pub read: Access,
    pub write: Access,
    pub delete: Access,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            read: Access::Authenticated,
            write: Access::Authenticated,
            delete: Access::Admin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Collection name; also the `/api/{name}` path segment and room scope.
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    /// Flag with `deletedAt` instead of removing the row.
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

impl ResourceDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn reference_fields(&self) -> impl Iterator<Item = (&FieldDefinition, &str)> {
        self.fields.iter().filter_map(|f| match &f.field_type {
            FieldType::Reference { resource } => Some((f, resource.as_str())),
            _ => None,
        })
    }
}
