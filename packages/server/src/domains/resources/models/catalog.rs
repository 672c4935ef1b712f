//! Catalog: every resource definition and transition rule of one deployment.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use super::definition::{FieldType, ResourceDefinition, RESERVED_FIELDS};
use crate::domains::resources::transitions::TransitionRule;

/// Built-in catalog: budgets with expenses rolling up into them.
const BUDGET_CATALOG: &str = include_str!("../../../../catalogs/budget.json");

/// Path segments owned by the router.
const RESERVED_NAMES: &[&str] = &["rooms", "auth", "health", "ws"];

#[derive(Debug, Deserialize)]
struct CatalogFile {
    resources: Vec<ResourceDefinition>,
    #[serde(default)]
    transitions: Vec<TransitionRule>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    definitions: BTreeMap<String, ResourceDefinition>,
    rules: Vec<TransitionRule>,
}

impl Catalog {
    /// Build a catalog, checking that every definition and rule is coherent.
    pub fn new(definitions: Vec<ResourceDefinition>, rules: Vec<TransitionRule>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for mut definition in definitions {
            prepare_definition(&mut definition)?;
            let name = definition.name.clone();
            if by_name.insert(name.clone(), definition).is_some() {
                bail!("resource '{}' is defined twice", name);
            }
        }

        let catalog = Self {
            definitions: by_name,
            rules,
        };
        catalog.check_references()?;
        for rule in &catalog.rules {
            catalog.check_rule(rule)?;
        }
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw).context("catalog is not valid JSON")?;
        Self::new(file.resources, file.transitions)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid catalog {}", path.display()))
    }

    pub fn budget() -> Result<Self> {
        Self::from_json_str(BUDGET_CATALOG).context("built-in budget catalog is invalid")
    }

    pub fn definition(&self, name: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.definitions.values()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn rules_for<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a TransitionRule> {
        self.rules.iter().filter(move |rule| rule.resource == kind)
    }

    fn check_references(&self) -> Result<()> {
        for definition in self.definitions.values() {
            for (field, target) in definition.reference_fields() {
                if !self.definitions.contains_key(target) {
                    bail!(
                        "{}.{} references unknown resource '{}'",
                        definition.name,
                        field.name,
                        target
                    );
                }
            }
        }
        Ok(())
    }

    fn check_rule(&self, rule: &TransitionRule) -> Result<()> {
        let label = format!("transition on {}.{}", rule.resource, rule.watch_field);

        let source = self
            .definition(&rule.resource)
            .with_context(|| format!("{}: unknown resource", label))?;
        let target = self
            .definition(&rule.target_resource)
            .with_context(|| format!("{}: unknown target resource '{}'", label, rule.target_resource))?;

        let watched = source
            .field(&rule.watch_field)
            .with_context(|| format!("{}: unknown watch field", label))?;
        if let FieldType::Status { values } = &watched.field_type {
            let allowed = |v: &serde_json::Value| v.as_str().is_some_and(|s| values.iter().any(|x| x == s));
            if !allowed(&rule.trigger) {
                bail!("{}: trigger {} is not a status value", label, rule.trigger);
            }
            if let Some(bad) = rule.settled_values.iter().find(|v| !allowed(v)) {
                bail!("{}: settled value {} is not a status value", label, bad);
            }
        }

        let amount = source
            .field(&rule.amount_field)
            .with_context(|| format!("{}: unknown amount field '{}'", label, rule.amount_field))?;
        if !amount.field_type.is_numeric() || !amount.rules.required {
            bail!("{}: amount field '{}' must be a required number", label, amount.name);
        }

        let reference = source.field(&rule.target_reference).with_context(|| {
            format!("{}: unknown target reference '{}'", label, rule.target_reference)
        })?;
        match &reference.field_type {
            FieldType::Reference { resource } if *resource == rule.target_resource => {}
            _ => bail!(
                "{}: '{}' must be a reference to '{}'",
                label,
                reference.name,
                rule.target_resource
            ),
        }
        if !reference.rules.required {
            bail!("{}: target reference '{}' must be required", label, reference.name);
        }

        let target_field = target.field(&rule.target_field).with_context(|| {
            format!("{}: unknown target field '{}'", label, rule.target_field)
        })?;
        if !target_field.field_type.is_numeric() {
            bail!("{}: target field '{}' must be numeric", label, target_field.name);
        }

        Ok(())
    }
}

fn prepare_definition(definition: &mut ResourceDefinition) -> Result<()> {
    let name = definition.name.as_str();
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid_name {
        bail!("resource name '{}' must be lowercase ascii", name);
    }
    if RESERVED_NAMES.contains(&name) {
        bail!("resource name '{}' is reserved", name);
    }

    let mut seen = std::collections::HashSet::new();
    for field in &mut definition.fields {
        if RESERVED_FIELDS.contains(&field.name.as_str()) {
            bail!("{}.{} uses a reserved field name", definition.name, field.name);
        }
        if !seen.insert(field.name.clone()) {
            bail!("{}.{} is defined twice", definition.name, field.name);
        }
        if let FieldType::Status { values } = &field.field_type {
            if values.is_empty() {
                bail!("{}.{} has no status values", definition.name, field.name);
            }
        }
        if let Some(pattern) = &field.rules.pattern {
            let regex = Regex::new(pattern).with_context(|| {
                format!("{}.{} has an invalid pattern", definition.name, field.name)
            })?;
            field.rules.compiled_pattern = Some(regex);
        }
        if field.rules.read_only && field.rules.required && field.rules.default.is_none() {
            bail!(
                "{}.{} is read-only and required but has no default",
                definition.name,
                field.name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog_json(rule_overrides: serde_json::Value) -> String {
        let mut rule = json!({
            "resource": "expenses",
            "watchField": "status",
            "trigger": "approved",
            "amountField": "amount",
            "targetReference": "budget",
            "targetResource": "budgets",
            "targetField": "total"
        });
        for (k, v) in rule_overrides.as_object().unwrap() {
            rule[k] = v.clone();
        }
        json!({
            "resources": [
                { "name": "budgets", "fields": [
                    { "name": "total", "type": "number", "default": 0 },
                    { "name": "label", "type": "string" }
                ]},
                { "name": "expenses", "fields": [
                    { "name": "amount", "type": "number", "required": true },
                    { "name": "status", "type": "status", "values": ["pending", "approved"] },
                    { "name": "budget", "type": "reference", "resource": "budgets", "required": true }
                ]}
            ],
            "transitions": [rule]
        })
        .to_string()
    }

    #[test]
    fn test_builtin_budget_catalog_loads() {
        let catalog = Catalog::budget().unwrap();
        assert!(catalog.definition("budgets").is_some());
        assert!(catalog.definition("expenses").is_some());
        assert_eq!(catalog.rules_for("expenses").count(), 1);
        assert_eq!(catalog.rules_for("budgets").count(), 0);
        let receipt = catalog
            .definition("expenses")
            .and_then(|d| d.field("receiptNumber"))
            .unwrap();
        assert!(receipt.pattern_regex().unwrap().is_match("TR-2024"));
    }

    #[test]
    fn test_valid_rule_accepted() {
        assert!(Catalog::from_json_str(&catalog_json(json!({}))).is_ok());
    }

    #[test]
    fn test_trigger_must_be_status_value() {
        let err = Catalog::from_json_str(&catalog_json(json!({ "trigger": "archived" })))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("not a status value"));
    }

    #[test]
    fn test_target_field_must_be_numeric() {
        let err = Catalog::from_json_str(&catalog_json(json!({ "targetField": "label" })))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("must be numeric"));
    }

    #[test]
    fn test_target_reference_must_point_at_target() {
        let err = Catalog::from_json_str(&catalog_json(json!({ "targetReference": "amount" })))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("must be a reference"));
    }

    #[test]
    fn test_unknown_reference_target_rejected() {
        let raw = json!({
            "resources": [{ "name": "expenses", "fields": [
                { "name": "budget", "type": "reference", "resource": "budgets" }
            ]}]
        })
        .to_string();
        assert!(Catalog::from_json_str(&raw).is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let reserved_field = json!({
            "resources": [{ "name": "notes", "fields": [{ "name": "createdAt", "type": "datetime" }] }]
        })
        .to_string();
        assert!(Catalog::from_json_str(&reserved_field).is_err());

        let reserved_resource = json!({ "resources": [{ "name": "rooms", "fields": [] }] }).to_string();
        assert!(Catalog::from_json_str(&reserved_resource).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let raw = json!({
            "resources": [{ "name": "plates", "fields": [
                { "name": "plate", "type": "string", "pattern": "([" }
            ]}]
        })
        .to_string();
        assert!(Catalog::from_json_str(&raw).is_err());
    }
}
