//! Core types for flag configuration parsing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key holding the flag definitions.
pub const FLAGS_KEY: &str = "flags";

/// Top-level key holding the shared evaluator fragments.
pub const EVALUATORS_KEY: &str = "$evaluators";

/// Key of an inline reference marker (`{"$ref": "<name>"}`).
pub const REF_KEY: &str = "$ref";

/// Top-level key holding flag-set metadata.
pub const METADATA_KEY: &str = "metadata";

/// Default cap on JSON nodes copied in from `$evaluators` during one parse.
pub const DEFAULT_MAX_EXPANDED_NODES: usize = 100_000;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a flag is served or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagState {
    #[default]
    Enabled,
    Disabled,
}

/// Scalar metadata value attached to a flag or to the whole flag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// A fully resolved flag definition.
///
/// Targeting and default-rule structures are opaque here; they are handed
/// through untouched to whatever evaluates the flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// Variant name to variant value (any JSON type).
    pub variations: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_variant: Option<String>,
    #[serde(default)]
    pub state: FlagState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rule: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl FeatureFlag {
    pub fn is_enabled(&self) -> bool {
        self.state == FlagState::Enabled
    }

    /// Look up a variant value by name.
    pub fn variation(&self, name: &str) -> Option<&Value> {
        self.variations.get(name)
    }

    /// Value of the default variant, if one is set and present.
    pub fn default_value(&self) -> Option<&Value> {
        self.default_variant
            .as_deref()
            .and_then(|name| self.variation(name))
    }
}

/// All flags produced by one successful parse, keyed by flag key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagMap {
    flags: BTreeMap<String, FeatureFlag>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, MetadataValue>,
}

impl FlagMap {
    pub(crate) fn new(
        flags: BTreeMap<String, FeatureFlag>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Self {
        Self { flags, metadata }
    }

    pub fn get(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flag keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureFlag)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flag-set level metadata (the document's top-level `metadata`).
    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }
}

impl IntoIterator for FlagMap {
    type Item = (String, FeatureFlag);
    type IntoIter = std::collections::btree_map::IntoIter<String, FeatureFlag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.into_iter()
    }
}

/// How repeated keys inside `flags` or `$evaluators` are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeys {
    /// Fail the parse with [`ParseError::DuplicateKey`](crate::ParseError::DuplicateKey).
    #[default]
    Reject,
    /// Keep the last occurrence, as plain JSON parsers do.
    LastWins,
}

/// Options for parsing a flag configuration.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub duplicate_keys: DuplicateKeys,
    /// Reject flags whose `defaultVariant` names no entry of `variations`.
    pub check_default_variant: bool,
    /// Fail once resolving references has copied in more nodes than this.
    pub max_expanded_nodes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            duplicate_keys: DuplicateKeys::Reject,
            check_default_variant: true,
            max_expanded_nodes: DEFAULT_MAX_EXPANDED_NODES,
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duplicate key policy.
    pub fn duplicate_keys(mut self, policy: DuplicateKeys) -> Self {
        self.duplicate_keys = policy;
        self
    }

    /// Enable or disable the `defaultVariant` membership check.
    pub fn check_default_variant(mut self, check: bool) -> Self {
        self.check_default_variant = check;
        self
    }

    /// Set the reference expansion budget, in JSON nodes.
    pub fn max_expanded_nodes(mut self, limit: usize) -> Self {
        self.max_expanded_nodes = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feature_flag_from_camel_case() {
        let flag: FeatureFlag = serde_json::from_value(json!({
            "variations": { "on": true, "off": false },
            "defaultVariant": "on",
            "bucketingKey": "userId",
            "metadata": { "team": "checkout", "owner_id": 7, "beta": true }
        }))
        .unwrap();

        assert_eq!(flag.default_variant.as_deref(), Some("on"));
        assert_eq!(flag.bucketing_key.as_deref(), Some("userId"));
        assert_eq!(flag.state, FlagState::Enabled);
        assert_eq!(
            flag.metadata["team"],
            MetadataValue::String("checkout".into())
        );
        assert_eq!(flag.metadata["owner_id"], MetadataValue::Number(7.into()));
        assert_eq!(flag.metadata["beta"], MetadataValue::Bool(true));
    }

    #[test]
    fn flag_state_parse() {
        let state: FlagState = serde_json::from_value(json!("DISABLED")).unwrap();
        assert_eq!(state, FlagState::Disabled);
        assert!(serde_json::from_value::<FlagState>(json!("disabled")).is_err());
    }

    #[test]
    fn default_value_follows_default_variant() {
        let flag: FeatureFlag = serde_json::from_value(json!({
            "variations": { "red": "#f00", "blue": "#00f" },
            "defaultVariant": "blue"
        }))
        .unwrap();
        assert_eq!(flag.default_value(), Some(&json!("#00f")));

        let flag: FeatureFlag = serde_json::from_value(json!({
            "variations": { "red": "#f00" },
            "defaultVariant": null
        }))
        .unwrap();
        assert_eq!(flag.default_value(), None);
    }

    #[test]
    fn serialize_skips_absent_fields() {
        let flag: FeatureFlag = serde_json::from_value(json!({
            "variations": { "on": true }
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&flag).unwrap(),
            json!({ "variations": { "on": true }, "state": "ENABLED" })
        );
    }

    #[test]
    fn parse_options_builder() {
        let opts = ParseOptions::new();
        assert_eq!(opts.duplicate_keys, DuplicateKeys::Reject);
        assert!(opts.check_default_variant);
        assert_eq!(opts.max_expanded_nodes, DEFAULT_MAX_EXPANDED_NODES);

        let opts = ParseOptions::new()
            .duplicate_keys(DuplicateKeys::LastWins)
            .check_default_variant(false)
            .max_expanded_nodes(10);
        assert_eq!(opts.duplicate_keys, DuplicateKeys::LastWins);
        assert_eq!(opts.max_expanded_nodes, 10);
        assert!(!opts.check_default_variant);
    }
}
