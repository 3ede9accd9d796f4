//! Resolution of `$ref` markers against the document's `$evaluators`.
//!
//! A reference marker is an object whose only key is `$ref`, with a string
//! value naming an evaluator:
//!
//! ```json
//! { "targeting": { "$ref": "emailSuffix" } }
//! ```
//!
//! Resolution walks the parsed tree and replaces every marker node, in place,
//! with a deep copy of the named fragment. Fragments may reference other
//! evaluators; those are resolved first and cached, and a reference cycle is
//! reported instead of recursing forever. Every copy handed out is charged
//! against a node budget, so fragments that reference each other repeatedly
//! cannot blow up the resolved document.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::types::{json_type_name, DEFAULT_MAX_EXPANDED_NODES, EVALUATORS_KEY, REF_KEY};

/// A reference marker found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Evaluator name the marker points at.
    pub name: String,
    /// JSON Pointer to the marker object.
    pub path: String,
}

/// Extract the `$evaluators` map from a parsed document.
///
/// A missing section yields an empty map.
pub fn collect_evaluators(document: &Value) -> Result<Map<String, Value>, ParseError> {
    match document.get(EVALUATORS_KEY) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(ParseError::InvalidConfiguration {
            path: format!("/{}", pointer_token(EVALUATORS_KEY)),
            message: format!("expected object, got {}", json_type_name(other)),
        }),
    }
}

/// A fully resolved fragment with its bookkeeping.
#[derive(Debug)]
struct Resolved {
    value: Value,
    /// Node count of `value`.
    nodes: usize,
    /// Markers replaced while building `value`.
    markers: usize,
}

/// Replaces reference markers with evaluator fragments.
#[derive(Debug)]
pub struct Resolver<'a> {
    evaluators: &'a Map<String, Value>,
    resolved: HashMap<String, Resolved>,
    in_progress: Vec<String>,
    substitutions: usize,
    expanded_nodes: usize,
    max_expanded_nodes: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(evaluators: &'a Map<String, Value>) -> Self {
        Self {
            evaluators,
            resolved: HashMap::new(),
            in_progress: Vec::new(),
            substitutions: 0,
            expanded_nodes: 0,
            max_expanded_nodes: DEFAULT_MAX_EXPANDED_NODES,
        }
    }

    /// Cap the total number of JSON nodes copied in from evaluators.
    pub fn max_expanded_nodes(mut self, limit: usize) -> Self {
        self.max_expanded_nodes = limit;
        self
    }

    /// Resolve every marker under `value`; `path` is its JSON Pointer, used
    /// in error messages.
    pub fn resolve(&mut self, value: &mut Value, path: &str) -> Result<(), ParseError> {
        match value {
            Value::Object(map) => {
                if map.contains_key(REF_KEY) {
                    let name = marker_name(map, path)?;
                    let fragment = self.fragment(&name, path)?;
                    tracing::trace!(evaluator = %name, path, "substituted reference");
                    self.substitutions += 1;
                    *value = fragment;
                    return Ok(());
                }
                for (key, child) in map.iter_mut() {
                    let child_path = format!("{}/{}", path, pointer_token(key));
                    self.resolve(child, &child_path)?;
                }
                Ok(())
            }
            Value::Array(arr) => {
                for (i, item) in arr.iter_mut().enumerate() {
                    let item_path = format!("{}/{}", path, i);
                    self.resolve(item, &item_path)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Number of markers replaced so far, counting the markers inside every
    /// copy of a nested evaluator.
    pub fn substitutions(&self) -> usize {
        self.substitutions
    }

    /// Total JSON nodes copied in from evaluators so far.
    pub fn expanded_nodes(&self) -> usize {
        self.expanded_nodes
    }

    /// Fully resolved copy of the named fragment.
    fn fragment(&mut self, name: &str, path: &str) -> Result<Value, ParseError> {
        if let Some(done) = self.resolved.get(name) {
            self.expanded_nodes += done.nodes;
            if self.expanded_nodes > self.max_expanded_nodes {
                return Err(expansion_error(self.max_expanded_nodes, name, path));
            }
            self.substitutions += done.markers;
            return Ok(done.value.clone());
        }

        let raw = self
            .evaluators
            .get(name)
            .ok_or_else(|| ParseError::UnresolvedReference {
                name: name.to_string(),
                path: path.to_string(),
            })?;

        if self.in_progress.iter().any(|n| n == name) {
            let mut chain = self.in_progress.clone();
            chain.push(name.to_string());
            return Err(ParseError::CircularReference { chain });
        }

        let mut fragment = raw.clone();
        let fragment_path = format!("/{}/{}", pointer_token(EVALUATORS_KEY), pointer_token(name));
        let markers_before = self.substitutions;
        self.in_progress.push(name.to_string());
        let result = self.resolve(&mut fragment, &fragment_path);
        self.in_progress.pop();
        result?;

        let nodes = count_nodes(&fragment);
        self.expanded_nodes += nodes;
        if self.expanded_nodes > self.max_expanded_nodes {
            return Err(expansion_error(self.max_expanded_nodes, name, path));
        }

        self.resolved.insert(
            name.to_string(),
            Resolved {
                value: fragment.clone(),
                nodes,
                markers: self.substitutions - markers_before,
            },
        );
        Ok(fragment)
    }
}

fn expansion_error(limit: usize, name: &str, path: &str) -> ParseError {
    ParseError::InvalidConfiguration {
        path: path.to_string(),
        message: format!(
            "expanding \"{}\" exceeds the limit of {} resolved nodes",
            name, limit
        ),
    }
}

fn count_nodes(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(count_nodes).sum::<usize>(),
        Value::Array(arr) => 1 + arr.iter().map(count_nodes).sum::<usize>(),
        _ => 1,
    }
}

/// Collect every reference marker under `value`, without resolving.
pub fn find_references(value: &Value, path: &str, out: &mut Vec<Reference>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get(REF_KEY) {
                out.push(Reference {
                    name: name.clone(),
                    path: path.to_string(),
                });
            }
            for (key, child) in map {
                let child_path = format!("{}/{}", path, pointer_token(key));
                find_references(child, &child_path, out);
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}/{}", path, i);
                find_references(item, &item_path, out);
            }
        }
        _ => {}
    }
}

/// Escape an object key for use in a JSON Pointer (`~` -> `~0`, `/` -> `~1`).
pub(crate) fn pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn marker_name(map: &Map<String, Value>, path: &str) -> Result<String, ParseError> {
    if map.len() > 1 {
        let siblings: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| *k != REF_KEY)
            .collect();
        return Err(ParseError::InvalidConfiguration {
            path: path.to_string(),
            message: format!(
                "reference marker must not have sibling keys, found: {}",
                siblings.join(", ")
            ),
        });
    }

    match map.get(REF_KEY) {
        Some(Value::String(name)) => Ok(name.clone()),
        Some(other) => Err(ParseError::InvalidConfiguration {
            path: path.to_string(),
            message: format!("$ref must be a string, got {}", json_type_name(other)),
        }),
        None => Err(ParseError::InvalidConfiguration {
            path: path.to_string(),
            message: "missing $ref".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluators(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("evaluators must be an object"),
        }
    }

    #[test]
    fn collect_missing_section_is_empty() {
        let doc = json!({ "flags": {} });
        assert!(collect_evaluators(&doc).unwrap().is_empty());
    }

    #[test]
    fn collect_rejects_non_object() {
        let doc = json!({ "flags": {}, "$evaluators": [] });
        assert!(matches!(
            collect_evaluators(&doc),
            Err(ParseError::InvalidConfiguration { path, .. }) if path == "/$evaluators"
        ));
    }

    #[test]
    fn resolve_replaces_marker_in_object() {
        let evals = evaluators(json!({
            "emailSuffix": { "in": ["@example.com", { "var": "email" }] }
        }));
        let mut value = json!({ "targeting": { "$ref": "emailSuffix" } });

        let mut resolver = Resolver::new(&evals);
        resolver.resolve(&mut value, "/flags/f1").unwrap();

        assert_eq!(
            value["targeting"],
            json!({ "in": ["@example.com", { "var": "email" }] })
        );
        assert_eq!(resolver.substitutions(), 1);
    }

    #[test]
    fn resolve_replaces_marker_in_array() {
        let evals = evaluators(json!({ "isBeta": { "==": [{ "var": "tier" }, "beta"] } }));
        let mut value = json!({ "if": [{ "$ref": "isBeta" }, "on", "off"] });

        Resolver::new(&evals).resolve(&mut value, "").unwrap();

        assert_eq!(value["if"][0], json!({ "==": [{ "var": "tier" }, "beta"] }));
        assert_eq!(value["if"][1], "on");
    }

    #[test]
    fn resolve_scalar_fragment() {
        let evals = evaluators(json!({ "threshold": 42 }));
        let mut value = json!({ ">": [{ "var": "age" }, { "$ref": "threshold" }] });

        Resolver::new(&evals).resolve(&mut value, "").unwrap();

        assert_eq!(value, json!({ ">": [{ "var": "age" }, 42] }));
    }

    #[test]
    fn resolve_nested_evaluators() {
        let evals = evaluators(json!({
            "isAdmin": { "==": [{ "var": "role" }, "admin"] },
            "adminOrBeta": { "or": [{ "$ref": "isAdmin" }, { "var": "beta" }] }
        }));
        let mut value = json!({ "$ref": "adminOrBeta" });

        let mut resolver = Resolver::new(&evals);
        resolver.resolve(&mut value, "/flags/f1/targeting").unwrap();

        assert_eq!(
            value,
            json!({ "or": [{ "==": [{ "var": "role" }, "admin"] }, { "var": "beta" }] })
        );
        assert_eq!(resolver.substitutions(), 2);
    }

    #[test]
    fn substitutions_count_every_nested_copy() {
        let evals = evaluators(json!({
            "isAdmin": { "==": [{ "var": "role" }, "admin"] },
            "adminOrBeta": { "or": [{ "$ref": "isAdmin" }, { "var": "beta" }] }
        }));
        let mut value = json!([{ "$ref": "adminOrBeta" }, { "$ref": "adminOrBeta" }]);

        let mut resolver = Resolver::new(&evals);
        resolver.resolve(&mut value, "").unwrap();

        assert_eq!(resolver.substitutions(), 4);
    }

    #[test]
    fn count_nodes_counts_containers_and_leaves() {
        assert_eq!(count_nodes(&json!(1)), 1);
        assert_eq!(count_nodes(&json!({ "var": "x" })), 2);
        assert_eq!(count_nodes(&json!({ "in": ["a", { "var": "x" }] })), 5);
    }

    /// e0 is a leaf; each eN references eN-1 twice, doubling the output.
    fn doubling_chain(levels: usize) -> Map<String, Value> {
        let mut evals = Map::new();
        evals.insert("e0".to_string(), json!({ "var": "x" }));
        for n in 1..levels {
            let prev = format!("e{}", n - 1);
            evals.insert(
                format!("e{}", n),
                json!({ "and": [{ "$ref": &prev }, { "$ref": &prev }] }),
            );
        }
        evals
    }

    #[test]
    fn exponential_expansion_is_rejected() {
        let evals = doubling_chain(40);
        let mut value = json!({ "targeting": { "$ref": "e39" } });

        let result = Resolver::new(&evals).resolve(&mut value, "/flags/f1");
        match result {
            Err(ParseError::InvalidConfiguration { path, message }) => {
                assert!(path.starts_with("/$evaluators/e"), "{}", path);
                assert!(message.contains("limit"), "{}", message);
            }
            other => panic!("expected expansion limit error, got {:?}", other),
        }
    }

    #[test]
    fn expansion_within_limit_succeeds() {
        let evals = doubling_chain(4);
        let mut value = json!({ "$ref": "e3" });

        let mut resolver = Resolver::new(&evals).max_expanded_nodes(1_000);
        resolver.resolve(&mut value, "").unwrap();

        assert_eq!(value["and"][1]["and"][0]["and"][1], json!({ "var": "x" }));
        assert!(resolver.expanded_nodes() <= 1_000);
    }

    #[test]
    fn expansion_limit_counts_repeated_uses() {
        let evals = evaluators(json!({ "x": { "var": "x" } }));
        let mut value = json!([{ "$ref": "x" }, { "$ref": "x" }, { "$ref": "x" }]);

        let result = Resolver::new(&evals)
            .max_expanded_nodes(5)
            .resolve(&mut value, "");
        assert!(matches!(
            result,
            Err(ParseError::InvalidConfiguration { path, .. }) if path == "/2"
        ));
    }

    #[test]
    fn cached_fragments_are_independent_copies() {
        let evals = evaluators(json!({ "x": { "var": "x" } }));
        let mut value = json!([{ "$ref": "x" }, { "$ref": "x" }]);

        Resolver::new(&evals).resolve(&mut value, "").unwrap();
        value[0]["var"] = json!("changed");

        assert_eq!(value[1], json!({ "var": "x" }));
    }

    #[test]
    fn unknown_reference_errors() {
        let evals = Map::new();
        let mut value = json!({ "targeting": { "$ref": "missing" } });

        let result = Resolver::new(&evals).resolve(&mut value, "/flags/f1");
        assert!(matches!(
            result,
            Err(ParseError::UnresolvedReference { name, path })
                if name == "missing" && path == "/flags/f1/targeting"
        ));
    }

    #[test]
    fn cycle_errors() {
        let evals = evaluators(json!({
            "a": { "not": { "$ref": "b" } },
            "b": { "not": { "$ref": "a" } }
        }));
        let mut value = json!({ "$ref": "a" });

        let result = Resolver::new(&evals).resolve(&mut value, "");
        match result {
            Err(ParseError::CircularReference { chain }) => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected circular reference, got {:?}", other),
        }
    }

    #[test]
    fn self_reference_errors() {
        let evals = evaluators(json!({ "a": [{ "$ref": "a" }] }));
        let mut value = json!({ "$ref": "a" });

        let result = Resolver::new(&evals).resolve(&mut value, "");
        assert!(matches!(result, Err(ParseError::CircularReference { .. })));
    }

    #[test]
    fn non_string_ref_errors() {
        let evals = Map::new();
        let mut value = json!({ "targeting": { "$ref": 5 } });

        let result = Resolver::new(&evals).resolve(&mut value, "");
        assert!(matches!(
            result,
            Err(ParseError::InvalidConfiguration { message, .. }) if message.contains("number")
        ));
    }

    #[test]
    fn marker_with_siblings_errors() {
        let evals = evaluators(json!({ "a": true }));
        let mut value = json!({ "$ref": "a", "extra": 1 });

        let result = Resolver::new(&evals).resolve(&mut value, "/flags/f1/targeting");
        assert!(matches!(
            result,
            Err(ParseError::InvalidConfiguration { path, message })
                if path == "/flags/f1/targeting" && message.contains("extra")
        ));
    }

    #[test]
    fn ref_text_inside_strings_is_untouched() {
        let evals = evaluators(json!({ "a": true }));
        let mut value = json!({ "note": "\"$ref\": \"a\"" });

        let mut resolver = Resolver::new(&evals);
        resolver.resolve(&mut value, "").unwrap();

        assert_eq!(value["note"], "\"$ref\": \"a\"");
        assert_eq!(resolver.substitutions(), 0);
    }

    #[test]
    fn find_references_collects_paths() {
        let doc = json!({
            "flags": {
                "f1": { "targeting": { "and": [{ "$ref": "a" }, { "$ref": "b" }] } },
                "a/b": { "targeting": { "$ref": "a" } }
            }
        });
        let mut refs = Vec::new();
        find_references(&doc, "", &mut refs);

        let paths: Vec<&str> = refs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/flags/f1/targeting/and/0",
                "/flags/f1/targeting/and/1",
                "/flags/a~1b/targeting"
            ]
        );
    }

    #[test]
    fn pointer_token_escapes() {
        assert_eq!(pointer_token("a/b~c"), "a~1b~0c");
        assert_eq!(pointer_token("$evaluators"), "$evaluators");
    }
}
