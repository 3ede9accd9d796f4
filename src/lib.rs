//! flagd flag configuration parser
//!
//! Validates flagd flag-configuration documents against the bundled JSON
//! Schema, resolves shared `$evaluators` fragments referenced through
//! `{"$ref": "<name>"}` markers, and builds the [`FlagMap`] an evaluation
//! engine queries per request.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//!
//! let text = r#"{
//!     "$evaluators": {
//!         "emailSuffix": { "in": ["@example.com", { "var": "email" }] }
//!     },
//!     "flags": {
//!         "new-welcome-banner": {
//!             "variations": { "on": true, "off": false },
//!             "defaultVariant": "off",
//!             "state": "ENABLED",
//!             "targeting": { "if": [{ "$ref": "emailSuffix" }, "on", "off"] }
//!         }
//!     }
//! }"#;
//!
//! let flags = flagd_config::parse(text).unwrap();
//! let flag = flags.get("new-welcome-banner").unwrap();
//!
//! assert_eq!(
//!     flag.targeting.as_ref().unwrap()["if"][0],
//!     json!({ "in": ["@example.com", { "var": "email" }] })
//! );
//! assert_eq!(flag.default_value(), Some(&json!(false)));
//! ```
//!
//! # Pipeline
//!
//! | Step | Failure |
//! |------|---------|
//! | parse text as JSON | `ParseError::Syntax` |
//! | validate against the flagd schema | `ParseError::SchemaValidation` |
//! | check `flags` / `$evaluators` for repeated keys | `ParseError::DuplicateKey` |
//! | replace `$ref` markers with evaluator fragments | `ParseError::UnresolvedReference`, `ParseError::CircularReference` |
//! | build each flag | `ParseError::InvalidConfiguration` |
//!
//! Any failure rejects the whole document.
//!
//! # Sharing the schema
//!
//! Schema compilation happens once. [`parse`] uses the process-wide
//! [`FlagSchema::shared`] instance; pass your own validator to
//! [`FlagConfigParser::new`] to control that explicitly:
//!
//! ```
//! use flagd_config::{DuplicateKeys, FlagConfigParser, FlagSchema, ParseOptions};
//!
//! let schema = FlagSchema::bundled().unwrap();
//! let parser = FlagConfigParser::new(&schema)
//!     .options(ParseOptions::new().duplicate_keys(DuplicateKeys::LastWins));
//!
//! let flags = parser.parse(r#"{"flags": {}}"#).unwrap();
//! assert!(flags.is_empty());
//! ```

mod error;
mod linter;
mod loader;
mod parser;
mod resolver;
mod schema;
mod types;

pub use error::{ParseError, SchemaError};
pub use linter::{lint, lint_file, lint_str, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{load_document, load_flag_config, parse_file};
pub use parser::{parse, FlagConfigParser};
pub use resolver::{collect_evaluators, find_references, Reference, Resolver};
pub use schema::{ConfigValidator, FlagSchema, FLAGD_SCHEMA};
pub use types::{
    json_type_name, DuplicateKeys, FeatureFlag, FlagMap, FlagState, MetadataValue, ParseOptions,
    DEFAULT_MAX_EXPANDED_NODES, EVALUATORS_KEY, FLAGS_KEY, METADATA_KEY, REF_KEY,
};
