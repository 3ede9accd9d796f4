//! Error types for flag configuration loading and parsing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while turning a configuration document into a [`FlagMap`](crate::FlagMap).
///
/// Every variant is terminal for the whole document: no partial flag map is
/// ever produced alongside an error.
#[derive(Debug, Error)]
pub enum ParseError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    Syntax {
        #[source]
        source: serde_json::Error,
    },

    // Configuration errors (exit code 1)
    #[error("schema validation failed with {} error(s)", errors.len())]
    SchemaValidation { errors: Vec<SchemaError> },

    #[error("unresolved reference \"{name}\" at {path}: no such entry in $evaluators")]
    UnresolvedReference { name: String, path: String },

    #[error("circular evaluator reference: {}", chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error("duplicate key \"{key}\" in {section}")]
    DuplicateKey { section: String, key: String },

    #[error("invalid configuration at {path}: {message}")]
    InvalidConfiguration { path: String, message: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },
}

impl ParseError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ParseError::FileNotFound { .. } | ParseError::Read { .. } => 3,
            ParseError::Syntax { .. } | ParseError::InvalidSchema { .. } => 2,
            _ => 1,
        }
    }

    /// True for the "not valid JSON" condition.
    pub fn is_syntax(&self) -> bool {
        matches!(self, ParseError::Syntax { .. })
    }
}

/// Single schema violation with path context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}
