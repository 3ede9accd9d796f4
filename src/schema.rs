//! Validation of configuration documents against the flagd flag schema.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{ParseError, SchemaError};

/// The bundled flagd flag-configuration schema (Draft 2020-12).
pub const FLAGD_SCHEMA: &str = include_str!("../schemas/flags.json");

static SHARED: LazyLock<FlagSchema> =
    LazyLock::new(|| FlagSchema::bundled().expect("bundled flagd schema must compile"));

/// Decides whether a parsed document may be handed to the resolver.
///
/// Implementations must not mutate the document and must be callable from
/// several threads at once.
pub trait ConfigValidator: Send + Sync {
    /// Returns every violation found, or `Ok(())` when the document conforms.
    fn validate(&self, document: &Value) -> Result<(), Vec<SchemaError>>;
}

/// A compiled JSON Schema validator.
///
/// Compilation is the expensive part, so build one of these up front and
/// share it by reference. [`FlagSchema::shared`] holds the process-wide
/// instance for the bundled schema.
pub struct FlagSchema {
    validator: Validator,
}

impl FlagSchema {
    /// Compile the bundled flagd schema.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Syntax` if the bundled text is not JSON and
    /// `ParseError::InvalidSchema` if it is not a usable schema.
    pub fn bundled() -> Result<Self, ParseError> {
        let schema: Value =
            serde_json::from_str(FLAGD_SCHEMA).map_err(|source| ParseError::Syntax { source })?;
        Self::from_schema(&schema)
    }

    /// Compile an arbitrary schema, e.g. a trimmed one in tests.
    pub fn from_schema(schema: &Value) -> Result<Self, ParseError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| ParseError::InvalidSchema {
                message: e.to_string(),
            })?;
        Ok(Self { validator })
    }

    /// The bundled schema, compiled on first use.
    pub fn shared() -> &'static FlagSchema {
        &SHARED
    }

    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }
}

impl ConfigValidator for FlagSchema {
    fn validate(&self, document: &Value) -> Result<(), Vec<SchemaError>> {
        let errors: Vec<SchemaError> = self
            .validator
            .iter_errors(document)
            .map(|e| SchemaError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Debug for FlagSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagSchema").finish_non_exhaustive()
    }
}
