//! The parse pipeline: syntax, schema, duplicate keys, references, flag map.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;
use crate::resolver::{collect_evaluators, pointer_token, Resolver};
use crate::schema::{ConfigValidator, FlagSchema};
use crate::types::{
    DuplicateKeys, FeatureFlag, FlagMap, MetadataValue, ParseOptions, EVALUATORS_KEY, FLAGS_KEY,
    METADATA_KEY,
};

/// Parse a flag configuration with the bundled schema and default options.
///
/// # Errors
///
/// Returns `ParseError::Syntax` for malformed JSON,
/// `ParseError::SchemaValidation` if the document does not conform to the
/// flagd schema, and the reference/configuration variants if resolution or
/// flag construction fails. No flag map is returned on any failure.
pub fn parse(text: &str) -> Result<FlagMap, ParseError> {
    FlagConfigParser::default().parse(text)
}

/// Turns configuration text into a [`FlagMap`].
///
/// The validator is borrowed so that one compiled schema can serve any
/// number of parsers and threads.
pub struct FlagConfigParser<'v> {
    validator: &'v dyn ConfigValidator,
    options: ParseOptions,
}

impl Default for FlagConfigParser<'static> {
    fn default() -> Self {
        Self::new(FlagSchema::shared())
    }
}

impl<'v> FlagConfigParser<'v> {
    pub fn new(validator: &'v dyn ConfigValidator) -> Self {
        Self {
            validator,
            options: ParseOptions::default(),
        }
    }

    pub fn options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse, validate and resolve a configuration document.
    pub fn parse(&self, text: &str) -> Result<FlagMap, ParseError> {
        let document: Value =
            serde_json::from_str(text).map_err(|source| ParseError::Syntax { source })?;

        self.validate(&document)?;

        if self.options.duplicate_keys == DuplicateKeys::Reject {
            check_duplicate_keys(text)?;
        }

        self.build(document)
    }

    /// Validate and resolve an already parsed document.
    ///
    /// Duplicate keys cannot be detected here since a `Value` has already
    /// collapsed them.
    pub fn parse_value(&self, document: Value) -> Result<FlagMap, ParseError> {
        self.validate(&document)?;
        self.build(document)
    }

    fn validate(&self, document: &Value) -> Result<(), ParseError> {
        self.validator
            .validate(document)
            .map_err(|errors| ParseError::SchemaValidation { errors })
    }

    fn build(&self, mut document: Value) -> Result<FlagMap, ParseError> {
        let evaluators = collect_evaluators(&document)?;

        let flags = match document.get_mut(FLAGS_KEY).map(Value::take) {
            Some(Value::Object(flags)) => flags,
            _ => {
                return Err(ParseError::InvalidConfiguration {
                    path: format!("/{}", FLAGS_KEY),
                    message: "expected an object of flag definitions".to_string(),
                })
            }
        };

        let mut resolver =
            Resolver::new(&evaluators).max_expanded_nodes(self.options.max_expanded_nodes);
        let mut built = BTreeMap::new();

        for (key, mut raw) in flags {
            let path = format!("/{}/{}", FLAGS_KEY, pointer_token(&key));
            resolver.resolve(&mut raw, &path)?;

            let flag: FeatureFlag =
                serde_json::from_value(raw).map_err(|e| ParseError::InvalidConfiguration {
                    path: path.clone(),
                    message: e.to_string(),
                })?;

            if self.options.check_default_variant {
                check_default_variant(&flag, &path)?;
            }
            built.insert(key, flag);
        }

        let metadata: BTreeMap<String, MetadataValue> =
            match document.get_mut(METADATA_KEY).map(Value::take) {
                None | Some(Value::Null) => BTreeMap::new(),
                Some(value) => serde_json::from_value(value).map_err(|e| {
                    ParseError::InvalidConfiguration {
                        path: format!("/{}", METADATA_KEY),
                        message: e.to_string(),
                    }
                })?,
            };

        tracing::debug!(
            flags = built.len(),
            evaluators = evaluators.len(),
            substitutions = resolver.substitutions(),
            expanded_nodes = resolver.expanded_nodes(),
            "parsed flag configuration"
        );

        Ok(FlagMap::new(built, metadata))
    }
}

impl fmt::Debug for FlagConfigParser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagConfigParser")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn check_default_variant(flag: &FeatureFlag, path: &str) -> Result<(), ParseError> {
    match flag.default_variant.as_deref() {
        Some(name) if !flag.variations.contains_key(name) => {
            Err(ParseError::InvalidConfiguration {
                path: format!("{}/defaultVariant", path),
                message: format!("default variant \"{}\" is not one of the flag's variations", name),
            })
        }
        _ => Ok(()),
    }
}

/// Re-read the text for repeated keys at the top level, in `flags`, and in
/// `$evaluators`. The text is known to be valid JSON at this point.
fn check_duplicate_keys(text: &str) -> Result<(), ParseError> {
    let keys: DocumentKeys =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidConfiguration {
            path: String::new(),
            message: e.to_string(),
        })?;

    for (section, list) in [
        ("document", &keys.top),
        (FLAGS_KEY, &keys.flags),
        (EVALUATORS_KEY, &keys.evaluators),
    ] {
        if let Some(key) = first_duplicate(list) {
            return Err(ParseError::DuplicateKey {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn first_duplicate(keys: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.as_str()) {
            return Some(key.as_str());
        }
    }
    None
}

/// Object keys of one JSON object, in document order, repeats included.
struct KeyList(Vec<String>);

impl<'de> Deserialize<'de> for KeyList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyListVisitor;

        impl<'de> Visitor<'de> for KeyListVisitor {
            type Value = KeyList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<KeyList, A::Error> {
                let mut keys = Vec::new();
                while let Some(key) = access.next_key::<String>()? {
                    access.next_value::<IgnoredAny>()?;
                    keys.push(key);
                }
                Ok(KeyList(keys))
            }
        }

        deserializer.deserialize_map(KeyListVisitor)
    }
}

#[derive(Default)]
struct DocumentKeys {
    top: Vec<String>,
    flags: Vec<String>,
    evaluators: Vec<String>,
}

impl<'de> Deserialize<'de> for DocumentKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentKeysVisitor;

        impl<'de> Visitor<'de> for DocumentKeysVisitor {
            type Value = DocumentKeys;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a flag configuration object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<DocumentKeys, A::Error> {
                let mut keys = DocumentKeys::default();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        FLAGS_KEY => keys.flags.extend(access.next_value::<KeyList>()?.0),
                        EVALUATORS_KEY => {
                            keys.evaluators.extend(access.next_value::<KeyList>()?.0)
                        }
                        _ => {
                            access.next_value::<IgnoredAny>()?;
                        }
                    }
                    keys.top.push(key);
                }
                Ok(keys)
            }
        }

        deserializer.deserialize_map(DocumentKeysVisitor)
    }
}
