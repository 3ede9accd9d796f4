//! Loading flag configurations from disk.

use std::path::Path;

use serde_json::Value;

use crate::error::ParseError;
use crate::parser::parse;
use crate::types::FlagMap;

/// Read a configuration file into a string.
///
/// # Errors
///
/// Returns `ParseError::FileNotFound` if the file doesn't exist,
/// or `ParseError::Read` if it can't be read as UTF-8 text.
pub fn load_flag_config(path: &Path) -> Result<String, ParseError> {
    if !path.exists() {
        return Err(ParseError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a file and parse it as a generic JSON value, without validation.
pub fn load_document(path: &Path) -> Result<Value, ParseError> {
    let content = load_flag_config(path)?;
    serde_json::from_str(&content).map_err(|source| ParseError::Syntax { source })
}

/// Read and parse a configuration file with the bundled schema.
pub fn parse_file(path: &Path) -> Result<FlagMap, ParseError> {
    let content = load_flag_config(path)?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "loaded flag configuration");
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_file_valid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"flags": {{"f1": {{"variations": {{"on": true, "off": false}}}}}}}}"#
        )
        .unwrap();

        let flags = parse_file(file.path()).unwrap();
        assert!(flags.contains_key("f1"));
    }

    #[test]
    fn load_file_not_found() {
        let result = load_flag_config(Path::new("/nonexistent/flags.json"));
        assert!(matches!(result, Err(ParseError::FileNotFound { .. })));
    }

    #[test]
    fn load_document_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_document(file.path());
        assert!(matches!(result, Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn load_non_utf8_is_read_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0xfd]).unwrap();

        let result = load_flag_config(file.path());
        assert!(matches!(result, Err(ParseError::Read { .. })));
    }
}
