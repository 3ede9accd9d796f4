//! Configuration linting - report every problem in flag configuration files.
//!
//! Checks files for:
//! - JSON syntax errors
//! - flagd schema violations
//! - `$ref` markers naming unknown evaluators
//! - duplicate keys, reference cycles and other invalid configuration
//! - evaluators no flag ever references (warning)

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::loader::load_flag_config;
use crate::parser::FlagConfigParser;
use crate::resolver::{collect_evaluators, find_references, pointer_token, Reference};
use crate::schema::{ConfigValidator, FlagSchema};
use crate::types::{EVALUATORS_KEY, FLAGS_KEY};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    /// JSON path to the issue (e.g., "/flags/new-welcome/targeting")
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

impl FileStatus {
    fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        if diagnostics.iter().any(|d| d.severity == Severity::Error) {
            FileStatus::Error
        } else if diagnostics.iter().any(|d| d.severity == Severity::Warning) {
            FileStatus::Warning
        } else {
            FileStatus::Ok
        }
    }
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, warnings are treated as errors.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_config_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, path);
        total_errors += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        total_warnings += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    tracing::debug!(
        path = %path.display(),
        files = files.len(),
        errors = total_errors,
        warnings = total_warnings,
        "lint finished"
    );

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Lint a single configuration file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let diagnostics = match load_flag_config(file) {
        Ok(text) => lint_str(&text),
        Err(e) => vec![Diagnostic::error("E000", "", e.to_string())],
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status: FileStatus::from_diagnostics(&diagnostics),
        diagnostics,
    }
}

/// Lint configuration text against the bundled schema.
pub fn lint_str(text: &str) -> Vec<Diagnostic> {
    let document: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return vec![Diagnostic::error("E001", "", format!("syntax error: {}", e))],
    };

    if let Err(errors) = FlagSchema::shared().validate(&document) {
        return errors
            .into_iter()
            .map(|e| Diagnostic::error("E002", e.path, e.message))
            .collect();
    }

    let mut diagnostics = Vec::new();
    let evaluators = match collect_evaluators(&document) {
        Ok(e) => e,
        Err(e) => return vec![diagnostic_for(e)],
    };

    check_references(&document, &evaluators, &mut diagnostics);
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        return diagnostics;
    }

    // Everything the static checks can't see: duplicates, cycles, flag shape.
    if let Err(e) = FlagConfigParser::default().parse(text) {
        diagnostics.push(diagnostic_for(e));
    }

    diagnostics
}

/// Unknown references reachable from a flag are errors; evaluators
/// unreachable from any flag are warnings and their contents go unchecked,
/// matching what the parser resolves.
fn check_references(
    document: &Value,
    evaluators: &Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut flag_refs = Vec::new();
    if let Some(flags) = document.get(FLAGS_KEY) {
        find_references(flags, &format!("/{}", FLAGS_KEY), &mut flag_refs);
    }
    let used = reachable_evaluators(&flag_refs, evaluators);

    let mut evaluator_refs = Vec::new();
    for (name, fragment) in evaluators {
        if used.contains(name) {
            let path = format!("/{}/{}", pointer_token(EVALUATORS_KEY), pointer_token(name));
            find_references(fragment, &path, &mut evaluator_refs);
        }
    }

    for reference in flag_refs.iter().chain(&evaluator_refs) {
        if !evaluators.contains_key(&reference.name) {
            diagnostics.push(Diagnostic::error(
                "E003",
                reference.path.clone(),
                format!("unresolved reference \"{}\"", reference.name),
            ));
        }
    }

    for name in evaluators.keys() {
        if !used.contains(name) {
            diagnostics.push(Diagnostic::warning(
                "W001",
                format!("/{}/{}", pointer_token(EVALUATORS_KEY), pointer_token(name)),
                format!("evaluator \"{}\" is never referenced by a flag", name),
            ));
        }
    }
}

fn reachable_evaluators(roots: &[Reference], evaluators: &Map<String, Value>) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    let mut queue: VecDeque<String> = roots.iter().map(|r| r.name.clone()).collect();

    while let Some(name) = queue.pop_front() {
        let Some(fragment) = evaluators.get(&name) else {
            continue;
        };
        if used.contains(&name) {
            continue;
        }
        let mut nested = Vec::new();
        find_references(fragment, "", &mut nested);
        queue.extend(nested.into_iter().map(|r| r.name));
        used.insert(name);
    }
    used
}

fn diagnostic_for(err: ParseError) -> Diagnostic {
    let message = err.to_string();
    match err {
        ParseError::Syntax { .. } => Diagnostic::error("E001", "", message),
        ParseError::SchemaValidation { .. } => Diagnostic::error("E002", "", message),
        ParseError::UnresolvedReference { path, .. } => Diagnostic::error("E003", path, message),
        ParseError::DuplicateKey { section, .. } => {
            let path = if section == "document" {
                String::new()
            } else {
                format!("/{}", pointer_token(&section))
            };
            Diagnostic::error("E004", path, message)
        }
        ParseError::CircularReference { .. } => {
            Diagnostic::error("E005", format!("/{}", EVALUATORS_KEY), message)
        }
        ParseError::InvalidConfiguration { path, .. } => Diagnostic::error("E005", path, message),
        ParseError::FileNotFound { .. }
        | ParseError::Read { .. }
        | ParseError::InvalidSchema { .. } => Diagnostic::error("E000", "", message),
    }
}

/// Collect all .json files in a path (file or directory).
fn collect_config_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}
