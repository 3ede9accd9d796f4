//! flagd-config CLI
//!
//! Command-line interface for parsing, validating and linting flagd flag
//! configurations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flagd_config::{
    lint, load_flag_config, DuplicateKeys, FileStatus, FlagConfigParser, LintResult, ParseError,
    ParseOptions, Severity,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flagd-config")]
#[command(about = "Parse, validate and lint flagd flag configurations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve all $ref markers and print the resulting flags as JSON
    Parse {
        /// Flag configuration file
        file: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Keep the last occurrence of repeated flag or evaluator keys instead of failing
        #[arg(long)]
        allow_duplicate_keys: bool,
    },

    /// Check that a configuration parses, without printing it
    Validate {
        /// Flag configuration file
        file: PathBuf,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Lint configuration files (syntax, schema, references, unused evaluators)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse {
            file,
            output,
            pretty,
            allow_duplicate_keys,
        } => run_parse(&file, output, pretty, allow_duplicate_keys),
        Commands::Validate { file, json } => run_validate(&file, json),
        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn parse_options(allow_duplicate_keys: bool) -> ParseOptions {
    let policy = if allow_duplicate_keys {
        DuplicateKeys::LastWins
    } else {
        DuplicateKeys::Reject
    };
    ParseOptions::new().duplicate_keys(policy)
}

fn run_parse(
    file: &Path,
    output: Option<PathBuf>,
    pretty: bool,
    allow_duplicate_keys: bool,
) -> Result<(), u8> {
    let text = load_flag_config(file).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let flags = FlagConfigParser::default()
        .options(parse_options(allow_duplicate_keys))
        .parse(&text)
        .map_err(|e| {
            print_parse_error(&e);
            e.exit_code() as u8
        })?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&flags)
    } else {
        serde_json::to_string(&flags)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_validate(file: &Path, json_output: bool) -> Result<(), u8> {
    let result = load_flag_config(file).and_then(|text| FlagConfigParser::default().parse(&text));

    match result {
        Ok(flags) => {
            if json_output {
                println!("{}", serde_json::json!({ "valid": true, "flags": flags.len() }));
            } else {
                println!("Valid ({} flags)", flags.len());
            }
            Ok(())
        }
        Err(ParseError::SchemaValidation { errors }) if json_output => {
            println!("{}", serde_json::json!({ "valid": false, "errors": errors }));
            Err(1)
        }
        Err(e) => {
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({ "valid": false, "error": e.to_string() })
                );
            } else {
                print_parse_error(&e);
            }
            Err(e.exit_code() as u8)
        }
    }
}

fn print_parse_error(err: &ParseError) {
    match err {
        ParseError::SchemaValidation { errors } => {
            eprintln!("Validation failed:");
            for error in errors {
                eprintln!("  {}", error);
            }
        }
        other => eprintln!("Error: {}", other),
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);
    let passed = result.is_ok() && (!strict || result.warnings == 0);

    if format == "json" {
        let rendered = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", rendered);
    } else {
        print_lint_report(path, &result, passed, quiet);
    }

    if passed {
        Ok(())
    } else {
        Err(1)
    }
}

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

fn print_lint_report(path: &Path, result: &LintResult, passed: bool, quiet: bool) {
    if !quiet {
        println!("Linting {} ...\n", path.display());
    }

    for file_result in &result.results {
        if quiet && file_result.status == FileStatus::Ok {
            continue;
        }
        let (color, mark) = match file_result.status {
            FileStatus::Ok => (GREEN, "ok"),
            FileStatus::Warning => (YELLOW, "warn"),
            FileStatus::Error => (RED, "FAIL"),
        };
        println!("  {}{:<4}{} {}", color, mark, RESET, file_result.file.display());

        for diag in &file_result.diagnostics {
            if quiet && diag.severity != Severity::Error {
                continue;
            }
            let color = match diag.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
            };
            let location = if diag.path.is_empty() { "/" } else { diag.path.as_str() };
            println!(
                "       {}{}{} {}: {}",
                color, diag.code, RESET, location, diag.message
            );
        }
    }

    println!();
    if passed {
        println!("{}{} files checked, all passed{}", GREEN, result.files_checked, RESET);
    } else {
        println!(
            "{}{} files checked: {} passed, {} failed ({} errors, {} warnings){}",
            RED,
            result.files_checked,
            result.passed,
            result.failed,
            result.errors,
            result.warnings,
            RESET
        );
    }
}
