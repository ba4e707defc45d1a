//! Output helpers shared by all commands.
//!
//! In JSON mode stdout carries exactly one JSON document per command, so
//! status messages are only printed in text mode.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a result value.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: could not serialize result: {}", "Error".red().bold(), e),
        },
        OutputFormat::Text if quiet => {}
        OutputFormat::Text => {
            if let Ok(json) = serde_json::to_string_pretty(value) {
                println!("{}", json);
            }
        }
    }
}

/// Print a status message.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "→".blue(), message);
}

/// Print a success message.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning to stderr.
pub fn warning(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    eprintln!("{} {}", "!".yellow().bold(), message);
}

/// Human-readable `yes`/`no`, coloured.
pub fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}
