use colored::Colorize;

use crate::batch::BatchEntry;

/// Colour a plain-text validation report for terminal output.
pub fn render_colored(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let colored = if line.starts_with("- [error]") || line.ends_with("valid=false") {
            line.red().to_string()
        } else if line.starts_with("- [warning]") {
            line.yellow().to_string()
        } else if line.starts_with("- [info]") {
            line.cyan().to_string()
        } else if line.ends_with("valid=true") {
            line.green().to_string()
        } else {
            line.to_string()
        };
        out.push(colored);
    }
    out.join("\n")
}

/// Per-document status table for batch runs.
pub fn render_batch_summary(entries: &[BatchEntry]) -> String {
    let valid = entries.iter().filter(|e| e.report.valid()).count();
    let mut out = Vec::new();
    out.push(format!(
        "batch_summary documents={} valid={} invalid={}",
        entries.len(),
        valid,
        entries.len() - valid
    ));
    let width = entries
        .iter()
        .map(|e| e.identity.len())
        .chain(std::iter::once("document".len()))
        .max()
        .unwrap_or(0);
    out.push(format!(
        "{:<width$}  {:<7}  {:>6}  {:>8}  {:>11}",
        "document", "status", "errors", "warnings", "suggestions"
    ));
    for entry in entries {
        let status = if entry.report.valid() {
            format!("{:<7}", "valid").green().to_string()
        } else {
            format!("{:<7}", "invalid").red().to_string()
        };
        out.push(format!(
            "{:<width$}  {}  {:>6}  {:>8}  {:>11}",
            entry.identity,
            status,
            entry.report.errors(),
            entry.report.warnings(),
            entry.report.suggestions().len()
        ));
    }
    out.join("\n")
}
