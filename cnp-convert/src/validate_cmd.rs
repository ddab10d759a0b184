use std::fs;

use anyhow::{bail, Context, Result};
use cnp_convert::batch::{validate_batch, BatchInput};
use cnp_convert::lint_config::{load_lint_config, LintConfig};
use cnp_convert::report::{render_batch_summary, render_colored};
use cnp_convert::schema_profile::load_schema_profile;
use cnp_convert::verify::render_report_text;

use crate::cli::{OutputFormat, ValidateArgs};

pub fn run_validate(args: ValidateArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_lint_config(path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "lint config unusable");
            eprintln!("warning: {err}; using default lint settings");
            LintConfig::default()
        }),
        None => LintConfig::default(),
    };
    let (profile, schema_source) = load_schema_profile(args.schema_file.as_deref())
        .context("failed to load schema profile")?;

    let mut inputs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        inputs.push(BatchInput {
            identity: path.display().to_string(),
            bytes,
        });
    }
    let entries = validate_batch(inputs, &config, &profile);

    match args.format {
        OutputFormat::Text => {
            let source = args.verbose.then_some(schema_source.as_str());
            let blocks: Vec<String> = entries
                .iter()
                .map(|e| render_colored(&render_report_text(&e.identity, &e.report, source)))
                .collect();
            println!("{}", blocks.join("\n\n"));
            if entries.len() > 1 {
                println!("\n{}", render_batch_summary(&entries));
            }
        }
        OutputFormat::Json => match entries.as_slice() {
            [single] => println!("{}", serde_json::to_string_pretty(&single.report)?),
            many => println!("{}", serde_json::to_string_pretty(many)?),
        },
    }

    let invalid = entries.iter().filter(|e| !e.report.valid()).count();
    if invalid > 0 {
        bail!("validate failed: {invalid} invalid documents");
    }
    let warnings: usize = entries.iter().map(|e| e.report.warnings()).sum();
    if args.strict && warnings > 0 {
        bail!("validate failed in strict mode: {warnings} warnings");
    }
    Ok(())
}
