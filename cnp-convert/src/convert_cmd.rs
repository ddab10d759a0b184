use std::fs;

use anyhow::{bail, Context, Result};
use cnp_convert::conversion_summary::{render as render_conversion_summary, summarize};
use cnp_convert::convert::{convert_grouped, convert_with_options, ConvertOptions};
use cnp_convert::lint_config::LintConfig;
use cnp_convert::rule::parse_rules_str;
use cnp_convert::verify::{build_report, render_report_text, ValidationInput};
use policy_tree::{write, write_stream, Format};

use crate::cli::{ConvertArgs, PolicyFormat};
use crate::path_guard::ensure_output_not_input;

/// Convert a rule file into one policy (or one per workload with `--grouped`).
///
/// The policy goes to `--output` or stdout. The summary line goes to stdout
/// when writing a file and to stderr otherwise, so piped YAML stays clean.
///
/// # Errors
///
/// Returns error if:
/// - the output path is the input file
/// - the rule file cannot be read or parsed
/// - conversion fails (deny rule, unresolvable direction, mixed workloads)
/// - `--check` finds an invalid policy
/// - the output cannot be written
pub fn run_convert(args: ConvertArgs) -> Result<()> {
    if let Some(output) = &args.output {
        ensure_output_not_input(output, &args.input)?;
    }

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let rules = parse_rules_str(&text)
        .with_context(|| format!("failed to parse rules in {}", args.input.display()))?;

    let options = ConvertOptions {
        name: args.name.clone(),
        namespace: Some(args.namespace.clone()).filter(|ns| !ns.is_empty()),
    };
    let policies = if args.grouped {
        convert_grouped(&rules, &options)
    } else {
        convert_with_options(&rules, &options).map(|doc| vec![doc])
    }
    .with_context(|| format!("failed to convert {}", args.input.display()))?;

    if args.check {
        let mut invalid = 0;
        for policy in &policies {
            let report = build_report(
                ValidationInput::Document(policy.clone()),
                &LintConfig::default(),
            );
            if !report.valid() {
                invalid += 1;
                eprintln!("{}", render_report_text(&policy.name, &report, None));
            }
        }
        if invalid > 0 {
            bail!("convert check failed: {invalid} invalid policies");
        }
    }

    let format = match args.format {
        PolicyFormat::Yaml => Format::Yaml,
        PolicyFormat::Json => Format::Json,
    };
    let rendered = match policies.as_slice() {
        [single] => write(single, format),
        many => write_stream(many, format),
    }
    .context("failed to serialize policy")?;

    let summary = render_conversion_summary(summarize(rules.len(), &policies));
    match &args.output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write policy {}", path.display()))?;
            println!("{summary}");
        }
        None => {
            print!("{rendered}");
            eprintln!("{summary}");
        }
    }
    Ok(())
}
