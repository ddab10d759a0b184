//! Validate many inputs at once.
//!
//! Each input is expanded into one job per document (a multi-document YAML
//! stream yields `path#1`, `path#2`, ...), jobs run on scoped worker threads,
//! and results come back in input order.

use std::num::NonZeroUsize;
use std::thread;

use policy_tree::parse_stream;
use serde::Serialize;

use crate::diagnostic::Report;
use crate::lint_config::LintConfig;
use crate::schema_profile::SchemaProfile;
use crate::verify::{build_report_with_profile, syntax_failure_report, ValidationInput};

/// One named input, usually a file.
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub identity: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub identity: String,
    pub report: Report,
}

enum Job {
    Validate(String, ValidationInput),
    Done(String, Report),
}

/// Validate every input and return one entry per document, in input order.
pub fn validate_batch(
    inputs: Vec<BatchInput>,
    config: &LintConfig,
    profile: &SchemaProfile,
) -> Vec<BatchEntry> {
    let jobs: Vec<Job> = inputs
        .into_iter()
        .flat_map(|input| expand(input, config))
        .collect();
    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(jobs.len())
        .max(1);
    let chunk_size = jobs.len().div_ceil(workers).max(1);
    tracing::debug!(jobs = jobs.len(), workers, "validating batch");

    let mut chunks: Vec<Vec<Job>> = Vec::with_capacity(workers);
    let mut jobs = jobs.into_iter().peekable();
    while jobs.peek().is_some() {
        chunks.push(jobs.by_ref().take(chunk_size).collect());
    }

    thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .into_iter()
                        .map(|job| run(job, config, profile))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

fn expand(input: BatchInput, config: &LintConfig) -> Vec<Job> {
    match parse_stream(&input.bytes) {
        Ok(documents) if documents.len() > 1 => documents
            .into_iter()
            .enumerate()
            .map(|(idx, doc)| {
                Job::Validate(
                    format!("{}#{}", input.identity, idx + 1),
                    ValidationInput::Tree(doc),
                )
            })
            .collect(),
        Ok(_) => vec![Job::Validate(input.identity, ValidationInput::Raw(input.bytes))],
        Err(err) => {
            let report = syntax_failure_report(&err, &input.bytes, config);
            vec![Job::Done(input.identity, report)]
        }
    }
}

fn run(job: Job, config: &LintConfig, profile: &SchemaProfile) -> BatchEntry {
    match job {
        Job::Validate(identity, input) => BatchEntry {
            report: build_report_with_profile(input, config, profile),
            identity,
        },
        Job::Done(identity, report) => BatchEntry { identity, report },
    }
}
