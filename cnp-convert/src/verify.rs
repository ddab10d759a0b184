//! Validation pipeline: Syntax, then Schema, then Style and Logic.
//!
//! A [`ValidationRun`] moves through [`RunState`] one stage per
//! [`ValidationRun::step`]. Only unparseable input stops the pipeline early;
//! schema errors are reported and the remaining stages still run over
//! whatever they can read. Raw text also gets line-level style checks, which
//! follow the tree style findings.

use policy_tree::{to_tree, ParseError, Value};

use crate::diagnostic::{Diagnostic, Report, Severity, Stage};
use crate::lint_config::LintConfig;
use crate::policy::PolicyDocument;
use crate::schema_profile::{default_schema_profile, SchemaProfile};
use crate::suggest::suggest;
use crate::verify_logic::check_logic;
use crate::verify_schema::check_schema_with;
use crate::verify_style::{check_style, check_text};
use crate::verify_syntax::{parse_checked, syntax_diagnostic};

/// What can be validated.
#[derive(Debug, Clone)]
pub enum ValidationInput {
    /// JSON or YAML text.
    Raw(Vec<u8>),
    /// An already parsed tree; the syntax stage passes trivially.
    Tree(Value),
    /// A typed policy, validated through its manifest form.
    Document(PolicyDocument),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    SyntaxChecked,
    SchemaChecked,
    Complete,
}

pub struct ValidationRun<'a> {
    config: &'a LintConfig,
    profile: &'a SchemaProfile,
    state: RunState,
    input: Option<ValidationInput>,
    /// Source text, kept for the line-level style checks.
    text: Option<Vec<u8>>,
    tree: Option<Value>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ValidationRun<'a> {
    pub fn new(input: ValidationInput, config: &'a LintConfig, profile: &'a SchemaProfile) -> Self {
        Self {
            config,
            profile,
            state: RunState::Pending,
            input: Some(input),
            text: None,
            tree: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Diagnostics gathered so far, unfiltered.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Run the next stage and return the new state.
    pub fn step(&mut self) -> RunState {
        self.state = match self.state {
            RunState::Pending => self.check_syntax(),
            RunState::SyntaxChecked => {
                if let Some(tree) = &self.tree {
                    let found = check_schema_with(tree, self.profile);
                    self.record(Stage::Schema, found);
                }
                RunState::SchemaChecked
            }
            RunState::SchemaChecked => {
                if let Some(tree) = &self.tree {
                    let mut style = check_style(tree, self.config);
                    if let Some(text) = self.text.take() {
                        style.extend(check_text(&text));
                    }
                    let logic = check_logic(tree);
                    self.record(Stage::Style, style);
                    self.record(Stage::Logic, logic);
                }
                RunState::Complete
            }
            RunState::Complete => RunState::Complete,
        };
        self.state
    }

    /// Run the remaining stages and seal the report.
    pub fn finish(mut self) -> Report {
        while self.step() != RunState::Complete {}
        seal(self.diagnostics, self.config)
    }

    fn check_syntax(&mut self) -> RunState {
        let parsed = match self.input.take() {
            Some(ValidationInput::Raw(raw)) => {
                let parsed = parse_checked(&raw);
                self.text = Some(raw);
                parsed
            }
            Some(ValidationInput::Tree(tree)) => Ok(tree),
            Some(ValidationInput::Document(doc)) => to_tree(&doc).map_err(|err| Diagnostic {
                severity: Severity::Error,
                stage: Stage::Syntax,
                location: "root".to_string(),
                message: format!("policy could not be serialized: {err}"),
                code: "syntax_error".to_string(),
            }),
            None => return RunState::Complete,
        };
        match parsed {
            Ok(tree) => {
                self.record(Stage::Syntax, Vec::new());
                self.tree = Some(tree);
                RunState::SyntaxChecked
            }
            Err(diagnostic) => {
                self.record(Stage::Syntax, vec![diagnostic]);
                // Line checks often explain the parse failure (tabs).
                if let Some(text) = self.text.take() {
                    self.record(Stage::Style, check_text(&text));
                }
                RunState::Complete
            }
        }
    }

    fn record(&mut self, stage: Stage, found: Vec<Diagnostic>) {
        tracing::debug!(%stage, diagnostics = found.len(), "validation stage finished");
        self.diagnostics.extend(found);
    }
}

/// Validate against the built-in schema profile.
pub fn build_report(input: ValidationInput, config: &LintConfig) -> Report {
    build_report_with_profile(input, config, &default_schema_profile())
}

pub fn build_report_with_profile(
    input: ValidationInput,
    config: &LintConfig,
    profile: &SchemaProfile,
) -> Report {
    ValidationRun::new(input, config, profile).finish()
}

/// Report for input that could not be parsed at all, with the line checks
/// of its text.
pub fn syntax_failure_report(err: &ParseError, raw: &[u8], config: &LintConfig) -> Report {
    let mut diagnostics = vec![syntax_diagnostic(err)];
    diagnostics.extend(check_text(raw));
    seal(diagnostics, config)
}

fn seal(diagnostics: Vec<Diagnostic>, config: &LintConfig) -> Report {
    let kept: Vec<Diagnostic> = diagnostics
        .into_iter()
        .filter(|d| d.severity == Severity::Error || !config.is_disabled(&d.code))
        .collect();
    let suggestions = suggest(&kept);
    Report::new(kept, suggestions)
}

/// Plain-text report. `schema_source` adds the schema line for verbose output.
pub fn render_report_text(identity: &str, report: &Report, schema_source: Option<&str>) -> String {
    let mut out = Vec::new();
    out.push(format!("validate file={identity} valid={}", report.valid()));
    if let Some(source) = schema_source {
        out.push(format!("Using schema: {source}"));
    }
    out.push(format!(
        "result errors={} warnings={} infos={}",
        report.errors(),
        report.warnings(),
        report.count(Severity::Info)
    ));
    out.push("diagnostics".to_string());
    if report.diagnostics().is_empty() {
        out.push("- none".to_string());
    }
    for d in report.diagnostics() {
        out.push(format!(
            "- [{}] {} {} {}: {}",
            d.severity.as_str(),
            d.stage,
            d.location,
            d.code,
            d.message
        ));
    }
    if !report.suggestions().is_empty() {
        out.push("suggestions".to_string());
        for suggestion in report.suggestions() {
            out.push(format!("- {suggestion}"));
        }
    }
    out.join("\n")
}
