use std::fmt::{self, Display, Formatter};

use policy_tree::{NodePath, Segment, TreeExt, Value};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Sort rank at a shared location: errors first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Error => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// Pipeline phase that produced a diagnostic, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Syntax,
    Schema,
    Style,
    Logic,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Syntax => "syntax",
            Stage::Schema => "schema",
            Stage::Style => "style",
            Stage::Logic => "logic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub location: String,
    pub message: String,
    pub code: String,
}

/// Outcome of validating one document.
///
/// `valid` is derived from the diagnostics when the report is built and the
/// report is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    valid: bool,
    diagnostics: Vec<Diagnostic>,
    suggestions: Vec<String>,
}

impl Report {
    pub fn new(diagnostics: Vec<Diagnostic>, suggestions: Vec<String>) -> Self {
        Self {
            valid: !diagnostics.iter().any(|d| d.severity == Severity::Error),
            diagnostics,
            suggestions,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }
}

/// Render a tree path as a diagnostic location.
///
/// The single-spec envelope prefix `spec` is dropped so locations read
/// `ingress[2].toPorts[0]`; `specs[i]` prefixes are kept.
pub fn location(path: &NodePath) -> String {
    match path.segments().first() {
        Some(Segment::Key(key)) if key == "spec" => {
            let spec = NodePath::root().key("spec");
            match path.strip_prefix(&spec) {
                Some(rest) if rest.is_root() => "spec".to_string(),
                Some(rest) => rest.to_string(),
                None => path.to_string(),
            }
        }
        _ => path.to_string(),
    }
}

/// Collects one stage's findings and orders them by document position.
pub(crate) struct Findings<'a> {
    stage: Stage,
    tree: &'a Value,
    items: Vec<(Vec<usize>, Diagnostic)>,
}

impl<'a> Findings<'a> {
    pub(crate) fn new(stage: Stage, tree: &'a Value) -> Self {
        Self {
            stage,
            tree,
            items: Vec::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        severity: Severity,
        path: &NodePath,
        code: &str,
        message: impl Into<String>,
    ) {
        self.items.push((
            self.tree.position_of(path),
            Diagnostic {
                severity,
                stage: self.stage,
                location: location(path),
                message: message.into(),
                code: code.to_string(),
            },
        ));
    }

    pub(crate) fn error(&mut self, path: &NodePath, code: &str, message: impl Into<String>) {
        self.push(Severity::Error, path, code, message);
    }

    pub(crate) fn warn(&mut self, path: &NodePath, code: &str, message: impl Into<String>) {
        self.push(Severity::Warning, path, code, message);
    }

    pub(crate) fn info(&mut self, path: &NodePath, code: &str, message: impl Into<String>) {
        self.push(Severity::Info, path, code, message);
    }

    /// Document order, then errors before warnings before infos, then
    /// emission order.
    pub(crate) fn finish(mut self) -> Vec<Diagnostic> {
        self.items
            .sort_by(|(a, da), (b, db)| a.cmp(b).then(da.severity.rank().cmp(&db.severity.rank())));
        self.items.into_iter().map(|(_, d)| d).collect()
    }
}

#[cfg(test)]
mod tests {
    use policy_tree::{parse, NodePath};

    use super::{location, Findings, Report, Severity, Stage};

    #[test]
    fn location_drops_single_spec_prefix() {
        let spec = NodePath::root().key("spec");
        assert_eq!(location(&spec.key("ingress").index(1)), "ingress[1]");
        assert_eq!(location(&spec), "spec");
        assert_eq!(location(&NodePath::root().key("specs").index(0).key("egress")), "specs[0].egress");
        assert_eq!(location(&NodePath::root().key("metadata").key("name")), "metadata.name");
        assert_eq!(location(&NodePath::root()), "root");
    }

    #[test]
    fn findings_sort_by_position_then_severity() {
        let tree = parse(b"ingress: [{}]\negress: [{}]\n").expect("parse");
        let ingress = NodePath::root().key("ingress").index(0);
        let egress = NodePath::root().key("egress").index(0);
        let mut findings = Findings::new(Stage::Logic, &tree);
        findings.info(&egress, "c", "third");
        findings.warn(&ingress, "b", "second");
        findings.error(&ingress, "a", "first");
        let codes: Vec<String> = findings.finish().into_iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["a", "b", "c"]);
    }

    #[test]
    fn report_validity_follows_errors() {
        let tree = parse(b"a: 1\n").expect("parse");
        let mut findings = Findings::new(Stage::Style, &tree);
        findings.warn(&NodePath::root().key("a"), "w", "warning only");
        let report = Report::new(findings.finish(), Vec::new());
        assert!(report.valid());
        assert_eq!(report.count(Severity::Warning), 1);

        let mut findings = Findings::new(Stage::Schema, &tree);
        findings.error(&NodePath::root(), "e", "broken");
        assert!(!Report::new(findings.finish(), Vec::new()).valid());
    }
}
