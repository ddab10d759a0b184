use policy_tree::{parse, ParseError, Value};

use crate::diagnostic::{Diagnostic, Severity, Stage};

/// Check that raw input is one well-formed JSON or YAML document.
///
/// Returns either nothing or exactly one ERROR at `root`.
pub fn check_syntax(raw: &[u8]) -> Vec<Diagnostic> {
    match parse_checked(raw) {
        Ok(_) => Vec::new(),
        Err(diagnostic) => vec![diagnostic],
    }
}

/// Parse raw input, turning a failure into its syntax diagnostic.
pub fn parse_checked(raw: &[u8]) -> Result<Value, Diagnostic> {
    parse(raw).map_err(|err| syntax_diagnostic(&err))
}

pub(crate) fn syntax_diagnostic(err: &ParseError) -> Diagnostic {
    let message = match err.position() {
        Some((line, column)) if !err.to_string().contains(&format!("line {line}")) => {
            format!("{err} (line {line}, column {column})")
        }
        _ => err.to_string(),
    };
    Diagnostic {
        severity: Severity::Error,
        stage: Stage::Syntax,
        location: "root".to_string(),
        message,
        code: "syntax_error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::check_syntax;
    use crate::diagnostic::{Severity, Stage};

    #[test]
    fn well_formed_yaml_passes() {
        assert!(check_syntax(b"spec:\n  endpointSelector: {}\n").is_empty());
    }

    #[test]
    fn broken_yaml_reports_line() {
        let diags = check_syntax(b"spec:\n  ingress: [\n    {fromEntities: [all]}\n");
        assert_eq!(diags.len(), 1);
        let diag = &diags[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.stage, Stage::Syntax);
        assert_eq!(diag.location, "root");
        assert_eq!(diag.code, "syntax_error");
        assert!(diag.message.contains("line"), "{}", diag.message);
    }

    #[test]
    fn broken_json_reports_line() {
        let diags = check_syntax(b"{\"spec\": {\"ingress\": [}\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("line 1"), "{}", diags[0].message);
    }

    #[test]
    fn duplicate_keys_are_syntax_errors() {
        assert_eq!(check_syntax(b"kind: a\nkind: b\n").len(), 1);
    }
}
