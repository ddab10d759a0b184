use cnp_convert::convert::{convert, ConversionErrorKind};
use cnp_convert::diagnostic::{Severity, Stage};
use cnp_convert::lint_config::LintConfig;
use cnp_convert::policy::PortValue;
use cnp_convert::port::Protocol;
use cnp_convert::rule::parse_rules_str;
use cnp_convert::verify::{build_report, ValidationInput};
use pretty_assertions::assert_eq;

fn validate(yaml: &str) -> cnp_convert::diagnostic::Report {
    build_report(
        ValidationInput::Raw(yaml.as_bytes().to_vec()),
        &LintConfig::default(),
    )
}

#[test]
fn single_allow_rule_becomes_valid_ingress_policy() {
    let rules = parse_rules_str(
        r#"[{"source": "any", "destination": {"app": "web"}, "ports": [80],
             "protocol": "TCP", "action": "ALLOW"}]"#,
    )
    .expect("parse");
    let doc = convert(&rules).expect("convert");

    let ports = doc.ingress[0].to_ports.as_ref().expect("toPorts");
    let port = &ports[0].ports[0];
    assert_eq!(port.port, PortValue::Number(80));
    assert_eq!(port.end_port, None);
    assert_eq!(port.protocol, Protocol::Tcp);

    let report = build_report(ValidationInput::Document(doc), &LintConfig::default());
    assert!(report.valid());
}

#[test]
fn empty_endpoint_selector_is_one_schema_error() {
    let report = validate(
        r#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata:
  name: open
spec:
  endpointSelector: {}
  ingress:
    - fromEntities: [cluster]
      toPorts:
        - ports:
            - port: "80"
              protocol: TCP
"#,
    );
    assert!(!report.valid());
    assert_eq!(report.errors(), 1);
    let error = report
        .diagnostics()
        .iter()
        .find(|d| d.severity == Severity::Error)
        .expect("error");
    assert_eq!(error.stage, Stage::Schema);
    assert_eq!(error.location, "endpointSelector");
}

#[test]
fn identical_rules_warn_once_without_invalidating() {
    let report = validate(
        r#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata:
  name: twice
spec:
  endpointSelector:
    matchLabels:
      app: web
  ingress:
    - fromEndpoints:
        - matchLabels:
            app: frontend
      toPorts:
        - ports:
            - port: "80"
              protocol: TCP
    - fromEndpoints:
        - matchLabels:
            app: frontend
      toPorts:
        - ports:
            - port: "80"
              protocol: TCP
"#,
    );
    assert!(report.valid());
    assert_eq!(report.warnings(), 1);
    let warning = report
        .diagnostics()
        .iter()
        .find(|d| d.severity == Severity::Warning)
        .expect("warning");
    assert_eq!(warning.code, "duplicate_rule");
    assert!(warning.message.contains("duplicate rule at ingress[1]"));
}

#[test]
fn deny_rule_fails_conversion_naming_the_rule() {
    let rules = parse_rules_str(
        r#"[{"id": "allow-web", "source": "any", "destination": {"app": "web"},
             "ports": [80], "protocol": "TCP", "action": "ALLOW"},
            {"id": "block-telnet", "source": "any", "destination": {"app": "web"},
             "ports": [23], "protocol": "TCP", "action": "DENY"}]"#,
    )
    .expect("parse");
    let err = convert(&rules).expect_err("deny must fail");
    assert_eq!(err.kind(), ConversionErrorKind::UnsupportedDeny);
    assert_eq!(err.rule_id(), Some("block-telnet"));
}

#[test]
fn conflicting_required_labels_are_contradictory() {
    let report = validate(
        r#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata:
  name: conflict
spec:
  endpointSelector:
    matchLabels:
      app: api
  ingress:
    - fromEndpoints:
        - matchLabels:
            app: web
      fromRequires:
        - matchLabels:
            app: db
"#,
    );
    assert!(!report.valid());
    let error = report
        .diagnostics()
        .iter()
        .find(|d| d.severity == Severity::Error)
        .expect("error");
    assert_eq!(error.stage, Stage::Logic);
    assert_eq!(error.code, "contradictory_selector");
    assert!(error.message.contains("contradictory selector"));
    assert_eq!(error.location, "ingress[0]");
}
