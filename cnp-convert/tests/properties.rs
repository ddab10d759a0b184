use std::collections::BTreeSet;

use cnp_convert::convert::{convert, ConversionErrorKind};
use cnp_convert::diagnostic::{Severity, Stage};
use cnp_convert::endpoint::{Endpoint, Selector};
use cnp_convert::lint_config::LintConfig;
use cnp_convert::manifest::spec_sites;
use cnp_convert::policy::{Direction, PolicyRule};
use cnp_convert::port::normalize_ports;
use cnp_convert::rule::{parse_rules, FirewallRule};
use cnp_convert::verify::{build_report, ValidationInput};
use policy_tree::{to_tree, write, Format, Mapping};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn source_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!("any")),
        (0u8..4, 0u8..4).prop_map(|(a, b)| json!(format!("10.{a}.{b}.0/24"))),
        prop::sample::select(vec!["frontend", "batch", "metrics"])
            .prop_map(|role| json!({ "role": role })),
    ]
}

fn port_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (1u16..=1024).prop_map(|p| json!(p)),
        (1u16..=60000, 0u16..500).prop_map(|(low, span)| json!([low, low + span])),
    ]
}

fn rule_strategy() -> impl Strategy<Value = Value> {
    (
        source_strategy(),
        prop::collection::vec(port_strategy(), 1..4),
        prop::sample::select(vec!["TCP", "UDP"]),
    )
        .prop_map(|(source, ports, protocol)| {
            json!({
                "source": source,
                "destination": { "app": "web" },
                "ports": ports,
                "protocol": protocol,
                "action": "ALLOW",
            })
        })
}

fn rules_strategy() -> impl Strategy<Value = Vec<FirewallRule>> {
    prop::collection::vec(rule_strategy(), 1..8).prop_map(|rules| {
        parse_rules(&Value::Array(rules)).expect("generated rules parse")
    })
}

fn peer_key(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Any => "entity:all".to_string(),
        Endpoint::Cidr(net) => format!("cidr:{net}"),
        Endpoint::Labels(labels) => format!("sel:{:?}", Selector::from_labels(labels.clone())),
    }
}

fn rule_peer_keys(rule: &PolicyRule) -> BTreeSet<String> {
    rule.entities
        .iter()
        .map(|e| format!("entity:{e}"))
        .chain(rule.cidrs.iter().map(|c| format!("cidr:{c}")))
        .chain(rule.endpoints.iter().map(|s| format!("sel:{s:?}")))
        .collect()
}

fn rule_ports(rule: &PolicyRule) -> Vec<(String, u16, u16)> {
    rule.port_entries()
        .map(|entry| {
            let (low, high) = entry.range().expect("numeric port");
            (entry.protocol.as_str().to_string(), low, high)
        })
        .collect()
}

fn expected_ports(rules: &[FirewallRule]) -> Vec<(String, u16, u16)> {
    normalize_ports(rules.iter().flat_map(FirewallRule::effective_ports))
        .into_iter()
        .map(|(protocol, range)| (protocol.as_str().to_string(), range.low, range.high))
        .collect()
}

fn labelled_rule(key: &str, value: &str, team: &str) -> Value {
    let mut destination = Map::new();
    destination.insert(key.to_string(), json!(value));
    json!({
        "source": "any",
        "destination": destination,
        "ports": [443],
        "protocol": "TCP",
        "action": "ALLOW",
        "labels": { "team": team },
    })
}

proptest! {
    #[test]
    fn conversion_is_deterministic(rules in rules_strategy()) {
        let first = convert(&rules).expect("convert");
        let second = convert(&rules).expect("convert");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(
            write(&first, Format::Yaml).expect("write"),
            write(&second, Format::Yaml).expect("write")
        );
    }

    #[test]
    fn converted_documents_have_no_schema_errors(rules in rules_strategy()) {
        let doc = convert(&rules).expect("convert");
        let report = build_report(ValidationInput::Document(doc), &LintConfig::default());
        let schema_errors = report
            .diagnostics()
            .iter()
            .filter(|d| d.stage == Stage::Schema && d.severity == Severity::Error)
            .count();
        prop_assert_eq!(schema_errors, 0);
        prop_assert!(report.valid());
    }

    #[test]
    fn validation_is_idempotent_across_serialization(rules in rules_strategy()) {
        let doc = convert(&rules).expect("convert");
        let text = write(&doc, Format::Yaml).expect("write");
        let from_text = build_report(ValidationInput::Raw(text.clone().into_bytes()), &LintConfig::default());
        let again = build_report(ValidationInput::Raw(text.into_bytes()), &LintConfig::default());
        let from_doc = build_report(ValidationInput::Document(doc), &LintConfig::default());
        prop_assert_eq!(&from_text, &again);
        prop_assert_eq!(from_text.diagnostics(), from_doc.diagnostics());
    }

    #[test]
    fn valid_exactly_when_no_errors(rules in rules_strategy(), drop_selector in any::<bool>()) {
        let doc = convert(&rules).expect("convert");
        let mut tree = to_tree(&doc).expect("tree");
        if drop_selector {
            if let Some(spec) = tree.get_mut("spec").and_then(|s| s.as_mapping_mut()) {
                spec.insert("endpointSelector".into(), Mapping::new().into());
            }
        }
        let report = build_report(ValidationInput::Tree(tree), &LintConfig::default());
        prop_assert_eq!(report.valid(), report.errors() == 0);
        prop_assert_eq!(report.valid(), !drop_selector);
    }

    #[test]
    fn rules_to_one_destination_merge_into_one_rule(rules in rules_strategy()) {
        let doc = convert(&rules).expect("convert");
        prop_assert!(doc.egress.is_empty());
        prop_assert_eq!(doc.ingress.len(), 1);

        let peers: BTreeSet<String> = rules.iter().map(|r| peer_key(&r.source)).collect();
        prop_assert_eq!(rule_peer_keys(&doc.ingress[0]), peers);
        prop_assert_eq!(rule_ports(&doc.ingress[0]), expected_ports(&rules));
    }

    #[test]
    fn disjoint_ports_to_one_destination_union(
        first in source_strategy(),
        second in source_strategy(),
        low in 1u16..30000,
        high in 30001u16..=65535,
    ) {
        let input = json!([
            {"source": first, "destination": {"app": "db"}, "ports": [low], "protocol": "TCP", "action": "ALLOW"},
            {"source": second, "destination": {"app": "db"}, "ports": [high], "protocol": "TCP", "action": "ALLOW"},
        ]);
        let rules = parse_rules(&input).expect("rules");
        let doc = convert(&rules).expect("convert");
        prop_assert_eq!(doc.ingress.len(), 1);
        prop_assert_eq!(
            rule_ports(&doc.ingress[0]),
            vec![("TCP".to_string(), low, low), ("TCP".to_string(), high, high)]
        );
    }

    #[test]
    fn accepted_labels_pass_the_schema(
        key in "[a-zA-Z0-9 ._/:-]{0,70}",
        value in "[a-zA-Z0-9 ._-]{0,70}",
        team in "[a-zA-Z0-9 ._-]{0,20}",
    ) {
        let input = Value::Array(vec![labelled_rule(&key, &value, &team)]);
        let converted = parse_rules(&input).and_then(|rules| convert(&rules));
        match converted {
            Ok(doc) => {
                let report = build_report(ValidationInput::Document(doc), &LintConfig::default());
                let schema_errors: Vec<String> = report
                    .diagnostics()
                    .iter()
                    .filter(|d| d.stage == Stage::Schema && d.severity == Severity::Error)
                    .map(|d| format!("{} {}", d.code, d.location))
                    .collect();
                prop_assert!(schema_errors.is_empty(), "{:?}", schema_errors);
            }
            Err(err) => prop_assert!(matches!(
                err.kind(),
                ConversionErrorKind::InvalidEndpoint | ConversionErrorKind::MalformedInput
            )),
        }
    }

    #[test]
    fn converted_rules_lift_back_unchanged(rules in rules_strategy()) {
        let doc = convert(&rules).expect("convert");
        let tree = to_tree(&doc).expect("tree");
        let sites = spec_sites(&tree);
        prop_assert_eq!(sites.len(), 1);
        prop_assert_eq!(sites[0].rules(Direction::Ingress), doc.ingress.as_slice());
        prop_assert_eq!(sites[0].selector.as_ref(), Some(&doc.endpoint_selector));
    }
}
