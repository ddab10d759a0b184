//! Style checks. Findings here never make a document invalid.

use ipnetwork::IpNetwork;
use policy_tree::{NodePath, TreeExt, Value};

use crate::convert::AMBIGUOUS_DIRECTION_ANNOTATION;
use crate::diagnostic::{location, Diagnostic, Findings, Severity, Stage};
use crate::endpoint::Selector;
use crate::lint_config::{LabelCase, LintConfig};
use crate::manifest::{lift_rule, lift_selector, spec_sites};
use crate::policy::Direction;

const SECTIONS: [(&str, Direction); 4] = [
    ("ingress", Direction::Ingress),
    ("ingressDeny", Direction::Ingress),
    ("egress", Direction::Egress),
    ("egressDeny", Direction::Egress),
];

pub fn check_style(tree: &Value, config: &LintConfig) -> Vec<Diagnostic> {
    let mut findings = Findings::new(Stage::Style, tree);
    if !tree.is_mapping() {
        return findings.finish();
    }
    let spec_paths: Vec<NodePath> = spec_sites(tree).into_iter().map(|site| site.path).collect();

    label_case(&mut findings, tree, &spec_paths, config.label_case);
    for path in &spec_paths {
        let Some(spec) = tree.resolve(path) else {
            continue;
        };
        for (key, direction) in SECTIONS {
            let Some(rules) = spec.child(key).and_then(Value::as_sequence) else {
                continue;
            };
            let section = path.key(key);
            if rules.is_empty() {
                findings.info(
                    &section,
                    "empty_section",
                    format!("{key} is an empty list; remove it or add rules"),
                );
            }
            duplicate_rules(&mut findings, &section, rules, direction);
            for (idx, rule) in rules.iter().enumerate() {
                rule_shape(&mut findings, &section.index(idx), rule, direction);
            }
        }
    }
    ambiguous_direction(&mut findings, tree);
    findings.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyStyle {
    /// One lowercase word; fits every convention.
    Neutral,
    Kebab,
    Snake,
    Camel,
    Mixed,
}

impl KeyStyle {
    fn of(key: &str) -> Self {
        let name = key.rsplit_once('/').map_or(key, |(_, name)| name);
        let name = name.rsplit_once(':').map_or(name, |(_, name)| name);
        if name.contains('.') {
            return KeyStyle::Neutral;
        }
        let dash = name.contains('-');
        let underscore = name.contains('_');
        let upper = name.chars().any(|c| c.is_ascii_uppercase());
        match (dash, underscore, upper) {
            (false, false, false) => KeyStyle::Neutral,
            (true, false, false) => KeyStyle::Kebab,
            (false, true, false) => KeyStyle::Snake,
            (false, false, true) if name.starts_with(|c: char| c.is_ascii_lowercase()) => {
                KeyStyle::Camel
            }
            _ => KeyStyle::Mixed,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            KeyStyle::Neutral => "lowercase",
            KeyStyle::Kebab => LabelCase::Kebab.as_str(),
            KeyStyle::Snake => LabelCase::Snake.as_str(),
            KeyStyle::Camel => LabelCase::Camel.as_str(),
            KeyStyle::Mixed => "mixed case",
        }
    }
}

fn label_case(findings: &mut Findings<'_>, tree: &Value, spec_paths: &[NodePath], case: LabelCase) {
    let keys = label_keys(tree, spec_paths);
    let styled: Vec<(&NodePath, &str, KeyStyle)> = keys
        .iter()
        .map(|(path, key)| (path, key.as_str(), KeyStyle::of(key)))
        .filter(|(_, _, style)| *style != KeyStyle::Neutral)
        .collect();

    let (target, configured) = match case {
        LabelCase::Kebab => (KeyStyle::Kebab, true),
        LabelCase::Snake => (KeyStyle::Snake, true),
        LabelCase::Camel => (KeyStyle::Camel, true),
        LabelCase::Auto => {
            let mut best: Option<(KeyStyle, usize)> = None;
            for (_, _, style) in &styled {
                if *style == KeyStyle::Mixed {
                    continue;
                }
                let count = styled.iter().filter(|(_, _, s)| s == style).count();
                if best.map_or(true, |(_, n)| count > n) {
                    best = Some((*style, count));
                }
            }
            match best {
                Some((style, _)) => (style, false),
                None => return,
            }
        }
    };

    for (path, key, style) in styled {
        if style == target {
            continue;
        }
        let message = if configured {
            format!(
                "label key '{key}' is {}; configured convention is {}",
                style.as_str(),
                target.as_str()
            )
        } else {
            format!(
                "label key '{key}' is {}; most keys in this document are {}",
                style.as_str(),
                target.as_str()
            )
        };
        findings.warn(path, "inconsistent_label_case", message);
    }
}

/// Every label key written in the document, with the path of its node.
fn label_keys(tree: &Value, spec_paths: &[NodePath]) -> Vec<(NodePath, String)> {
    let mut out = Vec::new();
    let labels = NodePath::root().key("metadata").key("labels");
    if let Some(map) = tree.resolve(&labels) {
        out.extend(map.key_names().into_iter().map(|k| (labels.key(k), k.to_string())));
    }
    for path in spec_paths {
        let Some(spec) = tree.resolve(path) else {
            continue;
        };
        for key in ["endpointSelector", "nodeSelector"] {
            if let Some(selector) = spec.child(key) {
                selector_keys(&mut out, &path.key(key), selector);
            }
        }
        for (section, direction) in SECTIONS {
            let Some(rules) = spec.child(section).and_then(Value::as_sequence) else {
                continue;
            };
            for (idx, rule) in rules.iter().enumerate() {
                let rule_path = path.key(section).index(idx);
                for peers in [direction.endpoints_key(), direction.requires_key()] {
                    let Some(items) = rule.child(peers).and_then(Value::as_sequence) else {
                        continue;
                    };
                    for (pos, item) in items.iter().enumerate() {
                        selector_keys(&mut out, &rule_path.key(peers).index(pos), item);
                    }
                }
            }
        }
    }
    out
}

fn selector_keys(out: &mut Vec<(NodePath, String)>, path: &NodePath, selector: &Value) {
    if let Some(labels) = selector.child("matchLabels") {
        let labels_path = path.key("matchLabels");
        out.extend(
            labels
                .key_names()
                .into_iter()
                .map(|k| (labels_path.key(k), k.to_string())),
        );
    }
    if let Some(exprs) = selector.child("matchExpressions").and_then(Value::as_sequence) {
        let exprs_path = path.key("matchExpressions");
        for (idx, expr) in exprs.iter().enumerate() {
            if let Some(key) = expr.child_str("key") {
                out.push((exprs_path.index(idx).key("key"), key.to_string()));
            }
        }
    }
}

fn duplicate_rules(findings: &mut Findings<'_>, section: &NodePath, rules: &[Value], direction: Direction) {
    for (idx, rule) in rules.iter().enumerate() {
        if !rule.is_mapping() {
            continue;
        }
        let Some(first) = rules[..idx]
            .iter()
            .position(|earlier| same_rule(earlier, rule, direction))
        else {
            continue;
        };
        let here = section.index(idx);
        findings.warn(
            &here,
            "duplicate_rule",
            format!(
                "duplicate rule at {}; identical to {}",
                location(&here),
                location(&section.index(first))
            ),
        );
    }
}

/// Written identically, or equal once lifted when lifting loses nothing.
fn same_rule(a: &Value, b: &Value, direction: Direction) -> bool {
    if a == b {
        return true;
    }
    let (lifted_a, lifted_b) = (lift_rule(a, direction), lift_rule(b, direction));
    let lossless = |node: &Value, rule: &crate::policy::PolicyRule| {
        node.is_mapping()
            && !rule.opaque_peers
            && !rule.has_l7()
            && node.child(direction.cidr_set_key()).is_none()
    };
    lossless(a, &lifted_a) && lossless(b, &lifted_b) && lifted_a == lifted_b
}

fn rule_shape(findings: &mut Findings<'_>, path: &NodePath, rule: &Value, direction: Direction) {
    let Some(map) = rule.as_mapping() else {
        return;
    };
    if map.is_empty() {
        findings.info(
            path,
            "empty_rule",
            format!(
                "empty rule allows nothing; it only puts {direction} under default deny"
            ),
        );
        return;
    }

    let peer_keys = [
        direction.endpoints_key(),
        direction.requires_key(),
        direction.cidr_key(),
        direction.cidr_set_key(),
        direction.entities_key(),
    ];
    for key in peer_keys {
        let Some(items) = rule.child(key).and_then(Value::as_sequence) else {
            continue;
        };
        let list = path.key(key);
        if items.is_empty() {
            findings.info(
                &list,
                "empty_peer_list",
                format!("{key} is an empty list and matches no peer"),
            );
            continue;
        }
        if key == direction.endpoints_key() || key == direction.requires_key() {
            let selectors: Vec<Option<Selector>> = items
                .iter()
                .map(|item| item.is_mapping().then(|| lift_selector(item)))
                .collect();
            repeated_peers(findings, &list, &selectors);
        } else if key == direction.cidr_key() {
            let cidrs: Vec<Option<String>> = items.iter().map(cidr_identity).collect();
            repeated_peers(findings, &list, &cidrs);
        } else {
            let raw: Vec<Option<&Value>> = items.iter().map(Some).collect();
            repeated_peers(findings, &list, &raw);
        }
    }

    if let Some(port_rules) = rule.child("toPorts").and_then(Value::as_sequence) {
        for (idx, port_rule) in port_rules.iter().enumerate() {
            let Some(ports) = port_rule.child("ports").and_then(Value::as_sequence) else {
                continue;
            };
            port_order(findings, &path.key("toPorts").index(idx).key("ports"), ports);
        }
    }
}

fn cidr_identity(item: &Value) -> Option<String> {
    let raw = item.as_str()?.trim();
    Some(match raw.parse::<IpNetwork>() {
        Ok(net) => format!("{}/{}", net.network(), net.prefix()),
        Err(_) => raw.to_string(),
    })
}

fn repeated_peers<K: PartialEq>(findings: &mut Findings<'_>, list: &NodePath, keys: &[Option<K>]) {
    for (idx, key) in keys.iter().enumerate() {
        let Some(key) = key else {
            continue;
        };
        if let Some(first) = keys[..idx].iter().position(|k| k.as_ref() == Some(key)) {
            let here = list.index(idx);
            findings.warn(
                &here,
                "duplicate_peer",
                format!(
                    "peer at {} repeats {}",
                    location(&here),
                    location(&list.index(first))
                ),
            );
        }
    }
}

fn port_order(findings: &mut Findings<'_>, path: &NodePath, ports: &[Value]) {
    let mut previous: Option<u64> = None;
    let mut reported = false;
    for (idx, entry) in ports.iter().enumerate() {
        let Some(port) = entry.child("port").and_then(numeric_port) else {
            continue;
        };
        if let Some(prev) = previous.filter(|prev| port < *prev) {
            if !reported {
                findings.info(
                    path,
                    "ports_not_ascending",
                    format!("ports are not in ascending order ({prev} is listed before {port})"),
                );
                reported = true;
            }
        }
        previous = Some(port);
        if entry
            .child("endPort")
            .and_then(Value::as_u64)
            .is_some_and(|end| end == port)
        {
            findings.info(
                &path.index(idx).key("endPort"),
                "redundant_end_port",
                format!("endPort equals port {port}; drop endPort"),
            );
        }
    }
}

fn numeric_port(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn ambiguous_direction(findings: &mut Findings<'_>, tree: &Value) {
    let annotation = NodePath::root()
        .key("metadata")
        .key("annotations")
        .key(AMBIGUOUS_DIRECTION_ANNOTATION);
    let Some(value) = tree.resolve(&annotation).and_then(Value::as_str) else {
        return;
    };
    let base = if tree.child("spec").is_some() {
        NodePath::root().key("spec")
    } else {
        NodePath::root()
    };
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let target = entry
            .strip_suffix(']')
            .and_then(|rest| rest.split_once('['))
            .and_then(|(section, idx)| Some(base.key(section).index(idx.parse().ok()?)))
            .filter(|path| tree.resolve(path).is_some());
        let path = target.as_ref().unwrap_or(&annotation);
        findings.info(
            path,
            "ambiguous_direction",
            format!(
                "direction of {entry} was inferred: both endpoints are label selectors, so the destination is the protected workload"
            ),
        );
    }
}

/// Longest line accepted by the text checks, in characters.
pub const MAX_LINE_LEN: usize = 120;

/// Line-level checks over the raw text of one document.
///
/// Locations read `line N` (1-based). A line is never too long when, past its
/// indentation and any `- ` or `# ` lead-in, it holds a single unbreakable
/// word such as a URL.
pub fn check_text(raw: &[u8]) -> Vec<Diagnostic> {
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let at = |severity, code: &str, message: String| Diagnostic {
            severity,
            stage: Stage::Style,
            location: format!("line {}", idx + 1),
            message,
            code: code.to_string(),
        };
        let indent: &str = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        if indent.contains('\t') {
            out.push(at(
                Severity::Warning,
                "tab_indentation",
                "indentation uses tabs; YAML indentation must be spaces".to_string(),
            ));
        }
        let width = line.chars().count();
        if width > MAX_LINE_LEN && !unbreakable(line) {
            out.push(at(
                Severity::Warning,
                "line_too_long",
                format!("line too long ({width} > {MAX_LINE_LEN} characters)"),
            ));
        }
        if line.ends_with([' ', '\t']) {
            out.push(at(Severity::Info, "trailing_spaces", "trailing spaces".to_string()));
        }
    }
    out
}

fn unbreakable(line: &str) -> bool {
    let body = line.trim_start();
    let body = body
        .strip_prefix("- ")
        .or_else(|| body.strip_prefix("# "))
        .unwrap_or(body);
    !body.trim_end().contains(' ')
}

#[cfg(test)]
mod tests {
    use policy_tree::{parse, to_tree};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{check_style, check_text, MAX_LINE_LEN};
    use crate::convert::convert;
    use crate::diagnostic::{Diagnostic, Severity};
    use crate::lint_config::{LabelCase, LintConfig};
    use crate::rule::parse_rules;

    fn style(yaml: &str, config: &LintConfig) -> Vec<Diagnostic> {
        check_style(&parse(yaml.as_bytes()).expect("parse"), config)
    }

    fn codes(diags: &[Diagnostic]) -> Vec<(&str, &str)> {
        diags
            .iter()
            .map(|d| (d.code.as_str(), d.location.as_str()))
            .collect()
    }

    #[test]
    fn identical_rules_are_duplicates() {
        let yaml = r#"
spec:
  endpointSelector: {matchLabels: {app: web}}
  ingress:
    - fromEndpoints: [{matchLabels: {app: frontend}}]
      toPorts: [{ports: [{port: "80", protocol: TCP}]}]
    - toPorts: [{ports: [{protocol: TCP, port: "80"}]}]
      fromEndpoints: [{matchLabels: {app: frontend}}]
"#;
        let diags = style(yaml, &LintConfig::default());
        assert_eq!(codes(&diags), vec![("duplicate_rule", "ingress[1]")]);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(diags[0].message.contains("duplicate rule at ingress[1]"));
    }

    #[test]
    fn numeric_and_string_ports_lift_equal() {
        let yaml = r#"
endpointSelector: {matchLabels: {app: web}}
egress:
  - toCIDR: [10.0.0.0/8]
    toPorts: [{ports: [{port: 53, protocol: UDP}]}]
  - toCIDR: [10.0.0.0/8]
    toPorts: [{ports: [{port: "53", protocol: UDP}]}]
"#;
        assert_eq!(
            codes(&style(yaml, &LintConfig::default())),
            vec![("duplicate_rule", "egress[1]")]
        );
    }

    #[test]
    fn descending_ports_and_redundant_end_port() {
        let yaml = r#"
endpointSelector: {matchLabels: {app: web}}
ingress:
  - fromEntities: [world]
    toPorts:
      - ports:
          - {port: "443", protocol: TCP}
          - {port: "80", endPort: 80, protocol: TCP}
"#;
        assert_eq!(
            codes(&style(yaml, &LintConfig::default())),
            vec![
                ("ports_not_ascending", "ingress[0].toPorts[0].ports"),
                ("redundant_end_port", "ingress[0].toPorts[0].ports[1].endPort"),
            ]
        );
    }

    #[test]
    fn empty_sections_rules_and_peer_lists() {
        let yaml = r#"
endpointSelector: {matchLabels: {app: web}}
ingress: []
egress:
  - {}
  - toEndpoints: []
    toEntities: [world, world]
"#;
        assert_eq!(
            codes(&style(yaml, &LintConfig::default())),
            vec![
                ("empty_section", "ingress"),
                ("empty_rule", "egress[0]"),
                ("empty_peer_list", "egress[1].toEndpoints"),
                ("duplicate_peer", "egress[1].toEntities[1]"),
            ]
        );
    }

    #[test]
    fn label_case_follows_dominant_convention() {
        let yaml = r#"
endpointSelector:
  matchLabels:
    app-name: web
    tier-level: front
    appTeam: edge
ingress:
  - fromEndpoints:
      - matchLabels: {app: a}
"#;
        let diags = style(yaml, &LintConfig::default());
        assert_eq!(
            codes(&diags),
            vec![("inconsistent_label_case", "endpointSelector.matchLabels.appTeam")]
        );
        assert!(diags[0].message.contains("kebab-case"));
    }

    #[test]
    fn configured_label_case_wins() {
        let yaml = "endpointSelector:\n  matchLabels:\n    app-name: web\n    team_name: edge\ningress: [{fromEntities: [world]}]\n";
        let config = LintConfig {
            label_case: LabelCase::Snake,
            disabled: Vec::new(),
        };
        assert_eq!(
            codes(&style(yaml, &config)),
            vec![("inconsistent_label_case", "endpointSelector.matchLabels.app-name")]
        );
    }

    #[test]
    fn converted_ambiguous_rule_is_reported() {
        let rules = parse_rules(&json!([{"src": "frontend", "dest": "backend", "port": 8080}]))
            .expect("rules");
        let tree = to_tree(&convert(&rules).expect("convert")).expect("tree");
        let diags = check_style(&tree, &LintConfig::default());
        assert_eq!(codes(&diags), vec![("ambiguous_direction", "ingress[0]")]);
        assert_eq!(diags[0].severity, Severity::Info);
    }

    #[test]
    fn text_checks_report_lines() {
        let long = format!("  description: {}", "word ".repeat(30));
        let raw = format!("spec:\n  endpointSelector: {{}} \n\tingress: []\n{long}\n");
        let diags = check_text(raw.as_bytes());
        assert_eq!(
            codes(&diags),
            vec![
                ("trailing_spaces", "line 2"),
                ("tab_indentation", "line 3"),
                ("line_too_long", "line 4"),
                ("trailing_spaces", "line 4"),
            ]
        );
        assert_eq!(diags[0].severity, Severity::Info);
        assert_eq!(diags[1].severity, Severity::Warning);
        assert!(diags[2].message.contains(&format!("> {MAX_LINE_LEN}")));
    }

    #[test]
    fn long_unbreakable_word_is_allowed() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_LINE_LEN));
        let raw = format!("# {url}\nitems:\n  - {url}\n");
        assert!(check_text(raw.as_bytes()).is_empty());
    }

    #[test]
    fn converted_policy_text_is_clean() {
        let rules = parse_rules(&json!([
            {"src": "any", "dst": {"app": "web"}, "ports": [80, [8000, 8080]], "proto": "tcp", "action": "allow"}
        ]))
        .expect("rules");
        let text = policy_tree::write(&convert(&rules).expect("convert"), policy_tree::Format::Yaml)
            .expect("yaml");
        assert!(check_text(text.as_bytes()).is_empty(), "{text}");
    }
}
