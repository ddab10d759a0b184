//! CiliumNetworkPolicy wire format.
//!
//! Writing goes through borrowed wire structs so a [`PolicyDocument`]
//! serializes straight into `apiVersion`/`kind`/`metadata`/`spec`.
//!
//! Reading is lenient: [`spec_sites`] lifts whatever policy specs a parsed
//! tree holds into typed rules so later checks can reason about them. Shape
//! problems are left for the schema stage to report; here a malformed node
//! simply lifts to its closest empty value, keeping sequence indices aligned
//! with the tree.

use std::collections::BTreeMap;

use policy_tree::{NodePath, TreeExt, Value};
use serde::{Serialize, Serializer};

use crate::endpoint::{LabelRequirement, Operator, Selector};
use crate::policy::{Direction, PolicyDocument, PolicyRule, PortProtocol, PortRule, PortValue};
use crate::port::Protocol;

pub const API_VERSION: &str = "cilium.io/v2";
pub const KIND: &str = "CiliumNetworkPolicy";

/// Peer keys this model does not interpret, per direction.
const OPAQUE_INGRESS_PEERS: &[&str] = &["fromGroups", "fromNodes"];
const OPAQUE_EGRESS_PEERS: &[&str] = &["toServices", "toFQDNs", "toGroups", "toNodes"];

impl Serialize for PolicyDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Manifest::from(self).serialize(serializer)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata<'a>,
    spec: SpecWire<'a>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty_map")]
    labels: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_empty_map")]
    annotations: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpecWire<'a> {
    endpoint_selector: SelectorWire<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ingress: Vec<IngressWire<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    egress: Vec<EgressWire<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectorWire<'a> {
    #[serde(skip_serializing_if = "is_empty_map")]
    match_labels: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    match_expressions: &'a [LabelRequirement],
}

impl<'a> From<&'a Selector> for SelectorWire<'a> {
    fn from(selector: &'a Selector) -> Self {
        Self {
            match_labels: &selector.match_labels,
            match_expressions: &selector.match_expressions,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngressWire<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    from_endpoints: Vec<SelectorWire<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    from_requires: Vec<SelectorWire<'a>>,
    #[serde(rename = "fromCIDR", skip_serializing_if = "is_empty_slice")]
    from_cidr: &'a [String],
    #[serde(skip_serializing_if = "is_empty_slice")]
    from_entities: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    to_ports: Option<Vec<PortRuleWire>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EgressWire<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to_endpoints: Vec<SelectorWire<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to_requires: Vec<SelectorWire<'a>>,
    #[serde(rename = "toCIDR", skip_serializing_if = "is_empty_slice")]
    to_cidr: &'a [String],
    #[serde(skip_serializing_if = "is_empty_slice")]
    to_entities: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    to_ports: Option<Vec<PortRuleWire>>,
}

#[derive(Serialize)]
struct PortRuleWire {
    ports: Vec<PortWire>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortWire {
    port: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_port: Option<u16>,
    protocol: Protocol,
}

fn is_empty_map(map: &&BTreeMap<String, String>) -> bool {
    map.is_empty()
}

fn is_empty_slice<T>(list: &&[T]) -> bool {
    list.is_empty()
}

// L7 rules are not modeled on typed documents, so only L4 ports are written.
fn ports_wire(rule: &PolicyRule) -> Option<Vec<PortRuleWire>> {
    rule.to_ports.as_ref().map(|rules| {
        rules
            .iter()
            .map(|port_rule| PortRuleWire {
                ports: port_rule
                    .ports
                    .iter()
                    .map(|p| PortWire {
                        port: p.port.to_string(),
                        end_port: p.end_port,
                        protocol: p.protocol,
                    })
                    .collect(),
            })
            .collect()
    })
}

fn selectors(list: &[Selector]) -> Vec<SelectorWire<'_>> {
    list.iter().map(SelectorWire::from).collect()
}

impl<'a> From<&'a PolicyDocument> for Manifest<'a> {
    fn from(doc: &'a PolicyDocument) -> Self {
        Manifest {
            api_version: API_VERSION,
            kind: KIND,
            metadata: Metadata {
                name: &doc.name,
                namespace: doc.namespace.as_deref(),
                labels: &doc.labels,
                annotations: &doc.annotations,
            },
            spec: SpecWire {
                endpoint_selector: SelectorWire::from(&doc.endpoint_selector),
                ingress: doc
                    .ingress
                    .iter()
                    .map(|rule| IngressWire {
                        from_endpoints: selectors(&rule.endpoints),
                        from_requires: selectors(&rule.requires),
                        from_cidr: &rule.cidrs,
                        from_entities: &rule.entities,
                        to_ports: ports_wire(rule),
                    })
                    .collect(),
                egress: doc
                    .egress
                    .iter()
                    .map(|rule| EgressWire {
                        to_endpoints: selectors(&rule.endpoints),
                        to_requires: selectors(&rule.requires),
                        to_cidr: &rule.cidrs,
                        to_entities: &rule.entities,
                        to_ports: ports_wire(rule),
                    })
                    .collect(),
            },
        }
    }
}

/// A policy spec located in a document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSite {
    /// Path of the spec node: `spec`, `specs[i]`, or the root for a bare spec.
    pub path: NodePath,
    /// `None` when `endpointSelector` is missing or not a mapping.
    pub selector: Option<Selector>,
    pub ingress: Vec<PolicyRule>,
    pub egress: Vec<PolicyRule>,
}

impl SpecSite {
    pub fn rules(&self, direction: Direction) -> &[PolicyRule] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    pub fn rule_path(&self, direction: Direction, idx: usize) -> NodePath {
        self.path.key(direction.as_str()).index(idx)
    }
}

/// Every policy spec a tree holds, in document order.
///
/// Envelope documents contribute `spec` and each mapping in `specs`; a root
/// mapping without either is read as a bare spec.
pub fn spec_sites(tree: &Value) -> Vec<SpecSite> {
    let mut paths = Vec::new();
    if tree.as_mapping().is_none() {
        return Vec::new();
    }
    if tree.child("spec").is_some_and(Value::is_mapping) {
        paths.push(NodePath::root().key("spec"));
    }
    if let Some(specs) = tree.child("specs").and_then(Value::as_sequence) {
        let base = NodePath::root().key("specs");
        paths.extend(
            specs
                .iter()
                .enumerate()
                .filter(|(_, spec)| spec.is_mapping())
                .map(|(idx, _)| base.index(idx)),
        );
    }
    if paths.is_empty() && !is_envelope(tree) {
        paths.push(NodePath::root());
    }
    // Sort by written key order so `specs` before `spec` stays in document order.
    paths.sort_by_key(|path| tree.position_of(path));

    paths
        .into_iter()
        .filter_map(|path| {
            let node = tree.resolve(&path)?;
            Some(SpecSite {
                selector: node
                    .child("endpointSelector")
                    .filter(|v| v.is_mapping())
                    .map(lift_selector),
                ingress: lift_rules(node, Direction::Ingress),
                egress: lift_rules(node, Direction::Egress),
                path,
            })
        })
        .collect()
}

/// Whether the root carries any envelope key.
pub fn is_envelope(tree: &Value) -> bool {
    ["apiVersion", "kind", "metadata", "spec", "specs"]
        .iter()
        .any(|key| tree.child(key).is_some())
}

fn lift_rules(spec: &Value, direction: Direction) -> Vec<PolicyRule> {
    spec.child(direction.as_str())
        .and_then(Value::as_sequence)
        .map(|rules| rules.iter().map(|rule| lift_rule(rule, direction)).collect())
        .unwrap_or_default()
}

/// Lift one rule node. Anything but a mapping lifts to an empty rule.
pub fn lift_rule(node: &Value, direction: Direction) -> PolicyRule {
    if !node.is_mapping() {
        return PolicyRule::default();
    }
    let seq = |key: &str| {
        node.child(key)
            .and_then(Value::as_sequence)
            .map(Vec::as_slice)
            .unwrap_or_default()
    };

    let mut cidrs: Vec<String> = seq(direction.cidr_key())
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    cidrs.extend(
        seq(direction.cidr_set_key())
            .iter()
            .filter_map(|v| v.child_str("cidr").map(str::to_string)),
    );
    // A carved-out CIDR set is not its bare network.
    let has_exceptions = seq(direction.cidr_set_key()).iter().any(|entry| {
        entry
            .child("except")
            .and_then(Value::as_sequence)
            .is_some_and(|except| !except.is_empty())
    });
    let opaque = match direction {
        Direction::Ingress => OPAQUE_INGRESS_PEERS,
        Direction::Egress => OPAQUE_EGRESS_PEERS,
    };

    PolicyRule {
        endpoints: seq(direction.endpoints_key()).iter().map(lift_selector).collect(),
        requires: seq(direction.requires_key()).iter().map(lift_selector).collect(),
        cidrs,
        entities: seq(direction.entities_key())
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        opaque_peers: has_exceptions || opaque.iter().any(|key| !seq(key).is_empty()),
        to_ports: node
            .child("toPorts")
            .and_then(Value::as_sequence)
            .map(|rules| rules.iter().map(lift_port_rule).collect()),
    }
}

fn lift_port_rule(node: &Value) -> PortRule {
    let ports = node
        .child("ports")
        .and_then(Value::as_sequence)
        .map(|ports| ports.iter().filter_map(lift_port).collect())
        .unwrap_or_default();
    let has_l7 = node
        .child("rules")
        .and_then(Value::as_mapping)
        .is_some_and(|rules| !rules.is_empty());
    PortRule { ports, has_l7 }
}

fn lift_port(node: &Value) -> Option<PortProtocol> {
    let port = match node.child("port")? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .map(PortValue::Number)
            .unwrap_or_else(|| PortValue::Named(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map(PortValue::Number)
            .unwrap_or_else(|_| PortValue::Named(s.clone())),
        _ => return None,
    };
    Some(PortProtocol {
        port,
        end_port: node
            .child("endPort")
            .and_then(Value::as_u64)
            .and_then(|n| u16::try_from(n).ok()),
        protocol: node
            .child_str("protocol")
            .and_then(Protocol::from_cilium)
            .unwrap_or(Protocol::Any),
    })
}

/// Lift a label selector node. Entries of the wrong shape are skipped.
pub fn lift_selector(node: &Value) -> Selector {
    let labels = node
        .child("matchLabels")
        .and_then(Value::as_mapping)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_text(v)?)))
                .collect()
        })
        .unwrap_or_default();
    let expressions = node
        .child("matchExpressions")
        .and_then(Value::as_sequence)
        .map(|exprs| {
            exprs
                .iter()
                .filter_map(|expr| {
                    Some(LabelRequirement {
                        key: expr.child_str("key")?.to_string(),
                        operator: Operator::parse(expr.child_str("operator")?)?,
                        values: expr
                            .child("values")
                            .and_then(Value::as_sequence)
                            .map(|vals| vals.iter().filter_map(scalar_text).collect())
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Selector::new(labels, expressions)
}

/// Text of a scalar node.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use policy_tree::{parse, to_tree, write, Format, TreeExt};

    use super::spec_sites;
    use crate::endpoint::Selector;
    use crate::policy::{PolicyDocument, PolicyRule, PortProtocol, PortRule, PortValue, RuleEffect};
    use crate::port::Protocol;

    fn sample() -> PolicyDocument {
        let web = Selector::from_labels(BTreeMap::from([("app".to_string(), "web".to_string())]));
        PolicyDocument {
            name: "web".to_string(),
            namespace: Some("default".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            endpoint_selector: web,
            ingress: vec![PolicyRule {
                entities: vec!["all".to_string()],
                to_ports: Some(vec![PortRule {
                    ports: vec![PortProtocol {
                        port: PortValue::Number(8000),
                        end_port: Some(8080),
                        protocol: Protocol::Tcp,
                    }],
                    has_l7: false,
                }]),
                ..PolicyRule::default()
            }],
            egress: Vec::new(),
        }
    }

    #[test]
    fn serializes_cilium_envelope() {
        let yaml = write(&sample(), Format::Yaml).expect("yaml");
        assert!(yaml.starts_with("apiVersion: cilium.io/v2\nkind: CiliumNetworkPolicy\n"));
        assert!(yaml.contains("fromEntities:"));
        assert!(yaml.contains("endPort: 8080"));
        assert!(yaml.contains("port: '8000'"));
        assert!(!yaml.contains("egress"));
    }

    #[test]
    fn written_document_lifts_back() {
        let doc = sample();
        let tree = to_tree(&doc).expect("tree");
        let sites = spec_sites(&tree);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].path.to_string(), "spec");
        assert_eq!(sites[0].selector.as_ref(), Some(&doc.endpoint_selector));
        assert_eq!(sites[0].ingress, doc.ingress);
    }

    #[test]
    fn finds_specs_list_and_bare_spec() {
        let tree = parse(
            b"specs:\n  - endpointSelector: {matchLabels: {app: a}}\n    ingress: [{}]\n  - 3\n  - egress: []\n",
        )
        .expect("parse");
        let paths: Vec<String> = spec_sites(&tree).iter().map(|s| s.path.to_string()).collect();
        assert_eq!(paths, vec!["specs[0]", "specs[2]"]);

        let bare = parse(b"endpointSelector: {}\ningress: [{}]\n").expect("parse");
        let sites = spec_sites(&bare);
        assert!(sites[0].path.is_root());
        assert_eq!(sites[0].ingress[0].effect(), RuleEffect::DenyOnly);
    }

    #[test]
    fn lifts_requires_cidr_sets_and_named_ports() {
        let tree = parse(
            br#"
spec:
  endpointSelector:
    matchLabels: {app: db}
  ingress:
    - fromCIDRSet:
        - cidr: 10.0.0.0/8
      fromRequires:
        - matchExpressions:
            - {key: env, operator: In, values: [prod]}
      toPorts:
        - ports:
            - port: http
              protocol: TCP
          rules:
            http: [{method: GET}]
"#,
        )
        .expect("parse");
        let site = &spec_sites(&tree)[0];
        let rule = &site.ingress[0];
        assert_eq!(rule.cidrs, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(rule.requires[0].match_expressions[0].key, "env");
        assert!(rule.has_l7());
        let port = rule.port_entries().next().expect("port");
        assert_eq!(port.port, PortValue::Named("http".to_string()));
        assert!(tree.resolve(&site.rule_path(crate::policy::Direction::Ingress, 0)).is_some());
    }
}
