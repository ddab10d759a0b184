//! Firewall rules to policy document conversion.
//!
//! ## Pipeline
//!
//! 1. **Structural check** of every rule (ports, ranges, endpoints)
//! 2. **Deny rejection**: the first DENY rule aborts the call
//! 3. **Placement**: each rule is assigned a direction, the endpoint it
//!    protects and the peer it admits
//! 4. **Merge**: rules with the same destination collapse into one
//!    [`PolicyRule`] per direction: the union of their peers, with the
//!    normalized union of their ports
//!
//! ## Direction
//!
//! | source | destination | direction | protected |
//! |---|---|---|---|
//! | not labels | labels | ingress | destination |
//! | labels | not labels | egress | source |
//! | labels | labels | ingress (ambiguous) | destination |
//! | not labels | not labels | error | - |
//!
//! Ambiguous placements are recorded in the
//! [`AMBIGUOUS_DIRECTION_ANNOTATION`] annotation so validation can report
//! them.
//!
//! Merging is per destination, not per peer: every peer of the merged rule
//! reaches every port of it.

use std::collections::BTreeMap;

use ipnetwork::IpNetwork;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Selector};
use crate::policy::{Direction, PolicyDocument, PolicyRule, PortProtocol, PortRule, PortValue};
use crate::port::{normalize_ports, PortRange, Protocol};
use crate::rule::{bad_label, Action, FirewallRule, ZERO_BASED_SPAN};

/// Annotation listing generated rules whose direction was a guess.
pub const AMBIGUOUS_DIRECTION_ANNOTATION: &str = "cnp-convert.io/ambiguous-direction";

/// Why a rule set could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("malformed input{}: {reason}", rule_suffix(.rule_id))]
    MalformedInput {
        rule_id: Option<String>,
        reason: String,
    },
    #[error("rule {rule_id}: missing required field '{field}'")]
    MissingField {
        rule_id: String,
        field: &'static str,
    },
    #[error("rule {rule_id}: invalid port {value}: {reason}")]
    InvalidPort {
        rule_id: String,
        value: String,
        reason: String,
    },
    #[error("rule {rule_id}: unknown protocol '{value}'")]
    UnknownProtocol { rule_id: String, value: String },
    #[error("rule {rule_id}: unknown action '{value}'")]
    UnknownAction { rule_id: String, value: String },
    #[error("rule {rule_id}: invalid {field}: {reason}")]
    InvalidEndpoint {
        rule_id: String,
        field: &'static str,
        reason: String,
    },
    #[error("rule {rule_id}: protocol {protocol} needs at least one port")]
    MissingPorts { rule_id: String, protocol: Protocol },
    #[error("rule {rule_id}: explicit DENY rules are not supported; policies deny by default, so remove the rule or narrow the ALLOW rules")]
    UnsupportedDeny { rule_id: String },
    #[error("rule {rule_id}: neither source nor destination is a label selector, so there is no workload to attach the policy to")]
    NoProtectedEndpoint { rule_id: String },
    #[error("rule {rule_id}: protects {found} but earlier rules protect {expected}; convert with grouping to get one policy per workload")]
    MixedEndpointSelectors {
        rule_id: String,
        expected: String,
        found: String,
    },
}

/// Stable classification of a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionErrorKind {
    MalformedInput,
    MissingField,
    InvalidPort,
    UnknownProtocol,
    UnknownAction,
    InvalidEndpoint,
    MissingPorts,
    UnsupportedDeny,
    UnresolvableSelector,
    MixedEndpointSelectors,
}

impl ConversionError {
    pub fn kind(&self) -> ConversionErrorKind {
        match self {
            ConversionError::MalformedInput { .. } => ConversionErrorKind::MalformedInput,
            ConversionError::MissingField { .. } => ConversionErrorKind::MissingField,
            ConversionError::InvalidPort { .. } => ConversionErrorKind::InvalidPort,
            ConversionError::UnknownProtocol { .. } => ConversionErrorKind::UnknownProtocol,
            ConversionError::UnknownAction { .. } => ConversionErrorKind::UnknownAction,
            ConversionError::InvalidEndpoint { .. } => ConversionErrorKind::InvalidEndpoint,
            ConversionError::MissingPorts { .. } => ConversionErrorKind::MissingPorts,
            ConversionError::UnsupportedDeny { .. } => ConversionErrorKind::UnsupportedDeny,
            ConversionError::NoProtectedEndpoint { .. } => ConversionErrorKind::UnresolvableSelector,
            ConversionError::MixedEndpointSelectors { .. } => {
                ConversionErrorKind::MixedEndpointSelectors
            }
        }
    }

    /// The offending rule. Absent only when the top-level shape is wrong.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            ConversionError::MalformedInput { rule_id, .. } => rule_id.as_deref(),
            ConversionError::MissingField { rule_id, .. }
            | ConversionError::InvalidPort { rule_id, .. }
            | ConversionError::UnknownProtocol { rule_id, .. }
            | ConversionError::UnknownAction { rule_id, .. }
            | ConversionError::InvalidEndpoint { rule_id, .. }
            | ConversionError::MissingPorts { rule_id, .. }
            | ConversionError::UnsupportedDeny { rule_id }
            | ConversionError::NoProtectedEndpoint { rule_id }
            | ConversionError::MixedEndpointSelectors { rule_id, .. } => Some(rule_id),
        }
    }
}

fn rule_suffix(rule_id: &Option<String>) -> String {
    rule_id
        .as_deref()
        .map(|id| format!(" in rule {id}"))
        .unwrap_or_default()
}

/// Naming of generated documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    pub name: String,
    pub namespace: Option<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            name: "generated-policy".to_string(),
            namespace: Some("default".to_string()),
        }
    }
}

/// Convert a rule set into one policy document with default naming.
pub fn convert(rules: &[FirewallRule]) -> Result<PolicyDocument, ConversionError> {
    convert_with_options(rules, &ConvertOptions::default())
}

/// Convert a rule set whose rules all protect the same workload.
pub fn convert_with_options(
    rules: &[FirewallRule],
    options: &ConvertOptions,
) -> Result<PolicyDocument, ConversionError> {
    let placed = place_all(rules)?;
    let Some(first) = placed.first() else {
        return Err(ConversionError::MalformedInput {
            rule_id: None,
            reason: "rule set is empty".to_string(),
        });
    };
    if let Some(other) = placed.iter().find(|p| p.protected != first.protected) {
        return Err(ConversionError::MixedEndpointSelectors {
            rule_id: other.rule.id.clone(),
            expected: first.protected.to_string(),
            found: other.protected.to_string(),
        });
    }
    Ok(build_document(options.name.clone(), options, &placed))
}

/// Convert a rule set into one policy document per protected workload.
///
/// Documents come out in first-appearance order of their workload and are
/// named `<name>-<label values>`.
pub fn convert_grouped(
    rules: &[FirewallRule],
    options: &ConvertOptions,
) -> Result<Vec<PolicyDocument>, ConversionError> {
    let placed = place_all(rules)?;
    let mut groups: Vec<(Selector, Vec<Placement<'_>>)> = Vec::new();
    for placement in placed {
        match groups.iter_mut().find(|(sel, _)| *sel == placement.protected) {
            Some((_, members)) => members.push(placement),
            None => groups.push((placement.protected.clone(), vec![placement])),
        }
    }

    let mut used = Vec::new();
    let mut documents = Vec::with_capacity(groups.len());
    for (selector, members) in &groups {
        let mut name = group_name(&options.name, selector);
        if used.contains(&name) {
            name = format!("{name}-{}", used.len() + 1);
        }
        used.push(name.clone());
        documents.push(build_document(name, options, members));
    }
    debug!(policies = documents.len(), "grouped conversion finished");
    Ok(documents)
}

#[derive(Debug)]
struct Placement<'a> {
    rule: &'a FirewallRule,
    direction: Direction,
    protected: Selector,
    peer: &'a Endpoint,
    ambiguous: bool,
}

fn place_all(rules: &[FirewallRule]) -> Result<Vec<Placement<'_>>, ConversionError> {
    for rule in rules {
        check_rule(rule)?;
    }
    if let Some(deny) = rules.iter().find(|r| r.action == Action::Deny) {
        return Err(ConversionError::UnsupportedDeny {
            rule_id: deny.id.clone(),
        });
    }
    rules.iter().map(place).collect()
}

/// Re-check invariants that typed construction does not enforce.
fn check_rule(rule: &FirewallRule) -> Result<(), ConversionError> {
    if rule.ports.is_empty() && rule.protocol != Protocol::Icmp {
        return Err(ConversionError::MissingPorts {
            rule_id: rule.id.clone(),
            protocol: rule.protocol,
        });
    }
    if let Some(bad) = rule.ports.iter().find(|p| p.range.low > p.range.high) {
        return Err(ConversionError::InvalidPort {
            rule_id: rule.id.clone(),
            value: format!("[{}, {}]", bad.range.low, bad.range.high),
            reason: "range start is greater than range end".to_string(),
        });
    }
    if let Some(bad) = rule.ports.iter().find(|p| p.range.is_zero_based_span()) {
        return Err(ConversionError::InvalidPort {
            rule_id: rule.id.clone(),
            value: format!("[{}, {}]", bad.range.low, bad.range.high),
            reason: ZERO_BASED_SPAN.to_string(),
        });
    }
    if let Some(reason) = bad_label(&rule.labels) {
        return Err(ConversionError::MalformedInput {
            rule_id: Some(rule.id.clone()),
            reason: format!("rule labels: {reason}"),
        });
    }
    for (field, endpoint) in [("source", &rule.source), ("destination", &rule.destination)] {
        if matches!(endpoint, Endpoint::Labels(labels) if labels.is_empty()) {
            return Err(ConversionError::InvalidEndpoint {
                rule_id: rule.id.clone(),
                field,
                reason: "label map is empty".to_string(),
            });
        }
        let bad = match endpoint {
            Endpoint::Labels(labels) => bad_label(labels),
            _ => None,
        };
        if let Some(reason) = bad {
            return Err(ConversionError::InvalidEndpoint {
                rule_id: rule.id.clone(),
                field,
                reason,
            });
        }
    }
    Ok(())
}

fn place(rule: &FirewallRule) -> Result<Placement<'_>, ConversionError> {
    let (direction, protected, peer, ambiguous) = match (&rule.source, &rule.destination) {
        (Endpoint::Labels(_), Endpoint::Labels(dst)) => {
            (Direction::Ingress, dst, &rule.source, true)
        }
        (_, Endpoint::Labels(dst)) => (Direction::Ingress, dst, &rule.source, false),
        (Endpoint::Labels(src), _) => (Direction::Egress, src, &rule.destination, false),
        _ => {
            return Err(ConversionError::NoProtectedEndpoint {
                rule_id: rule.id.clone(),
            })
        }
    };
    Ok(Placement {
        rule,
        direction,
        protected: Selector::from_labels(protected.clone()),
        peer,
        ambiguous,
    })
}

/// Everything one direction of a document allows.
struct Group {
    direction: Direction,
    peers: Vec<Endpoint>,
    ports: Vec<(Protocol, PortRange)>,
    ambiguous: bool,
}

fn build_document(name: String, options: &ConvertOptions, placed: &[Placement<'_>]) -> PolicyDocument {
    let mut groups: Vec<Group> = Vec::new();
    for placement in placed {
        let peer = canonical_peer(placement.peer);
        let ports = placement.rule.effective_ports();
        match groups.iter_mut().find(|g| g.direction == placement.direction) {
            Some(group) => {
                if !group.peers.contains(&peer) {
                    group.peers.push(peer);
                }
                group.ports.extend(ports);
                group.ambiguous |= placement.ambiguous;
            }
            None => groups.push(Group {
                direction: placement.direction,
                peers: vec![peer],
                ports,
                ambiguous: placement.ambiguous,
            }),
        }
    }

    let mut ingress = Vec::new();
    let mut egress = Vec::new();
    let mut ambiguous = Vec::new();
    for group in groups {
        let target = match group.direction {
            Direction::Ingress => &mut ingress,
            Direction::Egress => &mut egress,
        };
        if group.ambiguous {
            ambiguous.push(format!("{}[{}]", group.direction, target.len()));
        }
        target.push(policy_rule(&group.peers, group.ports));
    }

    let mut annotations = BTreeMap::new();
    if !ambiguous.is_empty() {
        annotations.insert(
            AMBIGUOUS_DIRECTION_ANNOTATION.to_string(),
            ambiguous.join(","),
        );
    }

    let endpoint_selector = placed
        .first()
        .map(|p| p.protected.clone())
        .unwrap_or_default();

    debug!(
        name = %name,
        rules = placed.len(),
        ingress = ingress.len(),
        egress = egress.len(),
        "converted rule set"
    );

    PolicyDocument {
        name,
        namespace: options.namespace.clone(),
        labels: merged_labels(placed),
        annotations,
        endpoint_selector,
        ingress,
        egress,
    }
}

fn policy_rule(peers: &[Endpoint], ports: Vec<(Protocol, PortRange)>) -> PolicyRule {
    let ports = normalize_ports(ports)
        .into_iter()
        .map(|(protocol, range)| PortProtocol {
            port: PortValue::Number(range.low),
            end_port: (!range.is_single()).then_some(range.high),
            protocol,
        })
        .collect();
    let mut rule = PolicyRule {
        to_ports: Some(vec![PortRule {
            ports,
            has_l7: false,
        }]),
        ..PolicyRule::default()
    };
    for peer in peers {
        match peer {
            Endpoint::Labels(labels) => rule.endpoints.push(Selector::from_labels(labels.clone())),
            Endpoint::Cidr(net) => rule.cidrs.push(net.to_string()),
            Endpoint::Any => rule.entities.push("all".to_string()),
        }
    }
    rule
}

/// CIDRs are keyed by their network address so `10.0.0.1/8` and
/// `10.0.0.0/8` count as one peer.
fn canonical_peer(peer: &Endpoint) -> Endpoint {
    match peer {
        Endpoint::Cidr(net) => IpNetwork::new(net.network(), net.prefix())
            .map_or_else(|_| peer.clone(), Endpoint::Cidr),
        other => other.clone(),
    }
}

fn merged_labels(placed: &[Placement<'_>]) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
    for placement in placed {
        for (key, value) in &placement.rule.labels {
            match labels.get(key) {
                Some(existing) if existing != value => warn!(
                    label = %key,
                    kept = %existing,
                    kept_from = owner.get(key.as_str()).copied().unwrap_or_default(),
                    dropped = %value,
                    dropped_from = %placement.rule.id,
                    "conflicting rule label; keeping the first value"
                ),
                Some(_) => {}
                None => {
                    labels.insert(key.clone(), value.clone());
                    owner.insert(key.as_str(), placement.rule.id.as_str());
                }
            }
        }
    }
    labels
}

/// Longest DNS-1123 subdomain, in characters.
const MAX_NAME_LEN: usize = 253;

fn group_name(base: &str, selector: &Selector) -> String {
    let suffix: String = selector
        .match_labels
        .values()
        .map(|v| v.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let suffix = suffix.trim_matches('-');
    if suffix.is_empty() {
        return base.to_string();
    }
    let name = format!("{base}-{suffix}");
    let end = name
        .char_indices()
        .nth(MAX_NAME_LEN)
        .map_or(name.len(), |(idx, _)| idx);
    name[..end].trim_end_matches('-').to_string()
}
