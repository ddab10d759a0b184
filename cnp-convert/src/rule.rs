//! Firewall rule model and the discriminated parse from generic JSON.
//!
//! Two input shapes are accepted and told apart by the presence of a `dest`
//! key:
//!
//! - **canonical**: `{id, source|src, destination|dst, ports, protocol|proto,
//!   action, labels}`. Endpoints are `"any"`, a CIDR, or a label map.
//!   `protocol` and `action` are required.
//! - **legacy**: `{src, dest, port, proto}`. Bare names become `{app: <name>}`,
//!   `proto` defaults to TCP, `action` to ALLOW and ids to `rule-<n>`.
//!
//! Fields outside the known set are kept verbatim in [`FirewallRule::extra`]
//! and never interpreted.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::convert::ConversionError;
use crate::endpoint::Endpoint;
use crate::naming::{is_label_key, is_label_value};
use crate::port::{PortRange, PortSpec, Protocol};

const KNOWN_FIELDS: &[&str] = &[
    "id",
    "source",
    "src",
    "destination",
    "dst",
    "dest",
    "ports",
    "port",
    "protocol",
    "proto",
    "action",
    "labels",
];

/// Rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" | "accept" | "pass" | "permit" => Some(Action::Allow),
            "deny" | "drop" | "reject" | "block" => Some(Action::Deny),
            _ => None,
        }
    }
}

/// One firewall rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FirewallRule {
    pub id: String,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Empty only for ICMP rules.
    pub ports: Vec<PortSpec>,
    pub protocol: Protocol,
    pub action: Action,
    pub labels: BTreeMap<String, String>,
    /// Unrecognized input fields, carried through untouched.
    pub extra: Map<String, Value>,
}

impl FirewallRule {
    /// Port entries with the rule protocol applied where an entry has none.
    ///
    /// An ICMP rule without ports yields the single ICMP type-0 entry.
    pub fn effective_ports(&self) -> Vec<(Protocol, PortRange)> {
        if self.ports.is_empty() && self.protocol == Protocol::Icmp {
            return vec![(Protocol::Icmp, PortRange::single(0))];
        }
        self.ports
            .iter()
            .map(|spec| (spec.protocol.unwrap_or(self.protocol), spec.range))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Canonical,
    Legacy,
}

/// Parse rule-set JSON text.
pub fn parse_rules_str(text: &str) -> Result<Vec<FirewallRule>, ConversionError> {
    let value: Value = serde_json::from_str(text).map_err(|err| ConversionError::MalformedInput {
        rule_id: None,
        reason: format!("input is not valid JSON: {err}"),
    })?;
    parse_rules(&value)
}

/// Parse a rule set: a JSON array of rules, or an object with a `rules` array.
pub fn parse_rules(input: &Value) -> Result<Vec<FirewallRule>, ConversionError> {
    let entries = match input {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("rules") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(malformed(
                    None,
                    format!("'rules' must be an array, found {}", json_kind(other)),
                ))
            }
            None => {
                return Err(malformed(
                    None,
                    "expected an array of rules or an object with a 'rules' array".to_string(),
                ))
            }
        },
        other => {
            return Err(malformed(
                None,
                format!("expected an array of rules, found {}", json_kind(other)),
            ))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| parse_rule(idx, entry))
        .collect()
}

fn parse_rule(idx: usize, entry: &Value) -> Result<FirewallRule, ConversionError> {
    let Value::Object(obj) = entry else {
        return Err(malformed(
            Some(format!("#{idx}")),
            format!("rule must be an object, found {}", json_kind(entry)),
        ));
    };
    let shape = if obj.contains_key("dest") {
        Shape::Legacy
    } else {
        Shape::Canonical
    };
    let id = rule_id(idx, obj, shape)?;

    let source = pick(obj, &["source", "src"])
        .ok_or_else(|| missing(&id, "source"))
        .and_then(|value| parse_endpoint(&id, "source", value, shape))?;
    let destination = pick(obj, &["destination", "dst", "dest"])
        .ok_or_else(|| missing(&id, "destination"))
        .and_then(|value| parse_endpoint(&id, "destination", value, shape))?;

    let protocol = match (pick(obj, &["protocol", "proto"]), shape) {
        (Some(value), _) => parse_protocol(&id, value)?,
        (None, Shape::Legacy) => Protocol::Tcp,
        (None, Shape::Canonical) => return Err(missing(&id, "protocol")),
    };
    let action = match (obj.get("action"), shape) {
        (Some(Value::String(raw)), _) => {
            Action::parse(raw).ok_or_else(|| ConversionError::UnknownAction {
                rule_id: id.clone(),
                value: raw.clone(),
            })?
        }
        (Some(other), _) => {
            return Err(ConversionError::UnknownAction {
                rule_id: id.clone(),
                value: other.to_string(),
            })
        }
        (None, Shape::Legacy) => Action::Allow,
        (None, Shape::Canonical) => return Err(missing(&id, "action")),
    };

    let ports = match pick(obj, &["ports", "port"]) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_port_entry(&id, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(single) => vec![parse_port_entry(&id, single)?],
        None if protocol == Protocol::Icmp => Vec::new(),
        None => return Err(missing(&id, "ports")),
    };
    if ports.is_empty() && protocol != Protocol::Icmp {
        return Err(ConversionError::MissingPorts {
            rule_id: id,
            protocol,
        });
    }

    let labels = match obj.get("labels") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => string_map(map).ok_or_else(|| {
            malformed(
                Some(id.clone()),
                "labels must map label keys to strings".to_string(),
            )
        })?,
        Some(other) => {
            return Err(malformed(
                Some(id.clone()),
                format!("labels must be an object, found {}", json_kind(other)),
            ))
        }
    };

    if let Some(reason) = bad_label(&labels) {
        return Err(malformed(Some(id), format!("rule labels: {reason}")));
    }

    let extra = obj
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(FirewallRule {
        id,
        source,
        destination,
        ports,
        protocol,
        action,
        labels,
        extra,
    })
}

fn rule_id(idx: usize, obj: &Map<String, Value>, shape: Shape) -> Result<String, ConversionError> {
    match obj.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        None | Some(Value::Null) => Ok(match shape {
            Shape::Canonical => format!("#{idx}"),
            Shape::Legacy => format!("rule-{}", idx + 1),
        }),
        Some(other) => Err(malformed(
            Some(format!("#{idx}")),
            format!("id must be a string or number, found {}", json_kind(other)),
        )),
    }
}

fn parse_endpoint(
    rule_id: &str,
    field: &'static str,
    value: &Value,
    shape: Shape,
) -> Result<Endpoint, ConversionError> {
    let invalid = |reason: String| ConversionError::InvalidEndpoint {
        rule_id: rule_id.to_string(),
        field,
        reason,
    };
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("any") || raw == "*" {
                return Ok(Endpoint::Any);
            }
            if let Some(net) = Endpoint::parse_cidr(raw) {
                return Ok(Endpoint::Cidr(net));
            }
            match shape {
                Shape::Legacy if !raw.is_empty() && is_label_value(raw) => Ok(Endpoint::Labels(
                    BTreeMap::from([("app".to_string(), raw.to_string())]),
                )),
                _ => Err(invalid(format!(
                    "'{raw}' is not 'any', a CIDR or a label map"
                ))),
            }
        }
        Value::Object(map) if map.is_empty() => Err(invalid("label map is empty".to_string())),
        Value::Object(map) => {
            let labels =
                string_map(map).ok_or_else(|| invalid("label values must be strings".to_string()))?;
            match bad_label(&labels) {
                Some(reason) => Err(invalid(reason)),
                None => Ok(Endpoint::Labels(labels)),
            }
        }
        other => Err(invalid(format!(
            "expected 'any', a CIDR or a label map, found {}",
            json_kind(other)
        ))),
    }
}

fn parse_protocol(rule_id: &str, value: &Value) -> Result<Protocol, ConversionError> {
    let unknown = |value: String| ConversionError::UnknownProtocol {
        rule_id: rule_id.to_string(),
        value,
    };
    match value {
        Value::String(raw) => Protocol::from_rule(raw).ok_or_else(|| unknown(raw.clone())),
        other => Err(unknown(other.to_string())),
    }
}

fn parse_port_entry(rule_id: &str, value: &Value) -> Result<PortSpec, ConversionError> {
    let spec = port_spec(rule_id, value)?;
    if spec.range.is_zero_based_span() {
        return Err(ConversionError::InvalidPort {
            rule_id: rule_id.to_string(),
            value: value.to_string(),
            reason: ZERO_BASED_SPAN.to_string(),
        });
    }
    Ok(spec)
}

pub(crate) const ZERO_BASED_SPAN: &str =
    "a range cannot start at port 0, which policies read as every port; start it at 1";

fn port_spec(rule_id: &str, value: &Value) -> Result<PortSpec, ConversionError> {
    let invalid = |reason: &str| ConversionError::InvalidPort {
        rule_id: rule_id.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    match value {
        Value::Number(_) => port_number(value)
            .map(PortSpec::single)
            .ok_or_else(|| invalid("port must be an integer between 0 and 65535")),
        Value::String(raw) => parse_port_text(raw)
            .map(|range| PortSpec {
                range,
                protocol: None,
            })
            .map_err(|reason| invalid(reason)),
        Value::Array(pair) => match pair.as_slice() {
            [low, high] => {
                let (Some(low), Some(high)) = (port_number(low), port_number(high)) else {
                    return Err(invalid("range bounds must be integers between 0 and 65535"));
                };
                PortRange::new(low, high)
                    .map(|range| PortSpec {
                        range,
                        protocol: None,
                    })
                    .ok_or_else(|| invalid("range start is greater than range end"))
            }
            _ => Err(invalid("a port range must be [low, high]")),
        },
        Value::Object(obj) => {
            let low = match obj.get("port") {
                Some(Value::String(raw)) => raw.trim().parse::<u16>().ok(),
                Some(other) => port_number(other),
                None => return Err(invalid("port object needs a 'port' field")),
            }
            .ok_or_else(|| invalid("port must be an integer between 0 and 65535"))?;
            let high = match obj.get("endPort") {
                None | Some(Value::Null) => low,
                Some(end) => {
                    port_number(end).ok_or_else(|| invalid("endPort must be an integer between 0 and 65535"))?
                }
            };
            let range = PortRange::new(low, high)
                .ok_or_else(|| invalid("endPort is lower than port"))?;
            let protocol = match pick(obj, &["protocol", "proto"]) {
                Some(proto) => Some(parse_protocol(rule_id, proto)?),
                None => None,
            };
            Ok(PortSpec { range, protocol })
        }
        _ => Err(invalid("expected a port number, a range or a port object")),
    }
}

fn parse_port_text(raw: &str) -> Result<PortRange, &'static str> {
    let raw = raw.trim();
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| "port must be an integer between 0 and 65535")
    };
    match raw.split_once('-') {
        Some((low, high)) => PortRange::new(parse(low)?, parse(high)?)
            .ok_or("range start is greater than range end"),
        None => parse(raw).map(PortRange::single),
    }
}

fn port_number(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|n| u16::try_from(n).ok())
}

fn pick<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| obj.get(*name))
        .filter(|value| !value.is_null())
}

fn string_map(map: &Map<String, Value>) -> Option<BTreeMap<String, String>> {
    map.iter()
        .map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect()
}

/// The first entry of `labels` that a policy could not carry.
pub(crate) fn bad_label(labels: &BTreeMap<String, String>) -> Option<String> {
    labels.iter().find_map(|(key, value)| {
        if !is_label_key(key) {
            Some(format!("'{key}' is not a valid label key"))
        } else if !is_label_value(value) {
            Some(format!("'{value}' is not a valid value for label '{key}'"))
        } else {
            None
        }
    })
}

fn missing(rule_id: &str, field: &'static str) -> ConversionError {
    ConversionError::MissingField {
        rule_id: rule_id.to_string(),
        field,
    }
}

fn malformed(rule_id: Option<String>, reason: String) -> ConversionError {
    ConversionError::MalformedInput { rule_id, reason }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_rules, parse_rules_str, Action};
    use crate::convert::{ConversionError, ConversionErrorKind};
    use crate::endpoint::Endpoint;
    use crate::port::{PortRange, Protocol};

    #[test]
    fn parses_canonical_rule_with_aliases() {
        let rules = parse_rules(&json!([
            {"src": "any", "dst": {"app": "web"}, "ports": [80], "proto": "TCP", "action": "ALLOW"}
        ]))
        .expect("rules");
        let rule = &rules[0];
        assert_eq!(rule.id, "#0");
        assert_eq!(rule.source, Endpoint::Any);
        assert!(rule.destination.is_labels());
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.action, Action::Allow);
        assert_eq!(rule.effective_ports(), vec![(Protocol::Tcp, PortRange::single(80))]);
    }

    #[test]
    fn legacy_shape_gets_defaults() {
        let rules = parse_rules(&json!([
            {"src": "frontend", "dest": "backend", "port": 8080},
            {"src": "10.0.0.0/8", "dest": "db", "port": "5432", "proto": "tcp"}
        ]))
        .expect("rules");
        assert_eq!(rules[0].id, "rule-1");
        assert_eq!(rules[0].protocol, Protocol::Tcp);
        assert_eq!(rules[0].action, Action::Allow);
        assert_eq!(rules[0].source.to_string(), "{app=frontend}");
        assert!(matches!(rules[1].source, Endpoint::Cidr(_)));
    }

    #[test]
    fn accepts_rules_wrapper_and_port_forms() {
        let rules = parse_rules(&json!({"rules": [{
            "id": "mixed",
            "source": "10.1.0.0/16",
            "destination": {"app": "api"},
            "ports": ["8000-8010", [9000, 9005], {"port": 53, "protocol": "udp"}],
            "protocol": "tcp",
            "action": "accept",
            "owner": "team-a"
        }]}))
        .expect("rules");
        let rule = &rules[0];
        assert_eq!(rule.ports.len(), 3);
        assert_eq!(rule.ports[2].protocol, Some(Protocol::Udp));
        assert_eq!(rule.extra.get("owner"), Some(&json!("team-a")));
    }

    #[test]
    fn top_level_scalar_is_malformed() {
        let err = parse_rules(&json!("rules")).expect_err("malformed");
        assert_eq!(err.kind(), ConversionErrorKind::MalformedInput);
        assert_eq!(err.rule_id(), None);
        assert!(parse_rules_str("{not json").is_err());
    }

    #[test]
    fn reports_offending_rule() {
        let err = parse_rules(&json!([
            {"id": "ok", "source": "any", "destination": {"app": "a"}, "ports": [1], "protocol": "tcp", "action": "allow"},
            {"source": "any", "destination": {"app": "a"}, "ports": [70000], "protocol": "tcp", "action": "allow"}
        ]))
        .expect_err("bad port");
        assert_eq!(err.kind(), ConversionErrorKind::InvalidPort);
        assert_eq!(err.rule_id(), Some("#1"));
    }

    #[test]
    fn rejects_unknown_protocol_and_inverted_range() {
        let err = parse_rules(&json!([
            {"id": "r", "source": "any", "destination": {"app": "a"}, "ports": [1], "protocol": "gre", "action": "allow"}
        ]))
        .expect_err("protocol");
        assert!(matches!(err, ConversionError::UnknownProtocol { ref value, .. } if value == "gre"));

        let err = parse_rules(&json!([
            {"id": "r", "source": "any", "destination": {"app": "a"}, "ports": [[90, 80]], "protocol": "tcp", "action": "allow"}
        ]))
        .expect_err("range");
        assert_eq!(err.kind(), ConversionErrorKind::InvalidPort);
    }

    #[test]
    fn ports_required_unless_icmp() {
        let err = parse_rules(&json!([
            {"id": "r", "source": "any", "destination": {"app": "a"}, "ports": [], "protocol": "udp", "action": "allow"}
        ]))
        .expect_err("ports");
        assert_eq!(err.kind(), ConversionErrorKind::MissingPorts);

        let rules = parse_rules(&json!([
            {"id": "ping", "source": "any", "destination": {"app": "a"}, "protocol": "icmp", "action": "allow"}
        ]))
        .expect("icmp");
        assert_eq!(rules[0].effective_ports(), vec![(Protocol::Icmp, PortRange::single(0))]);
    }

    #[test]
    fn range_from_port_zero_is_rejected() {
        for ports in [json!([[0, 1023]]), json!(["0-1023"]), json!([{"port": 0, "endPort": 1023}])] {
            let err = parse_rules(&json!([
                {"id": "low", "source": "any", "destination": {"app": "a"}, "ports": ports, "protocol": "tcp", "action": "allow"}
            ]))
            .expect_err("zero-based range");
            assert_eq!(err.kind(), ConversionErrorKind::InvalidPort);
            assert_eq!(err.rule_id(), Some("low"));
        }

        let rules = parse_rules(&json!([
            {"id": "all", "source": "any", "destination": {"app": "a"}, "ports": [0], "protocol": "tcp", "action": "allow"}
        ]))
        .expect("port 0 alone");
        assert_eq!(rules[0].ports[0].range, PortRange::single(0));
    }

    #[test]
    fn labels_must_fit_a_policy() {
        let err = parse_rules(&json!([
            {"id": "r", "source": "any", "destination": {"app": "web server"}, "ports": [1], "protocol": "tcp", "action": "allow"}
        ]))
        .expect_err("endpoint label");
        assert_eq!(err.kind(), ConversionErrorKind::InvalidEndpoint);
        assert!(err.to_string().contains("'web server'"));

        let err = parse_rules(&json!([
            {"id": "r", "source": "any", "destination": {"app": "web"}, "ports": [1], "protocol": "tcp", "action": "allow",
             "labels": {"team": "-edge"}}
        ]))
        .expect_err("rule label");
        assert_eq!(err.kind(), ConversionErrorKind::MalformedInput);
        assert_eq!(err.rule_id(), Some("r"));

        let err = parse_rules(&json!([{"src": "-frontend", "dest": "backend", "port": 80}]))
            .expect_err("legacy name");
        assert_eq!(err.kind(), ConversionErrorKind::InvalidEndpoint);
    }

    #[test]
    fn canonical_shape_rejects_bare_names() {
        let err = parse_rules(&json!([
            {"id": "r", "source": "frontend", "destination": {"app": "a"}, "ports": [1], "protocol": "tcp", "action": "allow"}
        ]))
        .expect_err("endpoint");
        assert_eq!(err.kind(), ConversionErrorKind::InvalidEndpoint);
    }
}
