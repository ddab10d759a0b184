//! Schema validation of policy documents.
//!
//! Walks a parsed tree against a [`SchemaProfile`] and reports every shape
//! violation it can find in one pass. Unknown fields are warnings so that
//! documents written for newer revisions still validate; every other finding
//! is an error.
//!
//! Accepted document forms:
//!
//! - envelope with `spec` (one policy) or `specs` (a list of policies)
//! - a bare spec mapping (`endpointSelector`, `ingress`, ...)

use policy_tree::{NodePath, TreeExt, Value};

use crate::diagnostic::{Diagnostic, Findings, Stage};
use crate::manifest::is_envelope;
use crate::naming::{is_dns1123_label, is_dns1123_subdomain, is_label_key, is_label_value, is_service_name};
use crate::policy::Direction;
use crate::schema_profile::{default_schema_profile, NodeKeys, SchemaProfile};

/// Validate a tree against the built-in `cilium.io/v2` profile.
pub fn check_schema(tree: &Value) -> Vec<Diagnostic> {
    check_schema_with(tree, &default_schema_profile())
}

/// Validate a tree against `profile`.
pub fn check_schema_with(tree: &Value, profile: &SchemaProfile) -> Vec<Diagnostic> {
    let mut check = SchemaCheck {
        profile,
        findings: Findings::new(Stage::Schema, tree),
    };
    let root = NodePath::root();
    if !tree.is_mapping() {
        check.findings.error(
            &root,
            "document_not_mapping",
            format!("policy document must be a mapping, found {}", tree.kind()),
        );
    } else if is_envelope(tree) {
        check.envelope(tree);
    } else {
        check.spec(&root, tree);
    }
    check.findings.finish()
}

/// Rule sections of a spec and the key list each is checked against.
#[derive(Clone, Copy)]
enum Section {
    Allow(Direction),
    Deny(Direction),
}

impl Section {
    const ALL: [Section; 4] = [
        Section::Allow(Direction::Ingress),
        Section::Deny(Direction::Ingress),
        Section::Allow(Direction::Egress),
        Section::Deny(Direction::Egress),
    ];

    fn key(self) -> &'static str {
        match self {
            Section::Allow(Direction::Ingress) => "ingress",
            Section::Allow(Direction::Egress) => "egress",
            Section::Deny(Direction::Ingress) => "ingressDeny",
            Section::Deny(Direction::Egress) => "egressDeny",
        }
    }

    fn direction(self) -> Direction {
        match self {
            Section::Allow(d) | Section::Deny(d) => d,
        }
    }
}

type KeyList = fn(&NodeKeys) -> &Vec<String>;

struct SchemaCheck<'a> {
    profile: &'a SchemaProfile,
    findings: Findings<'a>,
}

impl SchemaCheck<'_> {
    fn envelope(&mut self, root: &Value) {
        let base = NodePath::root();
        self.unknown_keys(&base, root, |k| &k.envelope);

        match root.child("apiVersion") {
            None => self.missing(&base, "apiVersion"),
            Some(Value::String(v)) if *v == self.profile.api_version => {}
            Some(Value::String(v)) => self.findings.error(
                &base.key("apiVersion"),
                "invalid_api_version",
                format!(
                    "apiVersion '{v}' is not supported; expected '{}'",
                    self.profile.api_version
                ),
            ),
            Some(other) => self.wrong_type(&base.key("apiVersion"), "a string", other),
        }

        match root.child("kind") {
            None => self.missing(&base, "kind"),
            Some(Value::String(v)) if self.profile.kinds.contains(v) => {}
            Some(Value::String(v)) => self.findings.error(
                &base.key("kind"),
                "invalid_kind",
                format!("kind '{v}' is not one of {}", self.profile.kinds.join(", ")),
            ),
            Some(other) => self.wrong_type(&base.key("kind"), "a string", other),
        }

        match root.child("metadata") {
            None => self.missing(&base, "metadata"),
            Some(meta) if meta.is_mapping() => self.metadata(&base.key("metadata"), meta),
            Some(other) => self.wrong_type(&base.key("metadata"), "a mapping", other),
        }

        let spec = root.child("spec");
        let specs = root.child("specs");
        if spec.is_none() && specs.is_none() {
            self.findings.error(
                &base.key("spec"),
                "missing_spec",
                "document needs a 'spec' or a 'specs' list",
            );
        }
        if spec.is_some() && specs.is_some() {
            self.findings.warn(
                &base.key("specs"),
                "spec_and_specs",
                "both 'spec' and 'specs' are present; use one of them",
            );
        }
        if let Some(spec) = spec {
            let path = base.key("spec");
            if spec.is_mapping() {
                self.spec(&path, spec);
            } else {
                self.wrong_type(&path, "a mapping", spec);
            }
        }
        if let Some(specs) = specs {
            let path = base.key("specs");
            match specs.as_sequence() {
                Some(list) if list.is_empty() => {
                    self.findings
                        .error(&path, "missing_spec", "'specs' list is empty")
                }
                Some(list) => {
                    for (idx, item) in list.iter().enumerate() {
                        if item.is_mapping() {
                            self.spec(&path.index(idx), item);
                        } else {
                            self.wrong_type(&path.index(idx), "a mapping", item);
                        }
                    }
                }
                None => self.wrong_type(&path, "a sequence", specs),
            }
        }
    }

    fn metadata(&mut self, path: &NodePath, meta: &Value) {
        self.unknown_keys(path, meta, |k| &k.metadata);
        match meta.child("name") {
            None => self.missing(path, "name"),
            Some(Value::String(name)) if is_dns1123_subdomain(name) => {}
            Some(Value::String(name)) => self.findings.error(
                &path.key("name"),
                "invalid_name",
                format!(
                    "name '{name}' must be a lowercase DNS-1123 name (a-z, 0-9, '-', '.'; at most 253 characters)"
                ),
            ),
            Some(other) => self.wrong_type(&path.key("name"), "a string", other),
        }
        if let Some(ns) = meta.child("namespace") {
            match ns.as_str() {
                Some(ns) if is_dns1123_label(ns) => {}
                Some(ns) => self.findings.error(
                    &path.key("namespace"),
                    "invalid_name",
                    format!("namespace '{ns}' must be a lowercase DNS-1123 label"),
                ),
                None => self.wrong_type(&path.key("namespace"), "a string", ns),
            }
        }
        for key in ["labels", "annotations"] {
            let Some(map) = meta.child(key) else {
                continue;
            };
            let map_path = path.key(key);
            let Some(entries) = map.as_mapping() else {
                self.wrong_type(&map_path, "a mapping", map);
                continue;
            };
            for (k, v) in entries {
                let Some(k) = k.as_str() else {
                    self.findings
                        .error(&map_path, "invalid_type", format!("{key} keys must be strings"));
                    continue;
                };
                if !v.is_string() {
                    self.wrong_type(&map_path.key(k), "a string", v);
                } else if key == "labels" {
                    self.label_pair(&map_path.key(k), k, v);
                }
            }
        }
    }

    fn spec(&mut self, path: &NodePath, spec: &Value) {
        self.unknown_keys(path, spec, |k| &k.spec);

        match (spec.child("endpointSelector"), spec.child("nodeSelector")) {
            (None, None) => self.findings.error(
                &path.key("endpointSelector"),
                "missing_endpoint_selector",
                "endpointSelector is required to choose the endpoints this policy protects",
            ),
            (Some(selector), _) => self.top_selector(&path.key("endpointSelector"), selector),
            (None, Some(selector)) => self.top_selector(&path.key("nodeSelector"), selector),
        }

        let mut any_section = false;
        for section in Section::ALL {
            let Some(rules) = spec.child(section.key()) else {
                continue;
            };
            any_section = true;
            let section_path = path.key(section.key());
            let Some(rules) = rules.as_sequence() else {
                self.wrong_type(&section_path, "a sequence", rules);
                continue;
            };
            for (idx, rule) in rules.iter().enumerate() {
                let rule_path = section_path.index(idx);
                if rule.is_mapping() {
                    self.rule(&rule_path, rule, section);
                } else {
                    self.wrong_type(&rule_path, "a mapping", rule);
                }
            }
        }
        if !any_section {
            self.findings.error(
                path,
                "missing_rules",
                "policy needs at least one of ingress, egress, ingressDeny or egressDeny",
            );
        }
    }

    /// `endpointSelector` / `nodeSelector`: must be a non-empty mapping.
    fn top_selector(&mut self, path: &NodePath, node: &Value) {
        if !node.is_mapping() {
            self.wrong_type(path, "a mapping", node);
        } else if selector_is_empty(node) {
            self.findings.error(
                path,
                "empty_endpoint_selector",
                "selector is empty and would select every endpoint; add matchLabels or matchExpressions",
            );
        } else {
            self.selector(path, node);
        }
    }

    fn rule(&mut self, path: &NodePath, rule: &Value, section: Section) {
        let pick: KeyList = match section {
            Section::Allow(Direction::Ingress) => |k| &k.ingress,
            Section::Allow(Direction::Egress) => |k| &k.egress,
            Section::Deny(Direction::Ingress) => |k| &k.ingress_deny,
            Section::Deny(Direction::Egress) => |k| &k.egress_deny,
        };
        self.unknown_keys(path, rule, pick);
        let direction = section.direction();

        for key in [direction.endpoints_key(), direction.requires_key()] {
            for (item_path, item) in self.sequence(path, rule, key) {
                if !item.is_mapping() {
                    self.wrong_type(&item_path, "a mapping", item);
                } else if selector_is_empty(item) {
                    self.findings.error(
                        &item_path,
                        "empty_selector",
                        format!(
                            "{key} entry is an empty selector; name the peers with matchLabels or matchExpressions"
                        ),
                    );
                } else {
                    self.selector(&item_path, item);
                }
            }
        }

        for (item_path, item) in self.sequence(path, rule, direction.cidr_key()) {
            self.cidr(&item_path, item);
        }

        for (item_path, item) in self.sequence(path, rule, direction.cidr_set_key()) {
            if !item.is_mapping() {
                self.wrong_type(&item_path, "a mapping", item);
                continue;
            }
            self.unknown_keys(&item_path, item, |k| &k.cidr_set);
            match item.child("cidr") {
                Some(cidr) => self.cidr(&item_path.key("cidr"), cidr),
                None if item.child("cidrGroupRef").is_some() => {}
                None => self.missing(&item_path, "cidr"),
            }
            for (except_path, except) in self.sequence(&item_path, item, "except") {
                self.cidr(&except_path, except);
            }
        }

        for (item_path, item) in self.sequence(path, rule, direction.entities_key()) {
            match item.as_str() {
                Some(entity) if self.profile.entities.iter().any(|e| e == entity) => {}
                Some(entity) => self.findings.error(
                    &item_path,
                    "unknown_entity",
                    format!(
                        "unknown entity '{entity}'; expected one of {}",
                        self.profile.entities.join(", ")
                    ),
                ),
                None => self.wrong_type(&item_path, "a string", item),
            }
        }

        for (item_path, item) in self.sequence(path, rule, "toPorts") {
            if item.is_mapping() {
                self.port_rule(&item_path, item);
            } else {
                self.wrong_type(&item_path, "a mapping", item);
            }
        }

        for key in [
            "toServices",
            "toFQDNs",
            "toGroups",
            "toNodes",
            "fromGroups",
            "fromNodes",
            "icmps",
        ] {
            // Only the container shape is checked for these.
            let _ = self.sequence(path, rule, key);
        }
    }

    fn port_rule(&mut self, path: &NodePath, node: &Value) {
        self.unknown_keys(path, node, |k| &k.port_rule);
        for (item_path, item) in self.sequence(path, node, "ports") {
            if item.is_mapping() {
                self.port(&item_path, item);
            } else {
                self.wrong_type(&item_path, "a mapping", item);
            }
        }
        if let Some(rules) = node.child("rules") {
            let rules_path = path.key("rules");
            if !rules.is_mapping() {
                self.wrong_type(&rules_path, "a mapping", rules);
                return;
            }
            self.unknown_keys(&rules_path, rules, |k| &k.l7);
            let profile = self.profile;
            for key in &profile.keys.l7 {
                let _ = self.sequence(&rules_path, rules, key);
            }
        }
    }

    fn port(&mut self, path: &NodePath, node: &Value) {
        self.unknown_keys(path, node, |k| &k.port);
        let port_path = path.key("port");
        let numeric = match node.child("port") {
            None => {
                self.missing(path, "port");
                None
            }
            Some(Value::Number(n)) => match n.as_u64().filter(|n| *n <= 65535) {
                Some(n) => Some(n),
                None => {
                    self.findings.error(
                        &port_path,
                        "port_out_of_range",
                        format!("port {n} is outside 0-65535"),
                    );
                    None
                }
            },
            Some(Value::String(s)) => match s.trim().parse::<u64>() {
                Ok(n) if n <= 65535 => Some(n),
                Ok(n) => {
                    self.findings.error(
                        &port_path,
                        "port_out_of_range",
                        format!("port {n} is outside 0-65535"),
                    );
                    None
                }
                Err(_) if is_service_name(s) => None,
                Err(_) => {
                    self.findings.error(
                        &port_path,
                        "invalid_port",
                        format!("port '{s}' is neither a number nor a service name"),
                    );
                    None
                }
            },
            Some(other) => {
                self.wrong_type(&port_path, "a number or string", other);
                None
            }
        };

        match node.child("protocol") {
            None if self.profile.require_protocol => self.missing(path, "protocol"),
            None => {}
            Some(Value::String(p)) if self.profile.protocols.contains(p) => {}
            Some(Value::String(p)) => self.findings.error(
                &path.key("protocol"),
                "invalid_protocol",
                format!(
                    "protocol '{p}' is not one of {}",
                    self.profile.protocols.join(", ")
                ),
            ),
            Some(other) => self.wrong_type(&path.key("protocol"), "a string", other),
        }

        if let Some(end) = node.child("endPort") {
            let end_path = path.key("endPort");
            let Some(end) = end.as_u64() else {
                self.wrong_type(&end_path, "an integer", end);
                return;
            };
            if !(1..=65535).contains(&end) {
                self.findings.error(
                    &end_path,
                    "invalid_port_range",
                    format!("endPort {end} is outside 1-65535"),
                );
            } else if let Some(low) = numeric.filter(|low| end < *low) {
                self.findings.error(
                    &end_path,
                    "invalid_port_range",
                    format!("endPort {end} is lower than port {low}"),
                );
            } else if numeric.is_none() && node.child_str("port").is_some_and(is_service_name) {
                self.findings.error(
                    &end_path,
                    "invalid_port_range",
                    "endPort needs a numeric port",
                );
            }
        }
    }

    fn selector(&mut self, path: &NodePath, node: &Value) {
        self.unknown_keys(path, node, |k| &k.selector);
        if let Some(labels) = node.child("matchLabels") {
            let labels_path = path.key("matchLabels");
            match labels.as_mapping() {
                Some(map) => {
                    for (k, v) in map {
                        match k.as_str() {
                            Some(k) => self.label_pair(&labels_path.key(k), k, v),
                            None => self.findings.error(
                                &labels_path,
                                "invalid_label",
                                "label keys must be strings",
                            ),
                        }
                    }
                }
                None => self.wrong_type(&labels_path, "a mapping", labels),
            }
        }

        for (item_path, expr) in self.sequence(path, node, "matchExpressions") {
            if !expr.is_mapping() {
                self.wrong_type(&item_path, "a mapping", expr);
                continue;
            }
            self.unknown_keys(&item_path, expr, |k| &k.expression);
            match expr.child("key") {
                None => self.missing(&item_path, "key"),
                Some(Value::String(key)) if is_label_key(key) => {}
                Some(Value::String(key)) => self.findings.error(
                    &item_path.key("key"),
                    "invalid_label",
                    format!("'{key}' is not a valid label key"),
                ),
                Some(other) => self.wrong_type(&item_path.key("key"), "a string", other),
            }
            let operator = match expr.child("operator") {
                None => {
                    self.missing(&item_path, "operator");
                    None
                }
                Some(Value::String(op)) if self.profile.operators.contains(op) => Some(op.as_str()),
                Some(Value::String(op)) => {
                    self.findings.error(
                        &item_path.key("operator"),
                        "invalid_expression",
                        format!(
                            "operator '{op}' is not one of {}",
                            self.profile.operators.join(", ")
                        ),
                    );
                    None
                }
                Some(other) => {
                    self.wrong_type(&item_path.key("operator"), "a string", other);
                    None
                }
            };
            let values = self.sequence(&item_path, expr, "values");
            for (value_path, value) in &values {
                if !value.is_string() {
                    self.wrong_type(value_path, "a string", value);
                }
            }
            match operator {
                Some(op @ ("In" | "NotIn")) if values.is_empty() => self.findings.error(
                    &item_path,
                    "invalid_expression",
                    format!("operator {op} needs a non-empty values list"),
                ),
                Some(op @ ("Exists" | "DoesNotExist")) if !values.is_empty() => {
                    self.findings.error(
                        &item_path.key("values"),
                        "invalid_expression",
                        format!("operator {op} takes no values"),
                    )
                }
                _ => {}
            }
        }
    }

    fn label_pair(&mut self, path: &NodePath, key: &str, value: &Value) {
        if !is_label_key(key) {
            self.findings.error(
                path,
                "invalid_label",
                format!("'{key}' is not a valid label key"),
            );
        }
        match value.as_str() {
            Some(v) if is_label_value(v) => {}
            Some(v) => self.findings.error(
                path,
                "invalid_label",
                format!("'{v}' is not a valid label value (at most 63 characters: alphanumerics, '-', '_', '.')"),
            ),
            None => self.wrong_type(path, "a string", value),
        }
    }

    fn cidr(&mut self, path: &NodePath, node: &Value) {
        match node.as_str() {
            Some(raw) if raw.contains('/') && raw.parse::<ipnetwork::IpNetwork>().is_ok() => {}
            Some(raw) => self.findings.error(
                path,
                "invalid_cidr",
                format!("'{raw}' is not a CIDR such as 10.0.0.0/8"),
            ),
            None => self.wrong_type(path, "a string", node),
        }
    }

    /// Items of an optional sequence field, with their paths. A present
    /// field of another type is reported and yields nothing.
    fn sequence<'v>(
        &mut self,
        parent: &NodePath,
        node: &'v Value,
        key: &str,
    ) -> Vec<(NodePath, &'v Value)> {
        let Some(value) = node.child(key) else {
            return Vec::new();
        };
        let path = parent.key(key);
        match value.as_sequence() {
            Some(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| (path.index(idx), item))
                .collect(),
            None => {
                self.wrong_type(&path, "a sequence", value);
                Vec::new()
            }
        }
    }

    fn unknown_keys(&mut self, path: &NodePath, node: &Value, pick: KeyList) {
        let profile = self.profile;
        let allowed = pick(&profile.keys);
        for key in node.key_names() {
            if !SchemaProfile::allows(allowed, key) {
                self.findings.warn(
                    &path.key(key),
                    "unknown_field",
                    format!("unknown field '{key}'"),
                );
            }
        }
    }

    fn missing(&mut self, parent: &NodePath, key: &str) {
        self.findings.error(
            &parent.key(key),
            "missing_required_field",
            format!("missing required field '{key}'"),
        );
    }

    fn wrong_type(&mut self, path: &NodePath, expected: &str, found: &Value) {
        self.findings.error(
            path,
            "invalid_type",
            format!("expected {expected}, found {}", found.kind()),
        );
    }
}

/// A selector mapping that constrains nothing.
fn selector_is_empty(node: &Value) -> bool {
    node.as_mapping().is_some_and(|map| {
        map.iter().all(|(key, value)| {
            matches!(key.as_str(), Some("matchLabels") | Some("matchExpressions"))
                && match value {
                    Value::Null => true,
                    Value::Mapping(m) => m.is_empty(),
                    Value::Sequence(s) => s.is_empty(),
                    _ => false,
                }
        })
    })
}
