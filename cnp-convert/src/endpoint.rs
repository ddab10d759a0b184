//! Network endpoints and label selectors.
//!
//! An [`Endpoint`] is what a firewall rule names on either side: a CIDR, a
//! label selector or the wildcard `any`. A [`Selector`] is the Kubernetes
//! label-selector shape used by policy documents (`matchLabels` plus
//! `matchExpressions`).
//!
//! ## Selector reasoning
//!
//! Two questions are answered syntactically, without a pod inventory:
//!
//! - [`Selector::contradiction`]: can any label set satisfy every constraint?
//!   A key required to equal two different values, to exist and be absent,
//!   or to take a value that is also excluded can never match.
//! - [`Selector::covers`]: does every label set matched by `other` also match
//!   `self`? Used for shadowed-rule detection. The answer is conservative: a
//!   `false` may hide a real coverage, a `true` never lies.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use ipnetwork::IpNetwork;
use serde::Serialize;

/// One side of a firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Wildcard: every peer.
    Any,
    Cidr(IpNetwork),
    /// All labels must match.
    Labels(BTreeMap<String, String>),
}

impl Endpoint {
    pub fn is_labels(&self) -> bool {
        matches!(self, Endpoint::Labels(_))
    }

    /// Parse a CIDR or a bare address (which becomes a host network).
    pub fn parse_cidr(value: &str) -> Option<IpNetwork> {
        value.trim().parse::<IpNetwork>().ok()
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Any => write!(f, "any"),
            Endpoint::Cidr(net) => write!(f, "{net}"),
            Endpoint::Labels(labels) => {
                let parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

/// Label-selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "In" => Some(Operator::In),
            "NotIn" => Some(Operator::NotIn),
            "Exists" => Some(Operator::Exists),
            "DoesNotExist" => Some(Operator::DoesNotExist),
            _ => None,
        }
    }

    pub fn takes_values(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

/// One `matchExpressions` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: Operator,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Kubernetes-style label selector.
///
/// Expressions are kept sorted with sorted, deduplicated values so that two
/// selectors written in different orders compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelRequirement>,
}

impl Selector {
    pub fn new(
        match_labels: BTreeMap<String, String>,
        match_expressions: Vec<LabelRequirement>,
    ) -> Self {
        let mut match_expressions: Vec<LabelRequirement> = match_expressions
            .into_iter()
            .map(|mut req| {
                req.values.sort();
                req.values.dedup();
                req
            })
            .collect();
        match_expressions.sort();
        match_expressions.dedup();
        Self {
            match_labels,
            match_expressions,
        }
    }

    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self::new(labels, Vec::new())
    }

    /// An empty selector matches every endpoint.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Selector requiring the constraints of both `self` and `other`.
    pub fn combined(&self, other: &Selector) -> Selector {
        let mut expressions = self.match_expressions.clone();
        expressions.extend(other.match_expressions.iter().cloned());
        // Conflicting matchLabels values cannot live in one map; carry the
        // second value as an `In` requirement so the conflict stays visible.
        let mut labels = self.match_labels.clone();
        for (key, value) in &other.match_labels {
            match labels.get(key) {
                Some(existing) if existing != value => expressions.push(LabelRequirement {
                    key: key.clone(),
                    operator: Operator::In,
                    values: vec![value.clone()],
                }),
                Some(_) => {}
                None => {
                    labels.insert(key.clone(), value.clone());
                }
            }
        }
        Selector::new(labels, expressions)
    }

    /// Every label key this selector constrains, in key order.
    pub fn keys(&self) -> BTreeSet<&str> {
        self.match_labels
            .keys()
            .map(String::as_str)
            .chain(self.match_expressions.iter().map(|r| r.key.as_str()))
            .collect()
    }

    /// Describe why no label set can satisfy this selector, if that is the case.
    pub fn contradiction(&self) -> Option<String> {
        let mut constraints: BTreeMap<&str, KeyConstraint<'_>> = BTreeMap::new();
        for (key, value) in &self.match_labels {
            constraints
                .entry(key.as_str())
                .or_default()
                .require_one_of(std::slice::from_ref(value));
        }
        for req in &self.match_expressions {
            let entry = constraints.entry(req.key.as_str()).or_default();
            match req.operator {
                Operator::In => entry.require_one_of(&req.values),
                Operator::NotIn => entry.excluded.extend(req.values.iter().map(String::as_str)),
                Operator::Exists => entry.must_exist = true,
                Operator::DoesNotExist => entry.must_not_exist = true,
            }
        }

        constraints
            .into_iter()
            .find_map(|(key, constraint)| constraint.conflict(key))
    }

    /// Whether every label set matched by `other` is also matched by `self`.
    pub fn covers(&self, other: &Selector) -> bool {
        let labels_implied = self
            .match_labels
            .iter()
            .all(|(key, value)| other.pins(key) == Some(value.as_str()));
        labels_implied
            && self
                .match_expressions
                .iter()
                .all(|req| other.implies(req))
    }

    /// The single value `key` is forced to take, if any.
    fn pins(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.match_labels.get(key) {
            return Some(value.as_str());
        }
        self.match_expressions
            .iter()
            .find(|r| r.key == key && r.operator == Operator::In && r.values.len() == 1)
            .map(|r| r.values[0].as_str())
    }

    fn implies(&self, req: &LabelRequirement) -> bool {
        if self.match_expressions.contains(req) {
            return true;
        }
        let pinned = self.pins(&req.key);
        let allowed: Option<BTreeSet<&str>> = self
            .match_expressions
            .iter()
            .filter(|r| r.key == req.key && r.operator == Operator::In)
            .map(|r| r.values.iter().map(String::as_str).collect::<BTreeSet<_>>())
            .chain(pinned.map(|v| BTreeSet::from([v])))
            .reduce(|acc, set| acc.intersection(&set).copied().collect());
        let absent = self
            .match_expressions
            .iter()
            .any(|r| r.key == req.key && r.operator == Operator::DoesNotExist);

        match req.operator {
            Operator::Exists => allowed.is_some()
                || self
                    .match_expressions
                    .iter()
                    .any(|r| r.key == req.key && r.operator == Operator::Exists),
            Operator::DoesNotExist => absent,
            Operator::In => allowed
                .map(|set| set.iter().all(|v| req.values.iter().any(|w| w == v)))
                .unwrap_or(false),
            Operator::NotIn => {
                absent
                    || allowed
                        .map(|set| set.iter().all(|v| !req.values.iter().any(|w| w == v)))
                        .unwrap_or(false)
            }
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for req in &self.match_expressions {
            match req.operator {
                Operator::Exists => parts.push(req.key.clone()),
                Operator::DoesNotExist => parts.push(format!("!{}", req.key)),
                Operator::In => parts.push(format!("{} in ({})", req.key, req.values.join(","))),
                Operator::NotIn => {
                    parts.push(format!("{} notin ({})", req.key, req.values.join(",")))
                }
            }
        }
        write!(f, "{{{}}}", parts.join(","))
    }
}

#[derive(Debug, Default)]
struct KeyConstraint<'a> {
    /// Values the key may take; `None` means unconstrained.
    allowed: Option<BTreeSet<&'a str>>,
    /// Distinct values demanded one at a time, for messages.
    demanded: Vec<&'a str>,
    excluded: BTreeSet<&'a str>,
    must_exist: bool,
    must_not_exist: bool,
}

impl<'a> KeyConstraint<'a> {
    fn require_one_of(&mut self, values: &'a [String]) {
        let set: BTreeSet<&str> = values.iter().map(String::as_str).collect();
        if let [only] = values {
            if !self.demanded.contains(&only.as_str()) {
                self.demanded.push(only.as_str());
            }
        }
        self.allowed = Some(match self.allowed.take() {
            Some(current) => current.intersection(&set).copied().collect(),
            None => set,
        });
        self.must_exist = true;
    }

    fn conflict(&self, key: &str) -> Option<String> {
        if self.must_exist && self.must_not_exist {
            return Some(format!("label '{key}' is required both to exist and to be absent"));
        }
        let allowed = self.allowed.as_ref()?;
        if allowed.difference(&self.excluded).next().is_some() {
            return None;
        }
        if let [first, second, ..] = self.demanded.as_slice() {
            return Some(format!(
                "label '{key}' is required to equal both '{first}' and '{second}'"
            ));
        }
        Some(format!("no value of label '{key}' satisfies every requirement"))
    }
}
