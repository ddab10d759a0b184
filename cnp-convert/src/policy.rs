//! Typed network policy model.
//!
//! ## Default deny
//!
//! A [`PolicyDocument`] is an allow-list. Once a document selects an endpoint
//! and declares a direction, every connection in that direction is denied
//! unless some [`PolicyRule`] of that direction allows it. The absence of a
//! rule is therefore meaningful, and a rule can never deny.
//!
//! Checks do not re-derive this posture: they ask [`PolicyRule::effect`] what
//! a rule contributes under it.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use ipnetwork::IpNetwork;

use crate::endpoint::Selector;
use crate::port::Protocol;

/// Traffic direction relative to the selected endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Ingress, Direction::Egress];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }

    pub fn endpoints_key(self) -> &'static str {
        match self {
            Direction::Ingress => "fromEndpoints",
            Direction::Egress => "toEndpoints",
        }
    }

    pub fn requires_key(self) -> &'static str {
        match self {
            Direction::Ingress => "fromRequires",
            Direction::Egress => "toRequires",
        }
    }

    pub fn cidr_key(self) -> &'static str {
        match self {
            Direction::Ingress => "fromCIDR",
            Direction::Egress => "toCIDR",
        }
    }

    pub fn cidr_set_key(self) -> &'static str {
        match self {
            Direction::Ingress => "fromCIDRSet",
            Direction::Egress => "toCIDRSet",
        }
    }

    pub fn entities_key(self) -> &'static str {
        match self {
            Direction::Ingress => "fromEntities",
            Direction::Egress => "toEntities",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network policy: which endpoints it protects and what it allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub endpoint_selector: Selector,
    pub ingress: Vec<PolicyRule>,
    pub egress: Vec<PolicyRule>,
}

impl PolicyDocument {
    pub fn rules(&self, direction: Direction) -> &[PolicyRule] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    /// Whether the document puts `direction` under default deny.
    pub fn enforces(&self, direction: Direction) -> bool {
        !self.rules(direction).is_empty()
    }
}

/// What a rule contributes under default deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    /// Grants access to some peers.
    Allows,
    /// `{}`: grants nothing; only switches the direction to default deny.
    DenyOnly,
    /// Names peers with an empty port list, or ports with no peers. Grants
    /// nothing, yet reads as if it did.
    NoEffect,
}

/// One allow rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRule {
    /// `fromEndpoints` / `toEndpoints`.
    pub endpoints: Vec<Selector>,
    /// `fromRequires` / `toRequires`: extra constraints on every peer.
    pub requires: Vec<Selector>,
    /// `fromCIDR` / `toCIDR` plus `CIDRSet` entries, as written.
    pub cidrs: Vec<String>,
    pub entities: Vec<String>,
    /// Peers this model does not reason about (`toFQDNs`, `toServices`,
    /// CIDR sets with `except` entries).
    pub opaque_peers: bool,
    /// `None` when `toPorts` is absent, meaning every port.
    pub to_ports: Option<Vec<PortRule>>,
}

/// One `toPorts` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
    /// Carries L7 rules; such entries are never treated as plain L4 access.
    pub has_l7: bool,
}

/// Port value as written: numeric or an IANA service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortValue {
    Number(u16),
    Named(String),
}

impl Display for PortValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Number(n) => write!(f, "{n}"),
            PortValue::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocol {
    pub port: PortValue,
    pub end_port: Option<u16>,
    pub protocol: Protocol,
}

impl PortProtocol {
    /// Numeric range covered by this entry; `None` for named ports.
    ///
    /// Port 0 means every port.
    pub fn range(&self) -> Option<(u16, u16)> {
        match self.port {
            PortValue::Number(0) => Some((0, u16::MAX)),
            PortValue::Number(low) => Some((low, self.end_port.unwrap_or(low).max(low))),
            PortValue::Named(_) => None,
        }
    }
}

/// A peer a rule allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer<'a> {
    Endpoint(&'a Selector),
    Cidr(IpNetwork),
    Entity(&'a str),
}

impl Peer<'_> {
    /// Whether every connection from `other` is also from `self`.
    pub fn covers(&self, other: &Peer<'_>) -> bool {
        match (self, other) {
            (Peer::Entity("all"), _) => true,
            (Peer::Entity("cluster"), Peer::Endpoint(_)) => true,
            (Peer::Entity(a), Peer::Entity(b)) => a == b,
            (Peer::Endpoint(a), Peer::Endpoint(b)) => a.covers(b),
            (Peer::Cidr(a), Peer::Cidr(b)) => a.prefix() <= b.prefix() && a.contains(b.network()),
            _ => false,
        }
    }
}

impl PolicyRule {
    pub fn has_peers(&self) -> bool {
        !self.endpoints.is_empty()
            || !self.cidrs.is_empty()
            || !self.entities.is_empty()
            || self.opaque_peers
    }

    /// Classify the rule under default deny.
    pub fn effect(&self) -> RuleEffect {
        let grants_ports = self
            .to_ports
            .as_ref()
            .map(|rules| rules.iter().any(|rule| !rule.ports.is_empty()));
        match (self.has_peers(), grants_ports) {
            (true, None) | (true, Some(true)) => RuleEffect::Allows,
            (false, None) | (false, Some(false)) => RuleEffect::DenyOnly,
            (true, Some(false)) | (false, Some(true)) => RuleEffect::NoEffect,
        }
    }

    pub fn has_l7(&self) -> bool {
        self.to_ports
            .as_ref()
            .is_some_and(|rules| rules.iter().any(|rule| rule.has_l7))
    }

    /// Peers in written order. Unparseable CIDRs are left out.
    pub fn peers(&self) -> Vec<Peer<'_>> {
        self.endpoints
            .iter()
            .map(Peer::Endpoint)
            .chain(
                self.cidrs
                    .iter()
                    .filter_map(|raw| raw.parse::<IpNetwork>().ok())
                    .map(Peer::Cidr),
            )
            .chain(self.entities.iter().map(|e| Peer::Entity(e.as_str())))
            .collect()
    }

    pub fn port_entries(&self) -> impl Iterator<Item = &PortProtocol> {
        self.to_ports
            .iter()
            .flatten()
            .flat_map(|rule| rule.ports.iter())
    }
}
