//! Transport protocols, port ranges and port normalization.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Transport protocol as written in Cilium port rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "SCTP")]
    Sctp,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "ICMPv6")]
    IcmpV6,
    #[serde(rename = "ANY")]
    Any,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
            Protocol::Icmp => "ICMP",
            Protocol::IcmpV6 => "ICMPv6",
            Protocol::Any => "ANY",
        }
    }

    /// Parse the exact spelling Cilium accepts.
    pub fn from_cilium(value: &str) -> Option<Self> {
        match value {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            "SCTP" => Some(Protocol::Sctp),
            "ICMP" => Some(Protocol::Icmp),
            "ICMPv6" => Some(Protocol::IcmpV6),
            "ANY" => Some(Protocol::Any),
            _ => None,
        }
    }

    /// Parse a firewall-rule protocol (TCP, UDP, ICMP or ANY, any case).
    pub fn from_rule(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "icmp" => Some(Protocol::Icmp),
            "any" | "all" | "*" => Some(Protocol::Any),
            _ => None,
        }
    }

    /// Whether two port entries can refer to the same traffic.
    pub fn intersects(self, other: Protocol) -> bool {
        self == other || self == Protocol::Any || other == Protocol::Any
    }

    /// Whether this protocol matches everything `other` matches.
    pub fn covers(self, other: Protocol) -> bool {
        self == other || self == Protocol::Any
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive port range. A single port is `low == high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    /// Build a range, rejecting `low > high`.
    pub fn new(low: u16, high: u16) -> Option<Self> {
        (low <= high).then_some(Self { low, high })
    }

    pub fn single(port: u16) -> Self {
        Self {
            low: port,
            high: port,
        }
    }

    pub fn is_single(&self) -> bool {
        self.low == self.high
    }

    /// `0-N` with `N > 0`. Policies read port 0 as every port, so such a
    /// range has no faithful policy form.
    pub fn is_zero_based_span(&self) -> bool {
        self.low == 0 && self.high > 0
    }

    pub fn contains(&self, other: &PortRange) -> bool {
        self.low <= other.low && other.high <= self.high
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    fn touches(&self, other: &PortRange) -> bool {
        u32::from(other.low) <= u32::from(self.high) + 1
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// One entry of a firewall rule's port list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub range: PortRange,
    /// Overrides the rule-level protocol for this entry.
    pub protocol: Option<Protocol>,
}

impl PortSpec {
    pub fn single(port: u16) -> Self {
        Self {
            range: PortRange::single(port),
            protocol: None,
        }
    }
}

/// Merge port entries: deduplicate and coalesce overlapping or adjacent
/// ranges of the same protocol. Port 0 (every port) absorbs every other
/// range of its protocol.
///
/// Output is sorted by low port, then high port, then protocol.
pub fn normalize_ports(
    entries: impl IntoIterator<Item = (Protocol, PortRange)>,
) -> Vec<(Protocol, PortRange)> {
    let mut by_protocol: BTreeMap<Protocol, Vec<PortRange>> = BTreeMap::new();
    for (protocol, range) in entries {
        by_protocol.entry(protocol).or_default().push(range);
    }

    let mut out = Vec::new();
    for (protocol, mut ranges) in by_protocol {
        if ranges.iter().any(|range| range.low == 0) {
            out.push((protocol, PortRange::single(0)));
            continue;
        }
        ranges.sort();
        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.touches(&range) => last.high = last.high.max(range.high),
                _ => merged.push(range),
            }
        }
        out.extend(merged.into_iter().map(|range| (protocol, range)));
    }
    out.sort_by_key(|(protocol, range)| (range.low, range.high, *protocol));
    out
}
