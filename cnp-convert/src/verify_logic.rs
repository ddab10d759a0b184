//! Logical conflict detection over allow rules.
//!
//! Checks are plain functions registered with [`inventory`]: a [`RuleCheck`]
//! looks at one rule, a [`PairCheck`] at a later rule against each earlier
//! rule in the same direction. New heuristics are added by submitting
//! another check; the driver below never changes.

use ipnetwork::IpNetwork;
use policy_tree::Value;

use crate::diagnostic::{Diagnostic, Findings, Severity, Stage};
use crate::endpoint::Selector;
use crate::manifest::spec_sites;
use crate::policy::{Direction, PolicyRule, PortProtocol, PortValue, RuleEffect};

/// One allow rule as seen by a check.
#[derive(Debug, Clone, Copy)]
pub struct RuleView<'a> {
    pub direction: Direction,
    /// Position in its section.
    pub index: usize,
    pub rule: &'a PolicyRule,
}

/// A check over a single rule. Each returned message becomes one diagnostic
/// at the rule.
pub struct RuleCheck {
    pub code: &'static str,
    pub severity: Severity,
    pub run: fn(RuleView<'_>) -> Vec<String>,
}

/// A check of a later rule against an earlier one. Only the first earlier
/// rule that triggers it is reported.
pub struct PairCheck {
    pub code: &'static str,
    pub severity: Severity,
    pub run: fn(earlier: RuleView<'_>, later: RuleView<'_>) -> Option<String>,
}

inventory::collect!(RuleCheck);
inventory::collect!(PairCheck);

inventory::submit! {
    RuleCheck {
        code: "contradictory_selector",
        severity: Severity::Error,
        run: contradictory_selector,
    }
}

inventory::submit! {
    RuleCheck {
        code: "empty_effect_rule",
        severity: Severity::Error,
        run: empty_effect_rule,
    }
}

inventory::submit! {
    RuleCheck {
        code: "overlapping_ports",
        severity: Severity::Info,
        run: overlapping_ports,
    }
}

inventory::submit! {
    PairCheck {
        code: "shadowed_rule",
        severity: Severity::Warning,
        run: shadowed_rule,
    }
}

/// Registered single-rule checks, errors first.
pub fn rule_checks() -> Vec<&'static RuleCheck> {
    let mut checks: Vec<&'static RuleCheck> = inventory::iter::<RuleCheck>.into_iter().collect();
    checks.sort_by_key(|check| (check.severity.rank(), check.code));
    checks
}

/// Registered rule-pair checks, errors first.
pub fn pair_checks() -> Vec<&'static PairCheck> {
    let mut checks: Vec<&'static PairCheck> = inventory::iter::<PairCheck>.into_iter().collect();
    checks.sort_by_key(|check| (check.severity.rank(), check.code));
    checks
}

pub fn check_logic(tree: &Value) -> Vec<Diagnostic> {
    let mut findings = Findings::new(Stage::Logic, tree);
    let rule_checks = rule_checks();
    let pair_checks = pair_checks();

    for site in spec_sites(tree) {
        if let Some(reason) = site.selector.as_ref().and_then(Selector::contradiction) {
            findings.error(
                &site.path.key("endpointSelector"),
                "contradictory_selector",
                format!("contradictory selector in endpointSelector: {reason}"),
            );
        }
        for direction in Direction::ALL {
            let views: Vec<RuleView<'_>> = site
                .rules(direction)
                .iter()
                .enumerate()
                .map(|(index, rule)| RuleView {
                    direction,
                    index,
                    rule,
                })
                .collect();
            for (pos, view) in views.iter().enumerate() {
                let path = site.rule_path(direction, view.index);
                for check in &rule_checks {
                    for message in (check.run)(*view) {
                        findings.push(check.severity, &path, check.code, message);
                    }
                }
                for check in &pair_checks {
                    if let Some(message) = views[..pos]
                        .iter()
                        .find_map(|earlier| (check.run)(*earlier, *view))
                    {
                        findings.push(check.severity, &path, check.code, message);
                    }
                }
            }
        }
    }
    findings.finish()
}

fn contradictory_selector(view: RuleView<'_>) -> Vec<String> {
    let rule = view.rule;
    let requires = rule
        .requires
        .iter()
        .fold(None::<Selector>, |acc, req| {
            Some(acc.map_or_else(|| req.clone(), |acc| acc.combined(req)))
        });
    let requires_key = view.direction.requires_key();
    let endpoints_key = view.direction.endpoints_key();

    if rule.endpoints.is_empty() {
        return requires
            .and_then(|req| req.contradiction())
            .map(|reason| vec![format!("contradictory selector in {requires_key}: {reason}")])
            .unwrap_or_default();
    }
    rule.endpoints
        .iter()
        .enumerate()
        .filter_map(|(idx, endpoint)| {
            let (selector, suffix) = match &requires {
                Some(req) => (endpoint.combined(req), format!(" combined with {requires_key}")),
                None => (endpoint.clone(), String::new()),
            };
            let reason = selector.contradiction()?;
            Some(format!(
                "contradictory selector in {endpoints_key}[{idx}]{suffix}: {reason}"
            ))
        })
        .collect()
}

fn empty_effect_rule(view: RuleView<'_>) -> Vec<String> {
    let rule = view.rule;
    if rule.effect() != RuleEffect::NoEffect {
        return Vec::new();
    }
    let message = if rule.has_peers() {
        "rule names peers but its toPorts lists no port, so it allows nothing".to_string()
    } else {
        format!(
            "rule lists ports but no peers, so it allows nothing; add {} or {}",
            view.direction.endpoints_key(),
            view.direction.entities_key()
        )
    };
    vec![message]
}

fn overlapping_ports(view: RuleView<'_>) -> Vec<String> {
    let entries: Vec<&PortProtocol> = view.rule.port_entries().collect();
    let mut messages = Vec::new();
    for (idx, a) in entries.iter().enumerate() {
        for b in &entries[idx + 1..] {
            let (Some((a_low, a_high)), Some((b_low, b_high))) = (a.range(), b.range()) else {
                continue;
            };
            if a.protocol.intersects(b.protocol) && a_low <= b_high && b_low <= a_high {
                messages.push(format!(
                    "ports {} and {} overlap",
                    describe_port(a),
                    describe_port(b)
                ));
            }
        }
    }
    messages
}

fn describe_port(entry: &PortProtocol) -> String {
    match (&entry.port, entry.end_port) {
        (PortValue::Number(low), Some(high)) if high > *low => {
            format!("{low}-{high}/{}", entry.protocol.as_str())
        }
        (port, _) => format!("{port}/{}", entry.protocol.as_str()),
    }
}

fn shadowed_rule(earlier: RuleView<'_>, later: RuleView<'_>) -> Option<String> {
    let comparable = |rule: &PolicyRule| {
        rule.effect() == RuleEffect::Allows
            && !rule.has_l7()
            && !rule.opaque_peers
            && rule.cidrs.iter().all(|c| c.parse::<IpNetwork>().is_ok())
    };
    if !comparable(earlier.rule) || !comparable(later.rule) {
        return None;
    }
    if covers(earlier.rule, later.rule) && !covers(later.rule, earlier.rule) {
        Some(format!(
            "rule {} is shadowed by rule {}: every peer and port it allows is already allowed",
            later.index, earlier.index
        ))
    } else {
        None
    }
}

/// Whether `a` allows everything `b` allows.
fn covers(a: &PolicyRule, b: &PolicyRule) -> bool {
    let same_requires = a.requires.is_empty() || {
        let mut left = a.requires.clone();
        let mut right = b.requires.clone();
        left.sort();
        right.sort();
        left == right
    };
    let a_peers = a.peers();
    let peers_covered = b
        .peers()
        .iter()
        .all(|peer| a_peers.iter().any(|outer| outer.covers(peer)));
    same_requires && peers_covered && ports_covered(a, b)
}

fn ports_covered(a: &PolicyRule, b: &PolicyRule) -> bool {
    if a.to_ports.is_none() {
        return true;
    }
    if b.to_ports.is_none() {
        return false;
    }
    let outer: Vec<&PortProtocol> = a.port_entries().collect();
    b.port_entries().all(|inner| {
        outer.iter().any(|o| {
            o.protocol.covers(inner.protocol)
                && match (o.range(), inner.range()) {
                    (Some((low, high)), Some((in_low, in_high))) => low <= in_low && in_high <= high,
                    (Some((0, u16::MAX)), None) => true,
                    (None, None) => o.port == inner.port,
                    _ => false,
                }
        })
    })
}
