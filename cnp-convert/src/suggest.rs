use crate::diagnostic::Diagnostic;

/// Fix-it text per diagnostic code. `{count}` is the number of diagnostics
/// with that code, `{location}` the first one's location.
const TEMPLATES: &[(&str, &str)] = &[
    (
        "empty_endpoint_selector",
        "Name the protected workloads in endpointSelector.matchLabels; an empty selector applies the policy to every endpoint in the namespace",
    ),
    (
        "missing_endpoint_selector",
        "Add an endpointSelector so the policy applies to specific endpoints",
    ),
    (
        "missing_rules",
        "Add ingress or egress rules at {location}; a policy without rules restricts nothing",
    ),
    (
        "missing_spec",
        "Add a 'spec' mapping (or a 'specs' list) holding endpointSelector and rules",
    ),
    (
        "spec_and_specs",
        "Keep either 'spec' or 'specs'; having both makes the document ambiguous",
    ),
    (
        "missing_required_field",
        "Fill in the {count} missing required field(s), starting at {location}",
    ),
    (
        "invalid_type",
        "Fix the value type at {location} ({count} occurrence(s))",
    ),
    (
        "invalid_api_version",
        "Set apiVersion to cilium.io/v2",
    ),
    (
        "invalid_kind",
        "Set kind to CiliumNetworkPolicy or CiliumClusterwideNetworkPolicy",
    ),
    (
        "invalid_name",
        "Use a lowercase DNS-1123 name such as web-ingress for {location}",
    ),
    (
        "empty_selector",
        "Replace the empty selector at {location} with matchLabels, or use fromEntities/toEntities to allow whole groups explicitly",
    ),
    (
        "invalid_label",
        "Fix label keys and values: at most 63 characters, alphanumerics with '-', '_' or '.' inside",
    ),
    (
        "invalid_expression",
        "Give In/NotIn expressions a values list and drop values from Exists/DoesNotExist",
    ),
    ("invalid_cidr", "Write CIDRs with a prefix length, e.g. 10.0.0.0/8"),
    (
        "unknown_entity",
        "Use a known entity such as world, cluster, host or all at {location}",
    ),
    (
        "invalid_port",
        "Use a numeric port or an IANA service name at {location}",
    ),
    ("port_out_of_range", "Keep ports within 0-65535"),
    (
        "invalid_port_range",
        "Make endPort at least as large as port ({count} range(s) affected)",
    ),
    (
        "invalid_protocol",
        "Use one of TCP, UDP, SCTP, ICMP, ICMPv6 or ANY as protocol",
    ),
    (
        "unknown_field",
        "Remove or correct {count} unknown field(s), first at {location}",
    ),
    (
        "inconsistent_label_case",
        "Rename label keys to one naming convention ({count} key(s) differ)",
    ),
    ("ports_not_ascending", "List ports in ascending order for easier review"),
    (
        "empty_section",
        "Remove empty rule sections or add rules to them",
    ),
    (
        "empty_rule",
        "An empty rule only switches on default deny; add peers if traffic should be allowed",
    ),
    (
        "empty_peer_list",
        "Remove empty peer lists such as {location}; they match nothing",
    ),
    (
        "duplicate_rule",
        "Remove {count} duplicate rule(s), first at {location}",
    ),
    ("duplicate_peer", "Remove repeated peers, first at {location}"),
    ("redundant_end_port", "Drop endPort where it equals port"),
    (
        "ambiguous_direction",
        "Check the generated direction at {location}; both endpoints were label selectors",
    ),
    (
        "contradictory_selector",
        "Fix the selector at {location}; no endpoint can satisfy all of its requirements",
    ),
    (
        "empty_effect_rule",
        "Give the rule at {location} both peers and ports, or remove it; as written it allows nothing",
    ),
    (
        "shadowed_rule",
        "Remove or narrow the earlier rule; {count} rule(s) add nothing, first at {location}",
    ),
    (
        "overlapping_ports",
        "Merge overlapping port entries within a rule",
    ),
    (
        "trailing_spaces",
        "Strip trailing whitespace ({count} line(s), first at {location})",
    ),
    (
        "line_too_long",
        "Wrap or shorten lines longer than 120 characters, first at {location}",
    ),
    (
        "tab_indentation",
        "Indent with spaces instead of tabs, first at {location}",
    ),
];

/// Improvement suggestions for a diagnostic list.
///
/// One suggestion per mapped code, in order of the code's first appearance.
pub fn suggest(diagnostics: &[Diagnostic]) -> Vec<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();
    for diagnostic in diagnostics {
        let code = diagnostic.code.as_str();
        if seen.contains(&code) {
            continue;
        }
        seen.push(code);
        let Some((_, template)) = TEMPLATES.iter().find(|(c, _)| *c == code) else {
            continue;
        };
        let count = diagnostics.iter().filter(|d| d.code == code).count();
        out.push(
            template
                .replace("{count}", &count.to_string())
                .replace("{location}", &diagnostic.location),
        );
    }
    out
}
