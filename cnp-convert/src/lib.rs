//! Firewall rule conversion and network policy validation for Cilium.
//!
//! Generic JSON firewall rules are converted into `CiliumNetworkPolicy`
//! documents, and policy documents (converted or hand-written) are checked
//! by a four-stage pipeline that yields diagnostics and fix-it suggestions.
//!
//! # Architecture
//!
//! ## Model
//!
//! - [`rule`] — Firewall rules: canonical and legacy shapes, parsed into [`rule::FirewallRule`]
//! - [`endpoint`] — Rule endpoints and label selectors with contradiction and coverage checks
//! - [`port`] — Protocols, port ranges and range normalization
//! - [`policy`] — [`policy::PolicyDocument`] and the default-deny rule semantics
//! - [`manifest`] — The `cilium.io/v2` wire form, and lifting rules back out of trees
//! - [`naming`] — Label key/value and DNS-1123 name rules
//!
//! ## Conversion
//!
//! - [`convert`] — Rules to policies: direction inference, merging, grouping
//! - [`conversion_summary`] — One-line conversion counts
//!
//! ## Validation
//!
//! - [`verify`] — Pipeline orchestration (Syntax → Schema → Style → Logic)
//! - [`verify_syntax`] — JSON/YAML well-formedness
//! - [`verify_schema`] — Shape checks against a [`schema_profile::SchemaProfile`]
//! - [`verify_style`] — Naming, ordering, duplicates and empty constructs
//! - [`verify_logic`] — Contradictions, dead rules, shadowing and overlaps
//! - [`suggest`] — Suggestions derived from diagnostic codes
//! - [`batch`] — Many documents on worker threads
//!
//! ## Support
//!
//! - [`diagnostic`] — Diagnostics, reports and location rendering
//! - [`schema_profile`] — Embedded and file-based schema profiles
//! - [`lint_config`] — Style settings and code suppression
//! - [`report`] — Terminal rendering
//!
//! # Example
//!
//! ```
//! use cnp_convert::convert::convert;
//! use cnp_convert::lint_config::LintConfig;
//! use cnp_convert::rule::parse_rules_str;
//! use cnp_convert::verify::{build_report, ValidationInput};
//!
//! let rules = parse_rules_str(
//!     r#"[{"source": "any", "destination": {"app": "web"}, "ports": [80],
//!          "protocol": "TCP", "action": "ALLOW"}]"#,
//! )?;
//! let policy = convert(&rules)?;
//! let report = build_report(ValidationInput::Document(policy), &LintConfig::default());
//! assert!(report.valid());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod batch;
pub mod conversion_summary;
pub mod convert;
pub mod diagnostic;
pub mod endpoint;
pub mod lint_config;
pub mod manifest;
pub mod naming;
pub mod policy;
pub mod port;
pub mod report;
pub mod rule;
pub mod schema_profile;
pub mod suggest;
pub mod verify;
pub mod verify_logic;
pub mod verify_schema;
pub mod verify_style;
pub mod verify_syntax;
