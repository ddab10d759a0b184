use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Accepted shape of one policy schema revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SchemaProfile {
    pub api_version: String,
    pub kinds: Vec<String>,
    pub operators: Vec<String>,
    pub protocols: Vec<String>,
    pub entities: Vec<String>,
    #[serde(default)]
    pub require_protocol: bool,
    pub keys: NodeKeys,
}

/// Accepted field names per node kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeKeys {
    pub envelope: Vec<String>,
    pub metadata: Vec<String>,
    pub spec: Vec<String>,
    pub selector: Vec<String>,
    pub expression: Vec<String>,
    pub ingress: Vec<String>,
    pub egress: Vec<String>,
    #[serde(default)]
    pub ingress_deny: Vec<String>,
    #[serde(default)]
    pub egress_deny: Vec<String>,
    pub cidr_set: Vec<String>,
    pub port_rule: Vec<String>,
    pub port: Vec<String>,
    #[serde(default)]
    pub l7: Vec<String>,
}

impl SchemaProfile {
    pub fn allows(list: &[String], key: &str) -> bool {
        list.iter().any(|k| k == key)
    }
}

/// Errors returned when loading a schema profile.
#[derive(Debug, Error)]
pub enum SchemaProfileError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse schema file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Load a schema profile from `path`, or the embedded one when `None`.
///
/// Returns the profile and where it came from (`embedded` or `file:<path>`).
pub fn load_schema_profile(
    path: Option<&Path>,
) -> Result<(SchemaProfile, String), SchemaProfileError> {
    let Some(path) = path else {
        return Ok((default_schema_profile(), "embedded".to_string()));
    };
    let raw = fs::read_to_string(path).map_err(|source| SchemaProfileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let profile = parse_profile(&raw, path.display().to_string())?;
    Ok((profile, format!("file:{}", path.display())))
}

/// The built-in `cilium.io/v2` profile.
pub fn default_schema_profile() -> SchemaProfile {
    let embedded = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/cilium.io-v2.toml"
    ));
    // Checked by `embedded_profile_parses`. An empty profile rejects every document.
    parse_profile(embedded, "embedded schema".to_string()).unwrap_or_else(|err| {
        tracing::error!(error = %err, "embedded schema profile unreadable");
        SchemaProfile::default()
    })
}

fn parse_profile(raw: &str, path: String) -> Result<SchemaProfile, SchemaProfileError> {
    toml::from_str(raw).map_err(|source| SchemaProfileError::Parse { path, source })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{default_schema_profile, load_schema_profile, SchemaProfile, SchemaProfileError};
    use crate::diagnostic::Severity;
    use crate::verify_schema::check_schema_with;

    #[test]
    fn embedded_profile_parses() {
        let profile = default_schema_profile();
        assert_eq!(profile.api_version, "cilium.io/v2");
        assert!(profile.protocols.iter().any(|p| p == "ICMPv6"));
        assert!(profile.keys.egress.iter().any(|k| k == "toFQDNs"));
        assert!(profile.require_protocol);
    }

    #[test]
    fn empty_profile_rejects_a_valid_policy() {
        let tree = policy_tree::parse(
            br#"
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata: {name: web}
spec:
  endpointSelector: {matchLabels: {app: web}}
  ingress:
    - fromEntities: [world]
      toPorts: [{ports: [{port: "80", protocol: TCP}]}]
"#,
        )
        .expect("parse");
        let errors = |profile: &SchemaProfile| {
            check_schema_with(&tree, profile)
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .count()
        };
        assert_eq!(errors(&default_schema_profile()), 0);
        assert!(errors(&SchemaProfile::default()) > 0);
    }

    #[test]
    fn source_reports_embedded() {
        let (_, source) = load_schema_profile(None).expect("embedded");
        assert_eq!(source, "embedded");
    }

    #[test]
    fn source_reports_override_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("schema.toml");
        let embedded = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas/cilium.io-v2.toml"
        ));
        fs::write(&path, embedded.replace("\"none\",", "\"none\", \"custom\",")).expect("write");
        let (profile, source) = load_schema_profile(Some(&path)).expect("override");
        assert!(source.starts_with("file:"));
        assert!(profile.entities.iter().any(|e| e == "custom"));
    }

    #[test]
    fn unreadable_override_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load_schema_profile(Some(&missing)),
            Err(SchemaProfileError::Io { .. })
        ));
        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "api_version = [").expect("write");
        assert!(matches!(
            load_schema_profile(Some(&bad)),
            Err(SchemaProfileError::Parse { .. })
        ));
    }
}
