use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Label-key naming convention enforced by the style stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelCase {
    /// Follow whichever convention most keys in the document use.
    #[default]
    Auto,
    Kebab,
    Snake,
    Camel,
}

impl LabelCase {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelCase::Auto => "auto",
            LabelCase::Kebab => "kebab-case",
            LabelCase::Snake => "snake_case",
            LabelCase::Camel => "camelCase",
        }
    }
}

/// Style and suppression settings for validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    pub label_case: LabelCase,
    /// Diagnostic codes to drop. Errors are never dropped.
    pub disabled: Vec<String>,
}

impl LintConfig {
    pub fn is_disabled(&self, code: &str) -> bool {
        self.disabled.iter().any(|c| c == code)
    }
}

/// Errors returned when loading a lint configuration.
#[derive(Debug, Error)]
pub enum LintConfigError {
    #[error("failed to read lint config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse lint config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Load a lint configuration from a TOML file.
pub fn load_lint_config(path: &Path) -> Result<LintConfig, LintConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| LintConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| LintConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::{load_lint_config, LabelCase, LintConfig, LintConfigError};

    #[test]
    fn loads_case_and_disabled_codes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lint.toml");
        fs::write(
            &path,
            "label_case = \"kebab\"\ndisabled = [\"ports_not_ascending\"]\n",
        )
        .expect("write");
        let config = load_lint_config(&path).expect("config");
        assert_eq!(
            config,
            LintConfig {
                label_case: LabelCase::Kebab,
                disabled: vec!["ports_not_ascending".to_string()],
            }
        );
        assert!(config.is_disabled("ports_not_ascending"));
        assert!(!config.is_disabled("duplicate_rule"));
    }

    #[test]
    fn empty_file_is_default() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lint.toml");
        fs::write(&path, "").expect("write");
        assert_eq!(load_lint_config(&path).expect("config"), LintConfig::default());
    }

    #[test]
    fn unknown_keys_and_cases_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lint.toml");
        fs::write(&path, "label_case = \"screaming\"\n").expect("write");
        assert!(matches!(
            load_lint_config(&path),
            Err(LintConfigError::Parse { .. })
        ));
        fs::write(&path, "labelcase = \"kebab\"\n").expect("write");
        assert!(matches!(
            load_lint_config(&path),
            Err(LintConfigError::Parse { .. })
        ));
        assert!(matches!(
            load_lint_config(&dir.path().join("missing.toml")),
            Err(LintConfigError::Io { .. })
        ));
    }
}
