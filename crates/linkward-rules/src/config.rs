use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current rules-file schema version.
pub const RULES_SCHEMA_VERSION: u32 = 1;

/// Name of the distinguished provider whose `rules` apply to every URL.
pub const GLOBAL_PROVIDER_NAME: &str = "globalRules";

const EMBEDDED_RULES: &str = include_str!("default_rules.json");

/// Errors raised while loading or compiling a rule set.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("invalid regex in provider '{provider}' ({field}): {source}")]
    InvalidPattern {
        provider: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("unsupported rules schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One provider: a URL pattern plus the parameter rules, redirection
/// extractors, and exceptions applied to URLs it matches.
///
/// Field names follow the ClearURLs data layout. All regexes are evaluated
/// case-insensitively; `rules` and `referralMarketing` entries are matched
/// against the whole decoded parameter name, `rawRules` against the raw
/// `key=value` token, and `urlPattern`/`redirections`/`exceptions` are
/// unanchored searches over the normalized URL string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub name: String,
    pub url_pattern: String,
    pub rules: Vec<String>,
    pub referral_marketing: Vec<String>,
    pub raw_rules: Vec<String>,
    pub redirections: Vec<String>,
    pub exceptions: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url_pattern: String::from(".*"),
            rules: Vec::new(),
            referral_marketing: Vec::new(),
            raw_rules: Vec::new(),
            redirections: Vec::new(),
            exceptions: Vec::new(),
        }
    }
}

/// A full, priority-ordered rule set.
///
/// Provider order in `providers` is resolution order: the first specific
/// provider whose pattern matches a URL wins. The provider named
/// [`GLOBAL_PROVIDER_NAME`] never matches specifically; its `rules` apply
/// to every URL in addition to the winner's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub schema_version: u32,
    pub providers: Vec<ProviderConfig>,
}

impl RuleSet {
    /// Parses a rule set from its JSON form, validating the schema version.
    pub fn from_json_str(raw: &str) -> Result<Self, RuleSetError> {
        let parsed: Self = serde_json::from_str(raw)?;
        if parsed.schema_version != RULES_SCHEMA_VERSION {
            return Err(RuleSetError::UnsupportedSchemaVersion {
                found: parsed.schema_version,
                expected: RULES_SCHEMA_VERSION,
            });
        }
        Ok(parsed)
    }

    /// Returns the rule set compiled into the binary.
    pub fn embedded_defaults() -> Self {
        Self::from_json_str(EMBEDDED_RULES).expect("embedded default rules parse")
    }

    /// The distinguished global provider, if present.
    pub fn global_provider(&self) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|provider| provider.name == GLOBAL_PROVIDER_NAME)
    }

    /// Provider names in resolution order, the global provider excluded.
    pub fn specific_provider_names(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|provider| provider.name != GLOBAL_PROVIDER_NAME)
            .map(|provider| provider.name.as_str())
            .collect()
    }
}

/// Loads a rule set from `path`, falling back to the embedded defaults when
/// no path is given or the file cannot be read or parsed.
///
/// The canonicalizer must always come up, so a broken rules file is a
/// diagnostic, not an error.
pub fn load_rules_or_default(path: Option<&Path>) -> RuleSet {
    let Some(path) = path else {
        return RuleSet::embedded_defaults();
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "failed to read rules file; using embedded defaults"
            );
            return RuleSet::embedded_defaults();
        }
    };

    match RuleSet::from_json_str(&raw) {
        Ok(rules) => rules,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "failed to parse rules file; using embedded defaults"
            );
            RuleSet::embedded_defaults()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse_and_include_global_rules() {
        let rules = RuleSet::embedded_defaults();
        assert_eq!(rules.schema_version, RULES_SCHEMA_VERSION);
        assert!(rules.global_provider().is_some());
        assert!(rules
            .specific_provider_names()
            .iter()
            .any(|name| *name == "google"));
    }

    #[test]
    fn provider_order_is_preserved() {
        let raw = r#"{
            "schema_version": 1,
            "providers": [
                {"name": "beta", "urlPattern": "beta"},
                {"name": "alpha", "urlPattern": "alpha"}
            ]
        }"#;
        let rules = RuleSet::from_json_str(raw).expect("parse");
        assert_eq!(rules.specific_provider_names(), vec!["beta", "alpha"]);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let raw = r#"{"schema_version": 99, "providers": []}"#;
        assert!(matches!(
            RuleSet::from_json_str(raw),
            Err(RuleSetError::UnsupportedSchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn missing_rules_file_falls_back_to_defaults() {
        let rules = load_rules_or_default(Some(Path::new("/nonexistent/rules.json")));
        assert!(rules.global_provider().is_some());
    }

    #[test]
    fn malformed_rules_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");
        let rules = load_rules_or_default(Some(&path));
        assert!(rules.global_provider().is_some());
    }

    #[test]
    fn rules_file_overrides_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 1, "providers": [{"name": "only", "urlPattern": "only"}]}"#,
        )
        .expect("write");
        let rules = load_rules_or_default(Some(&path));
        assert_eq!(rules.specific_provider_names(), vec!["only"]);
        assert!(rules.global_provider().is_none());
    }
}
