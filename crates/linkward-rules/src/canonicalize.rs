use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};
use url::Url;

use crate::config::{ProviderConfig, RuleSet, RuleSetError, GLOBAL_PROVIDER_NAME};

/// Redirection unwrapping is performed at most this many times per call.
/// A redirect target that is itself a wrapper is returned partially
/// unwrapped; that is policy, not a defect.
pub const MAX_REDIRECT_HOPS: usize = 1;

/// Wrapper parameter names probed by the generic redirection fallback, in
/// order. These are the "target URL carried as a parameter" synonyms used
/// by redirect/ad/affiliate services.
const WRAPPER_PARAM_KEYS: &[&str] = &[
    "url",
    "q",
    "uddg",
    "adurl",
    "u",
    "z",
    "to",
    "r",
    "mpre",
    "wgtarget",
    "murl",
    "ulp",
    "remoteUrl",
    "trg",
    "dest",
    "deeplinkurl",
    "ckurl",
    "htmlurl",
    "redirect",
    "redirect_url",
];

struct CompiledProvider {
    name: String,
    url_pattern: Regex,
    rules: Vec<Regex>,
    referral_marketing: Vec<Regex>,
    raw_rules: Vec<Regex>,
    redirections: Vec<Regex>,
    exceptions: Vec<Regex>,
}

impl CompiledProvider {
    fn compile(config: &ProviderConfig) -> Result<Self, RuleSetError> {
        Ok(Self {
            name: config.name.clone(),
            url_pattern: compile_search(&config.name, "urlPattern", &config.url_pattern)?,
            rules: compile_name_rules(&config.name, "rules", &config.rules)?,
            referral_marketing: compile_name_rules(
                &config.name,
                "referralMarketing",
                &config.referral_marketing,
            )?,
            raw_rules: compile_search_rules(&config.name, "rawRules", &config.raw_rules)?,
            redirections: compile_search_rules(&config.name, "redirections", &config.redirections)?,
            exceptions: compile_search_rules(&config.name, "exceptions", &config.exceptions)?,
        })
    }

    fn matches(&self, url: &str) -> bool {
        self.url_pattern.is_match(url)
    }

    fn matches_exception(&self, url: &str) -> bool {
        self.exceptions.iter().any(|pattern| pattern.is_match(url))
    }

    fn removes_param(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| rule.is_match(key))
            || self
                .referral_marketing
                .iter()
                .any(|rule| rule.is_match(key))
    }

    fn raw_token_matches(&self, token: &str) -> bool {
        self.raw_rules.iter().any(|rule| rule.is_match(token))
    }

    /// First matching redirection extractor's capture, percent-decoded.
    fn redirect_target(&self, url: &str) -> Option<String> {
        for pattern in &self.redirections {
            if let Some(found) = pattern.captures(url).and_then(|caps| caps.get(1)) {
                if !found.as_str().is_empty() {
                    return Some(
                        percent_decode_str(found.as_str())
                            .decode_utf8_lossy()
                            .into_owned(),
                    );
                }
            }
        }
        None
    }
}

fn compile_search(provider: &str, field: &'static str, pattern: &str) -> Result<Regex, RuleSetError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleSetError::InvalidPattern {
            provider: provider.to_string(),
            field,
            source,
        })
}

fn compile_search_rules(
    provider: &str,
    field: &'static str,
    patterns: &[String],
) -> Result<Vec<Regex>, RuleSetError> {
    patterns
        .iter()
        .map(|pattern| compile_search(provider, field, pattern))
        .collect()
}

/// Parameter-name rules are anchored to the whole decoded name so that a
/// one-letter rule like `t` strips `t=42` without touching `start=10`.
fn compile_name_rules(
    provider: &str,
    field: &'static str,
    patterns: &[String],
) -> Result<Vec<Regex>, RuleSetError> {
    patterns
        .iter()
        .map(|pattern| compile_search(provider, field, &format!("^(?:{pattern})$")))
        .collect()
}

/// Provider-aware URL canonicalizer.
///
/// Pure and stateless after construction; safe to share across threads and
/// call with unbounded parallelism.
pub struct UrlCanonicalizer {
    specific: Vec<CompiledProvider>,
    global: Option<CompiledProvider>,
}

impl UrlCanonicalizer {
    /// Compiles a rule set. Provider order becomes resolution priority.
    pub fn new(rules: &RuleSet) -> Result<Self, RuleSetError> {
        let mut specific = Vec::new();
        let mut global = None;
        for provider in &rules.providers {
            let compiled = CompiledProvider::compile(provider)?;
            if provider.name == GLOBAL_PROVIDER_NAME {
                global = Some(compiled);
            } else {
                specific.push(compiled);
            }
        }
        Ok(Self { specific, global })
    }

    /// Canonicalizer over the embedded default rule set.
    pub fn with_default_rules() -> Self {
        Self::new(&RuleSet::embedded_defaults()).expect("embedded default rules compile")
    }

    /// Reduces `raw_url` to its canonical form: provider resolution,
    /// exception check, at most one redirection unwrap, tracking-parameter
    /// removal, scheme/host lower-casing, fragment removal.
    ///
    /// Never fails: input that does not parse is returned unmodified.
    pub fn canonicalize(&self, raw_url: &str) -> String {
        let trimmed = raw_url.trim();
        if trimmed.is_empty() {
            return raw_url.to_string();
        }
        let Ok(mut url) = Url::parse(trimmed) else {
            return raw_url.to_string();
        };
        url.set_fragment(None);
        if !matches!(url.scheme(), "http" | "https") {
            return url.to_string();
        }

        let mut provider = self.provider_for(url.as_str());

        if let Some(matched) = provider {
            if matched.matches_exception(url.as_str()) {
                return url.to_string();
            }

            // One hop only (MAX_REDIRECT_HOPS): provider-specific extractors
            // first, then the generic wrapper-parameter scan. The decoded
            // candidate must itself be an absolute http(s) URL; anything
            // else (e.g. a search query in `q`) is not a redirect.
            let target = matched
                .redirect_target(url.as_str())
                .or_else(|| generic_redirect_target(&url));
            if let Some(next) = target.as_deref().and_then(parse_http_target) {
                tracing::debug!(
                    provider = matched.name.as_str(),
                    target = next.as_str(),
                    "unwrapped redirect target"
                );
                url = next;
                provider = self.provider_for(url.as_str());
            }
        }

        let filtered = self.filter_query(provider, url.query());
        url.set_query(filtered.as_deref());
        url.to_string()
    }

    /// First specific provider whose pattern matches, in configured order.
    fn provider_for(&self, url: &str) -> Option<&CompiledProvider> {
        self.specific.iter().find(|provider| provider.matches(url))
    }

    /// Applies parameter filtering, preserving the raw encoding and order
    /// of surviving pairs. Providerless URLs lose every parameter: unknown
    /// sites get maximal stripping.
    fn filter_query(
        &self,
        provider: Option<&CompiledProvider>,
        query: Option<&str>,
    ) -> Option<String> {
        let query = query?;
        if query.is_empty() {
            return None;
        }
        let provider = provider?;

        let kept: Vec<&str> = query
            .split('&')
            .filter(|token| !token.is_empty())
            .filter(|token| {
                let raw_key = token.split('=').next().unwrap_or(token);
                let key = decode_param_key(raw_key);
                !(provider.removes_param(&key)
                    || provider.raw_token_matches(token)
                    || self
                        .global
                        .as_ref()
                        .is_some_and(|global| global.removes_param(&key)))
            })
            .collect();

        if kept.is_empty() {
            None
        } else {
            Some(kept.join("&"))
        }
    }
}

/// Scans the query for well-known wrapper parameter names carrying the
/// real destination. Only consulted when a specific provider matched.
fn generic_redirect_target(url: &Url) -> Option<String> {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    for key in WRAPPER_PARAM_KEYS {
        if let Some((_, value)) = pairs.iter().find(|(name, _)| name == key) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }
    None
}

fn parse_http_target(candidate: &str) -> Option<Url> {
    let mut parsed = Url::parse(candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_fragment(None);
    Some(parsed)
}

fn decode_param_key(raw: &str) -> String {
    let plus_normalized = raw.replace('+', " ");
    percent_decode_str(&plus_normalized)
        .decode_utf8_lossy()
        .into_owned()
}
