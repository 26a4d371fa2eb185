//! Provider-aware URL cleaning rules and the canonicalizer built on them.
//!
//! A rule set is an ordered list of providers (pattern + tracking-parameter
//! rules + redirection extractors + exceptions) with a distinguished
//! `globalRules` provider applied to every URL. The canonicalizer reduces a
//! raw URL to its canonical, tracker-stripped form used as the dedup key.

mod canonicalize;
mod config;

pub use canonicalize::{UrlCanonicalizer, MAX_REDIRECT_HOPS};
pub use config::{
    load_rules_or_default, ProviderConfig, RuleSet, RuleSetError, GLOBAL_PROVIDER_NAME,
    RULES_SCHEMA_VERSION,
};
