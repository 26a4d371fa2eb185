//! Host-mirror rewrites suggested alongside matching links.

use regex::{Regex, RegexBuilder};

/// Rewrites links on one host to a mirror front-end. The replacement uses
/// regex capture expansion (`$1` etc.).
#[derive(Debug, Clone)]
pub struct MirrorRule {
    pattern: Regex,
    replacement: String,
}

impl MirrorRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            replacement: replacement.to_string(),
        })
    }

    /// Built-in rules: x.com posts get an xcancel.com mirror.
    pub fn defaults() -> Vec<Self> {
        vec![Self::new(
            r"^https?://(?:www\.)?x\.com/(.+)$",
            "https://xcancel.com/$1",
        )
        .expect("static mirror rule")]
    }

    fn apply(&self, url: &str) -> Option<String> {
        if !self.pattern.is_match(url) {
            return None;
        }
        Some(self.pattern.replace(url, self.replacement.as_str()).into_owned())
    }
}

/// Mirror links worth suggesting for `urls`: first matching rule per URL,
/// skipping mirrors the author already included in the message text, each
/// mirror listed once.
pub fn suggest_mirrors(rules: &[MirrorRule], message_text: &str, urls: &[String]) -> Vec<String> {
    let text_lower = message_text.to_lowercase();
    let mut mirrors: Vec<String> = Vec::new();

    for url in urls {
        let Some(mirror) = rules.iter().find_map(|rule| rule.apply(url)) else {
            continue;
        };
        if mirror.eq_ignore_ascii_case(url) {
            continue;
        }
        if text_lower.contains(&mirror.to_lowercase()) {
            continue;
        }
        if !mirrors.iter().any(|seen| seen.eq_ignore_ascii_case(&mirror)) {
            mirrors.push(mirror);
        }
    }

    mirrors
}
