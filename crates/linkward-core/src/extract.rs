use std::sync::OnceLock;

use regex::Regex;

/// Punctuation commonly glued to the end of a pasted link.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s<>":{}|\\^`\[\]]+"#).expect("static url pattern")
    })
}

/// Extracts every http(s) URL from free text, in order of appearance.
///
/// Trailing sentence punctuation is trimmed from each match so that
/// `"see https://example.com."` yields `https://example.com`. Chat-style
/// link markup (`<https://example.com|label>`) terminates the match at the
/// closing delimiters, which the pattern excludes.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_pattern()
        .find_iter(text)
        .map(|found| found.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string())
        .filter(|url| !url.is_empty())
        .collect()
}
