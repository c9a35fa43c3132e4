//! URL Policy (C3): pure admission filter (§4.3).

use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Normalizes a raw URL into its dedup key (§4.3, GLOSSARY "Clean URL").
///
/// Keeps scheme, authority, path, and query; drops the fragment. Nothing
/// else is rewritten — no forced scheme, no host case-folding beyond what
/// `url::Url` already does, no tracking-parameter stripping.
pub fn clean_url(raw: &str) -> Result<String, url::ParseError> {
    let mut parsed = Url::parse(raw)?;
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Configuration the admission test is evaluated against.
pub struct PolicyConfig {
    pub max_depth: i64,
    pub base_domain: String,
    pub exclude_patterns: Vec<Regex>,
    pub valid_url_patterns: Vec<Regex>,
}

/// Rules 3-5 of `should_download` (§4.3): domain scope, exclude patterns,
/// valid-url patterns. Used standalone by site drivers to filter extracted
/// links before they ever reach the Store (depth and seen-set checks happen
/// again at admission time, since they depend on mutable state this pure
/// function doesn't have).
pub fn matches_site_rules(url: &str, config: &PolicyConfig) -> bool {
    if !config.base_domain.is_empty() {
        let host_matches = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .map(|host| host.contains(&config.base_domain))
            .unwrap_or(false);
        if !host_matches {
            return false;
        }
    }

    if config.exclude_patterns.iter().any(|re| re.is_match(url)) {
        return false;
    }

    if !config.valid_url_patterns.is_empty()
        && !config.valid_url_patterns.iter().any(|re| re.is_match(url))
    {
        return false;
    }

    true
}

/// `should_download(url, depth)` (§4.3): true iff all five rules hold.
pub fn should_download(
    url: &str,
    depth: i64,
    config: &PolicyConfig,
    completed: &HashSet<String>,
    downloading: &HashSet<String>,
) -> bool {
    if depth > config.max_depth {
        return false;
    }

    let clean = match clean_url(url) {
        Ok(c) => c,
        Err(_) => return false,
    };

    if completed.contains(&clean) || downloading.contains(&clean) {
        return false;
    }

    if !matches_site_rules(url, config) {
        return false;
    }

    true
}
