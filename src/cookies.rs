//! Cookie file parsing (§6 "Cookies"): either a single semicolon-separated
//! `name=value` string, or a tab-separated record-per-line file. Lines
//! starting with `#` and blank lines are ignored in both forms (§11).

use reqwest::cookie::Jar;
use std::sync::Arc;
use url::Url;

/// Parses the raw contents of a cookies file into `(name, value)` pairs.
pub fn parse_cookie_file(content: &str) -> Vec<(String, String)> {
    let meaningful_lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    if meaningful_lines.is_empty() {
        return Vec::new();
    }

    if meaningful_lines.len() == 1 && meaningful_lines[0].contains(';') {
        return parse_semicolon_string(meaningful_lines[0]);
    }

    meaningful_lines
        .iter()
        .filter_map(|line| parse_tab_record(line))
        .collect()
}

fn parse_semicolon_string(line: &str) -> Vec<(String, String)> {
    line.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn parse_tab_record(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '\t');
    let name = parts.next()?.trim();
    let value = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Builds a cookie jar scoped to `base_url` from parsed cookie pairs, for
/// injection into the HTTP client (§4.4.1).
pub fn build_jar(base_url: &Url, cookies: &[(String, String)]) -> Arc<Jar> {
    let jar = Jar::default();
    for (name, value) in cookies {
        jar.add_cookie_str(&format!("{name}={value}"), base_url);
    }
    Arc::new(jar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_separated_string() {
        let cookies = parse_cookie_file("session=abc123; theme=dark");
        assert_eq!(
            cookies,
            vec![
                ("session".to_string(), "abc123".to_string()),
                ("theme".to_string(), "dark".to_string())
            ]
        );
    }

    #[test]
    fn parses_tab_separated_records() {
        let content = "# comment\nsession\tabc123\n\ntheme\tdark\n";
        let cookies = parse_cookie_file(content);
        assert_eq!(
            cookies,
            vec![
                ("session".to_string(), "abc123".to_string()),
                ("theme".to_string(), "dark".to_string())
            ]
        );
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let content = "#disabled=true\n\n  \nsession\tabc123\n";
        let cookies = parse_cookie_file(content);
        assert_eq!(cookies, vec![("session".to_string(), "abc123".to_string())]);
    }

    #[test]
    fn empty_content_yields_no_cookies() {
        assert!(parse_cookie_file("").is_empty());
    }
}
