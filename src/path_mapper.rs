//! Path Mapper (C4): pure, total URL -> local output path (§4.3).

use once_cell_fallback::OnceLazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Output artifact format, shared by both site drivers (§6 `output.format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Html,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }
}

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn sanitize_segment(segment: &str) -> String {
    segment.replace(RESERVED_CHARS, "_")
}

/// Page-id extraction patterns, tried in order (§4.3).
fn page_id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLazy<Vec<Regex>> = OnceLazy::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"/pages/(\d+)").unwrap(),
            Regex::new(r"pageId=(\d+)").unwrap(),
            Regex::new(r"/content/(\d+)").unwrap(),
            Regex::new(r"/(\d{6,})").unwrap(),
        ]
    })
}

/// Extracts a stable page id from a URL, trying the configured patterns in
/// order, falling back to the last non-empty path segment, and finally to a
/// 10-char hex MD5 digest of the URL (§4.3).
pub fn page_id_from_url(url: &str) -> String {
    for pattern in page_id_patterns() {
        if let Some(caps) = pattern.captures(url) {
            if let Some(m) = caps.get(1) {
                return m.as_str().to_string();
            }
        }
    }

    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).last() {
                return last.to_string();
            }
        }
    }

    let digest = format!("{:x}", md5::compute(url.as_bytes()));
    format!("page_{}", &digest[..10])
}

/// Wiki-API mode path: `<output_dir>/spaces/<space>/pages/<page_id>/index.<ext>` (§4.3, S2).
pub fn wiki_path(output_dir: &Path, space: &str, url: &str, format: OutputFormat) -> PathBuf {
    let page_id = page_id_from_url(url);
    output_dir
        .join("spaces")
        .join(sanitize_segment(space))
        .join("pages")
        .join(sanitize_segment(&page_id))
        .join(format!("index.{}", format.extension()))
}

/// Generic HTML mode path: the URL's path, sanitized segment by segment,
/// with `index.<ext>` appended when the path is directory-like (§4.3).
pub fn html_path(output_dir: &Path, url: &str, format: OutputFormat) -> PathBuf {
    let parsed = match url::Url::parse(url) {
        Ok(u) => u,
        Err(_) => {
            let digest = md5::compute(url.as_bytes());
            return output_dir
                .join(format!("page_{:x}", digest))
                .join(format!("index.{}", format.extension()));
        }
    };

    let path = parsed.path();
    let directory_like = path.is_empty() || path.ends_with('/') || !path.rsplit('/').next().unwrap_or("").contains('.');

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize_segment)
        .collect();

    let mut out = output_dir.to_path_buf();
    for segment in &segments {
        out = out.join(segment);
    }

    if directory_like {
        out.join(format!("index.{}", format.extension()))
    } else {
        out
    }
}

/// Relative filesystem path from the directory containing `from_file` to
/// `to_file`, for rewriting an anchor's href so it resolves correctly on
/// disk (§4.4.1, §8 property 5).
pub fn relative_href(from_file: &Path, to_file: &Path) -> String {
    let from_dir = from_file.parent().unwrap_or(Path::new(""));
    let from_components: Vec<_> = from_dir.components().collect();
    let to_components: Vec<_> = to_file.components().collect();

    let common = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = from_components.len() - common;
    let mut parts: Vec<String> = Vec::new();
    for _ in 0..ups {
        parts.push("..".to_string());
    }
    for component in &to_components[common..] {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Small dependency-free replacement for `once_cell::sync::OnceCell` so the
/// regex table above is compiled exactly once without adding another crate
/// for a single use site.
mod once_cell_fallback {
    use std::sync::OnceLock;

    pub struct OnceLazy<T> {
        cell: OnceLock<T>,
    }

    impl<T> OnceLazy<T> {
        pub const fn new() -> Self {
            Self {
                cell: OnceLock::new(),
            }
        }

        pub fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
            self.cell.get_or_init(f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s2_wiki_path_mapping() {
        let url = "https://host/wiki/spaces/AR/pages/556040223/My+Page";
        let p = wiki_path(Path::new("/out"), "AR", url, OutputFormat::Markdown);
        assert_eq!(p, PathBuf::from("/out/spaces/AR/pages/556040223/index.md"));

        let p = wiki_path(Path::new("/out"), "AR", url, OutputFormat::Html);
        assert_eq!(p, PathBuf::from("/out/spaces/AR/pages/556040223/index.html"));
    }

    #[test]
    fn page_id_prefers_pages_pattern() {
        assert_eq!(page_id_from_url("https://h/pages/123?pageId=999"), "123");
    }

    #[test]
    fn page_id_falls_back_to_page_id_query_param() {
        assert_eq!(page_id_from_url("https://h/x?pageId=42"), "42");
    }

    #[test]
    fn page_id_falls_back_to_last_segment() {
        assert_eq!(page_id_from_url("https://h/wiki/display/AR/Some-Page"), "Some-Page");
    }

    #[test]
    fn page_id_is_stable_across_calls() {
        let a = page_id_from_url("https://h/weird");
        let b = page_id_from_url("https://h/weird");
        assert_eq!(a, b);
    }

    #[test]
    fn html_path_appends_index_for_directory_like() {
        let p = html_path(Path::new("/out"), "https://h/docs/intro/", OutputFormat::Html);
        assert_eq!(p, PathBuf::from("/out/docs/intro/index.html"));
    }

    #[test]
    fn html_path_keeps_file_extension() {
        let p = html_path(Path::new("/out"), "https://h/assets/app.css", OutputFormat::Html);
        assert_eq!(p, PathBuf::from("/out/assets/app.css"));
    }

    #[test]
    fn html_path_sanitizes_reserved_characters() {
        let p = html_path(Path::new("/out"), "https://h/a%3Ab/", OutputFormat::Html);
        assert!(!p.to_string_lossy().contains(':'));
    }

    #[test]
    fn path_mapper_is_pure() {
        let a = wiki_path(Path::new("/out"), "AR", "https://h/pages/1", OutputFormat::Markdown);
        let b = wiki_path(Path::new("/out"), "AR", "https://h/pages/1", OutputFormat::Markdown);
        assert_eq!(a, b);
    }

    #[test]
    fn relative_href_same_directory() {
        let href = relative_href(
            Path::new("/out/docs/a/index.html"),
            Path::new("/out/docs/b/index.html"),
        );
        assert_eq!(href, "../b/index.html");
    }

    #[test]
    fn relative_href_nested_target() {
        let href = relative_href(
            Path::new("/out/docs/index.html"),
            Path::new("/out/docs/sub/page/index.html"),
        );
        assert_eq!(href, "sub/page/index.html");
    }

    #[test]
    fn relative_href_sibling_file() {
        let href = relative_href(Path::new("/out/a/index.html"), Path::new("/out/a/other.css"));
        assert_eq!(href, "other.css");
    }
}
