//! Wiki-API credentials (§6 "Credentials (wiki-API mode)"), resolved from a
//! `.env`-style file or a legacy token file, the way the original
//! `confluence_auth.py` does (§11 of SPEC_FULL.md).

use crate::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiCredentials {
    pub email: String,
    pub token: String,
    pub base_url: String,
}

impl WikiCredentials {
    /// The API base is `base_url` with the `/wiki/rest/api` suffix ensured (§6).
    pub fn api_base(&self) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        if trimmed.ends_with("/wiki/rest/api") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/wiki/rest/api")
        }
    }
}

/// Resolution order: `config/.env`, then `.env`, then a legacy
/// `confluence_token.txt` paired with `fallback_base_url` (typically
/// `website.base_url` from the main config).
pub fn load_credentials(
    search_root: &Path,
    fallback_base_url: Option<&str>,
) -> Result<Option<WikiCredentials>, ConfigError> {
    for candidate in [search_root.join("config/.env"), search_root.join(".env")] {
        if candidate.exists() {
            let content = std::fs::read_to_string(&candidate)?;
            let vars = parse_env_file(&content);
            if let Some(creds) = credentials_from_env_map(&vars) {
                return Ok(Some(creds));
            }
        }
    }

    let token_file = search_root.join("confluence_token.txt");
    if token_file.exists() {
        let content = std::fs::read_to_string(&token_file)?;
        if let Some(creds) = credentials_from_token_file(&content, fallback_base_url) {
            return Ok(Some(creds));
        }
    }

    Ok(None)
}

fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    vars
}

fn credentials_from_env_map(vars: &HashMap<String, String>) -> Option<WikiCredentials> {
    let email = first_present(vars, &["CONFLUENCE_EMAIL", "EMAIL"])?;
    let token = first_present(vars, &["CONFLUENCE_TOKEN", "CONFLUENCE_API_TOKEN", "TOKEN"])?;
    let base_url = first_present(vars, &["CONFLUENCE_BASE_URL", "BASE_URL"])?;
    Some(WikiCredentials { email, token, base_url })
}

fn first_present(vars: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| vars.get(*k).cloned())
}

/// Legacy format: a single line `email:token`, or just `token` paired with a
/// base URL supplied from the main config.
fn credentials_from_token_file(
    content: &str,
    fallback_base_url: Option<&str>,
) -> Option<WikiCredentials> {
    let line = content.lines().find(|l| !l.trim().is_empty())?.trim();
    let base_url = fallback_base_url?.to_string();
    if let Some((email, token)) = line.split_once(':') {
        Some(WikiCredentials {
            email: email.trim().to_string(),
            token: token.trim().to_string(),
            base_url,
        })
    } else {
        None
    }
}

/// Path used by [`load_credentials`] when no explicit search root is given.
pub fn default_search_root() -> PathBuf {
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn loads_from_dot_env() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            ".env",
            "# comment\nCONFLUENCE_EMAIL=a@b.com\nCONFLUENCE_TOKEN=tok123\nCONFLUENCE_BASE_URL=https://h/wiki\n",
        );
        let creds = load_credentials(dir.path(), None).unwrap().unwrap();
        assert_eq!(creds.email, "a@b.com");
        assert_eq!(creds.token, "tok123");
        assert_eq!(creds.api_base(), "https://h/wiki/wiki/rest/api");
    }

    #[test]
    fn config_dot_env_takes_priority_over_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("config")).unwrap();
        write(
            &dir.path().join("config"),
            ".env",
            "CONFLUENCE_EMAIL=first@b.com\nCONFLUENCE_TOKEN=t1\nCONFLUENCE_BASE_URL=https://h\n",
        );
        write(
            dir.path(),
            ".env",
            "CONFLUENCE_EMAIL=second@b.com\nCONFLUENCE_TOKEN=t2\nCONFLUENCE_BASE_URL=https://h\n",
        );
        let creds = load_credentials(dir.path(), None).unwrap().unwrap();
        assert_eq!(creds.email, "first@b.com");
    }

    #[test]
    fn falls_back_to_legacy_token_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "confluence_token.txt", "a@b.com:legacytoken\n");
        let creds = load_credentials(dir.path(), Some("https://h/wiki"))
            .unwrap()
            .unwrap();
        assert_eq!(creds.token, "legacytoken");
        assert_eq!(creds.base_url, "https://h/wiki");
    }

    #[test]
    fn returns_none_when_nothing_found() {
        let dir = TempDir::new().unwrap();
        assert!(load_credentials(dir.path(), None).unwrap().is_none());
    }

    #[test]
    fn api_base_not_doubled_when_already_suffixed() {
        let creds = WikiCredentials {
            email: "a@b.com".into(),
            token: "t".into(),
            base_url: "https://h/wiki/rest/api".into(),
        };
        assert_eq!(creds.api_base(), "https://h/wiki/rest/api");
    }
}
