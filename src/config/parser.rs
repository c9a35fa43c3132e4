use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses, and validates a TOML configuration file (§6).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// SHA-256 of the raw config file content, used to flag a changed
/// configuration across resumed runs (§10.3 of SPEC_FULL.md). Does not gate
/// resume — the Store remains the sole authority for that (§4.1).
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[website]
base_url = "https://example.com"
base_domain = "example.com"
start_url = "https://example.com/docs"
valid_url_patterns = ["/docs/"]
exclude_patterns = ["/admin"]

[crawling]
max_depth = 2
max_workers = 5

[output]
output_dir = "./out"
"#;

    #[test]
    fn loads_valid_config() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.website.base_domain, "example.com");
        assert_eq!(config.crawling.max_depth, 2);
        assert_eq!(config.output.output_dir.to_str().unwrap(), "./out");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/config.toml")).is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn validation_error_surfaces() {
        let content = MINIMAL.replace("max_workers = 5", "max_workers = 0");
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let file1 = create_temp_config(MINIMAL);
        let file2 = create_temp_config(MINIMAL);
        assert_eq!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );

        let other = create_temp_config(&format!("{MINIMAL}\n# comment"));
        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(other.path()).unwrap()
        );
    }
}
