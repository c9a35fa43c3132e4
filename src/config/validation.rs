use crate::config::types::{Config, CrawlingConfig, WebsiteConfig};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration (§6).
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_website_config(&config.website)?;
    validate_crawling_config(&config.crawling)?;
    validate_output_dir(&config.output.output_dir)?;
    Ok(())
}

fn validate_website_config(config: &WebsiteConfig) -> Result<(), ConfigError> {
    if config.base_url.is_empty() {
        return Err(ConfigError::Validation("website.base_url cannot be empty".to_string()));
    }
    Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("website.base_url: {e}")))?;

    if config.start_url.is_empty() {
        return Err(ConfigError::Validation("website.start_url cannot be empty".to_string()));
    }
    Url::parse(&config.start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("website.start_url: {e}")))?;

    for pattern in config.valid_url_patterns.iter().chain(config.exclude_patterns.iter()) {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("invalid regex '{pattern}': {e}"))
        })?;
    }

    Ok(())
}

fn validate_crawling_config(config: &CrawlingConfig) -> Result<(), ConfigError> {
    if config.max_depth < 0 {
        return Err(ConfigError::Validation("crawling.max_depth must be >= 0".to_string()));
    }

    if config.max_workers < 1 || config.max_workers > 50 {
        return Err(ConfigError::Validation(format!(
            "crawling.max_workers must be between 1 and 50, got {}",
            config.max_workers
        )));
    }

    if config.request_delay < 0.0 {
        return Err(ConfigError::Validation("crawling.request_delay must be >= 0".to_string()));
    }

    if config.request_timeout == 0 {
        return Err(ConfigError::Validation("crawling.request_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_output_dir(output_dir: &std::path::Path) -> Result<(), ConfigError> {
    if output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("output.output_dir cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ContentConfig, FilesConfig, OutputConfig};

    fn sample_config() -> Config {
        Config {
            website: WebsiteConfig {
                base_url: "https://example.com".into(),
                base_domain: "example.com".into(),
                start_url: "https://example.com/docs".into(),
                valid_url_patterns: vec!["/docs/".into()],
                exclude_patterns: vec!["/admin".into()],
                confluence: Default::default(),
            },
            crawling: CrawlingConfig::default(),
            output: OutputConfig::default(),
            files: FilesConfig::default(),
            advanced: Default::default(),
            content: ContentConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&sample_config()).is_ok());
    }

    #[test]
    fn rejects_bad_regex() {
        let mut config = sample_config();
        config.website.exclude_patterns.push("(".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_max_workers_out_of_range() {
        let mut config = sample_config();
        config.crawling.max_workers = 0;
        assert!(validate(&config).is_err());
        config.crawling.max_workers = 51;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_negative_max_depth() {
        let mut config = sample_config();
        config.crawling.max_depth = -1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_invalid_start_url() {
        let mut config = sample_config();
        config.website.start_url = "not a url".into();
        assert!(validate(&config).is_err());
    }
}
