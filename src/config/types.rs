//! Configuration record (§6): the single external interface describing a
//! run's target, crawl bounds, and output layout.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A boolean with an `auto`-detect option (`website.confluence.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    Auto,
    True,
    False,
}

impl Default for TriState {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Markdown,
    Html,
}

impl Default for OutputFormatConfig {
    fn default() -> Self {
        Self::Markdown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    #[serde(default)]
    pub is_confluence: TriState,
    #[serde(default)]
    pub use_api: TriState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebsiteConfig {
    pub base_url: String,
    #[serde(default)]
    pub base_domain: String,
    pub start_url: String,
    #[serde(default)]
    pub valid_url_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
}

fn default_max_workers() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlingConfig {
    #[serde(default)]
    pub max_depth: i64,
    #[serde(default)]
    pub space_name: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default)]
    pub request_delay: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for CrawlingConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            space_name: String::new(),
            max_workers: default_max_workers(),
            request_delay: 0.0,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfluenceOutputConfig {
    #[serde(default)]
    pub save_api_response: bool,
    #[serde(default)]
    pub save_metadata_yml: bool,
    #[serde(default)]
    pub save_attachments: bool,
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormatConfig,
    pub output_dir: PathBuf,
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    #[serde(default)]
    pub confluence_output: ConfluenceOutputConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::default(),
            output_dir: PathBuf::from("output"),
            resources_dir: default_resources_dir(),
            confluence_output: ConfluenceOutputConfig::default(),
        }
    }
}

fn default_database_file() -> PathBuf {
    PathBuf::from("crawl.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            cookies_file: None,
        }
    }
}

fn default_user_agent() -> String {
    "wikimirror/0.1".to_string()
}

fn default_auth_markers() -> Vec<String> {
    vec!["login".to_string(), "sign in".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Substrings that, if found in a response body, flag it as an
    /// authentication wall rather than real content (§4.4.1 auth heuristic).
    #[serde(default = "default_auth_markers")]
    pub auth_markers: Vec<String>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            headers: HashMap::new(),
            auth_markers: default_auth_markers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default)]
    pub download_resources: bool,
}

/// The full configuration record (§6). Every sub-section maps to a TOML
/// table of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub website: WebsiteConfig,
    #[serde(default)]
    pub crawling: CrawlingConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
    #[serde(default)]
    pub content: ContentConfig,
}
