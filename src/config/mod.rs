//! Configuration module: loading, validating, and hashing TOML configuration
//! files (§6), plus wiki-API credential resolution.
//!
//! ```no_run
//! use wikimirror::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawling.max_depth);
//! ```

mod credentials;
mod parser;
mod types;
mod validation;

pub use credentials::{default_search_root, load_credentials, WikiCredentials};
pub use types::{
    AdvancedConfig, Config, ConfluenceConfig, ConfluenceOutputConfig, ContentConfig,
    CrawlingConfig, FilesConfig, OutputConfig, OutputFormatConfig, TriState, WebsiteConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
