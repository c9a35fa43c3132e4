//! wikimirror: a resumable, parallel crawler that mirrors a bounded slice of
//! a website (or a Confluence-compatible wiki, via its REST content API) to
//! local storage, producing cleaned HTML, Markdown, and structured metadata.

pub mod config;
pub mod cookies;
pub mod driver;
pub mod engine;
pub mod frontier;
pub mod markdown;
pub mod orchestrator;
pub mod path_mapper;
pub mod policy;
pub mod progress;
pub mod store;
pub mod summary;

use thiserror::Error;

/// Configuration-specific errors (§6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorError};
