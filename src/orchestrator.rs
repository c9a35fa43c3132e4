//! Orchestrator (C8, §4 data-flow): resolves configuration and credentials
//! into a concrete [`SiteDriver`], assembles C1-C7, and drives a run to
//! completion.

use crate::config::{
    self, Config, ConfluenceConfig, OutputFormatConfig, TriState, WikiCredentials,
};
use crate::cookies;
use crate::driver::html::{self, HtmlDriver};
use crate::driver::wiki::{self, WikiDriver};
use crate::driver::SiteDriver;
use crate::engine::{Engine, EngineError};
use crate::path_mapper::OutputFormat;
use crate::policy::PolicyConfig;
use crate::progress::{ProgressSink, TracingProgressSink};
use crate::store::{open_store, RunStatus, Store, StoreError};
use crate::summary::{self, CrawlSummary, SummaryError};

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid regex pattern '{pattern}': {source}")]
    Pattern { pattern: String, source: regex::Error },

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("wiki-API mode requires credentials, but none were found (config/.env, .env, or confluence_token.txt)")]
    MissingCredentials,
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Resolved dispatch decision for §4.4: which `SiteDriver` to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Html,
    Wiki,
}

/// Resolves `website.confluence.is_confluence`/`use_api`'s `auto` setting
/// (§6). Neither spec.md nor the original source pins an exact heuristic for
/// `auto`, so this crate treats it the same way the original's CLI wrapper
/// effectively behaves: wiki-API mode is used whenever credentials resolve
/// and the operator hasn't explicitly forced HTML mode, since a Confluence
/// instance without reachable API credentials should still fall back to
/// plain HTML mirroring rather than fail outright.
fn resolve_mode(confluence: &ConfluenceConfig, credentials_available: bool) -> Mode {
    let is_confluence = match confluence.is_confluence {
        TriState::True => true,
        TriState::False => false,
        TriState::Auto => credentials_available,
    };
    let use_api = match confluence.use_api {
        TriState::True => true,
        TriState::False => false,
        TriState::Auto => credentials_available,
    };

    if is_confluence && use_api {
        Mode::Wiki
    } else {
        Mode::Html
    }
}

fn compile_patterns(patterns: &[String]) -> OrchestratorResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| OrchestratorError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn output_format_of(config: &Config) -> OutputFormat {
    match config.output.format {
        OutputFormatConfig::Markdown => OutputFormat::Markdown,
        OutputFormatConfig::Html => OutputFormat::Html,
    }
}

fn policy_config(config: &Config) -> OrchestratorResult<PolicyConfig> {
    Ok(PolicyConfig {
        max_depth: config.crawling.max_depth,
        base_domain: config.website.base_domain.clone(),
        exclude_patterns: compile_patterns(&config.website.exclude_patterns)?,
        valid_url_patterns: compile_patterns(&config.website.valid_url_patterns)?,
    })
}

fn load_cookie_jar(config: &Config) -> OrchestratorResult<Option<Arc<reqwest::cookie::Jar>>> {
    let Some(cookies_file) = &config.files.cookies_file else {
        return Ok(None);
    };
    if !cookies_file.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(cookies_file)?;
    let pairs = cookies::parse_cookie_file(&content);
    let base = url::Url::parse(&config.website.base_url)
        .map_err(|_| OrchestratorError::InvalidUrl(config.website.base_url.clone()))?;
    Ok(Some(cookies::build_jar(&base, &pairs)))
}

/// Owns the lifecycle of a single run: loads credentials, builds the
/// site driver, and wires C1-C7 into an [`Engine`].
pub struct Orchestrator {
    pub config: Config,
    pub config_hash: String,
}

impl Orchestrator {
    pub fn new(config: Config, config_hash: String) -> Self {
        Self { config, config_hash }
    }

    /// Validates configuration and credentials, resolves the driver mode,
    /// and prints what would run without touching the Store (§10.4 `--dry-run`).
    pub fn dry_run_report(&self) -> OrchestratorResult<String> {
        let credentials = self.load_credentials()?;
        let mode = resolve_mode(&self.config.website.confluence, credentials.is_some());

        if mode == Mode::Wiki && credentials.is_none() {
            return Err(OrchestratorError::MissingCredentials);
        }

        let mut report = String::new();
        report.push_str(&format!("start url: {}\n", self.config.website.start_url));
        report.push_str(&format!("mode: {}\n", if mode == Mode::Wiki { "wiki-api" } else { "html" }));
        report.push_str(&format!("max depth: {}\n", self.config.crawling.max_depth));
        report.push_str(&format!("max workers: {}\n", self.config.crawling.max_workers));
        report.push_str(&format!("output dir: {}\n", self.config.output.output_dir.display()));
        Ok(report)
    }

    fn load_credentials(&self) -> OrchestratorResult<Option<WikiCredentials>> {
        Ok(config::load_credentials(
            &config::default_search_root(),
            Some(&self.config.website.base_url),
        )?)
    }

    fn build_driver(
        &self,
        credentials: Option<WikiCredentials>,
        resources_dir: &std::path::Path,
    ) -> OrchestratorResult<(Arc<dyn SiteDriver>, Option<String>)> {
        let mode = resolve_mode(&self.config.website.confluence, credentials.is_some());
        let policy = policy_config(&self.config)?;
        let output_format = output_format_of(&self.config);

        match mode {
            Mode::Wiki => {
                let credentials = credentials.ok_or(OrchestratorError::MissingCredentials)?;
                let client = wiki::build_client()?;
                let driver = WikiDriver::new(
                    client,
                    credentials,
                    self.config.crawling.space_name.clone(),
                    policy,
                    self.config.output.output_dir.clone(),
                    output_format,
                    self.config.output.confluence_output.save_attachments,
                    self.config.output.confluence_output.save_api_response,
                    self.config.output.confluence_output.save_metadata_yml,
                );
                Ok((Arc::new(driver), Some(self.config.crawling.space_name.clone())))
            }
            Mode::Html => {
                let jar = load_cookie_jar(&self.config)?;
                let client = html::build_client(&self.config.advanced, jar)?;
                let driver = HtmlDriver::new(
                    client,
                    policy,
                    self.config.output.output_dir.clone(),
                    resources_dir.to_path_buf(),
                    output_format,
                    self.config.content.download_resources,
                    self.config.advanced.auth_markers.clone(),
                );
                Ok((Arc::new(driver), None))
            }
        }
    }

    /// Runs a full crawl: opens the Store, builds the driver, runs the
    /// engine loop, and finalizes the run (§10.4 `start-crawl`).
    pub async fn run_crawl(&self) -> OrchestratorResult<()> {
        std::fs::create_dir_all(&self.config.output.output_dir)?;
        let resources_dir = self.config.output.output_dir.join(&self.config.output.resources_dir);
        std::fs::create_dir_all(&resources_dir)?;

        let store: Arc<dyn Store> = Arc::new(open_store(&self.config.files.database_file)?);
        let run_id = store.start_run(&self.config_hash)?;

        let credentials = self.load_credentials()?;
        let (driver, wiki_space) = self.build_driver(credentials, &resources_dir)?;

        let download_resources = if self.config.content.download_resources {
            Some(html::build_client(&self.config.advanced, load_cookie_jar(&self.config)?)?)
        } else {
            None
        };

        let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgressSink::new());
        let policy = policy_config(&self.config)?;

        let engine = Engine {
            store: store.clone(),
            driver,
            progress,
            policy,
            output_dir: self.config.output.output_dir.clone(),
            resources_dir,
            output_format: output_format_of(&self.config),
            max_workers: self.config.crawling.max_workers as usize,
            request_delay: Duration::from_secs_f64(self.config.crawling.request_delay),
            wiki_space,
            download_resources,
        };

        let result = engine.run(&self.config.website.start_url).await;
        let status = if result.is_ok() { RunStatus::Completed } else { RunStatus::Failed };
        store.finish_run(run_id, status)?;
        result?;
        Ok(())
    }

    /// Builds a [`CrawlSummary`] from the Store's current state (§10.4
    /// `--stats`/`--summary-report`). Stats are aggregated over the whole
    /// Store rather than scoped to one `runs` row, since `discovered_urls`
    /// carries no run foreign key (§3).
    pub fn summary(&self) -> OrchestratorResult<CrawlSummary> {
        let store = open_store(&self.config.files.database_file)?;
        Ok(CrawlSummary::collect(
            &store,
            0,
            String::new(),
            None,
            None,
            "unknown".to_string(),
        )?)
    }

    pub fn write_summary_report(&self, output_path: &std::path::Path) -> OrchestratorResult<()> {
        let summary = self.summary()?;
        summary::generate_markdown_summary(&summary, output_path)?;
        Ok(())
    }

    /// Truncates every lifecycle table, keeping schema (§10.4 `--reset-progress`).
    pub fn reset_progress(&self) -> OrchestratorResult<()> {
        let store = open_store(&self.config.files.database_file)?;
        store.reset_progress()?;
        Ok(())
    }

    /// Prints `clean_url\tstatus` for every `DiscoveredUrl` in the given
    /// status (§10.4 `--export-urls-by-status`).
    pub fn export_by_status(&self, status: crate::store::UrlStatus) -> OrchestratorResult<Vec<(String, String)>> {
        let store = open_store(&self.config.files.database_file)?;
        Ok(store.export_by_status(status)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_mode_forces_html_when_explicitly_false() {
        let confluence = ConfluenceConfig {
            is_confluence: TriState::False,
            use_api: TriState::True,
        };
        assert_eq!(resolve_mode(&confluence, true), Mode::Html);
    }

    #[test]
    fn resolve_mode_forces_wiki_when_explicitly_true() {
        let confluence = ConfluenceConfig {
            is_confluence: TriState::True,
            use_api: TriState::True,
        };
        assert_eq!(resolve_mode(&confluence, false), Mode::Wiki);
    }

    #[test]
    fn resolve_mode_auto_follows_credential_availability() {
        let confluence = ConfluenceConfig {
            is_confluence: TriState::Auto,
            use_api: TriState::Auto,
        };
        assert_eq!(resolve_mode(&confluence, true), Mode::Wiki);
        assert_eq!(resolve_mode(&confluence, false), Mode::Html);
    }
}
