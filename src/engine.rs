//! Fetch Worker / Engine Loop (C6, §4.5): the bounded-concurrency driver of
//! admission, dispatch, and completion collection around a [`Store`] and a
//! [`SiteDriver`].

use crate::driver::{self, DriverError, ErrorKind, SaveContext, SiteDriver};
use crate::frontier::{Frontier, FrontierEntry};
use crate::path_mapper::{self, OutputFormat};
use crate::policy::{self, PolicyConfig};
use crate::progress::ProgressSink;
use crate::store::{ResourceType, Store};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The single-job wall-clock budget (§4.5): a stuck fetch/save pair is
/// abandoned and recorded as a failure rather than stalling the pool.
const JOB_BUDGET: Duration = Duration::from_secs(60);

pub struct Engine {
    pub store: Arc<dyn Store>,
    pub driver: Arc<dyn SiteDriver>,
    pub progress: Arc<dyn ProgressSink>,
    pub policy: PolicyConfig,
    pub output_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub output_format: OutputFormat,
    pub max_workers: usize,
    pub request_delay: Duration,
    /// `Some(space_key)` selects the Wiki-API path layout
    /// (`spaces/<space>/pages/<id>/index.<ext>`); `None` selects the
    /// generic HTML layout (§4.3).
    pub wiki_space: Option<String>,
    /// When set, CSS/JS/image/font resources discovered alongside a page are
    /// downloaded into a shared pool under `resources_dir` (§6
    /// `content.download_resources`).
    pub download_resources: Option<reqwest::Client>,
}

struct DownloadedResource {
    url: String,
    local_path: PathBuf,
    resource_type: ResourceType,
    file_size: i64,
}

struct JobOutput {
    clean_url: String,
    depth: i64,
    is_index: bool,
    result: Result<(driver::FetchOutcome, driver::SaveOutcome, PathBuf), DriverError>,
    elapsed: Duration,
    downloaded_resources: Vec<DownloadedResource>,
}

impl Engine {
    /// Runs the crawl to completion: seeds the Frontier, then dispatches and
    /// collects jobs until both the Frontier and the in-flight pool are empty.
    pub async fn run(&self, start_url: &str) -> EngineResult<()> {
        let frontier = Frontier::new();
        self.seed(&frontier, start_url)?;

        let semaphore = Arc::new(Semaphore::new(self.max_workers.max(1)));
        let mut jobs: JoinSet<JobOutput> = JoinSet::new();
        let seen_resources: Arc<Mutex<HashSet<String>>> =
            Arc::new(Mutex::new(self.store.downloaded_resources()?));

        loop {
            while let Some(output) = jobs.try_join_next() {
                if let Ok(output) = output {
                    self.handle_completion(&frontier, output)?;
                }
            }

            if let Some(entry) = frontier.pop_front_nonblocking() {
                if !self.store.mark_downloading(&entry.clean_url)? {
                    continue;
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let driver = self.driver.clone();
                let output_dir = self.output_dir.clone();
                let resources_dir = self.resources_dir.clone();
                let output_format = self.output_format;
                let wiki_space = self.wiki_space.clone();
                let resource_client = self.download_resources.clone();
                let seen_resources = seen_resources.clone();
                let entry = entry.clone();

                jobs.spawn(async move {
                    let _permit = permit;
                    let started = std::time::Instant::now();
                    let result = tokio::time::timeout(
                        JOB_BUDGET,
                        run_job(driver, &entry, &output_dir, &resources_dir, output_format, wiki_space.as_deref()),
                    )
                        .await
                        .unwrap_or_else(|_| Err(DriverError::new(ErrorKind::Timeout, "job exceeded wall-clock budget")));

                    let mut downloaded_resources = Vec::new();
                    if let (Some(client), Ok((outcome, _, _))) = (&resource_client, &result) {
                        downloaded_resources =
                            download_new_resources(client, &outcome.resources, &resources_dir, &seen_resources).await;
                    }

                    JobOutput {
                        clean_url: entry.clean_url,
                        depth: entry.depth,
                        is_index: result.as_ref().map(|(outcome, _, _)| outcome.is_index).unwrap_or(false),
                        result,
                        elapsed: started.elapsed(),
                        downloaded_resources,
                    }
                });

                if !self.request_delay.is_zero() {
                    tokio::time::sleep(self.request_delay).await;
                }
            } else if !jobs.is_empty() {
                if let Some(Ok(output)) = jobs.join_next().await {
                    self.handle_completion(&frontier, output)?;
                }
            } else {
                break;
            }
        }

        Ok(())
    }

    fn seed(&self, frontier: &Frontier, start_url: &str) -> EngineResult<()> {
        let pending = self.store.pending_urls(None)?;
        if !pending.is_empty() {
            frontier.seed(pending);
            return Ok(());
        }

        if let Ok(clean) = policy::clean_url(start_url) {
            self.store.admit(start_url, &clean, 0, None)?;
            frontier.push_back(clean, 0);
        }
        Ok(())
    }

    fn handle_completion(&self, frontier: &Frontier, output: JobOutput) -> EngineResult<()> {
        match output.result {
            Err(err) => {
                self.store.mark_failed(&output.clean_url, &format!("{}: {}", err.kind, err.message))?;
                self.progress.on_failed(&output.clean_url, &err.kind, &err.message);
            }
            Ok((outcome, save_outcome, local_path)) => {
                let file_size = std::fs::metadata(&local_path).map(|m| m.len() as i64).unwrap_or(0);
                self.store.mark_completed(
                    &output.clean_url,
                    &local_path.to_string_lossy(),
                    file_size,
                    output.elapsed.as_secs_f64(),
                    save_outcome.links_extracted_count,
                    output.depth,
                )?;

                if let Some(metadata) = &outcome.metadata {
                    self.store.save_wiki_metadata(&output.clean_url, metadata)?;
                }
                for attachment in &outcome.attachments {
                    if attachment.local_path.is_some() {
                        self.store.save_wiki_attachment(&output.clean_url, &driver::attachment_row(attachment))?;
                    }
                }

                self.progress.on_completed(&output.clean_url, file_size, output.depth);

                for resource in &output.downloaded_resources {
                    self.store.record_resource(
                        &resource.url,
                        &resource.local_path.to_string_lossy(),
                        resource.resource_type,
                        resource.file_size,
                        Some(&output.clean_url),
                        false,
                    )?;
                }

                let child_depth = if output.is_index { 0 } else { output.depth + 1 };
                let empty: HashSet<String> = HashSet::new();
                for link in &outcome.links {
                    if !policy::should_download(link, child_depth, &self.policy, &empty, &empty) {
                        continue;
                    }
                    if self.store.admit(link, link, child_depth, Some(&output.clean_url))? {
                        frontier.push_back(link.clone(), child_depth);
                    }
                }
            }
        }
        Ok(())
    }
}

async fn run_job(
    driver: Arc<dyn SiteDriver>,
    entry: &FrontierEntry,
    output_dir: &std::path::Path,
    resources_dir: &std::path::Path,
    output_format: OutputFormat,
    wiki_space: Option<&str>,
) -> Result<(driver::FetchOutcome, driver::SaveOutcome, PathBuf), DriverError> {
    let outcome = driver.fetch(&entry.clean_url, entry.depth).await?;
    let local_path = match wiki_space {
        Some(space) => path_mapper::wiki_path(output_dir, space, &entry.clean_url, output_format),
        None => path_mapper::html_path(output_dir, &entry.clean_url, output_format),
    };

    let ctx = SaveContext {
        local_path: &local_path,
        resources_dir,
        attachments_dir: None,
    };
    let save_outcome = driver.save(&entry.clean_url, &outcome, &ctx).await?;
    Ok((outcome, save_outcome, local_path))
}

/// Downloads every resource not already present in `seen`, recording its URL
/// there immediately so concurrently-running jobs don't race to fetch the
/// same shared stylesheet or script.
async fn download_new_resources(
    client: &reqwest::Client,
    resources: &[driver::ResourceRef],
    resources_dir: &std::path::Path,
    seen: &Mutex<HashSet<String>>,
) -> Vec<DownloadedResource> {
    let mut out = Vec::new();
    for resource in resources {
        {
            let mut seen = seen.lock().await;
            if !seen.insert(resource.url.clone()) {
                continue;
            }
        }

        match driver::html::download_resource(client, resource, resources_dir).await {
            Ok(local_path) => {
                let file_size = tokio::fs::metadata(&local_path).await.map(|m| m.len() as i64).unwrap_or(0);
                out.push(DownloadedResource {
                    url: resource.url.clone(),
                    local_path,
                    resource_type: resource.resource_type,
                    file_size,
                });
            }
            Err(err) => {
                tracing::warn!(url = %resource.url, %err, "resource download failed");
                let mut seen = seen.lock().await;
                seen.remove(&resource.url);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverResult, FetchOutcome, SaveOutcome};
    use crate::progress::NullProgressSink;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeDriver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SiteDriver for FakeDriver {
        async fn fetch(&self, clean_url: &str, depth: i64) -> DriverResult<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let links = if depth == 0 && clean_url.ends_with("/start") {
                vec!["https://x/child".to_string()]
            } else {
                vec![]
            };
            Ok(FetchOutcome {
                body: "body".to_string(),
                links,
                ..Default::default()
            })
        }

        async fn save(
            &self,
            _clean_url: &str,
            outcome: &FetchOutcome,
            ctx: &SaveContext<'_>,
        ) -> DriverResult<SaveOutcome> {
            if let Some(parent) = ctx.local_path.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(ctx.local_path, &outcome.body).await.unwrap();
            Ok(SaveOutcome {
                ok: true,
                links_extracted_count: outcome.links.len() as i64,
            })
        }
    }

    fn engine(dir: &TempDir, driver: Arc<dyn SiteDriver>) -> Engine {
        Engine {
            store: Arc::new(SqliteStore::new_in_memory().unwrap()),
            driver,
            progress: Arc::new(NullProgressSink),
            policy: PolicyConfig {
                max_depth: 3,
                base_domain: String::new(),
                exclude_patterns: vec![],
                valid_url_patterns: vec![],
            },
            output_dir: dir.path().to_path_buf(),
            resources_dir: dir.path().join("resources"),
            output_format: OutputFormat::Html,
            max_workers: 2,
            request_delay: Duration::ZERO,
            wiki_space: None,
            download_resources: None,
        }
    }

    #[tokio::test]
    async fn crawls_start_url_and_discovered_child() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver { calls: AtomicUsize::new(0) });
        let e = engine(&dir, driver.clone());

        e.run("https://x/start").await.unwrap();

        assert_eq!(e.store.counts().unwrap().completed, 2);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resume_seeds_from_existing_pending_urls() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver { calls: AtomicUsize::new(0) });
        let e = engine(&dir, driver.clone());
        e.store.admit("https://x/resumed", "https://x/resumed", 0, None).unwrap();

        e.run("https://x/start").await.unwrap();

        assert_eq!(e.store.counts().unwrap().completed, 1);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }
}
