//! Human-readable crawl summaries, built from [`Store`] stats once a run
//! finishes (§6 `--summary-report`).

use crate::store::{AttachmentStats, DocumentStats, ResourceStats, Store, UrlCounts};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub type SummaryResult<T> = std::result::Result<T, SummaryError>;

/// Snapshot of a run's final state, assembled from [`Store`] queries plus
/// the run metadata the orchestrator already holds.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<u64>,
    pub status: String,
    pub urls: UrlCounts,
    pub documents: DocumentStats,
    pub resources: ResourceStats,
    pub attachments: AttachmentStats,
}

impl CrawlSummary {
    /// Queries the store for every stats table and assembles a summary; the
    /// run metadata fields must be supplied by the caller since the store
    /// doesn't expose a run lookup beyond `start_run`/`finish_run`.
    pub fn collect(
        store: &dyn Store,
        run_id: i64,
        started_at: String,
        finished_at: Option<String>,
        duration_seconds: Option<u64>,
        status: String,
    ) -> SummaryResult<Self> {
        Ok(Self {
            run_id,
            started_at,
            finished_at,
            duration_seconds,
            status,
            urls: store.counts()?,
            documents: store.document_stats()?,
            resources: store.resource_stats()?,
            attachments: store.attachment_stats()?,
        })
    }

    pub fn success_rate(&self) -> f64 {
        if self.urls.total == 0 {
            return 0.0;
        }
        (self.urls.completed as f64 / self.urls.total as f64) * 100.0
    }

    pub fn error_rate(&self) -> f64 {
        if self.urls.total == 0 {
            return 0.0;
        }
        (self.urls.failed as f64 / self.urls.total as f64) * 100.0
    }
}

/// Writes a markdown summary to `output_path`.
pub fn generate_markdown_summary(summary: &CrawlSummary, output_path: &Path) -> SummaryResult<()> {
    let markdown = format_markdown_summary(summary);
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;
    Ok(())
}

/// Formats a [`CrawlSummary`] as markdown.
pub fn format_markdown_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Crawl Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", summary.run_id));
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    if let Some(duration) = summary.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n\n", summary.status));

    md.push_str("## URL Counts\n\n");
    md.push_str(&format!("- **Total**: {}\n", summary.urls.total));
    md.push_str(&format!("- **Pending**: {}\n", summary.urls.pending));
    md.push_str(&format!("- **Downloading**: {}\n", summary.urls.downloading));
    md.push_str(&format!("- **Completed**: {}\n", summary.urls.completed));
    md.push_str(&format!("- **Failed**: {}\n", summary.urls.failed));
    md.push_str(&format!("- **Success Rate**: {:.2}%\n", summary.success_rate()));
    md.push_str(&format!("- **Error Rate**: {:.2}%\n\n", summary.error_rate()));

    md.push_str("## Documents\n\n");
    md.push_str(&format!("- **Count**: {}\n", summary.documents.count));
    md.push_str(&format!("- **Total Bytes**: {}\n", summary.documents.total_bytes));
    if !summary.documents.depth_breakdown.is_empty() {
        md.push_str("- **By Depth**:\n");
        for (depth, count) in &summary.documents.depth_breakdown {
            md.push_str(&format!("  - depth {}: {}\n", depth, count));
        }
    }
    md.push('\n');

    md.push_str("## Resources\n\n");
    md.push_str(&format!("- **Count**: {}\n", summary.resources.count));
    md.push_str(&format!("- **Total Bytes**: {}\n\n", summary.resources.total_bytes));

    md.push_str("## Attachments\n\n");
    md.push_str(&format!("- **Count**: {}\n", summary.attachments.count));
    md.push_str(&format!(
        "- **Total Bytes (local)**: {}\n",
        summary.attachments.total_bytes_local
    ));

    md
}
