//! Durable store (C1): the single source of truth for every discovered URL's
//! lifecycle, plus the derived-artifact tables that hang off it (§3, §4.1).

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Status of a [`DiscoveredUrl`] (§3). Monotone except pending<->downloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl UrlStatus {
    pub fn to_db_string(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Kind of an auxiliary downloaded asset (§3 `DownloadedResource.resource_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Css,
    Js,
    Image,
    Font,
    Attachment,
    Other,
}

impl ResourceType {
    pub fn to_db_string(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Js => "js",
            Self::Image => "image",
            Self::Font => "font",
            Self::Attachment => "attachment",
            Self::Other => "other",
        }
    }

    pub fn from_db_string(s: &str) -> Self {
        match s {
            "css" => Self::Css,
            "js" => Self::Js,
            "image" => Self::Image,
            "font" => Self::Font,
            "attachment" => Self::Attachment,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

/// One entry popped off `pending_urls` (§4.1), ordered depth-asc then
/// discovered_at-asc. Also used to seed the Frontier at startup (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub clean_url: String,
    pub depth: i64,
}

#[derive(Debug, Clone, Default)]
pub struct UrlCounts {
    pub total: i64,
    pub pending: i64,
    pub downloading: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentStats {
    pub count: i64,
    pub total_bytes: i64,
    pub depth_breakdown: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceStats {
    pub count: i64,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentStats {
    pub count: i64,
    pub total_bytes_local: i64,
}

/// A page's wiki-mode metadata row (§3 `WikiPageMetadata`), flattened for
/// storage. Field names mirror the YAML schema in §6.
#[derive(Debug, Clone, Default)]
pub struct WikiPageMetadataRow {
    pub page_id: Option<String>,
    pub ari: Option<String>,
    pub page_type: Option<String>,
    pub page_status: Option<String>,
    pub title: Option<String>,
    pub space_key: Option<String>,
    pub space_name: Option<String>,
    pub version_number: Option<i64>,
    pub version_when: Option<String>,
    pub version_by: Option<String>,
    pub version_by_email: Option<String>,
    pub version_by_account_id: Option<String>,
    pub version_message: Option<String>,
    pub version_minor_edit: Option<bool>,
    pub created_when: Option<String>,
    pub created_by: Option<String>,
    pub created_by_email: Option<String>,
    pub created_by_account_id: Option<String>,
    pub updated_when: Option<String>,
    pub updated_by: Option<String>,
    pub updated_by_email: Option<String>,
    pub updated_by_account_id: Option<String>,
    pub link_web: Option<String>,
    pub link_rest: Option<String>,
    pub link_tiny: Option<String>,
    pub days_since_update: Option<i64>,
    pub has_attachments: bool,
    pub attachment_count: i64,
    pub content_char_count: i64,
    pub has_tables: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WikiAttachmentRow {
    pub attachment_id: String,
    pub title: Option<String>,
    pub media_type: Option<String>,
    pub file_size: Option<i64>,
    pub file_size_local: Option<i64>,
    pub version: Option<i64>,
    pub created_when: Option<String>,
    pub created_by: Option<String>,
    pub comment: Option<String>,
    pub download_url: Option<String>,
    pub local_path: Option<String>,
}

/// The durable record of every discovered URL's lifecycle (C1, §4.1).
///
/// Every call is serialized by a per-store mutex; multi-statement operations
/// run inside a single transaction. Implementations must be `Send + Sync` so
/// they can be shared across worker tasks behind an `Arc`.
pub trait Store: Send + Sync {
    fn start_run(&self, config_hash: &str) -> StoreResult<i64>;
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StoreResult<()>;

    /// Idempotent insert. Returns `true` iff a new row was created.
    fn admit(
        &self,
        raw_url: &str,
        clean_url: &str,
        depth: i64,
        parent_clean_url: Option<&str>,
    ) -> StoreResult<bool>;

    /// Same as `admit`, batched in one transaction. Returns insert count.
    fn admit_batch(
        &self,
        items: &[(String, String, i64, Option<String>)],
    ) -> StoreResult<usize>;

    /// Conditional pending -> downloading transition.
    fn mark_downloading(&self, clean_url: &str) -> StoreResult<bool>;

    fn mark_completed(
        &self,
        clean_url: &str,
        local_path: &str,
        file_size: i64,
        download_time_seconds: f64,
        links_extracted_count: i64,
        depth: i64,
    ) -> StoreResult<()>;

    fn mark_failed(&self, clean_url: &str, error: &str) -> StoreResult<()>;

    fn status_of(&self, clean_url: &str) -> StoreResult<Option<UrlStatus>>;

    fn pending_urls(&self, limit: Option<usize>) -> StoreResult<Vec<PendingEntry>>;

    fn downloaded_urls(&self) -> StoreResult<HashSet<String>>;
    fn downloaded_resources(&self) -> StoreResult<HashSet<String>>;
    fn url_to_path(&self) -> StoreResult<HashMap<String, String>>;
    fn shared_resources(&self) -> StoreResult<HashMap<String, String>>;

    fn record_resource(
        &self,
        resource_url: &str,
        local_path: &str,
        resource_type: ResourceType,
        file_size: i64,
        referenced_by: Option<&str>,
        is_shared: bool,
    ) -> StoreResult<()>;

    fn save_wiki_metadata(&self, clean_url: &str, row: &WikiPageMetadataRow) -> StoreResult<()>;
    fn save_wiki_attachment(
        &self,
        page_clean_url: &str,
        row: &WikiAttachmentRow,
    ) -> StoreResult<()>;

    fn counts(&self) -> StoreResult<UrlCounts>;
    fn document_stats(&self) -> StoreResult<DocumentStats>;
    fn resource_stats(&self) -> StoreResult<ResourceStats>;
    fn attachment_stats(&self) -> StoreResult<AttachmentStats>;

    fn export_by_status(&self, status: UrlStatus) -> StoreResult<Vec<(String, String)>>;

    /// Truncates every lifecycle table, keeping schema (operator `reset-progress`).
    fn reset_progress(&self) -> StoreResult<()>;
}

pub fn open_store(path: &std::path::Path) -> StoreResult<SqliteStore> {
    SqliteStore::new(path)
}
