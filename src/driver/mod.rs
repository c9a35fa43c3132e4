//! Site Driver (C5): the polymorphic fetch+parse+save contract shared by the
//! HTML and Wiki-API drivers (§4.4).

pub mod html;
pub mod wiki;

use crate::store::{ResourceType, WikiAttachmentRow, WikiPageMetadataRow};
use async_trait::async_trait;
use std::path::Path;

/// §7 error taxonomy, carried on a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Transport,
    Auth,
    Protocol,
    Parse,
    NotFound,
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Parse => "parse",
            Self::NotFound => "not_found",
            Self::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A resource discovered alongside a page body (stylesheet, image, etc.).
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub url: String,
    pub resource_type: ResourceType,
}

/// A binary attachment discovered in wiki-API mode (§3 `WikiAttachment`).
/// `local_path`/`file_size_local` are filled in once the driver has
/// downloaded the attachment's bytes to disk.
#[derive(Debug, Clone)]
pub struct AttachmentRef {
    pub attachment_id: String,
    pub title: Option<String>,
    pub media_type: Option<String>,
    pub file_size: Option<i64>,
    pub version: Option<i64>,
    pub created_when: Option<String>,
    pub created_by: Option<String>,
    pub comment: Option<String>,
    pub download_url: String,
    pub local_path: Option<String>,
    pub file_size_local: Option<i64>,
}

/// Successful fetch outcome (§4.4).
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub body: String,
    pub storage_body: Option<String>,
    pub metadata: Option<WikiPageMetadataRow>,
    pub attachments: Vec<AttachmentRef>,
    pub resources: Vec<ResourceRef>,
    pub links: Vec<String>,
    pub is_index: bool,
    pub page_id: Option<String>,
    pub raw_api_payload: Option<String>,
    /// CQL used to resolve `page_id` when the URL carried no numeric id (§6 `source.query`).
    pub query: Option<String>,
}

/// Everything `save` needs beyond the outcome itself.
pub struct SaveContext<'a> {
    pub local_path: &'a Path,
    pub resources_dir: &'a Path,
    pub attachments_dir: Option<&'a Path>,
}

/// Outcome of a `save` call: number of links extracted (for
/// `DownloadedDocument.links_extracted_count`) and whether every mandatory
/// artifact was written.
#[derive(Debug, Clone, Copy)]
pub struct SaveOutcome {
    pub ok: bool,
    pub links_extracted_count: i64,
}

/// The polymorphic contract (C5, §4.4): fetch a URL, then save the result.
#[async_trait]
pub trait SiteDriver: Send + Sync {
    async fn fetch(&self, clean_url: &str, depth: i64) -> DriverResult<FetchOutcome>;

    async fn save(
        &self,
        clean_url: &str,
        outcome: &FetchOutcome,
        ctx: &SaveContext<'_>,
    ) -> DriverResult<SaveOutcome>;
}

pub(crate) fn attachment_row(a: &AttachmentRef) -> WikiAttachmentRow {
    WikiAttachmentRow {
        attachment_id: a.attachment_id.clone(),
        title: a.title.clone(),
        media_type: a.media_type.clone(),
        file_size: a.file_size,
        file_size_local: a.file_size_local,
        version: a.version,
        created_when: a.created_when.clone(),
        created_by: a.created_by.clone(),
        comment: a.comment.clone(),
        download_url: Some(a.download_url.clone()),
        local_path: a.local_path.clone(),
    }
}
