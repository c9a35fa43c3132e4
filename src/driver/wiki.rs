//! Wiki-API Site Driver (§4.4.2): Confluence-compatible REST API crawling,
//! grounded in the original `confluence_api_crawler.py`/`confluence_auth.py`.

use super::{AttachmentRef, DriverError, DriverResult, ErrorKind, FetchOutcome, SaveContext, SaveOutcome, SiteDriver};
use crate::config::WikiCredentials;
use crate::path_mapper::{self, OutputFormat};
use crate::policy::{self, PolicyConfig};
use crate::store::WikiPageMetadataRow;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

const EXPAND: &str = "history.lastUpdated,version,body.view,body.storage,space,ancestors,children.page,metadata.labels";

pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()
}

fn page_id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"/pages/(\d+)").unwrap(),
            Regex::new(r"pageId=(\d+)").unwrap(),
            Regex::new(r"/content/(\d+)").unwrap(),
            Regex::new(r"/(\d{6,})").unwrap(),
        ]
    })
}

fn confluence_page_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"/pages/").unwrap(),
            Regex::new(r"/display/").unwrap(),
            Regex::new(r"/viewpage\.action").unwrap(),
            Regex::new(r"/content/").unwrap(),
        ]
    })
}

fn error_from_reqwest(err: reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::new(ErrorKind::Timeout, err.to_string())
    } else if err.is_connect() {
        DriverError::new(ErrorKind::Transport, err.to_string())
    } else {
        DriverError::new(ErrorKind::Unexpected, err.to_string())
    }
}

fn error_from_status(status: StatusCode) -> DriverError {
    if status == StatusCode::NOT_FOUND {
        DriverError::new(ErrorKind::NotFound, format!("HTTP {status}"))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        DriverError::new(ErrorKind::Auth, format!("HTTP {status}"))
    } else {
        DriverError::new(ErrorKind::Protocol, format!("HTTP {status}"))
    }
}

pub struct WikiDriver {
    pub client: Client,
    pub credentials: WikiCredentials,
    pub space: String,
    pub policy: PolicyConfig,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    pub download_attachments: bool,
    pub save_api_response: bool,
    pub save_metadata_yml: bool,
}

impl WikiDriver {
    pub fn new(
        client: Client,
        credentials: WikiCredentials,
        space: String,
        policy: PolicyConfig,
        output_dir: PathBuf,
        output_format: OutputFormat,
        download_attachments: bool,
        save_api_response: bool,
        save_metadata_yml: bool,
    ) -> Self {
        Self {
            client,
            credentials,
            space,
            policy,
            output_dir,
            output_format,
            download_attachments,
            save_api_response,
            save_metadata_yml,
        }
    }

    fn basic_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.credentials.email, Some(&self.credentials.token))
    }

    fn is_space_index(&self, url: &str) -> bool {
        url.contains("/spaces/") && (url.contains("/overview") || url.ends_with(&self.space))
    }

    fn extract_page_id(&self, url: &str) -> Option<String> {
        for pattern in page_id_patterns() {
            if let Some(caps) = pattern.captures(url) {
                if let Some(m) = caps.get(1) {
                    return Some(m.as_str().to_string());
                }
            }
        }
        None
    }

    /// CQL title-search fallback (§4.4.2, §11): when no numeric id can be
    /// extracted from the URL, search by the last path segment's title.
    /// Returns the resolved page id alongside the CQL query used, since the
    /// query is itself recorded in the page's metadata (§6 `source.query`).
    async fn resolve_page_id_via_title(&self, url: &str) -> Option<(String, String)> {
        let parsed = Url::parse(url).ok()?;
        let last_segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
        let title = urlencoding_decode(last_segment);

        let search_url = format!("{}/content/search", self.credentials.api_base());
        let cql = format!("title~\"{title}\" AND type=page");
        let request = self
            .basic_auth(self.client.get(&search_url))
            .query(&[("cql", cql.as_str()), ("limit", "1")]);

        let response = request.send().await.ok()?;
        if response.status() != StatusCode::OK {
            return None;
        }
        let data: Value = response.json().await.ok()?;
        let id = data.get("results")?.get(0)?.get("id")?.as_str()?.to_string();
        Some((id, cql))
    }

    async fn fetch_space_pages(&self, url: &str) -> DriverResult<FetchOutcome> {
        let space_key = Regex::new(r"/spaces/([^/]+)")
            .unwrap()
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DriverError::new(ErrorKind::Parse, "could not extract space key from URL"))?;

        let search_url = format!("{}/content/search", self.credentials.api_base());
        let base_url = self.credentials.base_url.trim_end_matches('/');
        let mut links = Vec::new();
        let mut start: u64 = 0;
        let limit: u64 = 100;

        loop {
            let cql = format!("type=page AND space={space_key}");
            let request = self.basic_auth(self.client.get(&search_url)).query(&[
                ("cql", cql.as_str()),
                ("limit", &limit.to_string()),
                ("start", &start.to_string()),
                ("expand", "_links.webui"),
            ]);
            let response = request.send().await.map_err(error_from_reqwest)?;
            if response.status() != StatusCode::OK {
                break;
            }
            let data: Value = response.json().await.map_err(error_from_reqwest)?;
            let results = data.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
            if results.is_empty() {
                break;
            }

            for page in &results {
                let webui = page
                    .get("_links")
                    .and_then(|l| l.get("webui"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if webui.is_empty() {
                    continue;
                }
                let page_url = if webui.starts_with("http") {
                    webui.to_string()
                } else if webui.starts_with("/wiki") {
                    format!("{base_url}{webui}")
                } else {
                    format!("{base_url}/wiki{webui}")
                };
                links.push(page_url);
            }

            let total = data.get("totalSize").and_then(Value::as_u64).unwrap_or(0);
            start += limit;
            if start >= total {
                break;
            }
        }

        let links: Vec<String> = links
            .into_iter()
            .filter(|l| policy::matches_site_rules(l, &self.policy))
            .collect();

        Ok(FetchOutcome {
            body: format!("<h1>Space: {space_key}</h1><p>This space contains {} pages.</p>", links.len()),
            storage_body: None,
            metadata: None,
            attachments: Vec::new(),
            resources: Vec::new(),
            links,
            is_index: true,
            page_id: None,
            raw_api_payload: None,
            query: None,
        })
    }

    async fn fetch_attachments(&self, page_id: &str) -> Vec<AttachmentRef> {
        let mut attachments = Vec::new();
        let mut next_url = Some(format!(
            "{}/content/{page_id}/child/attachment?limit=200&expand=version,metadata,extensions",
            self.credentials.api_base()
        ));

        while let Some(url) = next_url.take() {
            let request = self.basic_auth(self.client.get(&url));
            let response = match request.send().await {
                Ok(r) => r,
                Err(_) => break,
            };
            if response.status() != StatusCode::OK {
                break;
            }
            let data: Value = match response.json().await {
                Ok(d) => d,
                Err(_) => break,
            };

            for attachment in data.get("results").and_then(Value::as_array).into_iter().flatten() {
                if let Some(attachment_ref) = self.process_attachment(attachment) {
                    attachments.push(attachment_ref);
                }
            }

            if let Some(next_link) = data.get("_links").and_then(|l| l.get("next")).and_then(Value::as_str) {
                let base = self.credentials.base_url.trim_end_matches('/');
                next_url = Some(if next_link.starts_with("http") {
                    next_link.to_string()
                } else {
                    format!("{base}{next_link}")
                });
            }
        }

        attachments
    }

    fn process_attachment(&self, attachment: &Value) -> Option<AttachmentRef> {
        let attachment_id = attachment.get("id")?.as_str()?.to_string();
        let title = attachment.get("title").and_then(Value::as_str).map(|s| s.to_string());

        let download_path = attachment.get("_links")?.get("download")?.as_str()?;
        let base = self.credentials.base_url.trim_end_matches('/');
        let download_url = if download_path.starts_with("http") {
            download_path.to_string()
        } else if download_path.starts_with("/wiki") {
            format!("{base}{download_path}")
        } else {
            format!("{base}/wiki{download_path}")
        };

        let media_type = attachment
            .get("metadata")
            .and_then(|m| m.get("mediaType"))
            .and_then(Value::as_str)
            .or_else(|| attachment.get("extensions").and_then(|e| e.get("mediaType")).and_then(Value::as_str))
            .map(|s| s.to_string());
        let file_size = attachment
            .get("extensions")
            .and_then(|e| e.get("fileSize"))
            .and_then(Value::as_i64);
        let version = attachment
            .get("version")
            .and_then(|v| v.get("number"))
            .and_then(Value::as_i64)
            .or(Some(1));
        let created_when = attachment
            .get("created")
            .and_then(Value::as_str)
            .or_else(|| attachment.get("metadata").and_then(|m| m.get("created")).and_then(Value::as_str))
            .map(|s| s.to_string());
        let created_by = attachment
            .get("creator")
            .and_then(|c| c.get("displayName"))
            .and_then(Value::as_str)
            .or_else(|| {
                attachment
                    .get("metadata")
                    .and_then(|m| m.get("creator"))
                    .and_then(|c| c.get("displayName"))
                    .and_then(Value::as_str)
            })
            .map(|s| s.to_string());
        let comment = attachment
            .get("metadata")
            .and_then(|m| m.get("comment"))
            .and_then(Value::as_str)
            .or_else(|| attachment.get("extensions").and_then(|e| e.get("comment")).and_then(Value::as_str))
            .map(|s| s.to_string());

        Some(AttachmentRef {
            attachment_id,
            title,
            media_type,
            file_size,
            version,
            created_when,
            created_by,
            comment,
            download_url,
            local_path: None,
            file_size_local: None,
        })
    }

    async fn download_attachment_bytes(&self, attachment: &AttachmentRef, page_id: &str) -> Option<AttachmentRef> {
        let response = self.basic_auth(self.client.get(&attachment.download_url)).send().await.ok()?;
        if response.status() != StatusCode::OK {
            return None;
        }
        let bytes = response.bytes().await.ok()?;

        let safe_title = sanitize_filename(attachment.title.as_deref().unwrap_or("unknown"));
        let local_filename = format!("{}_{}", attachment.attachment_id, safe_title);
        let attachments_dir = self
            .output_dir
            .join("spaces")
            .join(&self.space)
            .join("pages")
            .join(page_id)
            .join("attachments");
        tokio::fs::create_dir_all(&attachments_dir).await.ok()?;
        let local_path = attachments_dir.join(&local_filename);
        tokio::fs::write(&local_path, &bytes).await.ok()?;

        let mut updated = attachment.clone();
        updated.local_path = Some(
            local_path
                .strip_prefix(&self.output_dir)
                .unwrap_or(&local_path)
                .to_string_lossy()
                .to_string(),
        );
        updated.file_size_local = Some(bytes.len() as i64);
        Some(updated)
    }

    fn extract_links_from_api_response(&self, data: &Value, html_content: &str) -> Vec<String> {
        let base_url = self.credentials.base_url.trim_end_matches('/');
        let mut links = Vec::new();

        if !html_content.is_empty() {
            let document = scraper::Html::parse_fragment(html_content);
            if let Ok(selector) = scraper::Selector::parse("a[href]") {
                for el in document.select(&selector) {
                    if let Some(href) = el.value().attr("href") {
                        let full_url = if href.starts_with('/') {
                            format!("{base_url}{href}")
                        } else if href.starts_with("http") {
                            href.to_string()
                        } else {
                            continue;
                        };
                        if confluence_page_patterns().iter().any(|re| re.is_match(&full_url)) {
                            links.push(full_url);
                        }
                    }
                }
            }
        }

        if let Some(children) = data.pointer("/children/page/results").and_then(Value::as_array) {
            for child in children {
                if let Some(webui) = child.get("_links").and_then(|l| l.get("webui")).and_then(Value::as_str) {
                    let link = if webui.starts_with("http") {
                        webui.to_string()
                    } else {
                        format!("{base_url}{webui}")
                    };
                    links.push(link);
                }
            }
        }

        links.sort();
        links.dedup();
        links
            .into_iter()
            .filter(|l| policy::matches_site_rules(l, &self.policy))
            .collect()
    }

    fn extract_metadata(&self, data: &Value) -> WikiPageMetadataRow {
        let get_str = |pointer: &str| data.pointer(pointer).and_then(Value::as_str).map(|s| s.to_string());
        let get_i64 = |pointer: &str| data.pointer(pointer).and_then(Value::as_i64);
        let get_bool = |pointer: &str| data.pointer(pointer).and_then(Value::as_bool);

        let updated_when = get_str("/history/lastUpdated/when");
        let days_since_update = updated_when.as_deref().and_then(days_since_update);

        WikiPageMetadataRow {
            page_id: get_str("/id"),
            ari: get_str("/_expandable/ari").or_else(|| get_str("/ari")),
            page_type: get_str("/type"),
            page_status: get_str("/status"),
            title: get_str("/title"),
            space_key: get_str("/space/key"),
            space_name: get_str("/space/name"),
            version_number: get_i64("/version/number"),
            version_when: get_str("/version/when"),
            version_by: get_str("/version/by/displayName"),
            version_by_email: get_str("/version/by/email"),
            version_by_account_id: get_str("/version/by/accountId"),
            version_message: get_str("/version/message"),
            version_minor_edit: get_bool("/version/minorEdit"),
            created_when: get_str("/history/createdDate"),
            created_by: get_str("/history/createdBy/displayName"),
            created_by_email: get_str("/history/createdBy/email"),
            created_by_account_id: get_str("/history/createdBy/accountId"),
            updated_by: get_str("/history/lastUpdated/by/displayName"),
            updated_by_email: get_str("/history/lastUpdated/by/email"),
            updated_by_account_id: get_str("/history/lastUpdated/by/accountId"),
            link_web: get_str("/_links/webui"),
            link_rest: get_str("/_links/self"),
            link_tiny: get_str("/_links/tinyui"),
            days_since_update,
            has_attachments: false,
            attachment_count: 0,
            content_char_count: 0,
            has_tables: false,
            updated_when,
        }
    }
}

/// `floor((now - updated_when) / 1 day)`, null if `updated_when` doesn't
/// parse as RFC 3339 (`confluence_metadata.py::_calculate_derived_stats`).
fn days_since_update(updated_when: &str) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(updated_when).ok()?;
    let delta = Utc::now().signed_duration_since(parsed.with_timezone(&Utc));
    Some(delta.num_days())
}

fn sanitize_filename(filename: &str) -> String {
    let replaced = filename.replace(' ', "_");
    let cleaned: String = replaced.chars().filter(|c| !"<>:\"/\\|?*".contains(*c)).collect();
    let truncated = if cleaned.len() > 200 { cleaned[..190].to_string() } else { cleaned };
    if truncated.is_empty() {
        "attachment".to_string()
    } else {
        truncated
    }
}

fn urlencoding_decode(segment: &str) -> String {
    percent_decode(segment)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// §6 YAML metadata schema: `source`/`content`/`history`/`version`/`derived`/`paths`/`attachments`,
/// grounded field-for-field in `confluence_metadata.py::generate_yaml`.
#[derive(Debug, Serialize)]
struct YamlSource {
    endpoint: String,
    query: Option<String>,
    request_url: String,
    rest: Option<String>,
    web: Option<String>,
    tiny: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlContent {
    id: Option<String>,
    ari: Option<String>,
    #[serde(rename = "type")]
    page_type: Option<String>,
    status: Option<String>,
    space_key: Option<String>,
    space_name: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlHistoryEntry {
    when: Option<String>,
    by: Option<String>,
    by_email: Option<String>,
    by_account: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlHistory {
    created: YamlHistoryEntry,
    updated: YamlHistoryEntry,
}

#[derive(Debug, Serialize)]
struct YamlVersion {
    number: Option<i64>,
    minor: Option<bool>,
    by: Option<String>,
    by_email: Option<String>,
    by_account: Option<String>,
    when: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlDerived {
    has_attachments: bool,
    attachment_count: i64,
    days_since_update: Option<i64>,
    content_char_count: i64,
    has_tables: bool,
}

#[derive(Debug, Serialize)]
struct YamlPaths {
    base: Option<String>,
    html: Option<String>,
    markdown: Option<String>,
    json: Option<String>,
    metadata: Option<String>,
    attachments_dir: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlAttachment {
    id: String,
    title: Option<String>,
    media_type: Option<String>,
    version: Option<i64>,
    file_size_api: Option<i64>,
    file_size_local: Option<i64>,
    created: Option<String>,
    created_by: Option<String>,
    comment: Option<String>,
    source_download: String,
    local_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct YamlAttachments {
    count: i64,
    items: Vec<YamlAttachment>,
}

#[derive(Debug, Serialize)]
struct YamlMetadata {
    source: YamlSource,
    content: YamlContent,
    history: YamlHistory,
    version: YamlVersion,
    derived: YamlDerived,
    paths: YamlPaths,
    attachments: YamlAttachments,
}

struct YamlPathInputs {
    base: Option<String>,
    html: Option<String>,
    markdown: Option<String>,
    json: Option<String>,
    metadata: Option<String>,
    attachments_dir: Option<String>,
}

fn build_yaml_metadata(
    url: &str,
    query: Option<&str>,
    metadata: &WikiPageMetadataRow,
    attachments: &[AttachmentRef],
    paths: YamlPathInputs,
) -> String {
    let has_attachments = !attachments.is_empty();
    let record = YamlMetadata {
        source: YamlSource {
            endpoint: format!("/content/{}", metadata.page_id.clone().unwrap_or_default()),
            query: query.map(|q| q.to_string()),
            request_url: url.to_string(),
            rest: metadata.link_rest.clone(),
            web: metadata.link_web.clone(),
            tiny: metadata.link_tiny.clone(),
        },
        content: YamlContent {
            id: metadata.page_id.clone(),
            ari: metadata.ari.clone(),
            page_type: metadata.page_type.clone(),
            status: metadata.page_status.clone(),
            space_key: metadata.space_key.clone(),
            space_name: metadata.space_name.clone(),
            title: metadata.title.clone(),
        },
        history: YamlHistory {
            created: YamlHistoryEntry {
                when: metadata.created_when.clone(),
                by: metadata.created_by.clone(),
                by_email: metadata.created_by_email.clone(),
                by_account: metadata.created_by_account_id.clone(),
            },
            updated: YamlHistoryEntry {
                when: metadata.updated_when.clone(),
                by: metadata.updated_by.clone(),
                by_email: metadata.updated_by_email.clone(),
                by_account: metadata.updated_by_account_id.clone(),
            },
        },
        version: YamlVersion {
            number: metadata.version_number,
            minor: metadata.version_minor_edit,
            by: metadata.version_by.clone(),
            by_email: metadata.version_by_email.clone(),
            by_account: metadata.version_by_account_id.clone(),
            when: metadata.version_when.clone(),
            comment: metadata.version_message.clone(),
        },
        derived: YamlDerived {
            has_attachments,
            attachment_count: attachments.len() as i64,
            days_since_update: metadata.days_since_update,
            content_char_count: metadata.content_char_count,
            has_tables: metadata.has_tables,
        },
        paths: YamlPaths {
            base: paths.base,
            html: paths.html,
            markdown: paths.markdown,
            json: paths.json,
            metadata: paths.metadata,
            attachments_dir: paths.attachments_dir,
        },
        attachments: YamlAttachments {
            count: attachments.len() as i64,
            items: attachments
                .iter()
                .map(|a| YamlAttachment {
                    id: a.attachment_id.clone(),
                    title: a.title.clone(),
                    media_type: a.media_type.clone(),
                    version: a.version,
                    file_size_api: a.file_size,
                    file_size_local: a.file_size_local,
                    created: a.created_when.clone(),
                    created_by: a.created_by.clone(),
                    comment: a.comment.clone(),
                    source_download: a.download_url.clone(),
                    local_path: a.local_path.clone(),
                })
                .collect(),
        },
    };

    serde_yaml::to_string(&record).unwrap_or_default()
}

#[async_trait]
impl SiteDriver for WikiDriver {
    async fn fetch(&self, clean_url: &str, depth: i64) -> DriverResult<FetchOutcome> {
        if self.is_space_index(clean_url) {
            return self.fetch_space_pages(clean_url).await;
        }

        let mut query = None;
        let page_id = match self.extract_page_id(clean_url) {
            Some(id) => id,
            None => {
                let (id, cql) = self
                    .resolve_page_id_via_title(clean_url)
                    .await
                    .ok_or_else(|| DriverError::new(ErrorKind::NotFound, "could not extract page id from URL"))?;
                query = Some(cql);
                id
            }
        };

        let api_url = format!("{}/content/{page_id}", self.credentials.api_base());
        let request = self.basic_auth(self.client.get(&api_url)).query(&[("expand", EXPAND)]);
        let response = request.send().await.map_err(error_from_reqwest)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(error_from_status(status));
        }

        let data: Value = response.json().await.map_err(error_from_reqwest)?;

        let mut metadata = self.extract_metadata(&data);
        let html_content = data
            .pointer("/body/view/value")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let storage_body = data
            .pointer("/body/storage/value")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        metadata.content_char_count = html_content.chars().count() as i64;
        metadata.has_tables = html_content.contains("<table");

        let mut attachments = Vec::new();
        if self.download_attachments {
            let discovered = self.fetch_attachments(&page_id).await;
            for attachment in discovered {
                if let Some(downloaded) = self.download_attachment_bytes(&attachment, &page_id).await {
                    attachments.push(downloaded);
                } else {
                    attachments.push(attachment);
                }
            }
        }
        metadata.has_attachments = !attachments.is_empty();
        metadata.attachment_count = attachments.len() as i64;

        let links = self.extract_links_from_api_response(&data, &html_content);

        let raw_api_payload = if self.save_api_response {
            Some(serde_json::to_string_pretty(&data).unwrap_or_default())
        } else {
            None
        };

        Ok(FetchOutcome {
            body: html_content,
            storage_body,
            metadata: Some(metadata),
            attachments,
            resources: Vec::new(),
            links,
            is_index: false,
            page_id: Some(page_id),
            raw_api_payload,
            query,
        })
    }

    async fn save(
        &self,
        clean_url: &str,
        outcome: &FetchOutcome,
        ctx: &SaveContext<'_>,
    ) -> DriverResult<SaveOutcome> {
        if outcome.is_index {
            return Ok(SaveOutcome {
                ok: true,
                links_extracted_count: outcome.links.len() as i64,
            });
        }

        let parent = ctx.local_path.parent().ok_or_else(|| {
            DriverError::new(ErrorKind::Unexpected, "local path has no parent directory")
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;

        let stem = ctx
            .local_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());

        let rewritten_html = rewrite_attachment_urls(&outcome.body, &outcome.attachments);

        let html_path = parent.join(format!("{stem}.html"));
        tokio::fs::write(&html_path, &rewritten_html)
            .await
            .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;

        let mut md_path = None;
        if self.output_format == OutputFormat::Markdown {
            let title = outcome
                .metadata
                .as_ref()
                .and_then(|m| m.title.clone())
                .unwrap_or_default();
            let space_key = outcome.metadata.as_ref().and_then(|m| m.space_key.as_deref());
            let updated_when = outcome.metadata.as_ref().and_then(|m| m.updated_when.as_deref());
            let markdown_body = crate::markdown::html_to_markdown(&rewritten_html);
            let markdown_content = crate::markdown::with_metadata_header(
                &title,
                clean_url,
                space_key,
                outcome.page_id.as_deref(),
                updated_when,
                &markdown_body,
            );
            let path = parent.join(format!("{stem}.md"));
            tokio::fs::write(&path, &markdown_content)
                .await
                .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;
            md_path = Some(path);
        }

        let mut json_path = None;
        if self.save_api_response {
            if let Some(payload) = &outcome.raw_api_payload {
                let path = parent.join(format!("{stem}.json"));
                tokio::fs::write(&path, payload)
                    .await
                    .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;
                json_path = Some(path);
            }
        }

        if self.save_metadata_yml {
            if let Some(metadata) = &outcome.metadata {
                let has_attachments = !outcome.attachments.is_empty();
                let yml_path = parent.join(format!("{stem}.yml"));
                let base_rel = parent
                    .strip_prefix(&self.output_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().to_string());
                let yaml = build_yaml_metadata(
                    clean_url,
                    outcome.query.as_deref(),
                    metadata,
                    &outcome.attachments,
                    YamlPathInputs {
                        base: base_rel,
                        html: Some(path_mapper::relative_href(ctx.local_path, &html_path)),
                        markdown: md_path.as_ref().map(|p| path_mapper::relative_href(ctx.local_path, p)),
                        json: json_path.as_ref().map(|p| path_mapper::relative_href(ctx.local_path, p)),
                        metadata: Some(path_mapper::relative_href(ctx.local_path, &yml_path)),
                        attachments_dir: if has_attachments { Some("attachments".to_string()) } else { None },
                    },
                );
                tokio::fs::write(&yml_path, yaml)
                    .await
                    .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;
            }
        }

        Ok(SaveOutcome {
            ok: true,
            links_extracted_count: outcome.links.len() as i64,
        })
    }
}

/// Rewrites every attachment reference in `html` to a local `attachments/<file>`
/// path, trying the five variants the original crawler tried: absolute URL,
/// `/wiki`-prefixed path, plain path, plain path without a leading slash, and
/// bare thumbnail filename (§11, grounded in `_rewrite_attachment_urls`).
fn rewrite_attachment_urls(html: &str, attachments: &[AttachmentRef]) -> String {
    let mut out = html.to_string();

    for attachment in attachments {
        let local_path = match &attachment.local_path {
            Some(p) => p,
            None => continue,
        };
        let local_filename = local_path.rsplit('/').next().unwrap_or(local_path);
        let local_ref = format!("attachments/{local_filename}");

        let download_url = attachment.download_url.split('?').next().unwrap_or(&attachment.download_url);
        let parsed = match Url::parse(download_url) {
            Ok(u) => u,
            Err(_) => continue,
        };
        let clean_path = parsed.path();

        let wiki_path = if clean_path.starts_with("/wiki") {
            clean_path.to_string()
        } else {
            format!("/wiki{clean_path}")
        };
        let plain_path = if let Some(stripped) = clean_path.strip_prefix("/wiki") {
            if stripped.starts_with('/') {
                stripped.to_string()
            } else {
                format!("/{stripped}")
            }
        } else {
            clean_path.to_string()
        };
        let plain_no_slash = plain_path.trim_start_matches('/').to_string();
        let file_name = clean_path.rsplit('/').next().unwrap_or("");

        let optional_query = r#"(?:\?[^"'\s>]*)?"#;
        let variants = [
            format!("{}{}", regex::escape(download_url), optional_query),
            format!("{}{}", regex::escape(&wiki_path), optional_query),
            format!("{}{}", regex::escape(&plain_path), optional_query),
            format!("{}{}", regex::escape(&plain_no_slash), optional_query),
            format!(
                r#"https?://[^"'\s]+/wiki/download/thumbnails/[^"'\s]*/{}{}"#,
                regex::escape(file_name),
                optional_query
            ),
            format!(
                r#"/wiki/download/thumbnails/[^"'\s]*/{}{}"#,
                regex::escape(file_name),
                optional_query
            ),
        ];

        for pattern in variants {
            if let Ok(re) = Regex::new(&pattern) {
                out = re.replace_all(&out, local_ref.as_str()).into_owned();
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(base_url: &str) -> WikiCredentials {
        WikiCredentials {
            email: "a@b.com".into(),
            token: "tok".into(),
            base_url: base_url.to_string(),
        }
    }

    fn test_policy() -> PolicyConfig {
        PolicyConfig {
            max_depth: 3,
            base_domain: String::new(),
            exclude_patterns: vec![],
            valid_url_patterns: vec![],
        }
    }

    #[test]
    fn extract_page_id_from_pages_url() {
        let driver = WikiDriver::new(
            Client::builder().build().unwrap(),
            credentials("https://h"),
            "AR".into(),
            test_policy(),
            PathBuf::from("/out"),
            OutputFormat::Markdown,
            false,
            false,
            false,
        );
        assert_eq!(driver.extract_page_id("https://h/wiki/pages/556040223/Title"), Some("556040223".to_string()));
    }

    #[test]
    fn sanitize_filename_strips_reserved_chars_and_spaces() {
        assert_eq!(sanitize_filename("my file:report.pdf"), "my_filereport.pdf");
    }

    #[test]
    fn days_since_update_computes_whole_days_in_the_past() {
        let when = (Utc::now() - chrono::Duration::days(10)).to_rfc3339();
        let days = days_since_update(&when).unwrap();
        assert!((9..=10).contains(&days));
    }

    #[test]
    fn days_since_update_is_none_on_unparseable_input() {
        assert_eq!(days_since_update("not a timestamp"), None);
    }

    #[test]
    fn yaml_metadata_matches_nested_schema() {
        let metadata = WikiPageMetadataRow {
            page_id: Some("42".into()),
            ari: Some("ari:cloud:confluence::page/42".into()),
            page_type: Some("page".into()),
            page_status: Some("current".into()),
            title: Some("My Page".into()),
            space_key: Some("AR".into()),
            space_name: Some("Architecture".into()),
            version_number: Some(3),
            version_when: Some("2026-01-01T00:00:00Z".into()),
            version_by: Some("John Doe".into()),
            version_by_email: Some("john@example.com".into()),
            version_by_account_id: Some("account123".into()),
            version_message: Some("Updated diagrams".into()),
            version_minor_edit: Some(false),
            created_when: Some("2025-01-15T08:00:00Z".into()),
            created_by: Some("Jane Smith".into()),
            created_by_email: Some("jane@example.com".into()),
            created_by_account_id: Some("account456".into()),
            updated_when: Some("2026-01-01T00:00:00Z".into()),
            updated_by: Some("John Doe".into()),
            updated_by_email: Some("john@example.com".into()),
            updated_by_account_id: Some("account123".into()),
            link_web: Some("/wiki/spaces/AR/pages/42".into()),
            link_rest: Some("/rest/api/content/42".into()),
            link_tiny: Some("/x/123abc".into()),
            days_since_update: Some(5),
            has_attachments: false,
            attachment_count: 0,
            content_char_count: 120,
            has_tables: false,
        };

        let yaml = build_yaml_metadata(
            "https://h/wiki/pages/42/My-Page",
            Some("title~\"My Page\" AND type=page"),
            &metadata,
            &[],
            YamlPathInputs {
                base: Some("spaces/AR/pages/42".into()),
                html: Some("index.html".into()),
                markdown: Some("index.md".into()),
                json: None,
                metadata: Some("index.yml".into()),
                attachments_dir: None,
            },
        );

        assert!(yaml.contains("source:"));
        assert!(yaml.contains("query: title~"));
        assert!(yaml.contains("content:"));
        assert!(yaml.contains("ari: ari:cloud"));
        assert!(yaml.contains("type: page"));
        assert!(yaml.contains("history:"));
        assert!(yaml.contains("created:"));
        assert!(yaml.contains("updated:"));
        assert!(yaml.contains("by_email: jane@example.com"));
        assert!(yaml.contains("by_account: account123"));
        assert!(yaml.contains("derived:"));
        assert!(yaml.contains("days_since_update: 5"));
        assert!(yaml.contains("paths:"));
        assert!(yaml.contains("base: spaces/AR/pages/42"));
        assert!(yaml.contains("metadata: index.yml"));
        assert!(yaml.contains("attachments:"));
        assert!(yaml.contains("count: 0"));
    }

    #[test]
    fn rewrite_attachment_urls_replaces_absolute_and_plain_variants() {
        let attachment = AttachmentRef {
            attachment_id: "123".into(),
            title: Some("doc.pdf".into()),
            media_type: None,
            file_size: None,
            version: None,
            created_when: None,
            created_by: None,
            comment: None,
            download_url: "https://h/wiki/download/attachments/1/doc.pdf".into(),
            local_path: Some("spaces/AR/pages/1/attachments/123_doc.pdf".into()),
            file_size_local: Some(10),
        };
        let html = r#"<a href="https://h/wiki/download/attachments/1/doc.pdf?version=1">doc</a>"#;
        let rewritten = rewrite_attachment_urls(html, &[attachment]);
        assert!(rewritten.contains("attachments/123_doc.pdf"));
        assert!(!rewritten.contains("download/attachments"));
    }

    #[tokio::test]
    async fn fetch_space_index_returns_page_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"id": "1", "_links": {"webui": "/spaces/AR/pages/1/One"}},
                ],
                "totalSize": 1
            })))
            .mount(&server)
            .await;

        let driver = WikiDriver::new(
            Client::builder().build().unwrap(),
            credentials(&server.uri()),
            "AR".into(),
            test_policy(),
            PathBuf::from("/out"),
            OutputFormat::Markdown,
            false,
            false,
            false,
        );

        let url = format!("{}/wiki/spaces/AR/overview", server.uri());
        let outcome = driver.fetch(&url, 0).await.unwrap();
        assert!(outcome.is_index);
        assert_eq!(outcome.links.len(), 1);
        assert!(outcome.links[0].ends_with("/spaces/AR/pages/1/One"));
    }

    #[tokio::test]
    async fn fetch_page_extracts_metadata_and_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "42",
                "type": "page",
                "status": "current",
                "title": "My Page",
                "space": {"key": "AR", "name": "Architecture"},
                "version": {"number": 3, "when": "2026-01-01T00:00:00Z"},
                "body": {
                    "view": {"value": "<p>hi <a href=\"/wiki/pages/99/Other\">other</a></p>"},
                    "storage": {"value": "<p>hi</p>"}
                }
            })))
            .mount(&server)
            .await;

        let driver = WikiDriver::new(
            Client::builder().build().unwrap(),
            credentials(&server.uri()),
            "AR".into(),
            test_policy(),
            PathBuf::from("/out"),
            OutputFormat::Markdown,
            false,
            false,
            false,
        );

        let url = format!("{}/wiki/pages/42/My-Page", server.uri());
        let outcome = driver.fetch(&url, 0).await.unwrap();
        assert_eq!(outcome.page_id, Some("42".to_string()));
        assert_eq!(outcome.metadata.as_ref().unwrap().title, Some("My Page".to_string()));
        assert_eq!(outcome.links.len(), 1);
    }

    #[tokio::test]
    async fn fetch_page_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let driver = WikiDriver::new(
            Client::builder().build().unwrap(),
            credentials(&server.uri()),
            "AR".into(),
            test_policy(),
            PathBuf::from("/out"),
            OutputFormat::Markdown,
            false,
            false,
            false,
        );

        let url = format!("{}/wiki/pages/42/My-Page", server.uri());
        let err = driver.fetch(&url, 0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
