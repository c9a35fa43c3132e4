//! Generic HTML Site Driver (§4.4.1): plain GET + link rewriting, no API.

use super::{AttachmentRef, DriverError, DriverResult, ErrorKind, FetchOutcome, ResourceRef, SaveContext, SaveOutcome, SiteDriver};
use crate::config::AdvancedConfig;
use crate::markdown;
use crate::path_mapper::{self, OutputFormat};
use crate::policy::{self, PolicyConfig};
use crate::store::ResourceType;
use async_trait::async_trait;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// Builds the client used by the HTML driver: 5s connect / 15s read, the
/// configured user agent and headers, and an optional cookie jar (§4.4.1).
pub fn build_client(advanced: &AdvancedConfig, cookie_jar: Option<Arc<Jar>>) -> reqwest::Result<Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &advanced.headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let mut builder = Client::builder()
        .user_agent(advanced.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .gzip(true)
        .brotli(true);

    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }

    builder.build()
}

fn strip_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap(),
            Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript>").unwrap(),
            Regex::new(r#"(?is)<meta\s+[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*>"#).unwrap(),
            Regex::new(r#"(?is)\s+on[a-z]+\s*=\s*"[^"]*""#).unwrap(),
            Regex::new(r#"(?is)\s+on[a-z]+\s*=\s*'[^']*'"#).unwrap(),
        ]
    })
}

fn sanitize_html(raw: &str) -> String {
    let mut out = raw.to_string();
    for pattern in strip_patterns() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out
}

fn classify_resource(tag: &str) -> Option<ResourceType> {
    match tag {
        "css" => Some(ResourceType::Css),
        "js" => Some(ResourceType::Js),
        "image" => Some(ResourceType::Image),
        "font" => Some(ResourceType::Font),
        _ => None,
    }
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

/// Resolves and filters the anchors/resources of a parsed document, returning
/// `(page_links, resources)` as `(resolved_url, element_href)` pairs so the
/// caller can both admit links and rewrite hrefs in the raw HTML.
fn extract_links_and_resources(
    document: &scraper::Html,
    base: &Url,
    policy: &PolicyConfig,
) -> (Vec<(String, String)>, Vec<(ResourceRef, String)>) {
    let mut links = Vec::new();
    let mut resources = Vec::new();

    if let Ok(selector) = scraper::Selector::parse("a[href]") {
        for el in document.select(&selector) {
            let href = match el.value().attr("href") {
                Some(h) => h,
                None => continue,
            };
            let resolved = match base.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            let clean = match policy::clean_url(resolved.as_str()) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if !policy::matches_site_rules(&clean, policy) {
                continue;
            }
            links.push((clean, href.to_string()));
        }
    }

    let resource_selectors = [
        ("link[rel=stylesheet][href]", "href", "css"),
        ("script[src]", "src", "js"),
        ("img[src]", "src", "image"),
    ];
    for (selector_str, attr, kind) in resource_selectors {
        let selector = match scraper::Selector::parse(selector_str) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for el in document.select(&selector) {
            let href = match el.value().attr(attr) {
                Some(h) => h,
                None => continue,
            };
            let resolved = match base.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if let Some(resource_type) = classify_resource(kind) {
                resources.push((
                    ResourceRef {
                        url: resolved.to_string(),
                        resource_type,
                    },
                    href.to_string(),
                ));
            }
        }
    }

    (links, resources)
}

/// Rewrites every occurrence of `original_href` in `html` to the relative
/// path from `from_file` to the mapped local path of `target_url` (§4.4.1,
/// §8 property 5). Occurrences are matched as literal href attribute values,
/// not as a general substring, to avoid corrupting unrelated text.
fn rewrite_href(html: &str, original_href: &str, local_relative: &str) -> String {
    let quoted_double = format!("\"{}\"", regex::escape(original_href));
    let quoted_single = format!("'{}'", regex::escape(original_href));
    let replaced = Regex::new(&quoted_double)
        .map(|re| re.replace_all(html, format!("\"{local_relative}\"")).into_owned())
        .unwrap_or_else(|_| html.to_string());
    Regex::new(&quoted_single)
        .map(|re| re.replace_all(&replaced, format!("'{local_relative}'")).into_owned())
        .unwrap_or(replaced)
}

pub struct HtmlDriver {
    pub client: Client,
    pub policy: PolicyConfig,
    pub output_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub output_format: OutputFormat,
    pub download_resources: bool,
    pub auth_markers: Vec<String>,
}

impl HtmlDriver {
    pub fn new(
        client: Client,
        policy: PolicyConfig,
        output_dir: PathBuf,
        resources_dir: PathBuf,
        output_format: OutputFormat,
        download_resources: bool,
        auth_markers: Vec<String>,
    ) -> Self {
        Self {
            client,
            policy,
            output_dir,
            resources_dir,
            output_format,
            download_resources,
            auth_markers,
        }
    }

    fn looks_like_auth_wall(&self, body: &str) -> bool {
        if body.len() < 500 {
            return true;
        }
        let lower = body.to_lowercase();
        self.auth_markers.iter().any(|marker| lower.contains(&marker.to_lowercase()))
    }
}

#[async_trait]
impl SiteDriver for HtmlDriver {
    async fn fetch(&self, clean_url: &str, _depth: i64) -> DriverResult<FetchOutcome> {
        let response = self.client.get(clean_url).send().await.map_err(error_from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_status(status));
        }

        let body = response.text().await.map_err(error_from_reqwest)?;

        if self.looks_like_auth_wall(&body) {
            return Err(DriverError::new(
                ErrorKind::Auth,
                "response looks like an authentication wall",
            ));
        }

        let base = Url::parse(clean_url)
            .map_err(|e| DriverError::new(ErrorKind::Parse, e.to_string()))?;
        let document = scraper::Html::parse_document(&body);

        let (links, resources) = extract_links_and_resources(&document, &base, &self.policy);

        let local_path = path_mapper::html_path(&self.output_dir, clean_url, self.output_format);
        let mut rewritten = sanitize_html(&body);

        for (target_url, original_href) in &links {
            let target_path = path_mapper::html_path(&self.output_dir, target_url, self.output_format);
            let relative = path_mapper::relative_href(&local_path, &target_path);
            rewritten = rewrite_href(&rewritten, original_href, &relative);
        }

        if self.download_resources {
            for (resource, original_href) in &resources {
                let target_path = self.resources_dir.join(resource_local_filename(&resource.url));
                let relative = path_mapper::relative_href(&local_path, &target_path);
                rewritten = rewrite_href(&rewritten, original_href, &relative);
            }
        }

        let storage_body = if self.output_format == OutputFormat::Markdown {
            let rewritten_doc = scraper::Html::parse_document(&rewritten);
            let main = markdown::extract_main_content(&rewritten_doc);
            let fragment_html = main.map(|el| el.html()).unwrap_or_else(|| rewritten.clone());
            Some(markdown::html_to_markdown(&fragment_html))
        } else {
            None
        };

        Ok(FetchOutcome {
            body: rewritten,
            storage_body,
            metadata: None,
            attachments: Vec::<AttachmentRef>::new(),
            resources: if self.download_resources {
                resources.into_iter().map(|(r, _)| r).collect()
            } else {
                Vec::new()
            },
            links: links.into_iter().map(|(u, _)| u).collect(),
            is_index: false,
            page_id: None,
            raw_api_payload: None,
            query: None,
        })
    }

    async fn save(
        &self,
        _clean_url: &str,
        outcome: &FetchOutcome,
        ctx: &SaveContext<'_>,
    ) -> DriverResult<SaveOutcome> {
        if let Some(parent) = ctx.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;
        }

        let content = outcome.storage_body.as_deref().unwrap_or(&outcome.body);
        tokio::fs::write(ctx.local_path, content)
            .await
            .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;

        Ok(SaveOutcome {
            ok: true,
            links_extracted_count: outcome.links.len() as i64,
        })
    }
}

/// Stable filename for a resource, derived purely from its URL (MD5 digest
/// plus its apparent extension) so the href rewritten into the persisted
/// HTML always matches wherever the resource is later downloaded to.
pub fn resource_local_filename(url: &str) -> String {
    let digest = format!("{:x}", md5::compute(url.as_bytes()));
    let extension = url
        .rsplit('.')
        .next()
        .filter(|s| s.len() <= 5 && !s.contains('/'))
        .unwrap_or("bin");
    format!("{digest}.{extension}")
}

/// Downloads a single resource (CSS/JS/image/font) into `resources_dir`,
/// keyed by a stable filename derived from its URL (§4.4.1 shared-resource
/// pool). Returns the local path on success.
pub async fn download_resource(
    client: &Client,
    resource: &ResourceRef,
    resources_dir: &Path,
) -> DriverResult<PathBuf> {
    let response = client.get(&resource.url).send().await.map_err(error_from_reqwest)?;
    if !response.status().is_success() {
        return Err(error_from_status(response.status()));
    }
    let bytes = response.bytes().await.map_err(error_from_reqwest)?;

    let local_path = resources_dir.join(resource_local_filename(&resource.url));

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;
    }
    tokio::fs::write(&local_path, &bytes)
        .await
        .map_err(|e| DriverError::new(ErrorKind::Unexpected, e.to_string()))?;

    Ok(local_path)
}
