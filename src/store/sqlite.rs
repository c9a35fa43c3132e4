//! SQLite-backed [`Store`] implementation.

use super::schema::initialize_schema;
use super::{
    AttachmentStats, DocumentStats, PendingEntry, ResourceStats, ResourceType, RunStatus, Store,
    StoreError, StoreResult, UrlCounts, UrlStatus, WikiAttachmentRow, WikiPageMetadataRow,
};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        initialize_schema(conn)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Store for SqliteStore {
    fn start_run(&self, config_hash: &str) -> StoreResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), status.to_db_string(), run_id],
        )?;
        Ok(())
    }

    fn admit(
        &self,
        raw_url: &str,
        clean_url: &str,
        depth: i64,
        parent_clean_url: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO discovered_urls
                (raw_url, clean_url, depth, discovered_at, parent_clean_url, status, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                raw_url,
                clean_url,
                depth,
                Utc::now().to_rfc3339(),
                parent_clean_url,
                UrlStatus::Pending.to_db_string(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn admit_batch(
        &self,
        items: &[(String, String, i64, Option<String>)],
    ) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO discovered_urls
                    (raw_url, clean_url, depth, discovered_at, parent_clean_url, status, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            )?;
            let now = Utc::now().to_rfc3339();
            for (raw_url, clean_url, depth, parent) in items {
                let n = stmt.execute(params![
                    raw_url,
                    clean_url,
                    depth,
                    now,
                    parent,
                    UrlStatus::Pending.to_db_string(),
                ])?;
                inserted += n;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn mark_downloading(&self, clean_url: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE discovered_urls SET status = ?1 WHERE clean_url = ?2 AND status = ?3",
            params![
                UrlStatus::Downloading.to_db_string(),
                clean_url,
                UrlStatus::Pending.to_db_string(),
            ],
        )?;
        Ok(n == 1)
    }

    fn mark_completed(
        &self,
        clean_url: &str,
        local_path: &str,
        file_size: i64,
        download_time_seconds: f64,
        links_extracted_count: i64,
        depth: i64,
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE discovered_urls SET status = ?1 WHERE clean_url = ?2",
            params![UrlStatus::Completed.to_db_string(), clean_url],
        )?;
        tx.execute(
            "INSERT INTO downloaded_documents
                (clean_url, local_path, file_size, download_time_seconds, downloaded_at, depth, links_extracted_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(clean_url) DO UPDATE SET
                local_path = excluded.local_path,
                file_size = excluded.file_size,
                download_time_seconds = excluded.download_time_seconds,
                downloaded_at = excluded.downloaded_at,
                depth = excluded.depth,
                links_extracted_count = excluded.links_extracted_count",
            params![
                clean_url,
                local_path,
                file_size,
                download_time_seconds,
                Utc::now().to_rfc3339(),
                depth,
                links_extracted_count
            ],
        )?;
        tx.execute(
            "INSERT INTO url_mappings (clean_url, local_path) VALUES (?1, ?2)
             ON CONFLICT(clean_url) DO UPDATE SET local_path = excluded.local_path",
            params![clean_url, local_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn mark_failed(&self, clean_url: &str, error: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE discovered_urls
             SET status = ?1, error_message = ?2, retry_count = retry_count + 1
             WHERE clean_url = ?3",
            params![UrlStatus::Failed.to_db_string(), error, clean_url],
        )?;
        Ok(())
    }

    fn status_of(&self, clean_url: &str) -> StoreResult<Option<UrlStatus>> {
        let conn = self.lock()?;
        let s: Option<String> = conn
            .query_row(
                "SELECT status FROM discovered_urls WHERE clean_url = ?1",
                params![clean_url],
                |r| r.get(0),
            )
            .optional()?;
        Ok(s.and_then(|s| UrlStatus::from_db_string(&s)))
    }

    fn pending_urls(&self, limit: Option<usize>) -> StoreResult<Vec<PendingEntry>> {
        let conn = self.lock()?;
        let sql = match limit {
            Some(_) => {
                "SELECT clean_url, depth FROM discovered_urls WHERE status = ?1
                 ORDER BY depth ASC, discovered_at ASC LIMIT ?2"
            }
            None => {
                "SELECT clean_url, depth FROM discovered_urls WHERE status = ?1
                 ORDER BY depth ASC, discovered_at ASC"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = if let Some(limit) = limit {
            stmt.query_map(params![UrlStatus::Pending.to_db_string(), limit as i64], |r| {
                Ok(PendingEntry {
                    clean_url: r.get(0)?,
                    depth: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![UrlStatus::Pending.to_db_string()], |r| {
                Ok(PendingEntry {
                    clean_url: r.get(0)?,
                    depth: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    fn downloaded_urls(&self) -> StoreResult<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT clean_url FROM downloaded_documents")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(rows)
    }

    fn downloaded_resources(&self) -> StoreResult<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT resource_url FROM downloaded_resources")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(rows)
    }

    fn url_to_path(&self) -> StoreResult<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT clean_url, local_path FROM url_mappings")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;
        Ok(rows)
    }

    fn shared_resources(&self) -> StoreResult<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT resource_url, local_path FROM downloaded_resources WHERE is_shared = 1",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;
        Ok(rows)
    }

    fn record_resource(
        &self,
        resource_url: &str,
        local_path: &str,
        resource_type: ResourceType,
        file_size: i64,
        referenced_by: Option<&str>,
        is_shared: bool,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO downloaded_resources
                (resource_url, local_path, resource_type, file_size, referenced_by, is_shared)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(resource_url) DO UPDATE SET
                local_path = excluded.local_path,
                resource_type = excluded.resource_type,
                file_size = excluded.file_size",
            params![
                resource_url,
                local_path,
                resource_type.to_db_string(),
                file_size,
                referenced_by,
                is_shared as i64,
            ],
        )?;
        Ok(())
    }

    fn save_wiki_metadata(&self, clean_url: &str, row: &WikiPageMetadataRow) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO wiki_page_metadata (
                clean_url, page_id, ari, page_type, page_status, title, space_key, space_name,
                version_number, version_when, version_by, version_by_email, version_by_account_id,
                version_message, version_minor_edit, created_when, created_by, created_by_email,
                created_by_account_id, updated_when, updated_by, updated_by_email, updated_by_account_id,
                link_web, link_rest, link_tiny, days_since_update, has_attachments, attachment_count,
                content_char_count, has_tables
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19,
                ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31
            )
            ON CONFLICT(clean_url) DO UPDATE SET
                page_id = excluded.page_id, ari = excluded.ari, page_type = excluded.page_type,
                page_status = excluded.page_status, title = excluded.title, space_key = excluded.space_key,
                space_name = excluded.space_name, version_number = excluded.version_number,
                version_when = excluded.version_when, version_by = excluded.version_by,
                version_by_email = excluded.version_by_email,
                version_by_account_id = excluded.version_by_account_id,
                version_message = excluded.version_message, version_minor_edit = excluded.version_minor_edit,
                created_when = excluded.created_when, created_by = excluded.created_by,
                created_by_email = excluded.created_by_email,
                created_by_account_id = excluded.created_by_account_id,
                updated_when = excluded.updated_when, updated_by = excluded.updated_by,
                updated_by_email = excluded.updated_by_email,
                updated_by_account_id = excluded.updated_by_account_id,
                link_web = excluded.link_web, link_rest = excluded.link_rest, link_tiny = excluded.link_tiny,
                days_since_update = excluded.days_since_update, has_attachments = excluded.has_attachments,
                attachment_count = excluded.attachment_count, content_char_count = excluded.content_char_count,
                has_tables = excluded.has_tables",
            params![
                clean_url,
                row.page_id,
                row.ari,
                row.page_type,
                row.page_status,
                row.title,
                row.space_key,
                row.space_name,
                row.version_number,
                row.version_when,
                row.version_by,
                row.version_by_email,
                row.version_by_account_id,
                row.version_message,
                row.version_minor_edit.map(|b| b as i64),
                row.created_when,
                row.created_by,
                row.created_by_email,
                row.created_by_account_id,
                row.updated_when,
                row.updated_by,
                row.updated_by_email,
                row.updated_by_account_id,
                row.link_web,
                row.link_rest,
                row.link_tiny,
                row.days_since_update,
                row.has_attachments as i64,
                row.attachment_count,
                row.content_char_count,
                row.has_tables as i64,
            ],
        )?;
        Ok(())
    }

    fn save_wiki_attachment(
        &self,
        page_clean_url: &str,
        row: &WikiAttachmentRow,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO wiki_attachments (
                page_clean_url, attachment_id, title, media_type, file_size, file_size_local,
                version, created_when, created_by, comment, download_url, local_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(page_clean_url, attachment_id) DO UPDATE SET
                title = excluded.title, media_type = excluded.media_type, file_size = excluded.file_size,
                file_size_local = excluded.file_size_local, version = excluded.version,
                created_when = excluded.created_when, created_by = excluded.created_by,
                comment = excluded.comment, download_url = excluded.download_url,
                local_path = excluded.local_path",
            params![
                page_clean_url,
                row.attachment_id,
                row.title,
                row.media_type,
                row.file_size,
                row.file_size_local,
                row.version,
                row.created_when,
                row.created_by,
                row.comment,
                row.download_url,
                row.local_path,
            ],
        )?;
        Ok(())
    }

    fn counts(&self) -> StoreResult<UrlCounts> {
        let conn = self.lock()?;
        let mut counts = UrlCounts::default();
        let mut stmt = conn.prepare("SELECT status, count(*) FROM discovered_urls GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            counts.total += n;
            match UrlStatus::from_db_string(&status) {
                Some(UrlStatus::Pending) => counts.pending = n,
                Some(UrlStatus::Downloading) => counts.downloading = n,
                Some(UrlStatus::Completed) => counts.completed = n,
                Some(UrlStatus::Failed) => counts.failed = n,
                None => {}
            }
        }
        Ok(counts)
    }

    fn document_stats(&self) -> StoreResult<DocumentStats> {
        let conn = self.lock()?;
        let (count, total_bytes): (i64, Option<i64>) = conn.query_row(
            "SELECT count(*), sum(file_size) FROM downloaded_documents",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let mut stmt =
            conn.prepare("SELECT depth, count(*) FROM downloaded_documents GROUP BY depth ORDER BY depth")?;
        let depth_breakdown = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(i64, i64)>>>()?;
        Ok(DocumentStats {
            count,
            total_bytes: total_bytes.unwrap_or(0),
            depth_breakdown,
        })
    }

    fn resource_stats(&self) -> StoreResult<ResourceStats> {
        let conn = self.lock()?;
        let (count, total_bytes): (i64, Option<i64>) = conn.query_row(
            "SELECT count(*), sum(file_size) FROM downloaded_resources",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(ResourceStats {
            count,
            total_bytes: total_bytes.unwrap_or(0),
        })
    }

    fn attachment_stats(&self) -> StoreResult<AttachmentStats> {
        let conn = self.lock()?;
        let (count, total_bytes): (i64, Option<i64>) = conn.query_row(
            "SELECT count(*), sum(file_size_local) FROM wiki_attachments",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(AttachmentStats {
            count,
            total_bytes_local: total_bytes.unwrap_or(0),
        })
    }

    fn export_by_status(&self, status: UrlStatus) -> StoreResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT clean_url, raw_url FROM discovered_urls WHERE status = ?1")?;
        let rows = stmt
            .query_map(params![status.to_db_string()], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn reset_progress(&self) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for table in [
            "wiki_attachments",
            "wiki_page_metadata",
            "url_mappings",
            "downloaded_resources",
            "downloaded_documents",
            "discovered_urls",
            "runs",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_is_idempotent() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.admit("https://x/a", "https://x/a", 0, None).unwrap());
        assert!(!store.admit("https://x/a", "https://x/a", 0, None).unwrap());
        assert_eq!(store.counts().unwrap().total, 1);
    }

    #[test]
    fn admit_batch_counts_only_new_rows() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.admit("https://x/a", "https://x/a", 0, None).unwrap();
        let items = vec![
            ("https://x/a".into(), "https://x/a".into(), 0, None),
            ("https://x/b".into(), "https://x/b".into(), 1, Some("https://x/a".into())),
        ];
        let inserted = store.admit_batch(&items).unwrap();
        assert_eq!(inserted, 1);
    }

    #[test]
    fn lifecycle_transitions() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.admit("https://x/a", "https://x/a", 0, None).unwrap();
        assert_eq!(store.status_of("https://x/a").unwrap(), Some(UrlStatus::Pending));
        assert!(store.mark_downloading("https://x/a").unwrap());
        assert!(!store.mark_downloading("https://x/a").unwrap());
        store
            .mark_completed("https://x/a", "/out/a/index.html", 1024, 0.5, 3, 0)
            .unwrap();
        assert_eq!(store.status_of("https://x/a").unwrap(), Some(UrlStatus::Completed));
        assert!(store.downloaded_urls().unwrap().contains("https://x/a"));
        assert_eq!(
            store.url_to_path().unwrap().get("https://x/a"),
            Some(&"/out/a/index.html".to_string())
        );
    }

    #[test]
    fn mark_failed_increments_retry_count() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.admit("https://x/a", "https://x/a", 0, None).unwrap();
        store.mark_failed("https://x/a", "boom").unwrap();
        let conn = store.lock().unwrap();
        let retry: i64 = conn
            .query_row(
                "SELECT retry_count FROM discovered_urls WHERE clean_url = 'https://x/a'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(retry, 1);
    }

    #[test]
    fn pending_urls_ordered_breadth_first() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.admit("https://x/b", "https://x/b", 1, None).unwrap();
        store.admit("https://x/a", "https://x/a", 0, None).unwrap();
        store.admit("https://x/c", "https://x/c", 1, None).unwrap();
        let pending = store.pending_urls(None).unwrap();
        assert_eq!(pending[0].clean_url, "https://x/a");
        assert_eq!(pending[1].clean_url, "https://x/b");
        assert_eq!(pending[2].clean_url, "https://x/c");
    }

    #[test]
    fn reset_progress_truncates_tables() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.admit("https://x/a", "https://x/a", 0, None).unwrap();
        store
            .mark_completed("https://x/a", "/out/a", 10, 0.1, 0, 0)
            .unwrap();
        store.reset_progress().unwrap();
        assert_eq!(store.counts().unwrap().total, 0);
        assert!(store.downloaded_urls().unwrap().is_empty());
    }

    #[test]
    fn resource_dedup_on_url() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .record_resource("https://x/a.css", "/shared/a.css", ResourceType::Css, 100, None, true)
            .unwrap();
        store
            .record_resource("https://x/a.css", "/shared/a.css", ResourceType::Css, 100, None, true)
            .unwrap();
        assert_eq!(store.resource_stats().unwrap().count, 1);
    }
}
