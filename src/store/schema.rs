//! SQL schema for the durable store (§3 data model).

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS discovered_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_url TEXT NOT NULL,
    clean_url TEXT NOT NULL UNIQUE,
    depth INTEGER NOT NULL,
    discovered_at TEXT NOT NULL,
    parent_clean_url TEXT,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_discovered_urls_status ON discovered_urls(status);
CREATE INDEX IF NOT EXISTS idx_discovered_urls_depth_discovered ON discovered_urls(depth, discovered_at);

CREATE TABLE IF NOT EXISTS downloaded_documents (
    clean_url TEXT PRIMARY KEY REFERENCES discovered_urls(clean_url),
    local_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    download_time_seconds REAL NOT NULL,
    downloaded_at TEXT NOT NULL,
    depth INTEGER NOT NULL,
    links_extracted_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS downloaded_resources (
    resource_url TEXT PRIMARY KEY,
    local_path TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    referenced_by TEXT,
    is_shared INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS url_mappings (
    clean_url TEXT PRIMARY KEY,
    local_path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wiki_page_metadata (
    clean_url TEXT PRIMARY KEY,
    page_id TEXT,
    ari TEXT,
    page_type TEXT,
    page_status TEXT,
    title TEXT,
    space_key TEXT,
    space_name TEXT,
    version_number INTEGER,
    version_when TEXT,
    version_by TEXT,
    version_by_email TEXT,
    version_by_account_id TEXT,
    version_message TEXT,
    version_minor_edit INTEGER,
    created_when TEXT,
    created_by TEXT,
    created_by_email TEXT,
    created_by_account_id TEXT,
    updated_when TEXT,
    updated_by TEXT,
    updated_by_email TEXT,
    updated_by_account_id TEXT,
    link_web TEXT,
    link_rest TEXT,
    link_tiny TEXT,
    days_since_update INTEGER,
    has_attachments INTEGER,
    attachment_count INTEGER,
    content_char_count INTEGER,
    has_tables INTEGER
);

CREATE TABLE IF NOT EXISTS wiki_attachments (
    page_clean_url TEXT NOT NULL,
    attachment_id TEXT NOT NULL,
    title TEXT,
    media_type TEXT,
    file_size INTEGER,
    file_size_local INTEGER,
    version INTEGER,
    created_when TEXT,
    created_by TEXT,
    comment TEXT,
    download_url TEXT,
    local_path TEXT,
    PRIMARY KEY (page_clean_url, attachment_id)
);
"#;

pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 7);
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
    }
}
