//! Database schema definitions
//!
//! Every graph row is scoped by `session_id`, so several sessions can share
//! one database file without seeing each other's nodes.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl session; never purged
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    start_url TEXT NOT NULL,
    config_json TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    halt_reason TEXT,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT,
    snapshot_json TEXT
);

-- Discovered URLs, keyed by canonical URL
CREATE TABLE IF NOT EXISTS nodes (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    crawl_status TEXT NOT NULL,
    status_code INTEGER,
    content_type TEXT,
    discovered_at TEXT NOT NULL,
    last_checked TEXT NOT NULL,
    PRIMARY KEY (session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(session_id, crawl_status, depth);

-- Directed links between nodes; first anchor text wins
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    from_url TEXT NOT NULL,
    to_url TEXT NOT NULL,
    anchor_text TEXT,
    discovered_at TEXT NOT NULL,
    UNIQUE (session_id, from_url, to_url),
    FOREIGN KEY (session_id, from_url) REFERENCES nodes(session_id, url),
    FOREIGN KEY (session_id, to_url) REFERENCES nodes(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(session_id, to_url);

-- Downloadable files found during the crawl
CREATE TABLE IF NOT EXISTS files (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    url TEXT NOT NULL,
    filename TEXT,
    extension TEXT NOT NULL,
    size INTEGER,
    checksum TEXT,
    content_type TEXT,
    download_status TEXT NOT NULL,
    local_path TEXT,
    source_page TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    discovered_at TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_files_checksum ON files(session_id, checksum);

-- Per-session error log
CREATE TABLE IF NOT EXISTS crawl_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_errors_session ON crawl_errors(session_id, id);
"#;

/// Initializes the database schema
///
/// All statements are `IF NOT EXISTS`, so this is safe on an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
