//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CompletedFile, DiscoveryResult, Edge, ErrorRecord, FileMetadata, GraphStats, Link, NewFile,
    NewNode, SessionRecord, SiteGraph, UrlNode,
};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const NODE_COLUMNS: &str =
    "url, depth, crawl_status, status_code, content_type, discovered_at, last_checked";

const FILE_COLUMNS: &str = "url, filename, extension, size, checksum, content_type, download_status,
     local_path, source_page, attempts, failure_reason, discovered_at, completed_at";

const SESSION_COLUMNS: &str = "id, start_url, config_json, config_hash, status, halt_reason,
     started_at, updated_at, finished_at, snapshot_json";

/// SQLite storage backend
///
/// The connection sits behind a mutex; each trait method holds the lock for
/// the duration of one statement or one transaction.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the database file at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (tests and throwaway sessions)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_column<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{}'", value).into(),
        )
    })
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<UrlNode> {
    Ok(UrlNode {
        url: row.get(0)?,
        depth: row.get(1)?,
        crawl_status: parse_column(2, row.get(2)?, CrawlStatus::from_db_string)?,
        status_code: row.get(3)?,
        content_type: row.get(4)?,
        discovered_at: row.get(5)?,
        last_checked: row.get(6)?,
    })
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileMetadata> {
    let size: Option<i64> = row.get(3)?;
    Ok(FileMetadata {
        url: row.get(0)?,
        filename: row.get(1)?,
        extension: row.get(2)?,
        size: size.map(|s| s as u64),
        checksum: row.get(4)?,
        content_type: row.get(5)?,
        download_status: parse_column(6, row.get(6)?, DownloadStatus::from_db_string)?,
        local_path: row.get(7)?,
        source_page: row.get(8)?,
        attempts: row.get(9)?,
        failure_reason: row.get(10)?,
        discovered_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let halt_reason: Option<String> = row.get(5)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        start_url: row.get(1)?,
        config_json: row.get(2)?,
        config_hash: row.get(3)?,
        status: parse_column(4, row.get(4)?, SessionStatus::from_db_string)?,
        halt_reason: match halt_reason {
            Some(reason) => Some(parse_column(5, reason, HaltReason::from_db_string)?),
            None => None,
        },
        started_at: row.get(6)?,
        updated_at: row.get(7)?,
        finished_at: row.get(8)?,
        snapshot_json: row.get(9)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Session Management =====

    fn create_session(&self, session: &SessionRecord) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                SESSION_COLUMNS
            ),
            params![
                session.id,
                session.start_url,
                session.config_json,
                session.config_hash,
                session.status.to_db_string(),
                session.halt_reason.map(|r| r.to_db_string()),
                session.started_at,
                session.updated_at,
                session.finished_at,
                session.snapshot_json,
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            params![session_id],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC, id",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn update_session_status(&self, session_id: &str, status: SessionStatus) -> StorageResult<()> {
        let conn = self.lock()?;
        // A finished session keeps its final status
        let changed = conn.execute(
            "UPDATE sessions SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('running', 'paused')",
            params![session_id, status.to_db_string(), now()],
        )?;
        if changed == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StorageError::SessionNotFound(session_id.to_string()));
            }
        }
        Ok(())
    }

    fn save_snapshot(&self, session_id: &str, snapshot_json: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET snapshot_json = ?2, updated_at = ?3 WHERE id = ?1",
            params![session_id, snapshot_json, now()],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        halt_reason: Option<HaltReason>,
        snapshot_json: &str,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let timestamp = now();
        let changed = conn.execute(
            "UPDATE sessions
             SET status = ?2, halt_reason = ?3, snapshot_json = ?4, updated_at = ?5, finished_at = ?5
             WHERE id = ?1",
            params![
                session_id,
                status.to_db_string(),
                halt_reason.map(|r| r.to_db_string()),
                snapshot_json,
                timestamp,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    // ===== Site Graph =====

    fn upsert_node_and_edges(
        &self,
        session_id: &str,
        url: &str,
        parent_url: Option<&str>,
        links: &[Link],
    ) -> StorageResult<DiscoveryResult> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let timestamp = now();
        let mut result = DiscoveryResult::default();

        let parent_depth: Option<u32> = match parent_url {
            Some(parent) => Some(
                tx.query_row(
                    "SELECT depth FROM nodes WHERE session_id = ?1 AND url = ?2",
                    params![session_id, parent],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StorageError::NodeNotFound(parent.to_string()))?,
            ),
            None => None,
        };

        let inserted = tx.execute(
            "INSERT INTO nodes (session_id, url, depth, crawl_status, discovered_at, last_checked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(session_id, url) DO NOTHING",
            params![
                session_id,
                url,
                parent_depth.map_or(0, |d| d + 1),
                CrawlStatus::Pending.to_db_string(),
                timestamp,
            ],
        )?;

        if inserted == 1 {
            result.node_created = true;
        } else {
            tx.execute(
                "UPDATE nodes SET last_checked = ?3 WHERE session_id = ?1 AND url = ?2",
                params![session_id, url, timestamp],
            )?;
            if let Some(depth) = parent_depth {
                tx.execute(
                    "UPDATE nodes SET depth = MIN(depth, ?3) WHERE session_id = ?1 AND url = ?2",
                    params![session_id, url, depth + 1],
                )?;
            }
        }

        let depth: u32 = tx.query_row(
            "SELECT depth FROM nodes WHERE session_id = ?1 AND url = ?2",
            params![session_id, url],
            |row| row.get(0),
        )?;

        {
            let mut insert_edge = tx.prepare_cached(
                "INSERT INTO edges (session_id, from_url, to_url, anchor_text, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, from_url, to_url) DO NOTHING",
            )?;
            let mut insert_node = tx.prepare_cached(
                "INSERT INTO nodes (session_id, url, depth, crawl_status, discovered_at, last_checked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(session_id, url) DO NOTHING",
            )?;
            let mut lower_depth = tx.prepare_cached(
                "UPDATE nodes SET depth = MIN(depth, ?3) WHERE session_id = ?1 AND url = ?2",
            )?;

            if let Some(parent) = parent_url {
                result.new_edge_count +=
                    insert_edge.execute(params![session_id, parent, url, None::<String>, timestamp])?;
            }

            let child_depth = depth + 1;
            let mut seen = HashSet::new();
            for link in links {
                if !seen.insert(link.url.as_str()) {
                    continue;
                }

                if link.url != url {
                    let created = insert_node.execute(params![
                        session_id,
                        link.url,
                        child_depth,
                        CrawlStatus::Pending.to_db_string(),
                        timestamp,
                    ])?;
                    if created == 1 {
                        result.new_node_count += 1;
                        result.new_nodes.push(NewNode {
                            url: link.url.clone(),
                            depth: child_depth,
                        });
                    } else {
                        lower_depth.execute(params![session_id, link.url, child_depth])?;
                    }
                }

                result.new_edge_count += insert_edge.execute(params![
                    session_id,
                    url,
                    link.url,
                    link.anchor_text,
                    timestamp,
                ])?;
            }
        }

        tx.commit()?;
        Ok(result)
    }

    fn mark_fetched(
        &self,
        session_id: &str,
        url: &str,
        status_code: Option<u16>,
        content_type: Option<&str>,
        crawl_status: CrawlStatus,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE nodes
             SET status_code = ?3, content_type = ?4, crawl_status = ?5, last_checked = ?6
             WHERE session_id = ?1 AND url = ?2",
            params![
                session_id,
                url,
                status_code,
                content_type,
                crawl_status.to_db_string(),
                now(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NodeNotFound(url.to_string()));
        }
        Ok(())
    }

    fn get_node(&self, session_id: &str, url: &str) -> StorageResult<Option<UrlNode>> {
        let conn = self.lock()?;
        let node = conn
            .query_row(
                &format!(
                    "SELECT {} FROM nodes WHERE session_id = ?1 AND url = ?2",
                    NODE_COLUMNS
                ),
                params![session_id, url],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    fn nodes_by_status(&self, session_id: &str, status: CrawlStatus) -> StorageResult<Vec<UrlNode>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE session_id = ?1 AND crawl_status = ?2
             ORDER BY depth, discovered_at, url",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![session_id, status.to_db_string()], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    fn graph_stats(&self, session_id: &str) -> StorageResult<GraphStats> {
        let conn = self.lock()?;

        let (total_nodes, max_depth): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(MAX(depth), 0) FROM nodes WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let total_edges: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let mut by_status = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT crawl_status, COUNT(*) FROM nodes WHERE session_id = ?1 GROUP BY crawl_status",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = CrawlStatus::from_db_string(&status) {
                by_status.insert(status, count as u64);
            }
        }

        Ok(GraphStats {
            total_nodes: total_nodes as u64,
            total_edges: total_edges as u64,
            by_status,
            max_depth_seen: max_depth as u32,
        })
    }

    fn export_graph(&self, session_id: &str) -> StorageResult<SiteGraph> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE session_id = ?1 ORDER BY depth, discovered_at, url",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![session_id], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT from_url, to_url, anchor_text FROM edges WHERE session_id = ?1 ORDER BY id",
        )?;
        let edges = stmt
            .query_map(params![session_id], |row| {
                Ok(Edge {
                    from_url: row.get(0)?,
                    to_url: row.get(1)?,
                    anchor_text: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SiteGraph { nodes, edges })
    }

    // ===== Files =====

    fn insert_file(&self, session_id: &str, file: &NewFile) -> StorageResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO files (session_id, url, extension, download_status, source_page, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id, url) DO NOTHING",
            params![
                session_id,
                file.url,
                file.extension,
                DownloadStatus::Pending.to_db_string(),
                file.source_page,
                now(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_file(&self, session_id: &str, url: &str) -> StorageResult<Option<FileMetadata>> {
        let conn = self.lock()?;
        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM files WHERE session_id = ?1 AND url = ?2",
                    FILE_COLUMNS
                ),
                params![session_id, url],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    fn update_file_status(
        &self,
        session_id: &str,
        url: &str,
        status: DownloadStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE files
             SET download_status = ?3,
                 failure_reason = ?4,
                 attempts = attempts + CASE WHEN ?3 = 'downloading' THEN 1 ELSE 0 END
             WHERE session_id = ?1 AND url = ?2",
            params![session_id, url, status.to_db_string(), reason],
        )?;
        if changed == 0 {
            return Err(StorageError::FileNotFound(url.to_string()));
        }
        Ok(())
    }

    fn complete_file(&self, session_id: &str, url: &str, file: &CompletedFile) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE files
             SET filename = ?3, size = ?4, checksum = ?5, local_path = ?6, content_type = ?7,
                 download_status = ?8, failure_reason = NULL, completed_at = ?9
             WHERE session_id = ?1 AND url = ?2",
            params![
                session_id,
                url,
                file.filename,
                file.size as i64,
                file.checksum,
                file.local_path,
                file.content_type,
                DownloadStatus::Completed.to_db_string(),
                now(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::FileNotFound(url.to_string()));
        }
        Ok(())
    }

    fn find_completed_by_checksum(
        &self,
        session_id: &str,
        checksum: &str,
    ) -> StorageResult<Option<FileMetadata>> {
        let conn = self.lock()?;
        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM files
                     WHERE session_id = ?1 AND checksum = ?2 AND download_status = ?3
                     ORDER BY completed_at, url LIMIT 1",
                    FILE_COLUMNS
                ),
                params![session_id, checksum, DownloadStatus::Completed.to_db_string()],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    fn fail_unfinished_files(&self, session_id: &str, reason: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE files SET download_status = ?2, failure_reason = ?3
             WHERE session_id = ?1 AND download_status IN (?4, ?5)",
            params![
                session_id,
                DownloadStatus::Failed.to_db_string(),
                reason,
                DownloadStatus::Pending.to_db_string(),
                DownloadStatus::Downloading.to_db_string(),
            ],
        )?;
        Ok(changed)
    }

    fn list_files(&self, session_id: &str) -> StorageResult<Vec<FileMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM files WHERE session_id = ?1 ORDER BY discovered_at, url",
            FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map(params![session_id], row_to_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    // ===== Error Log =====

    fn record_error(&self, session_id: &str, url: &str, kind: &str, message: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO crawl_errors (session_id, url, kind, message, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, url, kind, message, now()],
        )?;
        Ok(())
    }

    fn list_errors(&self, session_id: &str, limit: usize) -> StorageResult<Vec<ErrorRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT url, kind, message, occurred_at FROM crawl_errors
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let errors = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok(ErrorRecord {
                    url: row.get(0)?,
                    kind: row.get(1)?,
                    message: row.get(2)?,
                    occurred_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(errors)
    }

    fn count_errors(&self, session_id: &str) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crawl_errors WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
