//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use crate::storage::{
    CompletedFile, DiscoveryResult, ErrorRecord, FileMetadata, GraphStats, Link, NewFile,
    SessionRecord, SiteGraph, UrlNode,
};
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Any of these is fatal to the session that hit it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Methods take `&self`; implementations serialize access internally, so a
/// single backend can be shared between the orchestrator and download workers.
/// Every multi-row write is atomic.
pub trait Storage: Send + Sync {
    // ===== Session Management =====

    /// Inserts a new session row
    fn create_session(&self, session: &SessionRecord) -> StorageResult<()>;

    /// Gets a session by ID
    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord>;

    /// Lists all sessions, most recent first
    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Updates the status of a running or paused session
    fn update_session_status(&self, session_id: &str, status: SessionStatus) -> StorageResult<()>;

    /// Stores the latest progress snapshot without changing status
    fn save_snapshot(&self, session_id: &str, snapshot_json: &str) -> StorageResult<()>;

    /// Archives a finished session with its final snapshot
    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        halt_reason: Option<HaltReason>,
        snapshot_json: &str,
    ) -> StorageResult<()>;

    // ===== Site Graph =====

    /// Records a processed page and its outbound links in one transaction
    ///
    /// If `url` is new it is created as PENDING at `parent.depth + 1` (or 0
    /// without a parent) together with the incoming edge. Every link in
    /// `links` gets an edge; links that are not yet nodes are created as
    /// PENDING one level below `url`. Repeating the call creates nothing new
    /// and only refreshes `last_checked`.
    fn upsert_node_and_edges(
        &self,
        session_id: &str,
        url: &str,
        parent_url: Option<&str>,
        links: &[Link],
    ) -> StorageResult<DiscoveryResult>;

    /// Records the fetch outcome of an existing node
    ///
    /// Fails with `NodeNotFound` if the node was never created.
    fn mark_fetched(
        &self,
        session_id: &str,
        url: &str,
        status_code: Option<u16>,
        content_type: Option<&str>,
        crawl_status: CrawlStatus,
    ) -> StorageResult<()>;

    /// Gets a node by canonical URL
    fn get_node(&self, session_id: &str, url: &str) -> StorageResult<Option<UrlNode>>;

    /// Gets all nodes with a status, ordered by depth then discovery time
    fn nodes_by_status(&self, session_id: &str, status: CrawlStatus) -> StorageResult<Vec<UrlNode>>;

    /// Node and edge counters for a session
    fn graph_stats(&self, session_id: &str) -> StorageResult<GraphStats>;

    /// All nodes and edges of a session
    fn export_graph(&self, session_id: &str) -> StorageResult<SiteGraph>;

    // ===== Files =====

    /// Registers a file as PENDING; returns false if the URL was already known
    fn insert_file(&self, session_id: &str, file: &NewFile) -> StorageResult<bool>;

    /// Gets a file by URL
    fn get_file(&self, session_id: &str, url: &str) -> StorageResult<Option<FileMetadata>>;

    /// Moves a file to a new status
    ///
    /// Entering DOWNLOADING counts one attempt; `reason` is stored for FAILED.
    fn update_file_status(
        &self,
        session_id: &str,
        url: &str,
        status: DownloadStatus,
        reason: Option<&str>,
    ) -> StorageResult<()>;

    /// Marks a file COMPLETED with its verified metadata
    fn complete_file(&self, session_id: &str, url: &str, file: &CompletedFile) -> StorageResult<()>;

    /// Finds a COMPLETED file with the given checksum
    fn find_completed_by_checksum(
        &self,
        session_id: &str,
        checksum: &str,
    ) -> StorageResult<Option<FileMetadata>>;

    /// Fails every PENDING or DOWNLOADING file; returns how many changed
    fn fail_unfinished_files(&self, session_id: &str, reason: &str) -> StorageResult<usize>;

    /// All files of a session in discovery order
    fn list_files(&self, session_id: &str) -> StorageResult<Vec<FileMetadata>>;

    // ===== Error Log =====

    /// Appends to the session error log
    fn record_error(&self, session_id: &str, url: &str, kind: &str, message: &str) -> StorageResult<()>;

    /// The most recent errors, newest first
    fn list_errors(&self, session_id: &str, limit: usize) -> StorageResult<Vec<ErrorRecord>>;

    /// Total number of logged errors
    fn count_errors(&self, session_id: &str) -> StorageResult<u64>;
}
