//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Session records and archived progress snapshots
//! - The per-session site graph (nodes and edges)
//! - File metadata for the download pipeline
//! - The per-session error log

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Shared handle used by the orchestrator and the download workers
pub type SharedStorage = Arc<dyn Storage>;

/// Opens (or creates) a SQLite database at `path`
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A discovered URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlNode {
    pub url: String,
    pub depth: u32,
    pub crawl_status: CrawlStatus,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub discovered_at: String,
    pub last_checked: String,
}

/// A directed link between two nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub from_url: String,
    pub to_url: String,
    pub anchor_text: Option<String>,
}

/// An outbound link found on a page, already normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub anchor_text: Option<String>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anchor_text: None,
        }
    }

    pub fn with_anchor(url: impl Into<String>, anchor_text: impl Into<String>) -> Self {
        let text = anchor_text.into();
        Self {
            url: url.into(),
            anchor_text: if text.trim().is_empty() {
                None
            } else {
                Some(text.trim().to_string())
            },
        }
    }
}

/// A node created by `upsert_node_and_edges`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub url: String,
    pub depth: u32,
}

/// Outcome of recording one processed page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Outbound links that became brand-new nodes
    pub new_node_count: usize,
    /// Edges that did not exist before (including the incoming edge)
    pub new_edge_count: usize,
    /// True if the page's own node was created by this call
    pub node_created: bool,
    /// The newly created outbound nodes, in link order
    pub new_nodes: Vec<NewNode>,
}

/// Counters over one session's graph
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_nodes: u64,
    pub total_edges: u64,
    pub by_status: HashMap<CrawlStatus, u64>,
    pub max_depth_seen: u32,
}

impl GraphStats {
    pub fn count(&self, status: CrawlStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Full node/edge export for visualization
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteGraph {
    pub nodes: Vec<UrlNode>,
    pub edges: Vec<Edge>,
}

/// A file accepted by the classifier, before any download attempt
#[derive(Debug, Clone)]
pub struct NewFile {
    pub url: String,
    pub extension: String,
    pub source_page: String,
}

/// Result of a verified download
#[derive(Debug, Clone)]
pub struct CompletedFile {
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub local_path: String,
    pub content_type: Option<String>,
}

/// Stored metadata for a discovered file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetadata {
    pub url: String,
    pub filename: Option<String>,
    pub extension: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub content_type: Option<String>,
    pub download_status: DownloadStatus,
    pub local_path: Option<String>,
    pub source_page: String,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub discovered_at: String,
    pub completed_at: Option<String>,
}

/// A persisted crawl session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub start_url: String,
    pub config_json: String,
    pub config_hash: String,
    pub status: SessionStatus,
    pub halt_reason: Option<HaltReason>,
    pub started_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
    pub snapshot_json: Option<String>,
}

/// One entry of the session error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub url: String,
    pub kind: String,
    pub message: String,
    pub occurred_at: String,
}
