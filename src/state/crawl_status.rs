//! Lifecycle enums persisted by the site graph store
//!
//! Each enum round-trips through a stable lowercase string stored in SQLite.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fetch state of a discovered URL node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlStatus {
    /// Discovered, not fetched yet
    Pending,
    /// Fetched with a 2xx response (or routed to the download queue)
    Crawled,
    /// Fetch failed permanently
    Failed,
}

impl CrawlStatus {
    /// True once the node has been fetched, successfully or not
    pub fn is_processed(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawled => "crawled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "crawled" => Some(Self::Crawled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Crawled => "CRAWLED",
            Self::Failed => "FAILED",
        })
    }
}

/// Download state of a discovered file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    /// Returns true if no worker will touch the file again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
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

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Downloading => "DOWNLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        })
    }
}
