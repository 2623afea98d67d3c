//! Download pipeline for discovered files
//!
//! - `FileClassifier`: routes URLs to the page frontier or the download queue
//! - `DownloadQueue`: bounded queue plus a fixed-size worker pool
//! - `RetryPolicy`: exponential backoff with jitter
//! - `FileStore`: collision-free local storage with checksum deduplication

mod classifier;
mod queue;
mod retry;
mod store;

pub use classifier::{
    by_extension, by_mime_type, url_extension, Classification, FileClassifier, FilePredicate,
};
pub use queue::{
    strong_digest_etag, DownloadContext, DownloadEvent, DownloadJob, DownloadQueue, SubmitOutcome,
};
pub use retry::RetryPolicy;
pub use store::{sanitize_filename, sha256_hex, FileStore, StoredFile};

use crate::crawler::FetchError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors from a single download attempt
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download queue full")]
    QueueFull,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DownloadError {
    /// Stable reason code stored on the FAILED file row
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Timeout) => "timeout",
            Self::Fetch(FetchError::Network(_)) => "network_error",
            Self::Fetch(FetchError::Status { code }) if *code >= 500 || *code == 429 => {
                "http_server_error"
            }
            Self::Fetch(FetchError::Status { .. }) => "http_client_error",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Io(_) => "io_error",
            Self::Cancelled => "cancelled",
            Self::QueueFull => "queue_full",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Transient fetch failures and integrity/IO failures are retried; 4xx is not
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::SizeMismatch { .. } | Self::ChecksumMismatch { .. } | Self::Io(_) => true,
            Self::Cancelled | Self::QueueFull | Self::Storage(_) => false,
        }
    }
}
