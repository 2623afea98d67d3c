//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlStatus`: fetch state of a URL node (PENDING, CRAWLED, FAILED)
//! - `DownloadStatus`: lifecycle of a discovered file
//! - `SessionStatus` / `HaltReason`: lifecycle of a crawl session and why it ended

mod crawl_status;
mod session_status;

// Re-export main types
pub use crawl_status::{CrawlStatus, DownloadStatus};
pub use session_status::{HaltReason, SessionStatus};
