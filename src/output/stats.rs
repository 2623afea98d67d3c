//! Session statistics for the CLI
//!
//! Loads counters for one session from the storage layer and prints them.

use crate::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use crate::storage::{ErrorRecord, Storage, StorageResult};
use std::collections::HashMap;

/// Number of recent errors shown by `print_statistics`
const ERRORS_SHOWN: usize = 10;

/// Statistics summary for one session
#[derive(Debug, Clone)]
pub struct SessionStatistics {
    pub session_id: String,
    pub start_url: String,
    pub status: SessionStatus,
    pub halt_reason: Option<HaltReason>,

    /// Total number of nodes in the site graph
    pub total_pages: u64,

    /// Total number of edges in the site graph
    pub total_links: u64,

    /// Count of nodes by crawl status
    pub pages_by_status: HashMap<CrawlStatus, u64>,

    /// Deepest node recorded
    pub max_depth_seen: u32,

    /// Count of files by download status
    pub files_by_status: HashMap<DownloadStatus, u64>,

    /// Bytes stored for completed files (duplicates counted once per URL)
    pub downloaded_bytes: u64,

    pub total_errors: u64,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Loads statistics for a session from storage
pub fn load_statistics(storage: &dyn Storage, session_id: &str) -> StorageResult<SessionStatistics> {
    let session = storage.get_session(session_id)?;
    let graph = storage.graph_stats(session_id)?;

    let mut files_by_status = HashMap::new();
    let mut downloaded_bytes = 0;
    for file in storage.list_files(session_id)? {
        *files_by_status.entry(file.download_status).or_insert(0) += 1;
        if file.download_status == DownloadStatus::Completed {
            downloaded_bytes += file.size.unwrap_or(0);
        }
    }

    Ok(SessionStatistics {
        session_id: session.id,
        start_url: session.start_url,
        status: session.status,
        halt_reason: session.halt_reason,
        total_pages: graph.total_nodes,
        total_links: graph.total_edges,
        pages_by_status: graph.by_status,
        max_depth_seen: graph.max_depth_seen,
        files_by_status,
        downloaded_bytes,
        total_errors: storage.count_errors(session_id)?,
        recent_errors: storage.list_errors(session_id, ERRORS_SHOWN)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SessionStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Session: {}", stats.session_id);
    println!("  Start URL: {}", stats.start_url);
    match stats.halt_reason {
        Some(reason) => println!("  Status: {} ({})", stats.status, reason),
        None => println!("  Status: {}", stats.status),
    }
    println!();

    println!("Site Graph:");
    println!("  Total pages discovered: {}", stats.total_pages);
    println!("  Total links found: {}", stats.total_links);
    println!("  Deepest page: {}", stats.max_depth_seen);
    println!();

    println!("Pages by Status:");
    for status in [CrawlStatus::Crawled, CrawlStatus::Pending, CrawlStatus::Failed] {
        let count = stats.pages_by_status.get(&status).copied().unwrap_or(0);
        println!("  {}: {} ({:.1}%)", status, count, percentage(count, stats.total_pages));
    }
    println!();

    let total_files: u64 = stats.files_by_status.values().sum();
    if total_files > 0 {
        println!("Documents ({}):", total_files);
        for status in [
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Downloading,
            DownloadStatus::Pending,
        ] {
            if let Some(count) = stats.files_by_status.get(&status) {
                println!("  {}: {}", status, count);
            }
        }
        println!("  Bytes downloaded: {}", stats.downloaded_bytes);
        println!();
    }

    if stats.total_errors > 0 {
        println!("Errors ({} total, most recent first):", stats.total_errors);
        for error in &stats.recent_errors {
            println!("  [{}] {}: {}", error.kind, error.url, error.message);
        }
        println!();
    }

    let crawled = stats
        .pages_by_status
        .get(&CrawlStatus::Crawled)
        .copied()
        .unwrap_or(0);
    println!(
        "Success Rate: {:.1}% ({} / {} pages crawled)",
        percentage(crawled, stats.total_pages),
        crawled,
        stats.total_pages
    );
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
