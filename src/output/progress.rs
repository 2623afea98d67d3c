//! Progress counters and snapshots
//!
//! `ProgressReporter` folds the crawl event stream into counters and
//! publishes a `ProgressSnapshot` on a watch channel after every loop
//! iteration. Snapshots are also what gets archived on the session row.

use crate::crawler::DetectorState;
use crate::download::DownloadEvent;
use crate::output::CrawlEvent;
use crate::storage::ErrorRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Number of recent errors kept in a snapshot
pub const MAX_RECENT_ERRORS: usize = 100;

/// Point-in-time view of a session's progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSnapshot {
    pub pages_discovered: u64,
    pub pages_crawled: u64,
    pub pages_failed: u64,
    pub documents_found: u64,
    pub documents_downloaded: u64,
    pub documents_failed: u64,
    pub current_page: Option<String>,
    pub current_depth: u32,
    pub max_depth_reached: u32,
    pub elapsed_seconds: f64,
    pub pages_per_second: f64,
    pub frontier_size: usize,
    pub dropped_overflow: u64,
    pub downloads_outstanding: usize,
    pub detector_state: DetectorState,
    pub consecutive_dead_pages: u32,
    pub revisit_ratio: f64,
    /// Most recent errors, oldest first
    pub errors: Vec<ErrorRecord>,
}

impl ProgressSnapshot {
    pub fn pages_processed(&self) -> u64 {
        self.pages_crawled + self.pages_failed
    }
}

/// Values owned by the orchestrator rather than derived from events
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopGauges {
    pub frontier_size: usize,
    pub dropped_overflow: u64,
    pub downloads_outstanding: usize,
    pub detector_state: DetectorState,
    pub consecutive_dead_pages: u32,
    pub revisit_ratio: f64,
}

pub struct ProgressReporter {
    counters: ProgressSnapshot,
    errors: VecDeque<ErrorRecord>,
    started: Instant,
    elapsed_before: Duration,
    publisher: watch::Sender<ProgressSnapshot>,
}

impl ProgressReporter {
    pub fn new() -> (Self, watch::Receiver<ProgressSnapshot>) {
        Self::resume_from(ProgressSnapshot::default())
    }

    /// Continues counting from an archived snapshot
    pub fn resume_from(prior: ProgressSnapshot) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (publisher, receiver) = watch::channel(prior.clone());
        let elapsed_before = Duration::from_secs_f64(prior.elapsed_seconds.max(0.0));
        let errors = prior.errors.iter().cloned().collect();
        let reporter = Self {
            counters: ProgressSnapshot {
                errors: Vec::new(),
                ..prior
            },
            errors,
            started: Instant::now(),
            elapsed_before,
            publisher,
        };
        (reporter, receiver)
    }

    /// Applies one event to the counters
    pub fn record(&mut self, event: &CrawlEvent) {
        let c = &mut self.counters;
        match event {
            CrawlEvent::NodesDiscovered { count } => c.pages_discovered += *count as u64,
            CrawlEvent::PageDispatched { url, depth } => {
                c.current_page = Some(url.clone());
                c.current_depth = *depth;
            }
            CrawlEvent::PageCrawled { depth, .. } => {
                c.pages_crawled += 1;
                c.max_depth_reached = c.max_depth_reached.max(*depth);
            }
            CrawlEvent::PageFailed {
                url, kind, message, ..
            } => {
                c.pages_failed += 1;
                self.push_error(url, kind, message);
            }
            CrawlEvent::FileFound { .. } => c.documents_found += 1,
            CrawlEvent::Download(DownloadEvent::Completed { .. }) => c.documents_downloaded += 1,
            CrawlEvent::Download(DownloadEvent::Failed { url, message, .. }) => {
                c.documents_failed += 1;
                self.push_error(url, "download", message);
            }
            CrawlEvent::Download(DownloadEvent::StorageFailed { url, message }) => {
                self.push_error(url, "storage", message);
            }
            CrawlEvent::Download(DownloadEvent::Retrying { .. }) => {}
        }
    }

    fn push_error(&mut self, url: &str, kind: &str, message: &str) {
        if self.errors.len() == MAX_RECENT_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorRecord {
            url: url.to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            occurred_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// Pages crawled or failed, including those before a resume
    pub fn pages_processed(&self) -> u64 {
        self.counters.pages_processed()
    }

    /// Wall-clock time spent running, including time before a resume
    pub fn elapsed(&self) -> Duration {
        self.elapsed_before + self.started.elapsed()
    }

    /// Excludes time spent paused from the elapsed clock
    pub fn suspend_clock(&mut self) {
        self.elapsed_before = self.elapsed();
    }

    pub fn resume_clock(&mut self) {
        self.started = Instant::now();
    }

    pub fn snapshot(&self, gauges: &LoopGauges) -> ProgressSnapshot {
        let elapsed = self.elapsed().as_secs_f64();
        let pages_per_second = if elapsed > 0.0 {
            self.pages_processed() as f64 / elapsed
        } else {
            0.0
        };

        ProgressSnapshot {
            elapsed_seconds: elapsed,
            pages_per_second,
            frontier_size: gauges.frontier_size,
            dropped_overflow: gauges.dropped_overflow,
            downloads_outstanding: gauges.downloads_outstanding,
            detector_state: gauges.detector_state,
            consecutive_dead_pages: gauges.consecutive_dead_pages,
            revisit_ratio: gauges.revisit_ratio,
            errors: self.errors.iter().cloned().collect(),
            ..self.counters.clone()
        }
    }

    /// Builds a snapshot and makes it visible to watchers
    pub fn publish(&self, gauges: &LoopGauges) -> ProgressSnapshot {
        let snapshot = self.snapshot(gauges);
        self.publisher.send_replace(snapshot.clone());
        snapshot
    }
}
