//! Output module for crawl progress and statistics
//!
//! This module handles:
//! - The ordered event stream emitted by the coordinator
//! - Folding events into progress snapshots for the session API
//! - Printing per-session statistics for the CLI

mod events;
mod progress;
pub mod stats;

pub use events::CrawlEvent;
pub use progress::{LoopGauges, ProgressReporter, ProgressSnapshot, MAX_RECENT_ERRORS};
pub use stats::{load_statistics, print_statistics, SessionStatistics};
