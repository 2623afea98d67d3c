//! Crawler module: the crawl orchestration engine
//!
//! This module contains the core crawling logic, including:
//! - The fetch service seam, its HTTP implementation and link extraction
//! - The breadth-first frontier and the dead-end detector
//! - The session-scoped view over the site graph
//! - The coordinator loop and the session API on top of it

mod coordinator;
mod detector;
mod fetcher;
mod frontier;
mod graph;
mod parser;
mod session;

pub use coordinator::{Coordinator, SessionControl, SessionOutcome};
pub use detector::{DeadEndDetector, DetectorConfig, DetectorState, PageSignal};
pub use fetcher::{
    build_http_client, is_html, FetchError, FetchService, FetchedFile, FetchedPage, HttpFetcher,
    USER_AGENT,
};
pub use frontier::{EnqueueOutcome, Frontier, FrontierEntry, NodeLookup, RejectReason};
pub use graph::SessionGraph;
pub use parser::{extract_links, RawLink};
pub use session::{CrawlEngine, SessionReport};
