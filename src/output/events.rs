//! Ordered stream of things that happened during a crawl
//!
//! The orchestrator emits one event per fact, in processing order. Consumers
//! (the dead-end detector and the progress reporter) read them synchronously,
//! so a given sequence of fetch results always produces the same state.

use crate::crawler::PageSignal;
use crate::download::DownloadEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    /// Nodes that entered the graph (the root, or links from a page)
    NodesDiscovered { count: usize },

    /// A URL was handed to the fetch service
    PageDispatched { url: String, depth: u32 },

    /// A frontier URL was fetched and recorded
    PageCrawled {
        url: String,
        depth: u32,
        new_node_count: usize,
        was_revisit: bool,
    },

    /// A frontier URL could not be fetched
    PageFailed {
        url: String,
        depth: u32,
        kind: String,
        message: String,
    },

    /// A file URL was registered for download for the first time
    FileFound { url: String },

    Download(DownloadEvent),
}

impl CrawlEvent {
    /// The dead-end signal carried by this event, for page outcomes only
    pub fn page_signal(&self) -> Option<PageSignal> {
        match self {
            Self::PageCrawled {
                new_node_count,
                was_revisit,
                ..
            } => Some(PageSignal {
                new_node_count: *new_node_count,
                was_revisit: *was_revisit,
                fetch_failed: false,
            }),
            Self::PageFailed { .. } => Some(PageSignal::failed()),
            _ => None,
        }
    }
}

impl From<DownloadEvent> for CrawlEvent {
    fn from(event: DownloadEvent) -> Self {
        Self::Download(event)
    }
}
