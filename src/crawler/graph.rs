//! Session-scoped view over the site graph store

use crate::crawler::frontier::NodeLookup;
use crate::state::CrawlStatus;
use crate::storage::{
    DiscoveryResult, GraphStats, Link, SharedStorage, SiteGraph, StorageResult, UrlNode,
};

/// The part of the shared store that belongs to one session
#[derive(Clone)]
pub struct SessionGraph {
    storage: SharedStorage,
    session_id: String,
}

impl SessionGraph {
    pub fn new(storage: SharedStorage, session_id: impl Into<String>) -> Self {
        Self {
            storage,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn upsert_node_and_edges(
        &self,
        url: &str,
        parent_url: Option<&str>,
        links: &[Link],
    ) -> StorageResult<DiscoveryResult> {
        self.storage
            .upsert_node_and_edges(&self.session_id, url, parent_url, links)
    }

    pub fn mark_fetched(
        &self,
        url: &str,
        status_code: Option<u16>,
        content_type: Option<&str>,
        crawl_status: CrawlStatus,
    ) -> StorageResult<()> {
        self.storage
            .mark_fetched(&self.session_id, url, status_code, content_type, crawl_status)
    }

    pub fn get_node(&self, url: &str) -> StorageResult<Option<UrlNode>> {
        self.storage.get_node(&self.session_id, url)
    }

    pub fn pending_nodes(&self) -> StorageResult<Vec<UrlNode>> {
        self.storage
            .nodes_by_status(&self.session_id, CrawlStatus::Pending)
    }

    pub fn stats(&self) -> StorageResult<GraphStats> {
        self.storage.graph_stats(&self.session_id)
    }

    pub fn export(&self) -> StorageResult<SiteGraph> {
        self.storage.export_graph(&self.session_id)
    }
}

impl NodeLookup for SessionGraph {
    fn node_status(&self, url: &str) -> StorageResult<Option<CrawlStatus>> {
        Ok(self.get_node(url)?.map(|node| node.crawl_status))
    }
}
