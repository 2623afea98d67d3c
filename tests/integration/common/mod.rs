//! Shared helpers: an in-memory site served through `FetchService`

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use trawler::config::CrawlConfig;
use trawler::crawler::{CrawlEngine, FetchError, FetchService, FetchedFile, FetchedPage, RawLink};
use trawler::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use trawler::storage::{
    CompletedFile, DiscoveryResult, ErrorRecord, FileMetadata, GraphStats, Link, NewFile,
    SessionRecord, SharedStorage, SiteGraph, SqliteStorage, Storage, StorageError, StorageResult,
    UrlNode,
};

pub const ROOT: &str = "https://site.test/";

pub fn url(path: &str) -> String {
    format!("https://site.test{}", path)
}

/// A scripted site: HTML pages with links, documents, and failures
#[derive(Default)]
pub struct MockSite {
    pages: HashMap<String, Result<FetchedPage, FetchError>>,
    files: HashMap<String, Vec<Result<FetchedFile, FetchError>>>,
    delay: Option<Duration>,
    file_delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
    file_attempts: Mutex<HashMap<String, usize>>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// An HTML page linking to `links` (hrefs as written in the page)
    pub fn page(mut self, path: &str, links: &[&str]) -> Self {
        let links = links
            .iter()
            .map(|href| RawLink {
                href: href.to_string(),
                anchor_text: format!("link to {}", href),
            })
            .collect();
        self.pages.insert(
            url(path),
            Ok(FetchedPage {
                status_code: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: String::new(),
                links,
            }),
        );
        self
    }

    pub fn failing_page(mut self, path: &str, error: FetchError) -> Self {
        self.pages.insert(url(path), Err(error));
        self
    }

    /// A page URL whose response turns out to be a document
    pub fn document_page(mut self, path: &str, content_type: &str) -> Self {
        self.pages.insert(
            url(path),
            Ok(FetchedPage {
                status_code: 200,
                content_type: Some(content_type.to_string()),
                body: String::new(),
                links: Vec::new(),
            }),
        );
        self
    }

    pub fn file(self, path: &str, bytes: &[u8]) -> Self {
        self.file_responses(path, vec![Ok(file_bytes(bytes))])
    }

    /// Responses returned in order; the last one repeats
    pub fn file_responses(mut self, path: &str, responses: Vec<Result<FetchedFile, FetchError>>) -> Self {
        self.files.insert(url(path), responses);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Slows every `fetch_bytes` call
    pub fn with_file_delay(mut self, delay: Duration) -> Self {
        self.file_delay = Some(delay);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn file_attempts(&self, path: &str) -> usize {
        self.file_attempts
            .lock()
            .unwrap()
            .get(&url(path))
            .copied()
            .unwrap_or(0)
    }
}

pub fn file_bytes(bytes: &[u8]) -> FetchedFile {
    FetchedFile {
        status_code: 200,
        content_type: Some("application/octet-stream".to_string()),
        bytes: bytes.to_vec(),
        content_length: Some(bytes.len() as u64),
        etag: None,
    }
}

#[async_trait]
impl FetchService for MockSite {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status { code: 404 }))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<FetchedFile, FetchError> {
        let attempt = {
            let mut attempts = self.file_attempts.lock().unwrap();
            let n = attempts.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some(delay) = self.file_delay {
            tokio::time::sleep(delay).await;
        }
        match self.files.get(url) {
            Some(responses) if !responses.is_empty() => {
                responses[(attempt - 1).min(responses.len() - 1)].clone()
            }
            _ => Err(FetchError::Status { code: 404 }),
        }
    }
}

/// Defaults tuned for fast tests
pub fn test_config(dir: &TempDir) -> CrawlConfig {
    CrawlConfig {
        download_directory: dir.path().join("downloads"),
        download_backoff_base_ms: 1,
        download_backoff_max_ms: 5,
        ..CrawlConfig::default()
    }
}

pub fn memory_storage() -> SharedStorage {
    Arc::new(SqliteStorage::new_in_memory().unwrap())
}

pub fn engine(site: &Arc<MockSite>) -> CrawlEngine {
    let fetcher: Arc<dyn FetchService> = site.clone();
    CrawlEngine::new(memory_storage(), fetcher)
}

/// Which write `BrokenStorage` refuses
#[derive(Debug, Clone)]
pub enum BrokenWrite {
    /// `mark_fetched` for this URL
    MarkFetched(String),
    /// Every `complete_file`
    CompleteFile,
}

/// SQLite storage with one write that always fails
pub struct BrokenStorage {
    inner: SqliteStorage,
    broken: BrokenWrite,
}

impl BrokenStorage {
    pub fn new(broken: BrokenWrite) -> Self {
        Self {
            inner: SqliteStorage::new_in_memory().unwrap(),
            broken,
        }
    }

    fn disk_full() -> StorageError {
        StorageError::Io(std::io::Error::other("disk full"))
    }
}

impl Storage for BrokenStorage {
    fn create_session(&self, session: &SessionRecord) -> StorageResult<()> {
        self.inner.create_session(session)
    }

    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        self.inner.get_session(session_id)
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        self.inner.list_sessions()
    }

    fn update_session_status(&self, session_id: &str, status: SessionStatus) -> StorageResult<()> {
        self.inner.update_session_status(session_id, status)
    }

    fn save_snapshot(&self, session_id: &str, snapshot_json: &str) -> StorageResult<()> {
        self.inner.save_snapshot(session_id, snapshot_json)
    }

    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        halt_reason: Option<HaltReason>,
        snapshot_json: &str,
    ) -> StorageResult<()> {
        self.inner
            .finish_session(session_id, status, halt_reason, snapshot_json)
    }

    fn upsert_node_and_edges(
        &self,
        session_id: &str,
        url: &str,
        parent_url: Option<&str>,
        links: &[Link],
    ) -> StorageResult<DiscoveryResult> {
        self.inner
            .upsert_node_and_edges(session_id, url, parent_url, links)
    }

    fn mark_fetched(
        &self,
        session_id: &str,
        url: &str,
        status_code: Option<u16>,
        content_type: Option<&str>,
        crawl_status: CrawlStatus,
    ) -> StorageResult<()> {
        if matches!(&self.broken, BrokenWrite::MarkFetched(broken) if broken == url) {
            return Err(Self::disk_full());
        }
        self.inner
            .mark_fetched(session_id, url, status_code, content_type, crawl_status)
    }

    fn get_node(&self, session_id: &str, url: &str) -> StorageResult<Option<UrlNode>> {
        self.inner.get_node(session_id, url)
    }

    fn nodes_by_status(&self, session_id: &str, status: CrawlStatus) -> StorageResult<Vec<UrlNode>> {
        self.inner.nodes_by_status(session_id, status)
    }

    fn graph_stats(&self, session_id: &str) -> StorageResult<GraphStats> {
        self.inner.graph_stats(session_id)
    }

    fn export_graph(&self, session_id: &str) -> StorageResult<SiteGraph> {
        self.inner.export_graph(session_id)
    }

    fn insert_file(&self, session_id: &str, file: &NewFile) -> StorageResult<bool> {
        self.inner.insert_file(session_id, file)
    }

    fn get_file(&self, session_id: &str, url: &str) -> StorageResult<Option<FileMetadata>> {
        self.inner.get_file(session_id, url)
    }

    fn update_file_status(
        &self,
        session_id: &str,
        url: &str,
        status: DownloadStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        self.inner.update_file_status(session_id, url, status, reason)
    }

    fn complete_file(&self, session_id: &str, url: &str, file: &CompletedFile) -> StorageResult<()> {
        if matches!(self.broken, BrokenWrite::CompleteFile) {
            return Err(Self::disk_full());
        }
        self.inner.complete_file(session_id, url, file)
    }

    fn find_completed_by_checksum(
        &self,
        session_id: &str,
        checksum: &str,
    ) -> StorageResult<Option<FileMetadata>> {
        self.inner.find_completed_by_checksum(session_id, checksum)
    }

    fn fail_unfinished_files(&self, session_id: &str, reason: &str) -> StorageResult<usize> {
        self.inner.fail_unfinished_files(session_id, reason)
    }

    fn list_files(&self, session_id: &str) -> StorageResult<Vec<FileMetadata>> {
        self.inner.list_files(session_id)
    }

    fn record_error(&self, session_id: &str, url: &str, kind: &str, message: &str) -> StorageResult<()> {
        self.inner.record_error(session_id, url, kind, message)
    }

    fn list_errors(&self, session_id: &str, limit: usize) -> StorageResult<Vec<ErrorRecord>> {
        self.inner.list_errors(session_id, limit)
    }

    fn count_errors(&self, session_id: &str) -> StorageResult<u64> {
        self.inner.count_errors(session_id)
    }
}
