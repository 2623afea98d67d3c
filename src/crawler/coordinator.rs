//! Crawl coordinator - the orchestration loop of one session
//!
//! Each iteration drains download progress, checks the halt conditions,
//! dequeues a batch from the frontier, fetches it concurrently and records
//! every result in order:
//! - outbound links are normalized, scoped and split into pages and files
//! - pages go through the site graph into the frontier
//! - files go to the download queue
//! - the per-page discovery signal feeds the dead-end detector
//!
//! A storage failure anywhere halts the session as FAILED.

use crate::config::CrawlConfig;
use crate::crawler::detector::{DeadEndDetector, DetectorConfig};
use crate::crawler::fetcher::{FetchError, FetchService, FetchedPage};
use crate::crawler::frontier::{EnqueueOutcome, Frontier, FrontierEntry};
use crate::crawler::graph::SessionGraph;
use crate::download::{
    Classification, DownloadContext, DownloadError, DownloadEvent, DownloadJob, DownloadQueue,
    FileClassifier, FileStore, RetryPolicy, SubmitOutcome,
};
use crate::output::{CrawlEvent, LoopGauges, ProgressReporter, ProgressSnapshot};
use crate::state::{CrawlStatus, HaltReason, SessionStatus};
use crate::storage::{FileMetadata, Link, StorageError, StorageResult};
use crate::url::{crawl_scope, normalize, UrlPredicate};
use futures::future::join_all;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Pages processed between progress log lines and snapshot saves
const PROGRESS_INTERVAL: u64 = 50;

/// How long to wait for download progress when only downloads are left
const DOWNLOAD_POLL: Duration = Duration::from_millis(50);

/// Signals from the session API to a running coordinator
#[derive(Clone)]
pub struct SessionControl {
    pub cancel: CancellationToken,
    pub paused: watch::Receiver<bool>,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub halt_reason: HaltReason,
    pub progress: ProgressSnapshot,
}

/// Main crawl coordinator for one session
pub struct Coordinator {
    config: CrawlConfig,
    graph: SessionGraph,
    fetcher: Arc<dyn FetchService>,
    scope: UrlPredicate,
    frontier: Frontier,
    detector: DeadEndDetector,
    classifier: FileClassifier,
    downloads: Option<DownloadQueue>,
    download_events: mpsc::UnboundedReceiver<DownloadEvent>,
    fetch_policy: RetryPolicy,
    reporter: ProgressReporter,
    control: SessionControl,
    storage_failed: bool,
    last_saved: u64,
}

impl Coordinator {
    /// Creates a coordinator and starts its download workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        graph: SessionGraph,
        root: &Url,
        config: CrawlConfig,
        fetcher: Arc<dyn FetchService>,
        reporter: ProgressReporter,
        control: SessionControl,
    ) -> Self {
        let scope = crawl_scope(root, &config.allowed_domains);
        let frontier = Frontier::new(
            Arc::clone(&scope),
            config.max_depth,
            config.max_frontier_size,
        );
        let detector = DeadEndDetector::new(DetectorConfig::from(&config));
        let classifier = FileClassifier::new(config.file_extensions.as_slice());

        let (events_tx, download_events) = mpsc::unbounded_channel();
        let downloads = config.download_enabled.then(|| {
            let context = DownloadContext {
                session_id: graph.session_id().to_string(),
                storage: Arc::clone(graph.storage()),
                fetcher: Arc::clone(&fetcher),
                store: FileStore::new(Path::new(&config.download_directory), graph.session_id()),
                policy: RetryPolicy::for_downloads(&config),
                timeout: config.fetch_timeout(),
            };
            DownloadQueue::start(
                context,
                config.download_concurrency,
                config.download_queue_size,
                events_tx,
                control.cancel.child_token(),
            )
        });

        Self {
            fetch_policy: RetryPolicy::for_fetches(&config),
            config,
            graph,
            fetcher,
            scope,
            frontier,
            detector,
            classifier,
            downloads,
            download_events,
            reporter,
            control,
            storage_failed: false,
            last_saved: 0,
        }
    }

    /// Offers URLs to the frontier, returns how many were accepted
    pub fn seed(&mut self, entries: Vec<FrontierEntry>) -> StorageResult<usize> {
        let mut accepted = 0;
        for entry in entries {
            if self.frontier.enqueue(entry, &self.graph)? == EnqueueOutcome::Accepted {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Puts files that never reached a terminal status back on the queue
    pub fn requeue_files(&mut self, files: Vec<FileMetadata>) -> StorageResult<usize> {
        let Some(downloads) = &self.downloads else {
            return Ok(0);
        };

        let mut queued = 0;
        for file in files.into_iter().filter(|f| !f.download_status.is_terminal()) {
            let job = DownloadJob {
                url: file.url,
                extension: file.extension,
                source_page: file.source_page,
            };
            match downloads.requeue(job) {
                Ok(SubmitOutcome::Queued) => queued += 1,
                Ok(_) => {}
                Err(DownloadError::Storage(e)) => return Err(e),
                Err(e) => tracing::warn!("Could not requeue download: {}", e),
            }
        }
        Ok(queued)
    }

    /// Runs the crawl loop until a halt condition, then archives the session
    pub async fn run(mut self) -> SessionOutcome {
        tracing::info!(
            "Starting crawl session {} ({} URLs in frontier)",
            self.graph.session_id(),
            self.frontier.len()
        );

        let reason = match self.crawl_loop().await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!("Storage failure in session {}: {}", self.graph.session_id(), e);
                HaltReason::StorageFailure
            }
        };

        self.finish(reason).await
    }

    async fn crawl_loop(&mut self) -> StorageResult<HaltReason> {
        loop {
            self.drain_download_events();

            if self.control.cancel.is_cancelled() {
                return Ok(HaltReason::StopSignal);
            }

            if *self.control.paused.borrow() {
                if self.wait_while_paused().await? {
                    return Ok(HaltReason::StopSignal);
                }
                continue;
            }

            if let Some(reason) = self.check_limits() {
                return Ok(reason);
            }

            if self.frontier.is_empty() {
                if self.downloads_outstanding() > 0 {
                    self.wait_for_downloads().await;
                    continue;
                }
                return Ok(if self.frontier.rejected_depth() > 0 {
                    HaltReason::MaxDepthReached
                } else {
                    HaltReason::FrontierExhausted
                });
            }

            let remaining = self
                .config
                .max_pages
                .saturating_sub(self.reporter.pages_processed());
            let batch_size = self
                .config
                .max_concurrent_fetches
                .min(usize::try_from(remaining).unwrap_or(usize::MAX));
            let batch = self.frontier.dequeue_batch(batch_size);
            for entry in &batch {
                tracing::debug!("Fetching {} (depth {})", entry.url, entry.depth);
                self.emit(CrawlEvent::PageDispatched {
                    url: entry.url.clone(),
                    depth: entry.depth,
                });
            }

            let results = {
                let timeout = self.config.fetch_timeout();
                let fetches = batch.iter().map(|entry| {
                    fetch_page(self.fetcher.as_ref(), &entry.url, timeout, &self.fetch_policy)
                });
                tokio::select! {
                    biased;
                    _ = self.control.cancel.cancelled() => None,
                    results = join_all(fetches) => Some(results),
                }
            };

            let Some(results) = results else {
                // Abandoned fetches wrote nothing; their nodes stay PENDING
                for entry in &batch {
                    self.frontier.release(&entry.url);
                }
                return Ok(HaltReason::StopSignal);
            };

            for (entry, result) in batch.into_iter().zip(results) {
                self.process(entry, result)?;
            }

            self.publish();
            self.checkpoint()?;
        }
    }

    fn check_limits(&self) -> Option<HaltReason> {
        if self.storage_failed {
            return Some(HaltReason::StorageFailure);
        }
        if self.detector.is_terminated() {
            return Some(HaltReason::DeadEnd);
        }
        if self.reporter.pages_processed() >= self.config.max_pages {
            return Some(HaltReason::MaxPages);
        }
        if let Some(budget) = self.config.max_duration() {
            if self.reporter.elapsed() >= budget {
                return Some(HaltReason::TimeBudget);
            }
        }
        None
    }

    /// Records one fetch result; the entry leaves the in-flight set afterwards
    fn process(
        &mut self,
        entry: FrontierEntry,
        result: Result<FetchedPage, FetchError>,
    ) -> StorageResult<()> {
        let already_processed = self
            .graph
            .get_node(&entry.url)?
            .is_some_and(|node| node.crawl_status.is_processed());

        let recorded = match result {
            Ok(page) => self.record_page(&entry, page, already_processed),
            Err(error) => self.record_failure(&entry, error),
        };
        self.frontier.release(&entry.url);
        recorded
    }

    fn record_page(
        &mut self,
        entry: &FrontierEntry,
        page: FetchedPage,
        already_processed: bool,
    ) -> StorageResult<()> {
        let base = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => return self.record_failure(entry, FetchError::Network(e.to_string())),
        };
        let content_type = page.content_type.as_deref();

        // A frontier URL that turned out to be a document
        if self.downloads.is_some() {
            if let Classification::DownloadableFile(extension) =
                self.classifier.classify(&base, content_type)
            {
                let discovery =
                    self.graph
                        .upsert_node_and_edges(&entry.url, entry.parent_url.as_deref(), &[])?;
                self.graph.mark_fetched(
                    &entry.url,
                    Some(page.status_code),
                    content_type,
                    CrawlStatus::Crawled,
                )?;
                self.submit_file(DownloadJob {
                    url: entry.url.clone(),
                    extension,
                    source_page: entry.parent_url.clone().unwrap_or_else(|| entry.url.clone()),
                })?;
                self.emit(CrawlEvent::PageCrawled {
                    url: entry.url.clone(),
                    depth: entry.depth,
                    new_node_count: discovery.new_node_count,
                    was_revisit: already_processed,
                });
                return Ok(());
            }
        }

        let mut links = Vec::new();
        let mut files = Vec::new();
        let mut seen_files = HashSet::new();
        for raw in &page.links {
            let url = match normalize(&raw.href, Some(&base), &self.config.tracking_params) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Skipping link {:?} on {}: {}", raw.href, entry.url, e);
                    continue;
                }
            };
            if !(self.scope)(&url) {
                continue;
            }

            match self.classifier.classify(&url, None) {
                Classification::DownloadableFile(extension) => {
                    if self.downloads.is_some() && seen_files.insert(url.to_string()) {
                        files.push(DownloadJob {
                            url: url.into(),
                            extension,
                            source_page: entry.url.clone(),
                        });
                    }
                }
                Classification::Page => links.push(Link::with_anchor(url, raw.anchor_text.as_str())),
            }
        }

        let discovery =
            self.graph
                .upsert_node_and_edges(&entry.url, entry.parent_url.as_deref(), &links)?;
        self.graph.mark_fetched(
            &entry.url,
            Some(page.status_code),
            content_type,
            CrawlStatus::Crawled,
        )?;

        // Every in-scope page link pointed at a node the graph already had
        let was_revisit =
            already_processed || (!links.is_empty() && discovery.new_node_count == 0);

        let discovered = discovery.new_node_count + usize::from(discovery.node_created);
        if discovered > 0 {
            self.emit(CrawlEvent::NodesDiscovered { count: discovered });
        }

        for job in files {
            self.submit_file(job)?;
        }

        for node in &discovery.new_nodes {
            let child = FrontierEntry::new(node.url.clone(), Some(entry.url.clone()), node.depth);
            if let EnqueueOutcome::Rejected(reason) = self.frontier.enqueue(child, &self.graph)? {
                tracing::debug!("Frontier rejected {}: {:?}", node.url, reason);
            }
        }

        tracing::debug!(
            "Crawled {}: {} links, {} new nodes",
            entry.url,
            links.len(),
            discovery.new_node_count
        );
        self.emit(CrawlEvent::PageCrawled {
            url: entry.url.clone(),
            depth: entry.depth,
            new_node_count: discovery.new_node_count,
            was_revisit,
        });
        Ok(())
    }

    fn record_failure(&mut self, entry: &FrontierEntry, error: FetchError) -> StorageResult<()> {
        tracing::warn!("Failed to fetch {}: {}", entry.url, error);

        self.graph
            .mark_fetched(&entry.url, error.status_code(), None, CrawlStatus::Failed)?;
        self.graph.storage().record_error(
            self.graph.session_id(),
            &entry.url,
            error.kind(),
            &error.to_string(),
        )?;

        self.emit(CrawlEvent::PageFailed {
            url: entry.url.clone(),
            depth: entry.depth,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        Ok(())
    }

    fn submit_file(&mut self, job: DownloadJob) -> StorageResult<()> {
        let Some(downloads) = &self.downloads else {
            return Ok(());
        };

        let url = job.url.clone();
        match downloads.submit(job) {
            Ok(SubmitOutcome::AlreadyKnown) => {}
            Ok(SubmitOutcome::Queued) => self.emit(CrawlEvent::FileFound { url }),
            Ok(SubmitOutcome::Rejected) => {
                self.emit(CrawlEvent::FileFound { url: url.clone() });
                self.emit(CrawlEvent::Download(DownloadEvent::Failed {
                    url,
                    reason: DownloadError::QueueFull.reason_code().to_string(),
                    message: DownloadError::QueueFull.to_string(),
                }));
            }
            Err(DownloadError::Storage(e)) => return Err(e),
            Err(e) => tracing::warn!("Could not queue {}: {}", url, e),
        }
        Ok(())
    }

    /// Feeds one event to the detector and the reporter, in that order
    fn emit(&mut self, event: CrawlEvent) {
        if let Some(signal) = event.page_signal() {
            let before = self.detector.state();
            let after = self.detector.observe(signal);
            if before != after {
                tracing::info!(
                    "Dead-end detector {} -> {} ({} consecutive dead pages, revisit ratio {:.2})",
                    before,
                    after,
                    self.detector.consecutive_dead_pages(),
                    self.detector.revisit_ratio()
                );
            }
        }
        self.reporter.record(&event);
    }

    fn handle_download_event(&mut self, event: DownloadEvent) {
        match &event {
            DownloadEvent::StorageFailed { url, message } => {
                tracing::error!("Storage failure while downloading {}: {}", url, message);
                self.storage_failed = true;
            }
            DownloadEvent::Retrying {
                url,
                attempt,
                reason,
            } => tracing::debug!("Download of {} retrying after attempt {} ({})", url, attempt, reason),
            _ => {}
        }
        self.emit(CrawlEvent::Download(event));
    }

    fn drain_download_events(&mut self) {
        while let Ok(event) = self.download_events.try_recv() {
            self.handle_download_event(event);
        }
    }

    fn downloads_outstanding(&self) -> usize {
        self.downloads.as_ref().map_or(0, |d| d.outstanding())
    }

    /// Waits for download progress when nothing is left to fetch
    async fn wait_for_downloads(&mut self) {
        tokio::select! {
            _ = self.control.cancel.cancelled() => {}
            Some(event) = self.download_events.recv() => self.handle_download_event(event),
            _ = tokio::time::sleep(DOWNLOAD_POLL) => {}
        }
        self.publish();
    }

    /// Blocks dispatch until resumed; returns true if stopped while paused
    async fn wait_while_paused(&mut self) -> StorageResult<bool> {
        tracing::info!("Session {} paused", self.graph.session_id());
        self.reporter.suspend_clock();
        self.save_snapshot()?;

        loop {
            tokio::select! {
                _ = self.control.cancel.cancelled() => return Ok(true),
                changed = self.control.paused.changed() => {
                    if changed.is_err() {
                        return Ok(true);
                    }
                    if !*self.control.paused.borrow() {
                        break;
                    }
                }
                Some(event) = self.download_events.recv() => self.handle_download_event(event),
            }
        }

        self.reporter.resume_clock();
        tracing::info!("Session {} resumed", self.graph.session_id());
        Ok(false)
    }

    fn gauges(&self) -> LoopGauges {
        LoopGauges {
            frontier_size: self.frontier.len(),
            dropped_overflow: self.frontier.dropped_overflow(),
            downloads_outstanding: self.downloads_outstanding(),
            detector_state: self.detector.state(),
            consecutive_dead_pages: self.detector.consecutive_dead_pages(),
            revisit_ratio: self.detector.revisit_ratio(),
        }
    }

    fn publish(&self) -> ProgressSnapshot {
        self.reporter.publish(&self.gauges())
    }

    fn save_snapshot(&self) -> StorageResult<ProgressSnapshot> {
        let snapshot = self.publish();
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.graph
            .storage()
            .save_snapshot(self.graph.session_id(), &json)?;
        Ok(snapshot)
    }

    /// Logs progress and persists a snapshot every `PROGRESS_INTERVAL` pages
    fn checkpoint(&mut self) -> StorageResult<()> {
        let processed = self.reporter.pages_processed();
        if processed < self.last_saved + PROGRESS_INTERVAL {
            return Ok(());
        }
        self.last_saved = processed;

        let snapshot = self.save_snapshot()?;
        tracing::info!(
            "Progress: {} pages processed, {} discovered, {} in frontier, {} documents, {:.2} pages/sec",
            processed,
            snapshot.pages_discovered,
            snapshot.frontier_size,
            snapshot.documents_downloaded,
            snapshot.pages_per_second
        );
        Ok(())
    }

    async fn finish(mut self, reason: HaltReason) -> SessionOutcome {
        let session_id = self.graph.session_id().to_string();
        let cancel_downloads = matches!(reason, HaltReason::StopSignal | HaltReason::StorageFailure);

        if let Some(downloads) = self.downloads.take() {
            if !cancel_downloads && downloads.outstanding() > 0 {
                tracing::info!(
                    "Waiting for {} downloads to finish",
                    downloads.outstanding()
                );
            }
            if let Err(e) = downloads.shutdown(cancel_downloads).await {
                tracing::error!("Download shutdown failed for session {}: {}", session_id, e);
                self.storage_failed = true;
            }
        }
        self.drain_download_events();

        let reason = if self.storage_failed {
            HaltReason::StorageFailure
        } else {
            reason
        };
        let status = reason.final_status();
        let snapshot = self.publish();

        let archived = serde_json::to_string(&snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))
            .and_then(|json| {
                self.graph
                    .storage()
                    .finish_session(&session_id, status, Some(reason), &json)
            });
        if let Err(e) = archived {
            tracing::error!("Could not archive session {}: {}", session_id, e);
        }

        tracing::info!(
            "Session {} finished: {} ({}), {} pages crawled, {} failed, {} documents downloaded",
            session_id,
            status,
            reason,
            snapshot.pages_crawled,
            snapshot.pages_failed,
            snapshot.documents_downloaded
        );

        SessionOutcome {
            status,
            halt_reason: reason,
            progress: snapshot,
        }
    }
}

/// Fetches one page, retrying transient failures
async fn fetch_page(
    fetcher: &dyn FetchService,
    url: &str,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<FetchedPage, FetchError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match result {
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "Fetch attempt {} for {} failed ({}), retrying in {:?}",
                    attempt,
                    url,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
