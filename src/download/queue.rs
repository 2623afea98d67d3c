//! Bounded download queue and worker pool
//!
//! Jobs go through a bounded channel to a fixed number of workers that share
//! the receiver. The pool is independent of the page-fetch batch size, so a
//! backlog of documents never blocks page discovery.

use crate::crawler::{FetchError, FetchService};
use crate::download::retry::RetryPolicy;
use crate::download::store::{sha256_hex, FileStore};
use crate::download::DownloadError;
use crate::state::DownloadStatus;
use crate::storage::{CompletedFile, NewFile, SharedStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A file accepted by the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    pub extension: String,
    pub source_page: String,
}

/// Progress notifications sent back to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Completed {
        url: String,
        size: u64,
        deduplicated: bool,
    },
    Retrying {
        url: String,
        attempt: u32,
        reason: String,
    },
    Failed {
        url: String,
        reason: String,
        message: String,
    },
    /// The site graph store failed; the session must halt
    StorageFailed { url: String, message: String },
}

/// Result of offering a file to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New file, queued for download
    Queued,
    /// The URL was already registered for this session
    AlreadyKnown,
    /// New file, but the queue was full; recorded as FAILED
    Rejected,
}

/// Everything a worker needs, shared between workers
pub struct DownloadContext {
    pub session_id: String,
    pub storage: SharedStorage,
    pub fetcher: Arc<dyn FetchService>,
    pub store: FileStore,
    pub policy: RetryPolicy,
    pub timeout: Duration,
}

pub struct DownloadQueue {
    sender: Option<mpsc::Sender<DownloadJob>>,
    workers: Vec<JoinHandle<()>>,
    outstanding: Arc<AtomicUsize>,
    context: Arc<DownloadContext>,
    cancel: CancellationToken,
}

impl DownloadQueue {
    /// Spawns `concurrency` workers reading from a queue of `capacity` jobs
    pub fn start(
        context: DownloadContext,
        concurrency: usize,
        capacity: usize,
        events: mpsc::UnboundedSender<DownloadEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(context);

        let workers = (0..concurrency.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    context: Arc::clone(&context),
                    receiver: Arc::clone(&receiver),
                    events: events.clone(),
                    outstanding: Arc::clone(&outstanding),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            outstanding,
            context,
            cancel,
        }
    }

    /// Registers the file and queues it unless the URL was seen before
    pub fn submit(&self, job: DownloadJob) -> Result<SubmitOutcome, DownloadError> {
        let ctx = &self.context;
        let created = ctx.storage.insert_file(
            &ctx.session_id,
            &NewFile {
                url: job.url.clone(),
                extension: job.extension.clone(),
                source_page: job.source_page.clone(),
            },
        )?;
        if !created {
            debug!("File already known: {}", job.url);
            return Ok(SubmitOutcome::AlreadyKnown);
        }
        self.push(job)
    }

    /// Queues a file that is already registered but never finished
    pub fn requeue(&self, job: DownloadJob) -> Result<SubmitOutcome, DownloadError> {
        let ctx = &self.context;
        ctx.storage
            .update_file_status(&ctx.session_id, &job.url, DownloadStatus::Pending, None)?;
        self.push(job)
    }

    fn push(&self, job: DownloadJob) -> Result<SubmitOutcome, DownloadError> {
        let Some(sender) = &self.sender else {
            return self.reject(&job.url, DownloadError::Cancelled);
        };

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => Ok(SubmitOutcome::Queued),
            Err(TrySendError::Full(job)) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                warn!("Download queue full, dropping {}", job.url);
                self.reject(&job.url, DownloadError::QueueFull)
            }
            Err(TrySendError::Closed(job)) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                self.reject(&job.url, DownloadError::Cancelled)
            }
        }
    }

    fn reject(&self, url: &str, error: DownloadError) -> Result<SubmitOutcome, DownloadError> {
        let ctx = &self.context;
        ctx.storage.update_file_status(
            &ctx.session_id,
            url,
            DownloadStatus::Failed,
            Some(error.reason_code()),
        )?;
        ctx.storage
            .record_error(&ctx.session_id, url, "download", &error.to_string())?;
        Ok(SubmitOutcome::Rejected)
    }

    /// Jobs queued or being worked on
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs and waits for the workers
    ///
    /// With `cancel` set, in-flight downloads are abandoned and every file not
    /// yet finished is marked FAILED with reason `cancelled`. Otherwise the
    /// workers drain the queue first.
    pub async fn shutdown(mut self, cancel: bool) -> Result<(), DownloadError> {
        self.sender.take();
        if cancel {
            self.cancel.cancel();
        }

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("Download worker ended abnormally: {}", e);
            }
        }

        let ctx = &self.context;
        let failed = ctx.storage.fail_unfinished_files(
            &ctx.session_id,
            DownloadError::Cancelled.reason_code(),
        )?;
        if failed > 0 {
            info!("Marked {} unfinished downloads as cancelled", failed);
        }
        Ok(())
    }
}

struct Worker {
    id: usize,
    context: Arc<DownloadContext>,
    receiver: Arc<Mutex<mpsc::Receiver<DownloadJob>>>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!("Download worker {} started", self.id);
        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    job = receiver.recv() => job,
                }
            };
            let Some(job) = job else {
                break;
            };

            self.process(&job).await;
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("Download worker {} stopped", self.id);
    }

    async fn process(&self, job: &DownloadJob) {
        let ctx = &self.context;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if let Err(e) = ctx.storage.update_file_status(
                &ctx.session_id,
                &job.url,
                DownloadStatus::Downloading,
                None,
            ) {
                self.send(DownloadEvent::StorageFailed {
                    url: job.url.clone(),
                    message: e.to_string(),
                });
                return;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
                result = self.attempt(job) => result,
            };

            let error = match result {
                Ok(event) => {
                    self.send(event);
                    return;
                }
                Err(error) => error,
            };

            if let DownloadError::Storage(e) = &error {
                self.send(DownloadEvent::StorageFailed {
                    url: job.url.clone(),
                    message: e.to_string(),
                });
                return;
            }

            if error.is_retryable() && ctx.policy.should_retry(attempt) {
                let delay = ctx.policy.delay_for(attempt);
                warn!(
                    "Download attempt {} for {} failed ({}), retrying in {:?}",
                    attempt, job.url, error, delay
                );
                self.send(DownloadEvent::Retrying {
                    url: job.url.clone(),
                    attempt,
                    reason: error.reason_code().to_string(),
                });

                let cancelled = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if !cancelled {
                    continue;
                }
                self.fail(job, &DownloadError::Cancelled);
                return;
            }

            self.fail(job, &error);
            return;
        }
    }

    /// One download attempt: fetch, verify, dedupe by checksum, store
    async fn attempt(&self, job: &DownloadJob) -> Result<DownloadEvent, DownloadError> {
        let ctx = &self.context;

        let fetched = match tokio::time::timeout(ctx.timeout, ctx.fetcher.fetch_bytes(&job.url)).await {
            Ok(result) => result?,
            Err(_) => return Err(DownloadError::Fetch(FetchError::Timeout)),
        };

        let actual = fetched.bytes.len() as u64;
        if let Some(expected) = fetched.content_length {
            if expected != actual {
                return Err(DownloadError::SizeMismatch { expected, actual });
            }
        }

        let checksum = sha256_hex(&fetched.bytes);
        if let Some(expected) = fetched.etag.as_deref().and_then(strong_digest_etag) {
            if expected != checksum {
                return Err(DownloadError::ChecksumMismatch {
                    expected,
                    actual: checksum,
                });
            }
        }

        let _guard = ctx.store.dedup_guard().await;

        if let Some(existing) = ctx
            .storage
            .find_completed_by_checksum(&ctx.session_id, &checksum)?
        {
            debug!("{} duplicates {}", job.url, existing.url);
            ctx.storage.complete_file(
                &ctx.session_id,
                &job.url,
                &CompletedFile {
                    filename: existing.filename.unwrap_or_default(),
                    size: actual,
                    checksum,
                    local_path: existing.local_path.unwrap_or_default(),
                    content_type: fetched.content_type,
                },
            )?;
            return Ok(DownloadEvent::Completed {
                url: job.url.clone(),
                size: actual,
                deduplicated: true,
            });
        }

        let stored = ctx.store.write(&job.url, &job.extension, &fetched.bytes).await?;
        ctx.storage.complete_file(
            &ctx.session_id,
            &job.url,
            &CompletedFile {
                filename: stored.filename,
                size: actual,
                checksum,
                local_path: stored.path.to_string_lossy().into_owned(),
                content_type: fetched.content_type,
            },
        )?;
        info!("Downloaded {} ({} bytes)", job.url, actual);

        Ok(DownloadEvent::Completed {
            url: job.url.clone(),
            size: actual,
            deduplicated: false,
        })
    }

    fn fail(&self, job: &DownloadJob, error: &DownloadError) {
        let ctx = &self.context;
        warn!("Download of {} failed: {}", job.url, error);

        let stored = ctx
            .storage
            .update_file_status(
                &ctx.session_id,
                &job.url,
                DownloadStatus::Failed,
                Some(error.reason_code()),
            )
            .and_then(|_| {
                ctx.storage
                    .record_error(&ctx.session_id, &job.url, "download", &error.to_string())
            });

        match stored {
            Ok(()) => self.send(DownloadEvent::Failed {
                url: job.url.clone(),
                reason: error.reason_code().to_string(),
                message: error.to_string(),
            }),
            Err(e) => self.send(DownloadEvent::StorageFailed {
                url: job.url.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn send(&self, event: DownloadEvent) {
        // The orchestrator may already be gone during shutdown
        let _ = self.events.send(event);
    }
}

/// Extracts a SHA-256 digest from a strong ETag, if it is one
///
/// Weak ETags and opaque values are ignored.
pub fn strong_digest_etag(etag: &str) -> Option<String> {
    let etag = etag.trim();
    if etag.starts_with("W/") {
        return None;
    }
    let value = etag.trim_matches('"');
    if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(value.to_ascii_lowercase())
    } else {
        None
    }
}
