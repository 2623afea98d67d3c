//! Session API: start, observe, pause, resume, stop and export crawls
//!
//! Every session runs its own coordinator task with its own frontier and
//! detector, so several sessions can share one engine and one store.

use crate::config::{hash_crawl_config, validate_crawl_config, CrawlConfig};
use crate::crawler::coordinator::{Coordinator, SessionControl};
use crate::crawler::fetcher::FetchService;
use crate::crawler::frontier::FrontierEntry;
use crate::crawler::graph::SessionGraph;
use crate::output::{CrawlEvent, ProgressReporter, ProgressSnapshot};
use crate::state::{HaltReason, SessionStatus};
use crate::storage::{FileMetadata, SessionRecord, SharedStorage, SiteGraph, StorageError};
use crate::url::{extract_domain, normalize};
use crate::{Result, TrawlerError, UrlError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Status and progress of one session, as returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub start_url: String,
    pub status: SessionStatus,
    pub halt_reason: Option<HaltReason>,
    pub progress: ProgressSnapshot,
}

/// Handle on a coordinator task owned by this engine
struct LiveSession {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    progress: watch::Receiver<ProgressSnapshot>,
    /// Flips to true once the session is archived
    done: watch::Receiver<bool>,
}

impl LiveSession {
    fn is_running(&self) -> bool {
        // A dropped sender means the task died without archiving
        !*self.done.borrow() && self.done.has_changed().is_ok()
    }
}

/// Entry point for callers (CLI, dashboard)
pub struct CrawlEngine {
    storage: SharedStorage,
    fetcher: Arc<dyn FetchService>,
    /// Sessions whose task is still running; a task removes itself when done
    sessions: Arc<Mutex<HashMap<String, LiveSession>>>,
}

impl CrawlEngine {
    pub fn new(storage: SharedStorage, fetcher: Arc<dyn FetchService>) -> Self {
        Self {
            storage,
            fetcher,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Validates the configuration, records the session and starts crawling
    ///
    /// Configuration and start URL errors are returned before anything is
    /// written.
    pub async fn start_session(&self, start_url: &str, config: CrawlConfig) -> Result<String> {
        validate_crawl_config(&config)?;
        let root = normalize(start_url, None, &config.tracking_params)?;
        if extract_domain(&root).is_none() {
            return Err(UrlError::MissingDomain.into());
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.storage.create_session(&SessionRecord {
            id: session_id.clone(),
            start_url: root.to_string(),
            config_json: serde_json::to_string(&config)?,
            config_hash: hash_crawl_config(&config),
            status: SessionStatus::Running,
            halt_reason: None,
            started_at: timestamp.clone(),
            updated_at: timestamp,
            finished_at: None,
            snapshot_json: None,
        })?;

        let graph = SessionGraph::new(Arc::clone(&self.storage), session_id.clone());
        graph.upsert_node_and_edges(root.as_str(), None, &[])?;

        let (mut reporter, progress) = ProgressReporter::new();
        reporter.record(&CrawlEvent::NodesDiscovered { count: 1 });

        let entries = vec![FrontierEntry::new(root.as_str(), None, 0)];
        self.launch(graph, &root, config, reporter, progress, entries, Vec::new())
            .await?;

        tracing::info!("Started session {} at {}", session_id, root);
        Ok(session_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch(
        &self,
        graph: SessionGraph,
        root: &Url,
        config: CrawlConfig,
        reporter: ProgressReporter,
        progress: watch::Receiver<ProgressSnapshot>,
        entries: Vec<FrontierEntry>,
        unfinished_files: Vec<FileMetadata>,
    ) -> Result<()> {
        let session_id = graph.session_id().to_string();
        let cancel = CancellationToken::new();
        let (pause, paused) = watch::channel(false);
        let control = SessionControl {
            cancel: cancel.clone(),
            paused,
        };

        let mut coordinator = Coordinator::new(
            graph,
            root,
            config,
            Arc::clone(&self.fetcher),
            reporter,
            control,
        );
        let seeded = coordinator.seed(entries)?;
        let requeued = coordinator.requeue_files(unfinished_files)?;
        tracing::debug!(
            "Session {}: {} URLs seeded, {} downloads requeued",
            session_id,
            seeded,
            requeued
        );

        let (done_tx, done) = watch::channel(false);
        self.sessions.lock().await.insert(
            session_id.clone(),
            LiveSession {
                cancel,
                pause,
                progress,
                done,
            },
        );

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let outcome = coordinator.run().await;
            tracing::debug!(
                "Session task {} ended: {} ({})",
                session_id,
                outcome.status,
                outcome.halt_reason
            );
            // Archived by now; later lookups read the stored snapshot
            sessions.lock().await.remove(&session_id);
            done_tx.send_replace(true);
        });
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<SessionRecord> {
        match self.storage.get_session(session_id) {
            Ok(session) => Ok(session),
            Err(StorageError::SessionNotFound(_)) => {
                Err(TrawlerError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latest status and progress of a session
    ///
    /// Live sessions report their most recent snapshot; finished or detached
    /// sessions report the archived one.
    pub async fn get_status(&self, session_id: &str) -> Result<SessionReport> {
        let session = self.load_session(session_id)?;

        let live = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .map(|live| live.progress.borrow().clone());

        let progress = match live {
            Some(progress) => progress,
            None => archived_progress(&session)?,
        };

        Ok(SessionReport {
            session_id: session.id,
            start_url: session.start_url,
            status: session.status,
            halt_reason: session.halt_reason,
            progress,
        })
    }

    /// Stops a session; in-flight downloads are cancelled
    ///
    /// Returns once the stop has been signalled; use `wait` to block until
    /// the session is archived.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = self.load_session(session_id)?;
        if session.status.is_finished() {
            return Err(TrawlerError::InvalidSessionState {
                session_id: session.id,
                status: session.status,
            });
        }

        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(live) if live.is_running() => {
                tracing::info!("Stopping session {}", session_id);
                live.cancel.cancel();
            }
            _ => {
                // Paused in an earlier process: nothing is running, archive directly
                let failed = self
                    .storage
                    .fail_unfinished_files(session_id, "cancelled")?;
                tracing::info!(
                    "Stopping detached session {} ({} downloads cancelled)",
                    session_id,
                    failed
                );
                let snapshot = session.snapshot_json.as_deref().unwrap_or("{}");
                self.storage.finish_session(
                    session_id,
                    SessionStatus::Stopped,
                    Some(HaltReason::StopSignal),
                    snapshot,
                )?;
            }
        }
        Ok(())
    }

    /// Stops dispatching new fetches; in-flight work finishes
    pub async fn pause_session(&self, session_id: &str) -> Result<()> {
        let session = self.load_session(session_id)?;
        let sessions = self.sessions.lock().await;
        let live = sessions
            .get(session_id)
            .filter(|live| live.is_running() && session.status == SessionStatus::Running);

        let Some(live) = live else {
            return Err(TrawlerError::InvalidSessionState {
                session_id: session.id,
                status: session.status,
            });
        };

        self.storage
            .update_session_status(session_id, SessionStatus::Paused)?;
        live.pause.send_replace(true);
        tracing::info!("Pausing session {}", session_id);
        Ok(())
    }

    /// Resumes a paused session
    ///
    /// A session paused by this engine continues in place. A session found
    /// paused in storage with no live task is rebuilt from its PENDING nodes.
    pub async fn resume_session(&self, session_id: &str) -> Result<()> {
        let session = self.load_session(session_id)?;
        if session.status != SessionStatus::Paused {
            return Err(TrawlerError::InvalidSessionState {
                session_id: session.id,
                status: session.status,
            });
        }

        {
            let sessions = self.sessions.lock().await;
            if let Some(live) = sessions.get(session_id).filter(|live| live.is_running()) {
                self.storage
                    .update_session_status(session_id, SessionStatus::Running)?;
                live.pause.send_replace(false);
                tracing::info!("Resuming session {}", session_id);
                return Ok(());
            }
        }

        self.rebuild(session).await
    }

    /// Restarts a persisted session from its graph
    async fn rebuild(&self, session: SessionRecord) -> Result<()> {
        let config: CrawlConfig = serde_json::from_str(&session.config_json)?;
        let root = Url::parse(&session.start_url).map_err(|e| UrlError::Parse(e.to_string()))?;
        let graph = SessionGraph::new(Arc::clone(&self.storage), session.id.clone());

        let entries = graph
            .pending_nodes()?
            .into_iter()
            .map(|node| FrontierEntry::new(node.url, None, node.depth))
            .collect::<Vec<_>>();
        let files = self.storage.list_files(&session.id)?;
        let prior = archived_progress(&session)?;

        tracing::info!(
            "Rebuilding session {} from {} pending URLs",
            session.id,
            entries.len()
        );

        self.storage
            .update_session_status(&session.id, SessionStatus::Running)?;
        let (reporter, progress) = ProgressReporter::resume_from(prior);
        self.launch(graph, &root, config, reporter, progress, entries, files)
            .await
    }

    /// Waits for a session started by this engine to finish
    pub async fn wait(&self, session_id: &str) -> Result<SessionReport> {
        let done = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .map(|live| live.done.clone());

        if let Some(mut done) = done {
            if done.wait_for(|finished| *finished).await.is_err() {
                tracing::error!("Session task {} ended abnormally", session_id);
            }
        }
        self.get_status(session_id).await
    }

    /// IDs of the sessions this engine is still running
    pub async fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All nodes and edges discovered by a session
    pub async fn export_site_graph(&self, session_id: &str) -> Result<SiteGraph> {
        self.load_session(session_id)?;
        Ok(self.storage.export_graph(session_id)?)
    }

    /// Every file the session registered, with its download status
    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<FileMetadata>> {
        self.load_session(session_id)?;
        Ok(self.storage.list_files(session_id)?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.storage.list_sessions()?)
    }
}

fn archived_progress(session: &SessionRecord) -> Result<ProgressSnapshot> {
    match session.snapshot_json.as_deref() {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(ProgressSnapshot::default()),
    }
}
