//! Crawl state controller: the process-wide run flag and session registry.
//!
//! The controller is the explicit state object behind `start`, `stop`, and
//! `status`. It owns the [`SessionRegistry`] and hands out orchestrators that
//! share it, so `stop` reaches every live session whether it belongs to a
//! background crawl, a profile crawl, or a search.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::CrawlerConfig;
use crate::error::AppError;
use crate::orchestrator::QueryOrchestrator;
use crate::pagination::walk;
use crate::session::{SessionManager, SessionRegistry};
use crate::traits::{BrowserLauncher, JobStore};

/// Result of [`CrawlController::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A crawl was already running; nothing was done.
    AlreadyRunning,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlStatus {
    pub running: bool,
    pub active_sessions: usize,
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.running {
            write!(f, "RUNNING ({} browser contexts active)", self.active_sessions)
        } else {
            write!(f, "STOPPED")
        }
    }
}

/// Summary of the last background crawl.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub source: String,
    pub pages: usize,
    pub records: usize,
    pub saved: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct RunState {
    running: AtomicBool,
    run_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    last_report: Mutex<Option<CrawlReport>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned controller mutex");
        poisoned.into_inner()
    })
}

pub struct CrawlController<L: BrowserLauncher, S: JobStore> {
    sessions: SessionManager<L>,
    config: Arc<CrawlerConfig>,
    store: S,
    state: Arc<RunState>,
}

impl<L: BrowserLauncher, S: JobStore> CrawlController<L, S> {
    pub fn new(launcher: L, config: Arc<CrawlerConfig>, store: S) -> Self {
        Self {
            sessions: SessionManager::new(launcher, SessionRegistry::new()),
            config,
            store,
            state: Arc::new(RunState::default()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.sessions.registry()
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// An orchestrator whose sessions live in this controller's registry.
    pub fn orchestrator(&self) -> QueryOrchestrator<L> {
        QueryOrchestrator::new(self.sessions.clone(), Arc::clone(&self.config))
    }

    /// Start crawling `source_name`'s listing in the background.
    ///
    /// Only one crawl runs per process: while one is running this logs a
    /// warning and returns [`StartOutcome::AlreadyRunning`]. An unknown
    /// source is a [`AppError::ConfigError`]. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, source_name: &str) -> Result<StartOutcome, AppError> {
        if self.state.running.load(Ordering::SeqCst) {
            tracing::warn!(source = source_name, "Crawling is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        let source = self.config.source(source_name)?.clone();

        if self
            .state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(source = source_name, "Crawling is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        let run = self.state.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(source = %source.name, url = %source.listing_url, run, "Starting crawl");

        let sessions = self.sessions.clone();
        let store = self.store.clone();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let max_items = source.max_items_per_crawl;
            let outcome = sessions
                .with_session(&source.name, &source, &source.listing_url, |session| {
                    let source = &source;
                    async move { Ok(walk(&session, source, max_items).await) }
                })
                .await;

            let mut report = CrawlReport {
                source: source.name.clone(),
                pages: 0,
                records: 0,
                saved: 0,
                error: None,
                finished_at: Utc::now(),
            };
            match outcome {
                Ok(result) => {
                    report.pages = result.pages;
                    report.records = result.records.len();
                    report.error = result.halted.map(|e| e.to_string());
                    match store.save_all(&result.records).await {
                        Ok(saved) => report.saved = saved,
                        Err(e) => {
                            tracing::warn!(source = %source.name, error = %e, "Failed to store crawled jobs");
                            report.error.get_or_insert_with(|| e.to_string());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, error = %e, "Crawl failed");
                    report.error = Some(e.to_string());
                }
            }
            report.finished_at = Utc::now();
            tracing::info!(
                source = %report.source,
                pages = report.pages,
                records = report.records,
                saved = report.saved,
                "Crawl finished"
            );
            *lock(&state.last_report) = Some(report);

            if state.run_id.load(Ordering::SeqCst) == run {
                state.running.store(false, Ordering::SeqCst);
            }
        });
        *lock(&self.state.task) = Some(handle);

        Ok(StartOutcome::Started)
    }

    /// Clear the run flag and force-close every registered session.
    /// Returns the number of sessions closed.
    pub fn stop(&self) -> usize {
        self.state.running.store(false, Ordering::SeqCst);
        let closed = self.registry().close_all();
        tracing::info!(closed, "Crawling stopped");
        closed
    }

    pub fn status(&self) -> CrawlStatus {
        CrawlStatus {
            running: self.state.running.load(Ordering::SeqCst),
            active_sessions: self.registry().len(),
        }
    }

    pub fn last_report(&self) -> Option<CrawlReport> {
        lock(&self.state.last_report).clone()
    }

    /// Wait for the most recently started background crawl to finish.
    pub async fn join(&self) {
        let handle = lock(&self.state.task).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Crawl task ended abnormally");
        }
    }
}
