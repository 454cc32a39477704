use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::AppError;
use crate::models::{CandidateProfile, JobRecord, JobSearchCriteria, MatchScore};
use crate::session::BrowserIdentity;

/// One browser tab driven by a session.
///
/// Implementations talk to a real browser; the session manager layers
/// timeouts, cancellation, and pacing on top.
pub trait BrowserPage: Send + Sync + 'static {
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait until the document has finished loading.
    fn wait_for_load(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn reload(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Rendered HTML of the whole document.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Click the first element matching `selector` if it is visible and
    /// enabled. Returns `false` when there is nothing to click.
    fn click_if_visible(&self, selector: &str)
    -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Release the tab and the browser process behind it. Must be idempotent.
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Starts an isolated browser context with a given identity.
// TODO: reuse one browser process across sessions with per-session contexts
pub trait BrowserLauncher: Send + Sync + Clone + 'static {
    type Page: BrowserPage;

    fn launch(
        &self,
        identity: &BrowserIdentity,
    ) -> impl Future<Output = Result<Self::Page, AppError>> + Send;
}

/// Document store holding scraped jobs.
pub trait JobStore: Send + Sync + Clone + 'static {
    /// Upsert records by id. Returns the number of distinct ids written.
    fn save_all(&self, jobs: &[JobRecord]) -> impl Future<Output = Result<usize, AppError>> + Send;

    fn search(
        &self,
        criteria: &JobSearchCriteria,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<JobRecord>, AppError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<JobRecord>, AppError>> + Send;
}

/// Expensive AI scorer used for final match explanation.
pub trait MatchScorer: Send + Sync + Clone {
    fn calculate_match_score(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
    ) -> impl Future<Output = Result<MatchScore, AppError>> + Send;

    /// Free-text analysis and suggestions for a scored match.
    fn generate_match_analysis(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
        score: &MatchScore,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// A no-op JobStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl JobStore for NullStore {
    async fn save_all(&self, _jobs: &[JobRecord]) -> Result<usize, AppError> {
        Ok(0)
    }

    async fn search(
        &self,
        _criteria: &JobSearchCriteria,
        _max_results: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        Ok(vec![])
    }

    async fn get(&self, _id: &str) -> Result<Option<JobRecord>, AppError> {
        Ok(None)
    }
}

/// In-process store keyed by record id.
///
/// Search results come back in insertion order of first save.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    order: Vec<String>,
    jobs: BTreeMap<String, JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl JobStore for MemoryJobStore {
    async fn save_all(&self, jobs: &[JobRecord]) -> Result<usize, AppError> {
        let mut inner = self.inner.write().await;
        let mut written = HashSet::new();
        for job in jobs {
            if inner.jobs.insert(job.id.clone(), job.clone()).is_none() {
                inner.order.push(job.id.clone());
            }
            written.insert(job.id.as_str());
        }
        // Same-id records within one batch collapse into a single row.
        Ok(written.len())
    }

    async fn search(
        &self,
        criteria: &JobSearchCriteria,
        max_results: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let wanted: Vec<String> = criteria.skills.iter().map(|s| s.to_lowercase()).collect();
        let inner = self.inner.read().await;
        let matches = inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| {
                wanted.is_empty()
                    || job
                        .required_skills
                        .iter()
                        .any(|skill| wanted.contains(&skill.to_lowercase()))
            })
            .filter(|job| match (criteria.max_experience_years, job.required_experience_years) {
                (Some(max), Some(required)) => required <= max,
                _ => true,
            })
            .take(max_results)
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, AppError> {
        Ok(self.inner.read().await.jobs.get(id).cloned())
    }
}
