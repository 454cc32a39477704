//! Query orchestration: keyword searches and profile-driven crawls.
//!
//! A profile crawl splits the candidate into three facets, runs each as an
//! isolated browser session on a bounded task pool, joins them all, and
//! ranks the concatenated results. Failures are contained per facet; only a
//! configuration error fails the whole call.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{CrawlerConfig, SourceConfig};
use crate::error::AppError;
use crate::models::{CandidateProfile, JobRecord};
use crate::pagination::walk;
use crate::profile::{FacetKind, ProfileSignals, QueryFacet, derive_facets};
use crate::ranker::RelevanceRanker;
use crate::session::SessionManager;
use crate::traits::BrowserLauncher;

pub struct QueryOrchestrator<L: BrowserLauncher> {
    sessions: SessionManager<L>,
    config: Arc<CrawlerConfig>,
    ranker: RelevanceRanker,
}

impl<L: BrowserLauncher> Clone for QueryOrchestrator<L> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            config: Arc::clone(&self.config),
            ranker: self.ranker,
        }
    }
}

impl<L: BrowserLauncher> QueryOrchestrator<L> {
    pub fn new(sessions: SessionManager<L>, config: Arc<CrawlerConfig>) -> Self {
        let ranker = RelevanceRanker::new(config.ranking);
        Self {
            sessions,
            config,
            ranker,
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn ranker(&self) -> &RelevanceRanker {
        &self.ranker
    }

    /// Keyword search against the default source.
    pub async fn search_jobs(
        &self,
        keyword: &str,
        city: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let source = self.config.default_source.clone();
        self.search_source(&source, keyword, city, page_size).await
    }

    /// Keyword search against a named source, returning at most
    /// `page_size` records in listing order.
    ///
    /// Session failures yield the records gathered so far (possibly none);
    /// only an unknown source is an error. A zero `page_size` returns
    /// nothing without opening a browser.
    pub async fn search_source(
        &self,
        source_name: &str,
        keyword: &str,
        city: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let source = self.config.source(source_name)?;
        if page_size == 0 {
            tracing::debug!(source = %source.name, keyword, "Empty page size, skipping search");
            return Ok(Vec::new());
        }
        let url = source.search_url(Some(keyword), city)?;
        let key = format!("{}/search-{}", source.name, &Uuid::new_v4().simple().to_string()[..8]);
        tracing::info!(source = %source.name, keyword, ?city, page_size, "Searching jobs");

        match self.run_query(&key, source, &url, page_size).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(source = %source.name, keyword, error = %e, "Search failed, returning no results");
                Ok(Vec::new())
            }
        }
    }

    /// Crawl the default source for jobs relevant to `profile` and return
    /// them ranked by relevance.
    ///
    /// Each facet collects at most `max_results / 3` records. Duplicates
    /// across facets are kept.
    pub async fn crawl_for_profile(
        &self,
        profile: &CandidateProfile,
        max_results: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let source = Arc::new(self.config.default_source()?.clone());
        let signals = ProfileSignals::from_profile(profile);
        let facets = derive_facets(profile, &signals, max_results);
        tracing::info!(
            source = %source.name,
            profile = %profile.name,
            max_results,
            "Crawling jobs for profile"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_facets));
        let mut slots: Vec<Vec<JobRecord>> = vec![Vec::new(); facets.len()];
        let mut tasks = JoinSet::new();

        for (slot, facet) in facets.into_iter().enumerate() {
            if !facet.is_runnable() {
                tracing::info!(facet = %facet.kind, quota = facet.quota, "Skipping facet with nothing to search");
                continue;
            }
            let this = self.clone();
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.run_facet(&source, &facet).await,
                    Err(_) => Err(AppError::Generic("facet worker pool closed".into())),
                };
                (slot, facet.kind, result)
            });
        }

        let mut fatal: Option<AppError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, kind, Ok(records))) => {
                    tracing::info!(facet = %kind, records = records.len(), "Facet finished");
                    slots[slot] = records;
                }
                Ok((_, kind, Err(e))) if e.is_fatal() => {
                    tracing::error!(facet = %kind, error = %e, "Facet failed fatally");
                    fatal.get_or_insert(e);
                }
                Ok((_, kind, Err(e))) => {
                    tracing::warn!(facet = %kind, error = %e, "Facet failed, contributing no results");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Facet task aborted, contributing no results");
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let combined: Vec<JobRecord> = slots.into_iter().flatten().collect();
        tracing::info!(source = %source.name, records = combined.len(), "Ranking combined facet results");
        Ok(self.ranker.rank(combined, &signals))
    }

    async fn run_facet(
        &self,
        source: &SourceConfig,
        facet: &QueryFacet,
    ) -> Result<Vec<JobRecord>, AppError> {
        let url = source.search_url(Some(&facet.query), None)?;
        let key = facet_key(&source.name, facet.kind);
        tracing::info!(facet = %facet.kind, query = %facet.query, quota = facet.quota, "Running facet");
        self.run_query(&key, source, &url, facet.quota).await
    }

    /// One session, one walk. A walk cut short still yields its records.
    async fn run_query(
        &self,
        key: &str,
        source: &SourceConfig,
        url: &str,
        max_items: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let result = self
            .sessions
            .with_session(key, source, url, |session| async move {
                Ok(walk(&session, source, max_items).await)
            })
            .await?;
        Ok(result.records)
    }
}

/// Registry key of a facet session: `source/facet`.
pub fn facet_key(source: &str, kind: FacetKind) -> String {
    format!("{source}/{kind}")
}
