//! Test utilities: mock browser and scorer implementations.
//!
//! Handwritten mocks for dependency injection in unit tests. Shared state
//! lives behind `Arc` so tests can assert on launches, clicks, and closes
//! after the code under test has finished with the mock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{CrawlerConfig, FieldSelectors, SourceConfig, TimeoutConfig};
use crate::error::AppError;
use crate::models::{CandidateProfile, JobRecord, MatchScore};
use crate::pacing::PacingConfig;
use crate::ranker::RankingWeights;
use crate::session::BrowserIdentity;
use crate::traits::{BrowserLauncher, BrowserPage, MatchScorer};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A source over `jobs.example.com` with simple class selectors and no pacing.
pub fn fixture_source() -> SourceConfig {
    SourceConfig {
        name: "fixture".into(),
        base_url: "https://jobs.example.com".into(),
        listing_url: "https://jobs.example.com/list".into(),
        query_param: "query".into(),
        city_param: "city".into(),
        item_selectors: strings(&[".card"]),
        fields: FieldSelectors {
            title: strings(&[".title"]),
            company: strings(&[".company"]),
            location: strings(&[".area"]),
            salary: strings(&[".salary"]),
            experience: strings(&[".tags li"]),
            description: strings(&[".desc"]),
            skills: strings(&[".skills li"]),
            industry: strings(&[".industry"]),
            link: strings(&["a.link", "a[href]"]),
        },
        next_page_selector: Some("a.next".into()),
        challenge_markers: strings(&["security-check", "verify", "captcha"]),
        per_page_cap: 20,
        max_pages: 10,
        max_items_per_crawl: 100,
        min_description_len: 20,
        pacing: PacingConfig::disabled(),
        timeouts: TimeoutConfig::default(),
    }
}

pub fn fixture_config() -> CrawlerConfig {
    CrawlerConfig {
        sources: vec![fixture_source()],
        default_source: "fixture".into(),
        max_concurrent_facets: 3,
        ranking: RankingWeights::default(),
    }
}

/// Wrap each card body in a `.card` container on one listing page.
pub fn listing_html(cards: &[&str]) -> String {
    let body: String = cards
        .iter()
        .map(|card| format!("<div class=\"card\">{card}</div>"))
        .collect();
    format!("<html><body><div class=\"list\">{body}</div></body></html>")
}

/// A page of `count` titled cards, titles `"{prefix} {i}"`.
pub fn titled_page(prefix: &str, count: usize) -> String {
    let cards: Vec<String> = (0..count)
        .map(|i| format!("<span class=\"title\">{prefix} {i}</span>"))
        .collect();
    let cards: Vec<&str> = cards.iter().map(String::as_str).collect();
    listing_html(&cards)
}

// ---------------------------------------------------------------------------
// MockLauncher / MockPage
// ---------------------------------------------------------------------------

/// State shared by a launcher and every page it creates.
#[derive(Default)]
pub struct MockBrowserState {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub clicks: AtomicUsize,
    pub reloads: AtomicUsize,
    /// Highest number of simultaneously open pages.
    pub peak_open: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    identities: Mutex<Vec<BrowserIdentity>>,
    /// Listing pages served when no route matches.
    pages: Mutex<Vec<String>>,
    /// `(url substring, pages)`; the first route contained in the URL wins.
    routes: Mutex<Vec<(String, Vec<String>)>>,
    /// Scripted answers for `current_url`, consumed front to back.
    urls: Mutex<VecDeque<String>>,
    fail_launch: AtomicBool,
    fail_goto: Mutex<Option<String>>,
    hang_goto: AtomicBool,
}

impl MockBrowserState {
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn identities(&self) -> Vec<BrowserIdentity> {
        self.identities.lock().unwrap().clone()
    }

    pub fn open_pages(&self) -> usize {
        self.launches.load(Ordering::SeqCst) - self.closes.load(Ordering::SeqCst)
    }

    fn pages_for(&self, url: &str) -> Vec<String> {
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, pages)| pages.clone())
            .unwrap_or_else(|| self.pages.lock().unwrap().clone())
    }
}

/// Mock launcher serving canned listing pages.
#[derive(Clone, Default)]
pub struct MockLauncher {
    pub state: Arc<MockBrowserState>,
}

impl MockLauncher {
    pub fn with_pages(pages: Vec<String>) -> Self {
        let launcher = Self::default();
        *launcher.state.pages.lock().unwrap() = pages;
        launcher
    }

    pub fn route(self, url_contains: &str, pages: Vec<String>) -> Self {
        self.state
            .routes
            .lock()
            .unwrap()
            .push((url_contains.to_string(), pages));
        self
    }

    pub fn with_urls(self, urls: &[&str]) -> Self {
        *self.state.urls.lock().unwrap() = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn fail_launch(self) -> Self {
        self.state.fail_launch.store(true, Ordering::SeqCst);
        self
    }

    /// Fail navigation to any URL containing `pattern`.
    pub fn fail_goto_containing(self, pattern: &str) -> Self {
        *self.state.fail_goto.lock().unwrap() = Some(pattern.to_string());
        self
    }

    /// Navigation never completes.
    pub fn hang_on_goto(self) -> Self {
        self.state.hang_goto.store(true, Ordering::SeqCst);
        self
    }
}

impl BrowserLauncher for MockLauncher {
    type Page = MockPage;

    async fn launch(&self, identity: &BrowserIdentity) -> Result<MockPage, AppError> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(AppError::BrowserError("failed to spawn browser".into()));
        }
        let launched = self.state.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let open = launched - self.state.closes.load(Ordering::SeqCst);
        self.state.peak_open.fetch_max(open, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.state.identities.lock().unwrap().push(identity.clone());
        Ok(MockPage {
            state: Arc::clone(&self.state),
            url: Mutex::new("about:blank".into()),
            pages: Mutex::new(Vec::new()),
            index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct MockPage {
    state: Arc<MockBrowserState>,
    url: Mutex<String>,
    pages: Mutex<Vec<String>>,
    index: AtomicUsize,
    closed: AtomicBool,
}

impl BrowserPage for MockPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.state.navigations.lock().unwrap().push(url.to_string());
        if self.state.hang_goto.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let fail = self.state.fail_goto.lock().unwrap().clone();
        if fail.is_some_and(|pattern| url.contains(&pattern)) {
            return Err(AppError::NetworkError(format!("connection refused: {url}")));
        }
        *self.url.lock().unwrap() = url.to_string();
        *self.pages.lock().unwrap() = self.state.pages_for(url);
        self.index.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        if let Some(url) = self.state.urls.lock().unwrap().pop_front() {
            return Ok(url);
        }
        Ok(self.url.lock().unwrap().clone())
    }

    async fn reload(&self) -> Result<(), AppError> {
        self.state.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        let pages = self.pages.lock().unwrap();
        let index = self.index.load(Ordering::SeqCst);
        Ok(pages
            .get(index)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    /// A next control exists while there are more canned pages.
    async fn click_if_visible(&self, _selector: &str) -> Result<bool, AppError> {
        let available = self.pages.lock().unwrap().len();
        let index = self.index.load(Ordering::SeqCst);
        if index + 1 >= available {
            return Ok(false);
        }
        self.index.store(index + 1, Ordering::SeqCst);
        self.state.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn close(&self) -> Result<(), AppError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

/// Mock AI scorer with per-job scores and failures.
///
/// Per-profile scores, keyed by profile name, take precedence over per-job
/// ones.
#[derive(Clone)]
pub struct MockScorer {
    default_score: f64,
    scores: Arc<Mutex<HashMap<String, f64>>>,
    profile_scores: Arc<Mutex<HashMap<String, f64>>>,
    failing: Arc<Mutex<Vec<String>>>,
    /// Job ids passed to `calculate_match_score`, in call order.
    pub scored: Arc<Mutex<Vec<String>>>,
    pub analyses: Arc<AtomicUsize>,
}

impl MockScorer {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score,
            scores: Arc::new(Mutex::new(HashMap::new())),
            profile_scores: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(Vec::new())),
            scored: Arc::new(Mutex::new(Vec::new())),
            analyses: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_score(self, job_id: &str, score: f64) -> Self {
        self.scores.lock().unwrap().insert(job_id.to_string(), score);
        self
    }

    pub fn with_profile_score(self, profile_name: &str, score: f64) -> Self {
        self.profile_scores
            .lock()
            .unwrap()
            .insert(profile_name.to_string(), score);
        self
    }

    pub fn failing_for(self, job_id: &str) -> Self {
        self.failing.lock().unwrap().push(job_id.to_string());
        self
    }

    pub fn scored_ids(&self) -> Vec<String> {
        self.scored.lock().unwrap().clone()
    }
}

impl MatchScorer for MockScorer {
    async fn calculate_match_score(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
    ) -> Result<MatchScore, AppError> {
        self.scored.lock().unwrap().push(job.id.clone());
        if self.failing.lock().unwrap().contains(&job.id) {
            return Err(AppError::LlmError {
                message: "upstream overloaded".into(),
                status_code: 503,
                retryable: true,
            });
        }
        let by_profile = self.profile_scores.lock().unwrap().get(&profile.name).copied();
        let overall = by_profile
            .or_else(|| self.scores.lock().unwrap().get(&job.id).copied())
            .unwrap_or(self.default_score);
        Ok(MatchScore {
            overall_score: overall,
            category_scores: [("skills".to_string(), overall)].into_iter().collect(),
            analysis: [("summary".to_string(), "mock".to_string())].into_iter().collect(),
        })
    }

    async fn generate_match_analysis(
        &self,
        _profile: &CandidateProfile,
        job: &JobRecord,
        score: &MatchScore,
    ) -> Result<String, AppError> {
        self.analyses.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} scored {:.2}", job.id, score.overall_score))
    }
}
