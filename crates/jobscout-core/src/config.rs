//! Source and crawler configuration.
//!
//! Selector fallbacks are ordered data, not code: each field carries a list
//! of CSS selectors tried first-to-last, so markup drift on a job board is
//! handled by editing configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::pacing::PacingConfig;
use crate::ranker::RankingWeights;

const DEFAULT_SOURCE: &str = "zhipin";
const DEFAULT_MAX_CONCURRENT_FACETS: usize = 3;

/// Ordered selector candidates for every field of a job card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    pub title: Vec<String>,
    pub company: Vec<String>,
    pub location: Vec<String>,
    pub salary: Vec<String>,
    pub experience: Vec<String>,
    pub description: Vec<String>,
    pub skills: Vec<String>,
    pub industry: Vec<String>,
    /// Anchor whose `href` is the posting URL.
    pub link: Vec<String>,
}

impl FieldSelectors {
    fn all(&self) -> impl Iterator<Item = (&'static str, &Vec<String>)> {
        [
            ("title", &self.title),
            ("company", &self.company),
            ("location", &self.location),
            ("salary", &self.salary),
            ("experience", &self.experience),
            ("description", &self.description),
            ("skills", &self.skills),
            ("industry", &self.industry),
            ("link", &self.link),
        ]
        .into_iter()
    }
}

/// Deadlines applied to browser calls made through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub launch_secs: u64,
    pub navigation_secs: u64,
    pub ready_secs: u64,
    /// Content reads, clicks, and URL lookups.
    pub action_secs: u64,
}

impl TimeoutConfig {
    pub fn launch(&self) -> Duration {
        Duration::from_secs(self.launch_secs)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    pub fn action(&self) -> Duration {
        Duration::from_secs(self.action_secs)
    }

    fn entries(&self) -> [(&'static str, u64); 4] {
        [
            ("launch_secs", self.launch_secs),
            ("navigation_secs", self.navigation_secs),
            ("ready_secs", self.ready_secs),
            ("action_secs", self.action_secs),
        ]
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            launch_secs: 30,
            navigation_secs: 30,
            ready_secs: 30,
            action_secs: 10,
        }
    }
}

/// Static description of one job board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub listing_url: String,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    #[serde(default = "default_city_param")]
    pub city_param: String,
    /// Job-card container selectors; the first one matching anything wins.
    pub item_selectors: Vec<String>,
    pub fields: FieldSelectors,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    /// URL substrings that identify a bot-check redirect.
    #[serde(default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,
    #[serde(default = "default_per_page_cap")]
    pub per_page_cap: usize,
    /// Depth budget for pagination.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Item budget for a full `start` crawl of this source.
    #[serde(default = "default_max_items_per_crawl")]
    pub max_items_per_crawl: usize,
    /// Container text shorter than this is never used as a description.
    #[serde(default = "default_min_description_len")]
    pub min_description_len: usize,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_query_param() -> String {
    "query".to_string()
}

fn default_city_param() -> String {
    "city".to_string()
}

fn default_challenge_markers() -> Vec<String> {
    vec![
        "security-check".to_string(),
        "verify".to_string(),
        "captcha".to_string(),
    ]
}

fn default_per_page_cap() -> usize {
    20
}

fn default_max_pages() -> usize {
    10
}

fn default_max_items_per_crawl() -> usize {
    100
}

fn default_min_description_len() -> usize {
    20
}

impl SourceConfig {
    /// Build the listing URL for a keyword search.
    ///
    /// An empty or missing keyword yields the bare listing URL; the city
    /// parameter is only added alongside a keyword.
    pub fn search_url(&self, keyword: Option<&str>, city: Option<&str>) -> Result<String, AppError> {
        let mut url = Url::parse(&self.listing_url).map_err(|e| {
            AppError::ConfigError(format!(
                "Invalid listing URL '{}' for source '{}': {e}",
                self.listing_url, self.name
            ))
        })?;

        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());
        if let Some(keyword) = keyword {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(&self.query_param, keyword);
            if let Some(city) = city.map(str::trim).filter(|c| !c.is_empty()) {
                pairs.append_pair(&self.city_param, city);
            }
        }

        Ok(url.to_string())
    }

    /// Whether `url` is one of this source's bot-check pages.
    pub fn is_challenge_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.challenge_markers
            .iter()
            .any(|marker| !marker.is_empty() && url.contains(&marker.to_lowercase()))
    }

    /// Check structural invariants: required selector lists are non-empty,
    /// every selector parses, and numeric budgets and deadlines are positive.
    pub fn validate(&self) -> Result<(), AppError> {
        let err = |msg: String| AppError::ConfigError(format!("source '{}': {msg}", self.name));

        if self.name.trim().is_empty() {
            return Err(AppError::ConfigError("source name must not be empty".into()));
        }
        Url::parse(&self.listing_url).map_err(|e| err(format!("invalid listing_url: {e}")))?;
        if self.item_selectors.is_empty() {
            return Err(err("item_selectors must not be empty".into()));
        }
        if self.fields.title.is_empty() {
            return Err(err("fields.title must not be empty".into()));
        }
        if self.per_page_cap == 0 {
            return Err(err("per_page_cap must be at least 1".into()));
        }
        if self.max_pages == 0 {
            return Err(err("max_pages must be at least 1".into()));
        }
        if self.max_items_per_crawl == 0 {
            return Err(err("max_items_per_crawl must be at least 1".into()));
        }
        // A zero deadline fails every browser call immediately.
        for (name, secs) in self.timeouts.entries() {
            if secs == 0 {
                return Err(err(format!("timeouts.{name} must be at least 1")));
            }
        }

        let selectors = self
            .item_selectors
            .iter()
            .map(|s| ("item_selectors", s))
            .chain(
                self.fields
                    .all()
                    .flat_map(|(field, list)| list.iter().map(move |s| (field, s))),
            )
            .chain(self.next_page_selector.iter().map(|s| ("next_page_selector", s)));
        for (field, selector) in selectors {
            scraper::Selector::parse(selector)
                .map_err(|e| err(format!("invalid {field} selector '{selector}': {e}")))?;
        }

        for (name, range) in self.pacing.ranges() {
            if !range.is_ordered() {
                return Err(err(format!(
                    "pacing.{name} has min_ms {} above max_ms {}",
                    range.min_ms, range.max_ms
                )));
            }
        }

        Ok(())
    }
}

/// Resolved configuration for the whole crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_source_name")]
    pub default_source: String,
    /// Worker-pool size for facet queries.
    #[serde(default = "default_max_concurrent_facets")]
    pub max_concurrent_facets: usize,
    #[serde(default)]
    pub ranking: RankingWeights,
}

fn default_source_name() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_max_concurrent_facets() -> usize {
    DEFAULT_MAX_CONCURRENT_FACETS
}

impl CrawlerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, AppError> {
        let config: CrawlerConfig = serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid crawler config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Read configuration from environment variables.
    ///
    /// - `JOBSCOUT_CONFIG` (optional path to a JSON config, defaults to [`builtin`](Self::builtin))
    /// - `JOBSCOUT_DEFAULT_SOURCE` (optional override)
    /// - `JOBSCOUT_MAX_CONCURRENT_FACETS` (optional, defaults to 3)
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = match std::env::var("JOBSCOUT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_path(Path::new(&path))?,
            _ => Self::builtin(),
        };

        if let Ok(source) = std::env::var("JOBSCOUT_DEFAULT_SOURCE") {
            config.default_source = source;
        }

        if let Ok(raw) = std::env::var("JOBSCOUT_MAX_CONCURRENT_FACETS") {
            let parsed: usize = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid JOBSCOUT_MAX_CONCURRENT_FACETS '{raw}': must be a positive integer"
                ))
            })?;
            config.max_concurrent_facets = parsed;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::ConfigError("at least one source is required".into()));
        }
        for source in &self.sources {
            source.validate()?;
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(AppError::ConfigError(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        if self.max_concurrent_facets == 0 {
            return Err(AppError::ConfigError(
                "max_concurrent_facets must be at least 1".into(),
            ));
        }
        self.source(&self.default_source)?;
        self.ranking.validate()?;
        Ok(())
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Result<&SourceConfig, AppError> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AppError::ConfigError(format!("No configuration found for source: {name}")))
    }

    pub fn default_source(&self) -> Result<&SourceConfig, AppError> {
        self.source(&self.default_source)
    }

    /// Built-in configuration for BOSS Zhipin (`zhipin`).
    pub fn builtin() -> Self {
        Self {
            sources: vec![zhipin_source()],
            default_source: DEFAULT_SOURCE.to_string(),
            max_concurrent_facets: DEFAULT_MAX_CONCURRENT_FACETS,
            ranking: RankingWeights::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn zhipin_source() -> SourceConfig {
    SourceConfig {
        name: DEFAULT_SOURCE.to_string(),
        base_url: "https://www.zhipin.com".to_string(),
        listing_url: "https://www.zhipin.com/web/geek/job".to_string(),
        query_param: default_query_param(),
        city_param: default_city_param(),
        item_selectors: strings(&[
            "[data-v-7a4b5b6e] .job-card-box",
            ".job-card-wrapper",
            "[class*='job'][class*='card']",
            ".job-list-item",
            ".job-card",
        ]),
        fields: FieldSelectors {
            title: strings(&[
                "[data-v-7a4b5b6e] .job-name",
                ".job-title .job-name",
                ".job-name",
            ]),
            company: strings(&[
                "[data-v-7a4b5b6e] .company-name",
                ".company-info .name",
                "[class*='company-name']",
            ]),
            location: strings(&[
                "[data-v-7a4b5b6e] .job-area",
                ".job-location",
                ".info-desc",
                "[class*='area']",
            ]),
            salary: strings(&[
                "[data-v-7a4b5b6e] .job-salary",
                ".salary",
                ".red",
                "[class*='salary']",
            ]),
            experience: strings(&[
                "[data-v-7a4b5b6e] .tag-list li:first-child",
                ".experience",
                ".tag-list li",
            ]),
            description: strings(&[".job-desc", ".job-detail-section"]),
            skills: strings(&[".job-card-footer .tag-list li", ".skill-tags span"]),
            industry: strings(&[".company-tag-list li:first-child", ".company-industry"]),
            link: strings(&["a.job-card-left", "a[href*='job_detail']", "a[href]"]),
        },
        next_page_selector: Some(".options-pages a.next:not(.disabled)".to_string()),
        challenge_markers: strings(&["security-check", "safe/verify", "captcha"]),
        per_page_cap: default_per_page_cap(),
        max_pages: default_max_pages(),
        max_items_per_crawl: default_max_items_per_crawl(),
        min_description_len: default_min_description_len(),
        pacing: PacingConfig::default(),
        timeouts: TimeoutConfig::default(),
    }
}
