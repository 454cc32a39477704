pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod pacing;
pub mod pagination;
pub mod profile;
pub mod ranker;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CrawlerConfig, SourceConfig};
pub use controller::{CrawlController, CrawlStatus, StartOutcome};
pub use error::AppError;
pub use matching::MatchService;
pub use models::{CandidateProfile, JobRecord, MatchResult, compute_hash};
pub use orchestrator::QueryOrchestrator;
pub use ranker::RelevanceRanker;
pub use traits::{BrowserLauncher, BrowserPage, JobStore, MatchScorer};
