mod output;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jobscout_client::{ChromiumLauncher, OpenAiMatchScorer};
use jobscout_core::models::JobSearchCriteria;
use jobscout_core::traits::{BrowserLauncher, JobStore, MemoryJobStore};
use jobscout_core::{CandidateProfile, CrawlController, CrawlerConfig, MatchService, StartOutcome};

use output::OutputFormat;

type Controller = CrawlController<ChromiumLauncher, MemoryJobStore>;

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "jobscout", version, about = "Stealth job-listing crawler with profile-driven ranking")]
struct Cli {
    /// Path to a JSON crawler config (falls back to JOBSCOUT_CONFIG, then the built-in sources)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format for results written to stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Chrome/Chromium executable to launch
    #[arg(long, global = true, env = "CHROME_BIN")]
    chrome_bin: Option<PathBuf>,

    /// Show browser windows instead of running headless
    #[arg(long, global = true, default_value_t = false)]
    headful: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a source's listing for a keyword
    Search {
        #[arg(short, long)]
        keyword: String,

        /// City code understood by the source (e.g. 101010100 for Beijing on zhipin)
        #[arg(long)]
        city: Option<String>,

        /// Maximum number of records to return
        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// Source name (defaults to the configured default source)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Crawl a source's listing pages until its item budget is spent
    Crawl {
        /// Source name (defaults to the configured default source)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Find jobs relevant to a candidate profile
    Recommend {
        /// Path to a candidate profile JSON file
        #[arg(short, long)]
        profile: PathBuf,

        #[arg(long, default_value_t = 30)]
        max_results: usize,

        /// Score the best matches with an LLM and print match results
        #[arg(long, default_value_t = false)]
        analyze: bool,

        /// Number of top-ranked jobs sent to the LLM
        #[arg(long, default_value_t = 10)]
        prefilter: usize,

        /// LLM model (e.g. "gpt-4o-mini", "qwen-plus")
        #[arg(long, env = "JOBSCOUT_MODEL", default_value = "gpt-4o-mini")]
        model: String,

        /// OpenAI-compatible API base URL
        #[arg(long, env = "JOBSCOUT_BASE_URL", default_value = "https://api.openai.com/v1")]
        base_url: String,

        /// API key, required with --analyze
        #[arg(long, env = "JOBSCOUT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Arc::new(load_config(cli.config.as_deref())?);
    let mut launcher = ChromiumLauncher::new();
    if let Some(bin) = cli.chrome_bin {
        launcher = launcher.with_chrome_bin(bin);
    }
    if cli.headful {
        launcher = launcher.headful();
    }
    let controller = CrawlController::new(launcher, config, MemoryJobStore::new());

    match cli.command {
        Commands::Search {
            keyword,
            city,
            page_size,
            source,
        } => {
            cmd_search(&controller, &keyword, city.as_deref(), page_size, source, cli.format).await?;
        }
        Commands::Crawl { source } => {
            cmd_crawl(&controller, source, cli.format).await?;
        }
        Commands::Recommend {
            profile,
            max_results,
            analyze,
            prefilter,
            model,
            base_url,
            api_key,
        } => {
            let scorer = if analyze {
                let Some(api_key) = api_key else {
                    bail!("--analyze needs an API key (--api-key or JOBSCOUT_API_KEY)");
                };
                Some(
                    OpenAiMatchScorer::with_base_url(&api_key, &model, &base_url)
                        .context("Failed to create LLM client")?,
                )
            } else {
                None
            };
            cmd_recommend(&controller, &profile, max_results, scorer, prefilter, cli.format).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CrawlerConfig> {
    let config = match path {
        Some(path) => CrawlerConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CrawlerConfig::from_env().context("Invalid crawler configuration")?,
    };
    tracing::debug!(
        sources = config.sources.len(),
        default_source = %config.default_source,
        "Configuration loaded"
    );
    Ok(config)
}

/// Run `fut` to completion. On Ctrl-C, force-close every browser session so
/// it winds down early with whatever it has gathered.
async fn until_interrupted<L, S, T>(
    controller: &CrawlController<L, S>,
    fut: impl Future<Output = T>,
) -> T
where
    L: BrowserLauncher,
    S: JobStore,
{
    tokio::pin!(fut);
    tokio::select! {
        out = &mut fut => out,
        _ = tokio::signal::ctrl_c() => {
            let closed = controller.stop();
            tracing::warn!(closed, "Interrupted, closing browser sessions");
            fut.await
        }
    }
}

async fn cmd_search(
    controller: &Controller,
    keyword: &str,
    city: Option<&str>,
    page_size: usize,
    source: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = controller.orchestrator();
    let source = source.unwrap_or_else(|| controller.config().default_source.clone());

    let jobs = until_interrupted(
        controller,
        orchestrator.search_source(&source, keyword, city, page_size),
    )
    .await
    .context("Search failed")?;

    tracing::info!(source = %source, records = jobs.len(), "Search complete");
    output::write_jobs(std::io::stdout().lock(), &jobs, format)
}

async fn cmd_crawl(controller: &Controller, source: Option<String>, format: OutputFormat) -> Result<()> {
    let source = source.unwrap_or_else(|| controller.config().default_source.clone());

    if controller.start(&source).context("Failed to start crawl")? == StartOutcome::AlreadyRunning {
        bail!("A crawl is already running");
    }

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    let join = controller.join();
    tokio::pin!(join);
    loop {
        tokio::select! {
            _ = &mut join => break,
            _ = ticker.tick() => {
                tracing::info!(status = %controller.status(), "Crawl in progress");
            }
            _ = tokio::signal::ctrl_c() => {
                let closed = controller.stop();
                tracing::warn!(closed, "Interrupted, stopping crawl");
            }
        }
    }

    match controller.last_report() {
        Some(report) => {
            tracing::info!(
                source = %report.source,
                pages = report.pages,
                records = report.records,
                saved = report.saved,
                error = report.error.as_deref().unwrap_or("none"),
                "Crawl finished"
            );
        }
        None => tracing::warn!("Crawl ended without a report"),
    }
    tracing::info!(status = %controller.status(), "Crawler status");

    let jobs = controller
        .store()
        .search(&JobSearchCriteria::default(), usize::MAX)
        .await
        .context("Failed to read crawled jobs")?;
    output::write_jobs(std::io::stdout().lock(), &jobs, format)
}

async fn cmd_recommend(
    controller: &Controller,
    profile_path: &Path,
    max_results: usize,
    scorer: Option<OpenAiMatchScorer>,
    prefilter: usize,
    format: OutputFormat,
) -> Result<()> {
    let raw = std::fs::read_to_string(profile_path)
        .with_context(|| format!("Failed to read profile file: {}", profile_path.display()))?;
    let profile: CandidateProfile =
        serde_json::from_str(&raw).context("Invalid JSON in profile file")?;

    let orchestrator = controller.orchestrator();
    let jobs = until_interrupted(controller, orchestrator.crawl_for_profile(&profile, max_results))
        .await
        .context("Profile crawl failed")?;
    tracing::info!(profile = %profile.name, records = jobs.len(), "Relevant jobs collected");

    let Some(scorer) = scorer else {
        return output::write_jobs(std::io::stdout().lock(), &jobs, format);
    };

    let service = MatchService::new(scorer, *orchestrator.ranker()).with_prefilter_limit(prefilter);
    let results = service.match_jobs(&profile, jobs).await;
    let recommended = results.iter().filter(|r| r.recommended).count();
    tracing::info!(scored = results.len(), recommended, "Match scoring complete");
    output::write_matches(std::io::stdout().lock(), &results, format)
}
