//! Pagination walker: extract the current listing page, follow "next",
//! repeat.
//!
//! The walk is an explicit loop bounded by three budgets: the item budget
//! passed by the caller, the source's `max_pages`, and the presence of a
//! visible next-page control. Whatever stops the walk, the records gathered
//! so far are returned.

use chrono::Utc;

use crate::config::SourceConfig;
use crate::error::AppError;
use crate::extract::extract_listing;
use crate::models::JobRecord;
use crate::session::Session;
use crate::traits::BrowserPage;

/// Outcome of one walk.
#[derive(Debug, Default)]
pub struct WalkResult {
    pub records: Vec<JobRecord>,
    /// Listing pages read.
    pub pages: usize,
    /// The error that cut the walk short, if any. `records` still holds
    /// everything extracted before it.
    pub halted: Option<AppError>,
}

impl WalkResult {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// Walk the listing the session is currently on, collecting at most
/// `max_items` records.
pub async fn walk<P: BrowserPage>(
    session: &Session<P>,
    source: &SourceConfig,
    max_items: usize,
) -> WalkResult {
    let mut result = WalkResult::default();
    if let Err(e) = walk_pages(session, source, max_items, &mut result).await {
        tracing::warn!(
            source = %source.name,
            session = %session.key(),
            pages = result.pages,
            records = result.records.len(),
            error = %e,
            "Pagination halted early"
        );
        result.halted = Some(e);
    }
    result
}

async fn walk_pages<P: BrowserPage>(
    session: &Session<P>,
    source: &SourceConfig,
    max_items: usize,
    result: &mut WalkResult,
) -> Result<(), AppError> {
    let pacing = session.pacing();

    while result.records.len() < max_items {
        let html = session.content().await?;
        let page_url = session.current_url().await?;
        result.pages += 1;

        let remaining = max_items - result.records.len();
        let batch = extract_listing(&html, &page_url, result.pages, source, remaining, Utc::now());
        let extracted = batch.len();
        for (i, record) in batch.into_iter().enumerate() {
            if pacing.item_pause_due(i) {
                session.pause(pacing.item).await?;
            }
            result.records.push(record);
        }

        tracing::info!(
            source = %source.name,
            page = result.pages,
            extracted,
            records = result.records.len(),
            "Processed listing page"
        );

        if result.records.len() >= max_items {
            tracing::info!(source = %source.name, max_items, "Item budget reached");
            break;
        }
        let Some(selector) = source.next_page_selector.as_deref() else {
            break;
        };
        if result.pages >= source.max_pages {
            tracing::info!(source = %source.name, max_pages = source.max_pages, "Page budget reached");
            break;
        }
        if !session.click_next(selector).await? {
            tracing::debug!(source = %source.name, "No next-page control, listing exhausted");
            break;
        }
        session.wait_ready().await?;
        session.pause(pacing.page).await?;
    }

    Ok(())
}
