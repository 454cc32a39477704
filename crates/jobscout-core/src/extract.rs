//! Extraction engine: cascading selectors over rendered listing markup.
//!
//! Job boards reshuffle their class names often, so every field is looked up
//! through an ordered [`SelectorChain`]. The first selector whose trimmed text
//! is non-empty wins. When every candidate misses, the field is simply absent
//! and the record stays partial.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::SourceConfig;
use crate::models::{JobRecord, job_id};

static SALARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*[k千w万]?\s*(?:[-~～至到]\s*(\d+))?\s*([k千w万])").expect("valid salary pattern")
});

static EXPERIENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:[-~～至到]\s*\d+\s*)?\+?\s*(?:年|years?|yrs?)")
        .expect("valid experience pattern")
});

/// Ordered selector candidates for one field.
#[derive(Debug, Clone, Default)]
pub struct SelectorChain {
    selectors: Vec<Selector>,
}

impl SelectorChain {
    /// Compile the candidates in order. Unparseable selectors are skipped so
    /// one bad entry cannot disable the whole field.
    pub fn parse(candidates: &[String]) -> Self {
        let selectors = candidates
            .iter()
            .filter_map(|raw| match Selector::parse(raw) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    tracing::warn!(selector = %raw, error = %e, "Skipping invalid selector");
                    None
                }
            })
            .collect();
        Self { selectors }
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Text of the first candidate that yields non-empty trimmed text.
    pub fn first_text(&self, element: ElementRef<'_>) -> Option<String> {
        self.selectors.iter().find_map(|selector| {
            element
                .select(selector)
                .next()
                .map(element_text)
                .filter(|text| !text.is_empty())
        })
    }

    /// Value of `attr` on the first candidate that carries a non-empty one.
    pub fn first_attr(&self, element: ElementRef<'_>, attr: &str) -> Option<String> {
        self.selectors.iter().find_map(|selector| {
            element
                .select(selector)
                .filter_map(|el| el.value().attr(attr))
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(String::from)
        })
    }

    /// Texts of every element matched by the first candidate that matches
    /// anything non-empty.
    pub fn all_texts(&self, element: ElementRef<'_>) -> Vec<String> {
        for selector in &self.selectors {
            let texts: Vec<String> = element
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();
            if !texts.is_empty() {
                return texts;
            }
        }
        Vec::new()
    }
}

/// Return the first non-empty text among `candidates`, or `None`.
pub fn extract_field(element: ElementRef<'_>, candidates: &SelectorChain) -> Option<String> {
    candidates.first_text(element)
}

/// Visible text of an element with whitespace runs collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a salary label such as `25-40K·13薪` or `15K-25K` into `(min, max)`
/// base units.
///
/// `K`/`千` multiply by 1 000 and `W`/`万` by 10 000. A single number gives
/// `min == max`. Labels without a recognisable amount yield `None`.
pub fn parse_salary(text: &str) -> Option<(u32, u32)> {
    let caps = SALARY_RE.captures(text)?;
    let multiplier = match caps.get(3)?.as_str().to_lowercase().as_str() {
        "w" | "万" => 10_000,
        _ => 1_000,
    };
    let low: u32 = caps.get(1)?.as_str().parse().ok()?;
    let high: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => low,
    };
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    Some((low.checked_mul(multiplier)?, high.checked_mul(multiplier)?))
}

/// Parse an experience label such as `3-5年` or `5+ years`, keeping the lower
/// bound. Labels like `不限` (no requirement) yield `None`.
pub fn parse_experience(text: &str) -> Option<u32> {
    EXPERIENCE_RE.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Compiled selectors for one source, built once per page.
#[derive(Debug, Clone)]
pub struct SourceSelectors {
    items: Vec<Selector>,
    title: SelectorChain,
    company: SelectorChain,
    location: SelectorChain,
    salary: SelectorChain,
    experience: SelectorChain,
    description: SelectorChain,
    skills: SelectorChain,
    industry: SelectorChain,
    link: SelectorChain,
}

impl SourceSelectors {
    pub fn compile(source: &SourceConfig) -> Self {
        let fields = &source.fields;
        Self {
            items: SelectorChain::parse(&source.item_selectors).selectors,
            title: SelectorChain::parse(&fields.title),
            company: SelectorChain::parse(&fields.company),
            location: SelectorChain::parse(&fields.location),
            salary: SelectorChain::parse(&fields.salary),
            experience: SelectorChain::parse(&fields.experience),
            description: SelectorChain::parse(&fields.description),
            skills: SelectorChain::parse(&fields.skills),
            industry: SelectorChain::parse(&fields.industry),
            link: SelectorChain::parse(&fields.link),
        }
    }
}

/// Per-page context shared by every item on the page.
pub struct ItemContext<'a> {
    pub source: &'a SourceConfig,
    pub selectors: &'a SourceSelectors,
    pub page_url: &'a str,
    /// 1-based position of the page in the walk. Single-page apps keep the
    /// same URL across "next" clicks, so linkless cards are keyed by it too.
    pub page: usize,
    pub crawled_at: DateTime<Utc>,
}

/// Build a record from one job-card element.
///
/// Returns `None` only for cards with no title, company, or link at all,
/// which are layout fragments rather than postings.
pub fn extract_job(item: ElementRef<'_>, index: usize, ctx: &ItemContext<'_>) -> Option<JobRecord> {
    let s = ctx.selectors;
    let title = extract_field(item, &s.title);
    let company = extract_field(item, &s.company);
    let link = s
        .link
        .first_attr(item, "href")
        .and_then(|href| resolve_url(ctx.page_url, &href));

    if title.is_none() && company.is_none() && link.is_none() {
        tracing::debug!(index, "Skipping job card with no identifying fields");
        return None;
    }

    let salary_text = extract_field(item, &s.salary);
    let (salary_min, salary_max) = match salary_text.as_deref().and_then(parse_salary) {
        Some((min, max)) => (Some(min), Some(max)),
        None => (None, None),
    };

    let required_experience_years = extract_field(item, &s.experience)
        .as_deref()
        .and_then(parse_experience);

    let description = extract_field(item, &s.description).or_else(|| {
        fallback_description(item, salary_text.as_deref(), ctx.source.min_description_len)
    });

    let required_skills: BTreeSet<String> = s.skills.all_texts(item).into_iter().collect();

    let source_url = link.unwrap_or_else(|| format!("{}#p{}-item-{index}", ctx.page_url, ctx.page));

    Some(JobRecord {
        id: job_id(&ctx.source.name, &source_url),
        source: ctx.source.name.clone(),
        source_url,
        title,
        company,
        location: extract_field(item, &s.location),
        description,
        salary_min,
        salary_max,
        required_experience_years,
        required_skills,
        industry: extract_field(item, &s.industry),
        crawled_at: ctx.crawled_at,
    })
}

/// Fall back to the whole card text when no description selector matched,
/// unless that text is just the salary label or too short to be useful.
fn fallback_description(item: ElementRef<'_>, salary: Option<&str>, min_len: usize) -> Option<String> {
    let text = element_text(item);
    if text.is_empty() || salary == Some(text.as_str()) || text.chars().count() < min_len {
        return None;
    }
    Some(text)
}

fn resolve_url(page_url: &str, href: &str) -> Option<String> {
    if href.starts_with("javascript:") || href == "#" {
        return None;
    }
    match Url::parse(page_url) {
        Ok(base) => base.join(href).ok().map(|u| u.to_string()),
        Err(_) => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

/// Extract up to `limit` records from page number `page` of a listing.
///
/// Container selectors cascade like field selectors: the first selector that
/// matches at least one element defines the job cards. Work per page is also
/// bounded by the source's `per_page_cap`.
pub fn extract_listing(
    html: &str,
    page_url: &str,
    page: usize,
    source: &SourceConfig,
    limit: usize,
    crawled_at: DateTime<Utc>,
) -> Vec<JobRecord> {
    let selectors = SourceSelectors::compile(source);
    let document = Html::parse_document(html);
    let root = document.root_element();

    let Some((selector_index, items)) = selectors.items.iter().enumerate().find_map(|(i, sel)| {
        let items: Vec<ElementRef<'_>> = root.select(sel).collect();
        (!items.is_empty()).then_some((i, items))
    }) else {
        tracing::warn!(source = %source.name, page_url, "No job elements found with any selector");
        return Vec::new();
    };

    tracing::info!(
        source = %source.name,
        selector = %source.item_selectors[selector_index],
        found = items.len(),
        "Found job items on page"
    );

    let ctx = ItemContext {
        source,
        selectors: &selectors,
        page_url,
        page,
        crawled_at,
    };
    let take = items.len().min(source.per_page_cap).min(limit);
    items
        .into_iter()
        .take(take)
        .enumerate()
        .filter_map(|(i, item)| extract_job(item, i, &ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::testutil::{fixture_source, listing_html};

    fn first_card(html: &Html) -> ElementRef<'_> {
        let sel = Selector::parse(".card").unwrap();
        html.select(&sel).next().unwrap()
    }

    fn chain(candidates: &[&str]) -> SelectorChain {
        SelectorChain::parse(&candidates.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn first_candidate_wins_when_present() {
        let html = Html::parse_fragment(
            r#"<div class="card"><span class="a">Alpha</span><span class="b">Beta</span></div>"#,
        );
        let card = first_card(&html);
        assert_eq!(extract_field(card, &chain(&[".a", ".b"])), Some("Alpha".into()));
    }

    #[test]
    fn falls_through_missing_and_blank_candidates() {
        let html = Html::parse_fragment(
            r#"<div class="card"><span class="blank">   </span><span class="b"> Beta </span></div>"#,
        );
        let card = first_card(&html);
        assert_eq!(
            extract_field(card, &chain(&[".missing", ".blank", ".b"])),
            Some("Beta".into())
        );
    }

    #[test]
    fn absent_when_all_candidates_miss() {
        let html = Html::parse_fragment(r#"<div class="card"><span>x</span></div>"#);
        let card = first_card(&html);
        assert_eq!(extract_field(card, &chain(&[".a", ".b"])), None);
        assert_eq!(extract_field(card, &chain(&[])), None);
    }

    #[test]
    fn invalid_selectors_are_skipped() {
        let html = Html::parse_fragment(r#"<div class="card"><span class="b">Beta</span></div>"#);
        let card = first_card(&html);
        let chain = chain(&["div[[", ".b"]);
        assert_eq!(extract_field(card, &chain), Some("Beta".into()));
    }

    #[test]
    fn all_texts_uses_first_matching_candidate() {
        let html = Html::parse_fragment(
            r#"<div class="card"><ul class="tags"><li>Java</li><li>SQL</li></ul><i class="x">Go</i></div>"#,
        );
        let card = first_card(&html);
        assert_eq!(chain(&[".none", ".tags li", ".x"]).all_texts(card), vec!["Java", "SQL"]);
    }

    #[test]
    fn salary_range() {
        assert_eq!(parse_salary("25-40K"), Some((25_000, 40_000)));
        assert_eq!(parse_salary("25-40K·13薪"), Some((25_000, 40_000)));
        assert_eq!(parse_salary("15k"), Some((15_000, 15_000)));
        assert_eq!(parse_salary("15K"), Some((15_000, 15_000)));
        assert_eq!(parse_salary("15K-25K"), Some((15_000, 25_000)));
        assert_eq!(parse_salary("15k~25k·14薪"), Some((15_000, 25_000)));
        assert_eq!(parse_salary("2万-3万"), Some((20_000, 30_000)));
    }

    #[test]
    fn salary_ten_thousand_units() {
        assert_eq!(parse_salary("2-3万"), Some((20_000, 30_000)));
        assert_eq!(parse_salary("2w"), Some((20_000, 20_000)));
    }

    #[test]
    fn salary_inverted_range_is_ordered() {
        assert_eq!(parse_salary("40-25K"), Some((25_000, 40_000)));
    }

    #[test]
    fn salary_without_amount_is_absent() {
        assert_eq!(parse_salary("negotiable"), None);
        assert_eq!(parse_salary("面议"), None);
        assert_eq!(parse_salary(""), None);
        assert_eq!(parse_salary("99999999999K"), None);
    }

    #[test]
    fn experience_lower_bound() {
        assert_eq!(parse_experience("3-5年"), Some(3));
        assert_eq!(parse_experience("1年以内"), Some(1));
        assert_eq!(parse_experience("5+ years"), Some(5));
        assert_eq!(parse_experience("2 yrs"), Some(2));
    }

    #[test]
    fn experience_without_years_is_absent() {
        assert_eq!(parse_experience("不限"), None);
        assert_eq!(parse_experience("经验不限"), None);
        assert_eq!(parse_experience("本科"), None);
    }

    #[test]
    fn listing_extracts_full_records() {
        let source = fixture_source();
        let html = listing_html(&[
            r#"<a class="link" href="/job/1.html"><span class="title">Java Engineer</span></a>
               <span class="company">Acme</span><span class="area">Beijing</span>
               <span class="salary">25-40K·13薪</span>
               <ul class="tags"><li>3-5年</li><li>本科</li></ul>
               <ul class="skills"><li>Java</li><li>SQL</li></ul>
               <span class="industry">Internet</span>
               <p class="desc">Build and run payment services for millions of users.</p>"#,
        ]);
        let records = extract_listing(&html, "https://jobs.example.com/list?query=java", 1, &source, 10, Utc::now());
        assert_eq!(records.len(), 1);
        let job = &records[0];
        assert_eq!(job.title.as_deref(), Some("Java Engineer"));
        assert_eq!(job.company.as_deref(), Some("Acme"));
        assert_eq!(job.location.as_deref(), Some("Beijing"));
        assert_eq!(job.source_url, "https://jobs.example.com/job/1.html");
        assert_eq!(job.salary_min, Some(25_000));
        assert_eq!(job.salary_max, Some(40_000));
        assert_eq!(job.required_experience_years, Some(3));
        assert!(job.required_skills.contains("Java") && job.required_skills.contains("SQL"));
        assert_eq!(job.industry.as_deref(), Some("Internet"));
        assert!(job.description.as_deref().unwrap().starts_with("Build and run"));
        assert_eq!(job.id, job_id("fixture", "https://jobs.example.com/job/1.html"));
    }

    #[test]
    fn partial_records_are_kept() {
        let source = fixture_source();
        let html = listing_html(&[r#"<span class="title">Mystery Role</span>"#]);
        let records = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert_eq!(records.len(), 1);
        let job = &records[0];
        assert_eq!(job.title.as_deref(), Some("Mystery Role"));
        assert_eq!(job.company, None);
        assert_eq!(job.salary_min, None);
        assert_eq!(job.required_experience_years, None);
        assert_eq!(job.source_url, "https://jobs.example.com/list#p1-item-0");
    }

    #[test]
    fn linkless_ids_depend_on_page_number() {
        let source = fixture_source();
        let html = listing_html(&[r#"<span class="title">Mystery Role</span>"#]);
        let first = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        let second = extract_listing(&html, "https://jobs.example.com/list", 2, &source, 10, Utc::now());
        assert_eq!(second[0].source_url, "https://jobs.example.com/list#p2-item-0");
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn empty_cards_are_dropped() {
        let source = fixture_source();
        let html = listing_html(&[r#"<span class="salary">20K</span>"#, r#"<span class="title">Real</span>"#]);
        let records = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Real"));
    }

    #[test]
    fn description_fallback_uses_card_text() {
        let source = fixture_source();
        let html = listing_html(&[
            r#"<span class="title">Data Engineer</span><span class="company">Initech</span>
               <span class="other">Own the warehouse and streaming pipelines</span>"#,
        ]);
        let records = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        let description = records[0].description.as_deref().unwrap();
        assert!(description.contains("Data Engineer"));
        assert!(description.contains("streaming pipelines"));
    }

    #[test]
    fn description_fallback_rejects_short_text() {
        let source = fixture_source();
        let html = listing_html(&[r#"<span class="title">Dev</span>"#]);
        let records = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert_eq!(records[0].description, None);
    }

    #[test]
    fn description_fallback_rejects_salary_text() {
        let item = Html::parse_fragment(r#"<div class="card">25-40K·13薪 negotiable bonus!!</div>"#);
        let card = first_card(&item);
        assert_eq!(fallback_description(card, Some("25-40K·13薪 negotiable bonus!!"), 5), None);
        assert!(fallback_description(card, Some("25-40K"), 5).is_some());
    }

    #[test]
    fn listing_respects_limit_and_cap() {
        let mut source = fixture_source();
        let cards: Vec<String> = (0..6)
            .map(|i| format!(r#"<span class="title">Job {i}</span>"#))
            .collect();
        let cards: Vec<&str> = cards.iter().map(String::as_str).collect();
        let html = listing_html(&cards);

        assert_eq!(extract_listing(&html, "https://jobs.example.com/list", 1, &source, 4, Utc::now()).len(), 4);

        source.per_page_cap = 2;
        let capped = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[1].title.as_deref(), Some("Job 1"));
    }

    #[test]
    fn container_selectors_cascade() {
        let mut source = fixture_source();
        source.item_selectors = vec![".nothing-here".into(), ".card".into()];
        let html = listing_html(&[r#"<span class="title">Found</span>"#]);
        let records = extract_listing(&html, "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn no_containers_yields_empty_page() {
        let source = fixture_source();
        let records = extract_listing("<html><body><p>blocked</p></body></html>", "https://jobs.example.com/list", 1, &source, 10, Utc::now());
        assert!(records.is_empty());
    }

    #[test]
    fn builtin_selectors_extract_zhipin_markup() {
        let config = CrawlerConfig::builtin();
        let source = config.source("zhipin").unwrap();
        let html = r#"<html><body><ul class="job-list-box">
            <li class="job-card-wrapper">
              <a class="job-card-left" href="/job_detail/abc.html">
                <span class="job-name">Rust Engineer</span>
                <span class="job-area">北京·朝阳区</span>
                <span class="salary">30-50K·14薪</span>
                <ul class="tag-list"><li>5-10年</li><li>本科</li></ul>
              </a>
              <div class="company-info"><h3 class="company-name">Example Tech</h3>
                <ul class="company-tag-list"><li>互联网</li><li>D轮</li></ul></div>
              <div class="job-card-footer"><ul class="tag-list"><li>Rust</li><li>Tokio</li></ul></div>
            </li></ul></body></html>"#;
        let records = extract_listing(html, "https://www.zhipin.com/web/geek/job?query=rust", 1, source, 10, Utc::now());
        assert_eq!(records.len(), 1);
        let job = &records[0];
        assert_eq!(job.title.as_deref(), Some("Rust Engineer"));
        assert_eq!(job.company.as_deref(), Some("Example Tech"));
        assert_eq!(job.source_url, "https://www.zhipin.com/job_detail/abc.html");
        assert_eq!(job.salary_min, Some(30_000));
        assert_eq!(job.required_experience_years, Some(5));
        assert_eq!(job.industry.as_deref(), Some("互联网"));
        assert!(job.required_skills.contains("Rust"));
    }
}
