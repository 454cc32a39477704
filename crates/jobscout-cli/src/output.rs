use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use jobscout_core::{JobRecord, MatchResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

/// Flat CSV row for a job; skills are joined with `;`.
#[derive(Serialize)]
struct JobRow<'a> {
    id: &'a str,
    source: &'a str,
    title: Option<&'a str>,
    company: Option<&'a str>,
    location: Option<&'a str>,
    salary_min: Option<u32>,
    salary_max: Option<u32>,
    required_experience_years: Option<u32>,
    required_skills: String,
    industry: Option<&'a str>,
    source_url: &'a str,
    crawled_at: String,
}

impl<'a> From<&'a JobRecord> for JobRow<'a> {
    fn from(job: &'a JobRecord) -> Self {
        Self {
            id: &job.id,
            source: &job.source,
            title: job.title.as_deref(),
            company: job.company.as_deref(),
            location: job.location.as_deref(),
            salary_min: job.salary_min,
            salary_max: job.salary_max,
            required_experience_years: job.required_experience_years,
            required_skills: job
                .required_skills
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            industry: job.industry.as_deref(),
            source_url: &job.source_url,
            crawled_at: job.crawled_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct MatchRow<'a> {
    job_id: &'a str,
    overall_score: f64,
    recommended: bool,
    skills_score: Option<f64>,
    experience_score: Option<f64>,
    education_score: Option<f64>,
    suggestions: &'a str,
}

impl<'a> From<&'a MatchResult> for MatchRow<'a> {
    fn from(result: &'a MatchResult) -> Self {
        let category = |name: &str| result.category_scores.get(name).copied();
        Self {
            job_id: &result.job_id,
            overall_score: result.overall_score,
            recommended: result.recommended,
            skills_score: category("skills"),
            experience_score: category("experience"),
            education_score: category("education"),
            suggestions: &result.suggestions,
        }
    }
}

pub fn write_jobs<W: Write>(out: W, jobs: &[JobRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, jobs),
        OutputFormat::Csv => write_csv(out, jobs.iter().map(JobRow::from)),
    }
}

pub fn write_matches<W: Write>(out: W, results: &[MatchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(out, results),
        OutputFormat::Csv => write_csv(out, results.iter().map(MatchRow::from)),
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_csv<W: Write, T: Serialize>(out: W, rows: impl Iterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRecord {
        JobRecord {
            id: "j1".into(),
            source: "zhipin".into(),
            source_url: "https://www.zhipin.com/job_detail/j1.html".into(),
            title: Some("Rust, Backend".into()),
            company: Some("Acme".into()),
            location: None,
            description: Some("long text that is not exported to csv".into()),
            salary_min: Some(20_000),
            salary_max: Some(30_000),
            required_experience_years: Some(3),
            required_skills: ["Rust".to_string(), "Tokio".to_string()].into_iter().collect(),
            industry: None,
            crawled_at: Default::default(),
        }
    }

    fn render_jobs(format: OutputFormat) -> String {
        let mut buf = Vec::new();
        write_jobs(&mut buf, &[job()], format).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_csv_jobs_are_flat() {
        let csv = render_jobs(OutputFormat::Csv);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,source,title,company,location,salary_min,salary_max,required_experience_years,required_skills,industry,source_url,crawled_at"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("j1,zhipin,\"Rust, Backend\",Acme,,20000,30000,3,Rust;Tokio,,"));
        assert!(!row.contains("long text"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_json_jobs_keep_every_field() {
        let json: serde_json::Value = serde_json::from_str(&render_jobs(OutputFormat::Json)).unwrap();
        assert_eq!(json[0]["id"], "j1");
        assert_eq!(json[0]["description"], "long text that is not exported to csv");
        assert_eq!(json[0]["required_skills"], serde_json::json!(["Rust", "Tokio"]));
    }

    #[test]
    fn test_csv_matches_spread_category_scores() {
        let result = MatchResult {
            profile_id: None,
            job_id: "j1".into(),
            overall_score: 0.75,
            category_scores: [("skills".to_string(), 0.9)].into_iter().collect(),
            analysis: Default::default(),
            suggestions: "learn SQL".into(),
            matched_at: Default::default(),
            recommended: true,
        };
        let mut buf = Vec::new();
        write_matches(&mut buf, &[result], OutputFormat::Csv).unwrap();
        let csv = String::from_utf8(buf).unwrap();
        assert!(csv.contains("j1,0.75,true,0.9,,,learn SQL"));
    }
}
