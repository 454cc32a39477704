use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One scraped job posting.
///
/// Records are built by the extraction engine and never updated in place.
/// Every field except the identity and provenance fields may be absent
/// because listing markup drifts; a missing field is a partial record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// SHA-256 of `source|source_url` (see [`job_id`]).
    pub id: String,
    pub source: String,
    pub source_url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Lower salary bound in base currency units.
    pub salary_min: Option<u32>,
    /// Upper salary bound in base currency units. Never below `salary_min`.
    pub salary_max: Option<u32>,
    pub required_experience_years: Option<u32>,
    pub required_skills: BTreeSet<String>,
    pub industry: Option<String>,
    /// Set at extraction time.
    pub crawled_at: DateTime<Utc>,
}

/// A candidate profile as produced by the resume parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub id: Option<Uuid>,
    pub name: String,
    pub skills: Vec<String>,
    /// Self-assessed skill levels on a 1-10 scale.
    pub skill_levels: BTreeMap<String, u32>,
    pub work_experiences: Vec<WorkExperience>,
    pub education: Option<String>,
}

/// One role in a candidate's work history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkExperience {
    pub company_name: String,
    pub job_title: String,
    pub industry: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// `None` means the role is ongoing.
    pub end_date: Option<NaiveDate>,
    pub used_skills: Vec<String>,
}

impl WorkExperience {
    /// Length of the role in whole months, measured up to `today` for
    /// ongoing roles. Unknown start dates count as zero.
    pub fn duration_months(&self, today: NaiveDate) -> u32 {
        let Some(start) = self.start_date else {
            return 0;
        };
        let end = self.end_date.unwrap_or(today);
        let months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
        months.max(0) as u32
    }
}

/// Query against the document store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSearchCriteria {
    /// Matches jobs requiring any of these skills (case-insensitive).
    pub skills: Vec<String>,
    /// Matches jobs whose required experience does not exceed this.
    pub max_experience_years: Option<u32>,
}

/// Score map returned by the AI match scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchScore {
    pub overall_score: f64,
    pub category_scores: BTreeMap<String, f64>,
    pub analysis: BTreeMap<String, String>,
}

/// Final match between a candidate profile and one job.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub profile_id: Option<Uuid>,
    pub job_id: String,
    pub overall_score: f64,
    pub category_scores: BTreeMap<String, f64>,
    pub analysis: BTreeMap<String, String>,
    pub suggestions: String,
    pub matched_at: DateTime<Utc>,
    pub recommended: bool,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable identity of a posting within the document store.
pub fn job_id(source: &str, source_url: &str) -> String {
    compute_hash(&format!("{source}|{source_url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_job_id_depends_on_source_and_url() {
        let a = job_id("zhipin", "https://www.zhipin.com/job_detail/1.html");
        let b = job_id("zhipin", "https://www.zhipin.com/job_detail/2.html");
        let c = job_id("lagou", "https://www.zhipin.com/job_detail/1.html");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, job_id("zhipin", "https://www.zhipin.com/job_detail/1.html"));
    }

    #[test]
    fn test_duration_months() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let exp = WorkExperience {
            start_date: NaiveDate::from_ymd_opt(2020, 3, 15),
            end_date: NaiveDate::from_ymd_opt(2022, 9, 1),
            ..Default::default()
        };
        assert_eq!(exp.duration_months(today), 30);

        let ongoing = WorkExperience {
            start_date: NaiveDate::from_ymd_opt(2023, 6, 1),
            ..Default::default()
        };
        assert_eq!(ongoing.duration_months(today), 12);

        assert_eq!(WorkExperience::default().duration_months(today), 0);
    }

    #[test]
    fn test_duration_never_negative() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let exp = WorkExperience {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert_eq!(exp.duration_months(today), 0);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: CandidateProfile = serde_json::from_value(serde_json::json!({
            "name": "Li Lei",
            "skills": ["Java", "SQL"],
            "skill_levels": {"Java": 8}
        }))
        .unwrap();
        assert_eq!(profile.skills.len(), 2);
        assert!(profile.work_experiences.is_empty());
        assert_eq!(profile.skill_levels.get("Java"), Some(&8));
    }
}
