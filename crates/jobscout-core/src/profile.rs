//! Candidate profile analysis: ranking signals and query facets.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CandidateProfile;

/// Weight given to a listed skill that has no self-assessed level.
const UNLEVELED_SKILL_WEIGHT: f64 = 0.5;

/// Signals derived from a profile that the ranker consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSignals {
    /// Skills plus job-title tokens, de-duplicated, first occurrence kept.
    pub keywords: Vec<String>,
    pub industries: Vec<String>,
    /// Lower-cased skill name to weight in `[0, 1]`.
    pub skill_weights: HashMap<String, f64>,
    pub years_of_experience: u32,
}

impl ProfileSignals {
    pub fn from_profile(profile: &CandidateProfile) -> Self {
        Self::from_profile_at(profile, Utc::now().date_naive())
    }

    /// Derive signals measuring ongoing roles up to `today`.
    pub fn from_profile_at(profile: &CandidateProfile, today: NaiveDate) -> Self {
        let mut keywords: Vec<String> = Vec::new();
        let title_tokens = profile
            .work_experiences
            .iter()
            .flat_map(|exp| exp.job_title.split(|c: char| c.is_whitespace() || c == ',' || c == ';'));
        for word in profile.skills.iter().map(String::as_str).chain(title_tokens) {
            let word = word.trim();
            if !word.is_empty() && !keywords.iter().any(|k| k.eq_ignore_ascii_case(word)) {
                keywords.push(word.to_string());
            }
        }

        let mut industries: Vec<String> = Vec::new();
        for industry in profile
            .work_experiences
            .iter()
            .filter_map(|exp| exp.industry.as_deref())
            .map(str::trim)
            .filter(|i| !i.is_empty())
        {
            if !industries.iter().any(|i| i == industry) {
                industries.push(industry.to_string());
            }
        }

        let mut skill_weights: HashMap<String, f64> = profile
            .skills
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| (s.to_lowercase(), UNLEVELED_SKILL_WEIGHT))
            .collect();
        for (skill, level) in &profile.skill_levels {
            let weight = (f64::from(*level) / 10.0).clamp(0.1, 1.0);
            skill_weights.insert(skill.trim().to_lowercase(), weight);
        }

        let months: u32 = profile
            .work_experiences
            .iter()
            .map(|exp| exp.duration_months(today))
            .sum();

        Self {
            keywords,
            industries,
            skill_weights,
            years_of_experience: months / 12,
        }
    }

    /// Profile weight of a skill, matched case-insensitively; 0 when unknown.
    pub fn skill_weight(&self, skill: &str) -> f64 {
        self.skill_weights
            .get(&skill.trim().to_lowercase())
            .copied()
            .unwrap_or(0.0)
    }
}

/// Search dimension a facet covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetKind {
    Skills,
    Industry,
    Title,
}

impl FacetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacetKind::Skills => "skills",
            FacetKind::Industry => "industry",
            FacetKind::Title => "title",
        }
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One independent query derived from a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFacet {
    pub kind: FacetKind,
    pub query: String,
    /// Maximum number of records this facet contributes.
    pub quota: usize,
}

impl QueryFacet {
    /// A facet with nothing to search for (or nothing to collect) is skipped
    /// without opening a browser session.
    pub fn is_runnable(&self) -> bool {
        !self.query.trim().is_empty() && self.quota > 0
    }
}

/// Split a profile into the skills, industry, and title facets.
///
/// Each facet gets `max_results / 3`; the remainder is dropped.
pub fn derive_facets(
    profile: &CandidateProfile,
    signals: &ProfileSignals,
    max_results: usize,
) -> Vec<QueryFacet> {
    let quota = max_results / 3;
    let join = |parts: Vec<&str>| {
        parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };

    vec![
        QueryFacet {
            kind: FacetKind::Skills,
            query: join(profile.skills.iter().map(String::as_str).collect()),
            quota,
        },
        QueryFacet {
            kind: FacetKind::Industry,
            query: join(signals.industries.iter().map(String::as_str).collect()),
            quota,
        },
        QueryFacet {
            kind: FacetKind::Title,
            query: join(
                profile
                    .work_experiences
                    .iter()
                    .map(|exp| exp.job_title.as_str())
                    .collect(),
            ),
            quota,
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::WorkExperience;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn profile() -> CandidateProfile {
        CandidateProfile {
            name: "Han Meimei".into(),
            skills: vec!["Java".into(), "SQL".into(), "Kafka".into()],
            skill_levels: BTreeMap::from([("Java".to_string(), 9), ("SQL".to_string(), 5)]),
            work_experiences: vec![
                WorkExperience {
                    company_name: "Acme".into(),
                    job_title: "Backend Engineer".into(),
                    industry: Some("Internet".into()),
                    start_date: NaiveDate::from_ymd_opt(2018, 6, 1),
                    end_date: NaiveDate::from_ymd_opt(2021, 6, 1),
                    ..Default::default()
                },
                WorkExperience {
                    company_name: "Globex".into(),
                    job_title: "Senior Java Engineer".into(),
                    industry: Some("FinTech".into()),
                    start_date: NaiveDate::from_ymd_opt(2021, 7, 1),
                    end_date: None,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn signals_from_profile() {
        let signals = ProfileSignals::from_profile_at(&profile(), today());
        assert_eq!(
            signals.keywords,
            vec!["Java", "SQL", "Kafka", "Backend", "Engineer", "Senior"]
        );
        assert_eq!(signals.industries, vec!["Internet", "FinTech"]);
        // 36 months + 35 months
        assert_eq!(signals.years_of_experience, 5);
    }

    #[test]
    fn skill_weights_use_levels_and_default() {
        let signals = ProfileSignals::from_profile_at(&profile(), today());
        assert!((signals.skill_weight("java") - 0.9).abs() < 1e-9);
        assert!((signals.skill_weight("SQL") - 0.5).abs() < 1e-9);
        assert!((signals.skill_weight("kafka") - UNLEVELED_SKILL_WEIGHT).abs() < 1e-9);
        assert_eq!(signals.skill_weight("cobol"), 0.0);
    }

    #[test]
    fn skill_levels_are_clamped() {
        let p = CandidateProfile {
            skill_levels: BTreeMap::from([("Go".to_string(), 15), ("Perl".to_string(), 0)]),
            ..Default::default()
        };
        let signals = ProfileSignals::from_profile_at(&p, today());
        assert_eq!(signals.skill_weight("go"), 1.0);
        assert!((signals.skill_weight("perl") - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_profile_has_empty_signals() {
        let signals = ProfileSignals::from_profile_at(&CandidateProfile::default(), today());
        assert!(signals.keywords.is_empty());
        assert!(signals.industries.is_empty());
        assert_eq!(signals.years_of_experience, 0);
    }

    #[test]
    fn facets_split_quota_evenly() {
        let p = profile();
        let signals = ProfileSignals::from_profile_at(&p, today());
        let facets = derive_facets(&p, &signals, 31);
        assert_eq!(facets.len(), 3);
        assert!(facets.iter().all(|f| f.quota == 10));
        assert_eq!(facets[0].kind, FacetKind::Skills);
        assert_eq!(facets[0].query, "Java SQL Kafka");
        assert_eq!(facets[1].query, "Internet FinTech");
        assert_eq!(facets[2].query, "Backend Engineer Senior Java Engineer");
    }

    #[test]
    fn empty_dimensions_are_not_runnable() {
        let p = CandidateProfile {
            skills: vec!["Rust".into()],
            ..Default::default()
        };
        let signals = ProfileSignals::from_profile_at(&p, today());
        let facets = derive_facets(&p, &signals, 9);
        assert!(facets[0].is_runnable());
        assert!(!facets[1].is_runnable());
        assert!(!facets[2].is_runnable());
    }

    #[test]
    fn small_budget_yields_zero_quota() {
        let p = profile();
        let signals = ProfileSignals::from_profile_at(&p, today());
        let facets = derive_facets(&p, &signals, 2);
        assert!(facets.iter().all(|f| f.quota == 0 && !f.is_runnable()));
    }
}
