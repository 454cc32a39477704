//! Relevance ranking of scraped jobs against a candidate's profile signals.
//!
//! The composite score is a weighted sum of three sub-scores in `[0, 1]`:
//!
//! | signal     | rule                                                          |
//! |------------|---------------------------------------------------------------|
//! | skill      | mean profile weight over the job's required skills            |
//! | industry   | 1.0 if any profile industry is a substring of the job's       |
//! | experience | 1.0 / 0.7 / 0.3 tiers, 1.0 when the job states no requirement |
//!
//! Scores are transient: they are computed for the sort and then dropped.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::JobRecord;
use crate::profile::ProfileSignals;

/// Weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub skill: f64,
    pub industry: f64,
    pub experience: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            skill: 0.4,
            industry: 0.3,
            experience: 0.3,
        }
    }
}

impl RankingWeights {
    pub fn validate(&self) -> Result<(), AppError> {
        let all = [self.skill, self.industry, self.experience];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AppError::ConfigError(format!(
                "ranking weights must be finite and non-negative: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Per-job breakdown of the relevance score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceScore {
    pub skill: f64,
    pub industry: f64,
    pub experience: f64,
    pub composite: f64,
}

/// Scores and orders jobs by relevance to a profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceRanker {
    weights: RankingWeights,
}

impl RelevanceRanker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> RankingWeights {
        self.weights
    }

    /// Return the jobs sorted by descending composite score.
    ///
    /// The sort is stable: jobs with equal scores keep their input order.
    pub fn rank(&self, jobs: Vec<JobRecord>, signals: &ProfileSignals) -> Vec<JobRecord> {
        self.rank_scored(jobs, signals)
            .into_iter()
            .map(|(job, _)| job)
            .collect()
    }

    /// Like [`rank`](Self::rank) but keeps each job's score alongside it.
    pub fn rank_scored(
        &self,
        jobs: Vec<JobRecord>,
        signals: &ProfileSignals,
    ) -> Vec<(JobRecord, RelevanceScore)> {
        let mut scored: Vec<(JobRecord, RelevanceScore)> = jobs
            .into_iter()
            .map(|job| {
                let score = self.score(&job, signals);
                (job, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.composite.total_cmp(&a.1.composite));
        scored
    }

    pub fn score(&self, job: &JobRecord, signals: &ProfileSignals) -> RelevanceScore {
        let skill = skill_score(job, signals);
        let industry = industry_score(job, signals);
        let experience = experience_score(job, signals.years_of_experience);
        let composite = skill * self.weights.skill
            + industry * self.weights.industry
            + experience * self.weights.experience;
        RelevanceScore {
            skill,
            industry,
            experience,
            composite,
        }
    }
}

fn skill_score(job: &JobRecord, signals: &ProfileSignals) -> f64 {
    if job.required_skills.is_empty() {
        return 0.0;
    }
    let total: f64 = job
        .required_skills
        .iter()
        .map(|skill| signals.skill_weight(skill))
        .sum();
    total / job.required_skills.len() as f64
}

fn industry_score(job: &JobRecord, signals: &ProfileSignals) -> f64 {
    let Some(job_industry) = job.industry.as_deref() else {
        return 0.0;
    };
    let job_industry = job_industry.to_lowercase();
    let matched = signals
        .industries
        .iter()
        .any(|industry| job_industry.contains(&industry.to_lowercase()));
    if matched { 1.0 } else { 0.0 }
}

fn experience_score(job: &JobRecord, profile_years: u32) -> f64 {
    let Some(required) = job.required_experience_years else {
        return 1.0;
    };
    let years = f64::from(profile_years);
    let required = f64::from(required);
    if years >= required {
        1.0
    } else if years >= required * 0.7 {
        0.7
    } else {
        0.3
    }
}
