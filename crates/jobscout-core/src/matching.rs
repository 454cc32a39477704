//! Job matching: a cheap relevance pre-filter in front of the AI scorer.
//!
//! The [`RelevanceRanker`] decides which jobs are worth an expensive
//! [`MatchScorer`] call. Only the top `prefilter_limit` ranked jobs are
//! scored; the final order comes from the scorer's overall score.
//!
//! The reverse direction, candidates for one job, pre-filters profiles on
//! the job's required skills instead.

use chrono::Utc;

use crate::error::AppError;
use crate::models::{CandidateProfile, JobRecord, JobSearchCriteria, MatchResult};
use crate::profile::ProfileSignals;
use crate::ranker::RelevanceRanker;
use crate::traits::{JobStore, MatchScorer};

/// Overall score at or above which a match is recommended.
pub const RECOMMENDATION_THRESHOLD: f64 = 0.7;

const DEFAULT_PREFILTER_LIMIT: usize = 10;

#[derive(Clone)]
pub struct MatchService<M: MatchScorer> {
    scorer: M,
    ranker: RelevanceRanker,
    prefilter_limit: usize,
}

impl<M: MatchScorer> MatchService<M> {
    pub fn new(scorer: M, ranker: RelevanceRanker) -> Self {
        Self {
            scorer,
            ranker,
            prefilter_limit: DEFAULT_PREFILTER_LIMIT,
        }
    }

    /// Number of top-ranked jobs sent to the scorer per request.
    pub fn with_prefilter_limit(mut self, limit: usize) -> Self {
        self.prefilter_limit = limit;
        self
    }

    /// Score one job with the AI scorer and attach its written analysis.
    pub async fn calculate_match(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
    ) -> Result<MatchResult, AppError> {
        let score = self.scorer.calculate_match_score(profile, job).await?;
        let suggestions = self
            .scorer
            .generate_match_analysis(profile, job, &score)
            .await?;
        Ok(MatchResult {
            profile_id: profile.id,
            job_id: job.id.clone(),
            overall_score: score.overall_score,
            category_scores: score.category_scores,
            analysis: score.analysis,
            suggestions,
            matched_at: Utc::now(),
            recommended: score.overall_score >= RECOMMENDATION_THRESHOLD,
        })
    }

    /// Pre-filter `jobs` by relevance, score the survivors, and return the
    /// results sorted by descending overall score.
    ///
    /// A job whose scoring fails is left out; the others are still returned.
    pub async fn match_jobs(&self, profile: &CandidateProfile, jobs: Vec<JobRecord>) -> Vec<MatchResult> {
        let signals = ProfileSignals::from_profile(profile);
        let candidates = jobs.len();
        let shortlist: Vec<JobRecord> = self
            .ranker
            .rank(jobs, &signals)
            .into_iter()
            .take(self.prefilter_limit)
            .collect();
        tracing::info!(
            profile = %profile.name,
            candidates,
            shortlisted = shortlist.len(),
            "Scoring shortlisted jobs"
        );

        let mut results = Vec::with_capacity(shortlist.len());
        for job in &shortlist {
            match self.calculate_match(profile, job).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Match scoring failed, skipping job");
                }
            }
        }
        results.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
        results
    }

    /// Match against jobs already in `store`, using criteria derived from
    /// the profile to pick at most `limit` candidates.
    pub async fn match_jobs_from_store<S: JobStore>(
        &self,
        profile: &CandidateProfile,
        store: &S,
        limit: usize,
    ) -> Result<Vec<MatchResult>, AppError> {
        let criteria = criteria_for(profile);
        let jobs = store.search(&criteria, limit).await?;
        Ok(self.match_jobs(profile, jobs).await)
    }

    /// Stored jobs whose match clears [`RECOMMENDATION_THRESHOLD`], best first.
    pub async fn recommended_jobs<S: JobStore>(
        &self,
        profile: &CandidateProfile,
        store: &S,
        limit: usize,
    ) -> Result<Vec<JobRecord>, AppError> {
        let mut jobs = Vec::new();
        for result in self.match_jobs_from_store(profile, store, limit).await? {
            if !result.recommended {
                continue;
            }
            if let Some(job) = store.get(&result.job_id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Score candidate profiles against one job, best first.
    ///
    /// Profiles sharing none of the job's required skills are skipped before
    /// scoring, and at most `limit` of the rest are scored. A job without
    /// required skills keeps every profile. Profiles whose scoring fails are
    /// left out.
    pub async fn match_profiles_for_job(
        &self,
        job: &JobRecord,
        profiles: &[CandidateProfile],
        limit: usize,
    ) -> Vec<MatchResult> {
        let shortlist: Vec<&CandidateProfile> = profiles
            .iter()
            .filter(|profile| shares_required_skill(profile, job))
            .take(limit)
            .collect();
        tracing::info!(
            job_id = %job.id,
            candidates = profiles.len(),
            shortlisted = shortlist.len(),
            "Scoring shortlisted profiles"
        );

        let mut results = Vec::with_capacity(shortlist.len());
        for profile in shortlist {
            match self.calculate_match(profile, job).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(profile = %profile.name, job_id = %job.id, error = %e, "Match scoring failed, skipping profile");
                }
            }
        }
        results.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
        results
    }

    /// Profiles whose match with `job` clears [`RECOMMENDATION_THRESHOLD`],
    /// best first. Results are joined back to profiles by id, so profiles
    /// without one are never returned.
    pub async fn recommended_profiles_for_job(
        &self,
        job: &JobRecord,
        profiles: &[CandidateProfile],
        limit: usize,
    ) -> Vec<CandidateProfile> {
        self.match_profiles_for_job(job, profiles, limit)
            .await
            .into_iter()
            .filter(|result| result.recommended)
            .filter_map(|result| {
                let id = result.profile_id?;
                profiles.iter().find(|p| p.id == Some(id)).cloned()
            })
            .collect()
    }
}

fn shares_required_skill(profile: &CandidateProfile, job: &JobRecord) -> bool {
    job.required_skills.is_empty()
        || job.required_skills.iter().any(|required| {
            let required = required.to_lowercase();
            profile.skills.iter().any(|skill| skill.to_lowercase() == required)
        })
}

/// Store criteria for a profile: any of its skills, and no more required
/// experience than the candidate has. Profiles without work history do not
/// constrain experience.
pub fn criteria_for(profile: &CandidateProfile) -> JobSearchCriteria {
    let max_experience_years = if profile.work_experiences.is_empty() {
        None
    } else {
        Some(ProfileSignals::from_profile(profile).years_of_experience)
    };
    JobSearchCriteria {
        skills: profile.skills.clone(),
        max_experience_years,
    }
}
