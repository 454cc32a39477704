use std::collections::BTreeMap;
use std::time::Duration;

use jobscout_core::error::AppError;
use jobscout_core::models::{CandidateProfile, JobRecord, MatchScore};
use jobscout_core::traits::MatchScorer;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SYSTEM_PROMPT: &str = "You are a recruiting assistant. You compare a candidate's resume with a job posting and explain how well they fit. Be concrete and brief.";

/// Score dimensions requested from the model, each on a 0-100 scale.
const CATEGORIES: [&str; 3] = ["skills", "experience", "education"];

/// OpenAI-compatible LLM client that scores candidate/job fit.
///
/// Works with any OpenAI-compatible API, including:
/// - OpenAI directly (`https://api.openai.com/v1`)
/// - DashScope's compatible mode (`https://dashscope.aliyuncs.com/compatible-mode/v1`)
#[derive(Clone)]
pub struct OpenAiMatchScorer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    system_prompt: String,
}

impl OpenAiMatchScorer {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    /// One chat completion; returns the assistant message text.
    async fn complete(
        &self,
        prompt: String,
        response_format: Option<ResponseFormat>,
    ) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            response_format,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::HttpError(format!("LLM request timeout after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })
    }
}

/// Map a non-success API response to an error, preferring the API's own message.
fn status_error(status_code: u16, body: &str) -> AppError {
    if status_code == 429 {
        return AppError::RateLimitExceeded;
    }
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status_code, body));
    AppError::LlmError {
        message,
        status_code,
        retryable: status_code >= 500,
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<JsonSchemaWrapper>,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ---- Match scoring ----

#[derive(Debug, Deserialize)]
struct RatedCategory {
    score: f64,
    reason: String,
}

/// Structured answer to the scoring prompt, scores on 0-100.
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    skills: RatedCategory,
    experience: RatedCategory,
    education: RatedCategory,
    overall: RatedCategory,
}

impl ScoreResponse {
    fn into_match_score(self) -> MatchScore {
        let mut category_scores = BTreeMap::new();
        let mut analysis = BTreeMap::new();
        for (name, rated) in [
            ("skills", self.skills),
            ("experience", self.experience),
            ("education", self.education),
        ] {
            category_scores.insert(name.to_string(), normalize(rated.score));
            analysis.insert(name.to_string(), rated.reason);
        }
        analysis.insert("overall".to_string(), self.overall.reason);
        MatchScore {
            overall_score: normalize(self.overall.score),
            category_scores,
            analysis,
        }
    }
}

/// 0-100 model score to a 0.0-1.0 fraction.
fn normalize(score: f64) -> f64 {
    if score.is_finite() {
        (score / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn score_schema() -> serde_json::Value {
    let rated = serde_json::json!({
        "type": "object",
        "properties": {
            "score": { "type": "number" },
            "reason": { "type": "string" }
        },
        "required": ["score", "reason"],
        "additionalProperties": false
    });
    let mut properties = serde_json::Map::new();
    for name in CATEGORIES.iter().chain(std::iter::once(&"overall")) {
        properties.insert(name.to_string(), rated.clone());
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": ["skills", "experience", "education", "overall"],
        "additionalProperties": false
    })
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("unknown")
}

/// One line per role: title, company, period, and skills used.
fn describe_experience(profile: &CandidateProfile) -> String {
    if profile.work_experiences.is_empty() {
        return "none listed".to_string();
    }
    profile
        .work_experiences
        .iter()
        .map(|w| {
            let start = w
                .start_date
                .map(|d| d.format("%Y-%m").to_string())
                .unwrap_or_else(|| "?".to_string());
            let end = w
                .end_date
                .map(|d| d.format("%Y-%m").to_string())
                .unwrap_or_else(|| "present".to_string());
            let mut line = format!("- {} at {} ({start} to {end})", w.job_title, w.company_name);
            if !w.used_skills.is_empty() {
                line.push_str(&format!(", used {}", w.used_skills.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn resume_block(profile: &CandidateProfile) -> String {
    format!(
        "Education: {}\nWork experience:\n{}\nSkills: {}",
        or_unknown(profile.education.as_deref()),
        describe_experience(profile),
        profile.skills.join(", ")
    )
}

fn score_prompt(profile: &CandidateProfile, job: &JobRecord) -> String {
    let skills: Vec<&str> = job.required_skills.iter().map(String::as_str).collect();
    let experience = job
        .required_experience_years
        .map(|y| format!("{y} years"))
        .unwrap_or_else(|| "not stated".to_string());
    format!(
        "Compare this resume with the job posting.\n\n\
         Resume:\n{}\n\n\
         Job posting:\nTitle: {}\nCompany: {}\nLocation: {}\nRequired skills: {}\nRequired experience: {}\nDescription: {}\n\n\
         Score skills, experience, education and overall fit from 0 to 100, each with a one-sentence reason.",
        resume_block(profile),
        or_unknown(job.title.as_deref()),
        or_unknown(job.company.as_deref()),
        or_unknown(job.location.as_deref()),
        if skills.is_empty() { "not stated".to_string() } else { skills.join(", ") },
        experience,
        or_unknown(job.description.as_deref()),
    )
}

fn analysis_prompt(profile: &CandidateProfile, job: &JobRecord, score: &MatchScore) -> String {
    let mut scores = format!("overall: {:.0}\n", score.overall_score * 100.0);
    for (name, value) in &score.category_scores {
        scores.push_str(&format!("{name}: {:.0}\n", value * 100.0));
    }
    for (name, reason) in &score.analysis {
        scores.push_str(&format!("{name} reason: {reason}\n"));
    }
    format!(
        "Candidate: {}\nJob: {} at {}\n\nMatch scores (0-100):\n{}\n\
         Write a short report covering strengths, gaps, concrete suggestions for improvement, \
         and how competitive the candidate is for this role.",
        profile.name,
        or_unknown(job.title.as_deref()),
        or_unknown(job.company.as_deref()),
        scores
    )
}

impl MatchScorer for OpenAiMatchScorer {
    async fn calculate_match_score(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
    ) -> Result<MatchScore, AppError> {
        let format = ResponseFormat {
            format_type: "json_schema".to_string(),
            json_schema: Some(JsonSchemaWrapper {
                name: "match_score".to_string(),
                strict: true,
                schema: score_schema(),
            }),
        };
        let content = self.complete(score_prompt(profile, job), Some(format)).await?;

        let parsed: ScoreResponse = serde_json::from_str(&content).map_err(|e| AppError::LlmError {
            message: format!("LLM returned invalid score JSON: {}. Raw: {}", e, content),
            status_code: 200,
            retryable: false,
        })?;
        let score = parsed.into_match_score();
        tracing::debug!(job_id = %job.id, overall = score.overall_score, "Match scored");
        Ok(score)
    }

    async fn generate_match_analysis(
        &self,
        profile: &CandidateProfile,
        job: &JobRecord,
        score: &MatchScore,
    ) -> Result<String, AppError> {
        self.complete(analysis_prompt(profile, job, score), None).await
    }
}
