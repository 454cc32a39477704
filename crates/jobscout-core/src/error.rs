use thiserror::Error;

/// Application-wide error types for jobscout.
///
/// A missing field during extraction is not represented here: absent values
/// are `None` on the record and never surface as errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown source name or invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The site kept redirecting to its bot-check page after every escalation.
    #[error("Bot challenge on source '{site}' at {url}")]
    BotChallenge { site: String, url: String },

    /// A navigation, ready-wait, or page action exceeded its deadline.
    #[error("Session {operation} timed out after {secs} seconds")]
    SessionTimeout { operation: String, secs: u64 },

    /// The session was force-closed (crawl stopped) while in use.
    #[error("Session '{0}' is closed")]
    SessionClosed(String),

    /// Another session already holds this registry key.
    #[error("Session '{0}' is already active")]
    SessionBusy(String),

    /// Browser process or CDP failure.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Document store operation failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::SessionTimeout { .. }
            | AppError::RateLimitExceeded => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error must abort a whole orchestrated call
    /// instead of being contained to one facet or session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::ConfigError(_))
    }

    pub(crate) fn timeout(operation: &str, secs: u64) -> Self {
        AppError::SessionTimeout {
            operation: operation.to_string(),
            secs,
        }
    }
}
