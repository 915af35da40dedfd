//! Error types for evalforge operations.
//!
//! Defines error types for the major subsystems:
//! - Dataset loading and per-record validation
//! - LLM API interactions
//! - Prediction runner and state persistence
//! - Judge verdict parsing

use thiserror::Error;

/// Errors that can occur while loading or validating a question set.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset file not found or unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse dataset: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Question '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: String },

    #[error("Multiple-choice question '{0}' has an empty choices list")]
    EmptyChoices(String),

    #[error("Exact-match question '{0}' must not carry choices")]
    ChoicesNotAllowed(String),

    #[error("Duplicate question id '{0}' in dataset")]
    DuplicateId(String),

    #[error("Dataset is empty")]
    Empty,
}

/// Errors that can occur during LLM operations.
///
/// `RateLimited` and `Timeout` are transient and eligible for retry;
/// the rest propagate immediately.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: EVALFORGE_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),
}

impl LlmError {
    /// Whether a failed call may succeed on a later attempt.
    ///
    /// Authentication and malformed-request failures are final; rate limits,
    /// timeouts and transport errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::Timeout(_) | LlmError::RequestFailed(_) => true,
            // 5xx responses are server-side hiccups, 4xx are our fault
            LlmError::ApiError { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur during a prediction run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("State persistence error: {0}")]
    State(#[from] StateError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors that can occur while reading or writing persisted run state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse state file '{path}': {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during the judge pass.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("No prediction recorded for question '{0}'")]
    MissingPrediction(String),

    #[error("State persistence error: {0}")]
    State(#[from] StateError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Timeout(30).is_transient());
        assert!(LlmError::RequestFailed("connection reset".into()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "overloaded".into()
        }
        .is_transient());

        assert!(!LlmError::MissingApiKey.is_transient());
        assert!(!LlmError::ParseError("bad json".into()).is_transient());
        assert!(!LlmError::ApiError {
            code: 401,
            message: "invalid key".into()
        }
        .is_transient());
    }
}
