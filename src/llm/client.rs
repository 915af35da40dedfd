//! Chat-completion client for OpenAI-compatible endpoints.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature. The harness defaults to 0 for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of completion tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the completion token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a chat-completion request.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// The completion text of the first choice.
    pub text: String,
    /// Token usage, when the endpoint reports it.
    pub usage: Option<Usage>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for providers that can produce chat completions.
///
/// The harness and judge are written against this trait so tests can
/// substitute a stub provider with canned responses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Issue one completion request. No retries, no caching.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatClient {
    /// HTTP client with the request timeout baked in.
    http_client: Client,
    /// Base URL for the API, without the `/chat/completions` suffix.
    api_base: String,
    /// Bearer credential, if the endpoint requires one.
    api_key: Option<String>,
}

impl ChatClient {
    /// Create a client with explicit configuration.
    pub fn new(api_base: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_base,
            api_key,
        }
    }

    /// Create a client from environment variables.
    ///
    /// Reads `EVALFORGE_API_BASE` (defaults to the OpenRouter endpoint) and
    /// `EVALFORGE_API_KEY` (required).
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("EVALFORGE_API_BASE")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let api_key = env::var("EVALFORGE_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        Ok(Self::new(
            api_base,
            Some(api_key),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Check if a credential is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Wire structure for the OpenAI-compatible response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

/// Error body some endpoints return alongside a non-2xx status.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://evalforge.local")
            .header("X-Title", "evalforge");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request.json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(REQUEST_TIMEOUT_SECS)
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            // Prefer the structured error body when the endpoint provides one
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("No choices in API response".to_string()))?;

        Ok(GenerationResponse {
            text,
            usage: api_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are helpful.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You are helpful.");

        let user = Message::user("Hello");
        assert_eq!(user.role, "user");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("deepseek-chat", vec![Message::user("test")])
            .with_temperature(0.0)
            .with_max_tokens(2048);

        assert_eq!(request.model, "deepseek-chat");
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(2048));
    }

    #[test]
    fn test_request_serialization_skips_unset_params() {
        let request = GenerationRequest::new("m", vec![Message::user("hi")]);
        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_chat_client_configuration() {
        let client = ChatClient::new(
            "http://localhost:4000".to_string(),
            Some("test-key".to_string()),
            Duration::from_secs(5),
        );
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert!(client.has_api_key());

        let anon = ChatClient::new(
            "http://localhost:4000".to_string(),
            None,
            Duration::from_secs(5),
        );
        assert!(!anon.has_api_key());
    }

    #[tokio::test]
    async fn test_generate_connection_error_is_transient() {
        // Port unlikely to have a listener; should surface as RequestFailed
        let client = ChatClient::new(
            "http://localhost:65535".to_string(),
            None,
            Duration::from_secs(2),
        );

        let request = GenerationRequest::new("m", vec![Message::user("test")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(err.is_transient());
    }
}
