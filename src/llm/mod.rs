//! LLM integration for evalforge.
//!
//! Provides a chat-completion client for OpenAI-compatible endpoints and a
//! retry policy for transient failures. The client performs exactly one
//! network call per request; retries are applied by callers through
//! [`retry::call_with_retry`], so caching and retry budgets stay with the
//! orchestration layer rather than inside the transport.

pub mod client;
pub mod retry;

pub use client::{
    ChatClient, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
pub use retry::{call_with_retry, RetryPolicy};
