//! LLM provider abstractions for faithful-runtime.
//!
//! The pipeline treats the LLM as a black box behind [`LlmProvider`]:
//! prompts in, completions out. Retry, caching and transport concerns
//! live in providers and provider decorators, never in the pipeline.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

mod factory;
mod retry;
pub mod scripted;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use retry::{RetryPolicy, RetryingProvider};
pub use scripted::ScriptedProvider;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider returned no generation for this prompt")]
    MissingGeneration,
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Pipeline stage an LLM call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 1: answer → statements
    StatementExtraction,

    /// Stage 2: context + statements → verdicts
    VerdictEvaluation,

    /// Re-formatting a malformed structured reply
    Repair,
}

impl Stage {
    /// Stable identifier for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StatementExtraction => "statement_extraction",
            Stage::VerdictEvaluation => "verdict_evaluation",
            Stage::Repair => "repair",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracing context passed with a batch of prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Index of the sample group being processed
    pub group: usize,

    /// Stage issuing the calls
    pub stage: Stage,
}

impl CallContext {
    pub fn new(group: usize, stage: Stage) -> Self {
        Self { group, stage }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// Upper bound for one call, retries included
    #[serde(with = "crate::config::duration_str")]
    pub timeout: Duration,

    /// Enable prompt caching (Anthropic-specific)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            prompt_caching: false,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Only `complete` is required. `generate` issues a batch of independent
/// prompts; providers with a native batch endpoint may override it, as long
/// as results stay in prompt order.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Execute independent completions concurrently.
    ///
    /// Returns one result per prompt, in prompt order. Each call is bounded
    /// by `config.timeout`; a call that exceeds it yields
    /// [`ProviderError::Timeout`] without affecting the others.
    async fn generate(
        &self,
        prompts: Vec<Vec<ChatMessage>>,
        config: &CompletionConfig,
        ctx: &CallContext,
    ) -> Vec<Result<CompletionResponse, ProviderError>> {
        let calls = prompts.into_iter().enumerate().map(|(prompt, messages)| {
            let span = tracing::debug_span!(
                "llm_call",
                provider = self.name(),
                group = ctx.group,
                stage = %ctx.stage,
                prompt,
            );

            async move {
                match tokio::time::timeout(config.timeout, self.complete(messages, config)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(config.timeout)),
                }
            }
            .instrument(span)
        });

        futures::future::join_all(calls).await
    }

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for metrics.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimate: ~4 chars per token
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_chat_message_creation() {
        let system = ChatMessage::system("You are a careful fact checker.");
        assert_eq!(system.role, "system");

        let user = ChatMessage::user("Hello!");
        assert_eq!(user.role, "user");

        let assistant = ChatMessage::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::ApiError { status: 529, message: "overloaded".into() }.is_retryable());
        assert!(!ProviderError::ApiError { status: 400, message: "bad".into() }.is_retryable());
        assert!(!ProviderError::AuthError.is_retryable());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::StatementExtraction.to_string(), "statement_extraction");
        assert_eq!(
            serde_json::to_value(Stage::VerdictEvaluation).unwrap(),
            "verdict_evaluation"
        );
    }

    #[tokio::test]
    async fn test_generate_preserves_prompt_order() {
        let provider = ScriptedProvider::new(|prompt| Ok(format!("echo: {prompt}")));
        let prompts = vec![
            vec![ChatMessage::user("first")],
            vec![ChatMessage::user("second")],
            vec![ChatMessage::user("third")],
        ];

        let results = provider
            .generate(prompts, &CompletionConfig::default(), &CallContext::new(0, Stage::Repair))
            .await;

        let contents: Vec<String> = results.into_iter().map(|r| r.unwrap().content).collect();
        assert_eq!(contents, vec!["echo: first", "echo: second", "echo: third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_times_out_slow_calls_individually() {
        struct SlowOnSecond;

        #[async_trait]
        impl LlmProvider for SlowOnSecond {
            async fn complete(
                &self,
                messages: Vec<ChatMessage>,
                config: &CompletionConfig,
            ) -> Result<CompletionResponse, ProviderError> {
                if messages[0].content == "slow" {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(CompletionResponse {
                    content: "ok".to_string(),
                    usage: TokenUsage::default(),
                    model: config.model.clone(),
                    stop_reason: None,
                })
            }

            async fn health_check(&self) -> bool {
                true
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let provider: Arc<dyn LlmProvider> = Arc::new(SlowOnSecond);
        let config = CompletionConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let results = provider
            .generate(
                vec![vec![ChatMessage::user("fast")], vec![ChatMessage::user("slow")]],
                &config,
                &CallContext::new(0, Stage::StatementExtraction),
            )
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ProviderError::Timeout(_))));
    }
}
