//! Retry decorator for transient provider failures.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: usize,

    #[serde(with = "crate::config::duration_str")]
    pub min_delay: Duration,

    #[serde(with = "crate::config::duration_str")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Retries calls that fail with a retryable [`ProviderError`].
///
/// Authentication and request errors are returned immediately.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let inner = &self.inner;
        let messages = &messages;

        (|| async move { inner.complete(messages.clone(), config).await })
            .retry(self.policy.backoff())
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(
                    provider = self.inner.name(),
                    error = %err,
                    retry_in = ?delay,
                    "Retrying LLM call"
                );
            })
            .await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        self.inner.estimate_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let inner = Arc::new(ScriptedProvider::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::HttpError("connection reset".to_string()))
            } else {
                Ok("recovered".to_string())
            }
        }));

        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));
        let response = provider
            .complete(vec![ChatMessage::user("x")], &CompletionConfig::default())
            .await
            .unwrap();

        assert_eq!(response.content, "recovered");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let inner = Arc::new(ScriptedProvider::failing(ProviderError::AuthError));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

        let result = provider
            .complete(vec![ChatMessage::user("x")], &CompletionConfig::default())
            .await;

        assert!(matches!(result, Err(ProviderError::AuthError)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = Arc::new(ScriptedProvider::failing(ProviderError::ApiError {
            status: 529,
            message: "overloaded".to_string(),
        }));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(2));

        let result = provider
            .complete(vec![ChatMessage::user("x")], &CompletionConfig::default())
            .await;

        assert!(result.is_err());
        assert_eq!(inner.calls(), 3);
    }
}
