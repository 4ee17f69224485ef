//! Response caching for faithful-runtime.
//!
//! Re-scoring a dataset re-sends identical prompts; [`CachingProvider`]
//! answers those from memory instead of paying for the call again. Only
//! successful completions are cached. Concurrent identical requests share a
//! single call to the inner provider.

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage};

/// Cache key: everything about a request that can change its reply.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    model: String,
    request_hash: u64,
}

impl CacheKey {
    pub fn new(messages: &[ChatMessage], config: &CompletionConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        messages.hash(&mut hasher);
        config.max_tokens.hash(&mut hasher);
        config.temperature.to_bits().hash(&mut hasher);

        Self {
            model: config.model.clone(),
            request_hash: hasher.finish(),
        }
    }
}

/// Provider decorator that memoizes completions with moka.
pub struct CachingProvider {
    inner: Arc<dyn LlmProvider>,
    cache: Cache<CacheKey, CompletionResponse>,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of cached responses.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl LlmProvider for CachingProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let key = CacheKey::new(&messages, config);

        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(self.inner.complete(messages, config))
            .await
            .map_err(|e| ProviderError::clone(&e))?;

        if entry.is_fresh() {
            return Ok(entry.into_value());
        }

        tracing::trace!(provider = self.inner.name(), "Completion served from cache");
        // Nothing was spent on a cache hit.
        let mut hit = entry.into_value();
        hit.usage = TokenUsage::default();
        Ok(hit)
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

    fn messages(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(text)]
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let inner = Arc::new(ScriptedProvider::replying(r#"{"statements": []}"#));
        let provider = CachingProvider::new(inner.clone(), 100, Duration::from_secs(60));
        let config = CompletionConfig::default();

        let first = provider.complete(messages("same"), &config).await.unwrap();
        let second = provider.complete(messages("same"), &config).await.unwrap();

        assert_eq!(inner.calls(), 1);
        assert_eq!(first.content, second.content);
        assert!(first.usage.total() > 0);
        assert_eq!(second.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_different_requests_miss() {
        let inner = Arc::new(ScriptedProvider::replying("{}"));
        let provider = CachingProvider::new(inner.clone(), 100, Duration::from_secs(60));
        let config = CompletionConfig::default();

        provider.complete(messages("one"), &config).await.unwrap();
        provider.complete(messages("two"), &config).await.unwrap();

        let other_model = CompletionConfig {
            model: "another-model".to_string(),
            ..Default::default()
        };
        provider.complete(messages("one"), &other_model).await.unwrap();

        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let inner = Arc::new(ScriptedProvider::failing(ProviderError::HttpError(
            "connection reset".to_string(),
        )));
        let provider = CachingProvider::new(inner.clone(), 100, Duration::from_secs(60));
        let config = CompletionConfig::default();

        assert!(provider.complete(messages("x"), &config).await.is_err());
        assert!(provider.complete(messages("x"), &config).await.is_err());
        assert_eq!(inner.calls(), 2);
    }

    /// Replies after a fixed delay.
    struct Delayed(ScriptedProvider);

    #[async_trait]
    impl LlmProvider for Delayed {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.0.complete(messages, config).await
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "delayed"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_call() {
        let inner = Arc::new(Delayed(ScriptedProvider::replying("{}")));
        let provider = CachingProvider::new(inner.clone(), 100, Duration::from_secs(60));
        let config = CompletionConfig::default();

        let replies = futures::future::join_all(
            (0..4).map(|_| provider.complete(messages("same"), &config)),
        )
        .await;

        assert_eq!(inner.0.calls(), 1);
        assert!(replies.iter().all(|r| r.as_ref().unwrap().content == "{}"));
        let charged = replies
            .iter()
            .filter(|r| r.as_ref().unwrap().usage.total() > 0)
            .count();
        assert_eq!(charged, 1);
    }

    #[test]
    fn test_key_depends_on_temperature() {
        let warm = CompletionConfig {
            temperature: 0.7,
            ..Default::default()
        };
        assert_ne!(
            CacheKey::new(&messages("x"), &CompletionConfig::default()),
            CacheKey::new(&messages("x"), &warm)
        );
    }
}
