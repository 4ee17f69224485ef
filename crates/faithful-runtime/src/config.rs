//! Pipeline configuration.
//!
//! Loaded from YAML; every field has a default, so an empty document is a
//! valid configuration. Durations use humantime notation (`30s`, `500ms`,
//! `1h`).
//!
//! ```yaml
//! batch_size: 15
//! repair: true
//! completion:
//!   model: claude-sonnet-4-5-20250514
//!   max_tokens: 1024
//!   temperature: 0.0
//!   timeout: 30s
//! provider:
//!   type: anthropic
//! retry:
//!   max_retries: 3
//!   min_delay: 500ms
//!   max_delay: 10s
//! cache:
//!   enabled: false
//!   max_entries: 10000
//!   ttl: 1h
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CachingProvider;
use crate::providers::{
    CompletionConfig, LlmProvider, ProviderError, ProviderRegistry, RetryPolicy, RetryingProvider,
};

/// Default number of samples scored together.
pub const DEFAULT_BATCH_SIZE: usize = 15;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to build and run a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaithfulnessConfig {
    /// Samples per group; must be positive
    pub batch_size: usize,

    /// Send malformed replies back to the LLM once for reformatting
    pub repair: bool,

    pub completion: CompletionConfig,
    pub provider: ProviderSettings,
    pub retry: RetryPolicy,
    pub cache: CacheSettings,
}

impl Default for FaithfulnessConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            repair: true,
            completion: CompletionConfig::default(),
            provider: ProviderSettings::default(),
            retry: RetryPolicy::default(),
            cache: CacheSettings::default(),
        }
    }
}

/// Which provider to build, plus its provider-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registry key, e.g. `anthropic`
    #[serde(rename = "type", default = "default_provider_kind")]
    pub kind: String,

    /// Remaining keys, passed to the provider factory as JSON
    #[serde(flatten)]
    pub options: Map<String, JsonValue>,
}

fn default_provider_kind() -> String {
    "anthropic".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            options: Map::new(),
        }
    }
}

impl ProviderSettings {
    pub fn options_json(&self) -> JsonValue {
        JsonValue::Object(self.options.clone())
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: u64,

    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl FaithfulnessConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".to_string()));
        }
        if self.completion.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "completion.max_tokens must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.completion.temperature) {
            return Err(ConfigError::Invalid(format!(
                "completion.temperature must be within [0, 1], got {}",
                self.completion.temperature
            )));
        }
        if self.completion.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "completion.timeout must be positive".to_string(),
            ));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.min_delay must not exceed retry.max_delay".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be positive when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured provider, wrapped in retry and cache layers.
    pub fn build_provider(
        &self,
        registry: &ProviderRegistry,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let mut provider = registry.create(&self.provider.kind, &self.provider.options_json())?;

        if self.retry.max_retries > 0 {
            provider = Arc::new(RetryingProvider::new(provider, self.retry.clone()));
        }
        if self.cache.enabled {
            provider = Arc::new(CachingProvider::new(
                provider,
                self.cache.max_entries,
                self.cache.ttl,
            ));
        }

        Ok(provider)
    }
}

/// Serde adapter for humantime durations (`"30s"`, `"1h 30m"`).
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
