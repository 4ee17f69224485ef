//! API credential handling.
//!
//! Keys are wrapped in [`secrecy::SecretString`] as soon as they are read,
//! so `Debug` and `Display` of anything holding one print `[REDACTED]`.
//! The raw value is only reachable through [`ApiCredential::expose`].

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `api_key` in the provider configuration
    Config,
    /// Environment variable
    Environment,
    /// Passed in by the caller
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that never shows up in logs.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read `config[config_key]`, falling back to the `env_var` environment variable.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        match std::env::var(env_var) {
            Ok(value) => Ok(Self::new(value, CredentialSource::Environment, name)),
            Err(_) => Err(ProviderError::NotConfigured(format!(
                "{} required: set '{}' in config or {} environment variable",
                name, config_key, env_var
            ))),
        }
    }

    /// Whether `from_config_or_env` would find a value.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw key. Call only where the key is sent, never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-test-do-not-print";

    #[test]
    fn test_debug_and_display_redact() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "Test key");

        let debug = format!("{:?}", cred);
        let display = cred.to_string();

        assert!(!debug.contains(SECRET));
        assert!(!display.contains(SECRET));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(display, "Test key from programmatic [REDACTED]");
    }

    #[test]
    fn test_config_takes_precedence() {
        let config = serde_json::json!({"api_key": SECRET});
        let cred = ApiCredential::from_config_or_env(
            &config,
            "api_key",
            "FAITHFUL_TEST_UNSET_VARIABLE",
            "Test key",
        )
        .unwrap();

        assert_eq!(cred.expose(), SECRET);
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_missing_everywhere_is_not_configured() {
        let result = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "FAITHFUL_TEST_UNSET_VARIABLE",
            "Test key",
        );

        match result {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("FAITHFUL_TEST_UNSET_VARIABLE"));
            }
            _ => panic!("Expected NotConfigured error"),
        }
        assert!(!ApiCredential::is_available(
            &serde_json::json!({}),
            "api_key",
            "FAITHFUL_TEST_UNSET_VARIABLE"
        ));
    }

    #[test]
    fn test_empty_credential() {
        assert!(ApiCredential::new("", CredentialSource::Programmatic, "Test key").is_empty());
    }
}
