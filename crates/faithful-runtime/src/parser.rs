//! Structured-response parser with one LLM repair pass.
//!
//! `faithful_core::parse_strict` handles the deterministic part. When it
//! fails, the raw text is sent back to the LLM once with the
//! [`JSON_REPAIR`] prompt and the reply is parsed strictly again. If that
//! fails too, for any reason, the schema's empty default is returned.
//! [`StructuredParser::parse`] never returns an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use faithful_core::{parse_strict, ResponseSchema};

use crate::hooks::{CallEvent, CallSite, FailureEvent, Observers, ParseEvent, PipelineObserver};
use crate::prompts::JSON_REPAIR;
use crate::providers::{
    CallContext, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    Stage,
};

/// How a parsed value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseProvenance {
    /// The original reply parsed and validated
    Strict,

    /// The repair reply parsed and validated
    Repaired,

    /// Nothing usable; the empty default was substituted
    Defaulted,
}

/// A parsed value and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    pub provenance: ParseProvenance,
}

/// Text in, validated-or-empty structure out.
pub struct StructuredParser {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    repair: bool,
}

impl StructuredParser {
    /// Create a parser that repairs through `provider`.
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            repair: true,
        }
    }

    /// Enable or disable the repair pass.
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    pub fn repair_enabled(&self) -> bool {
        self.repair
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn completion(&self) -> &CompletionConfig {
        &self.completion
    }

    /// Issue one prompt and report the call to `observers` under `site`.
    pub async fn call(
        &self,
        messages: Vec<ChatMessage>,
        site: CallSite,
        observers: &Observers,
    ) -> Result<CompletionResponse, ProviderError> {
        let ctx = CallContext::new(site.group, site.stage);
        let reply = self
            .provider
            .generate(vec![messages], &self.completion, &ctx)
            .await
            .pop()
            .unwrap_or(Err(ProviderError::MissingGeneration));

        match &reply {
            Ok(response) => observers.call_completed(&CallEvent { site, response }),
            Err(error) => observers.call_failed(&FailureEvent { site, error }),
        }
        reply
    }

    /// Parse `raw` against `schema`, repairing once if needed.
    pub async fn parse(
        &self,
        raw: &str,
        schema: &ResponseSchema,
        site: CallSite,
        observers: &Observers,
    ) -> ParsedResponse {
        let parsed = match parse_strict(raw, schema) {
            Ok(value) => ParsedResponse {
                value,
                provenance: ParseProvenance::Strict,
            },
            Err(e) => {
                tracing::debug!(
                    schema = schema.name(),
                    sample = site.sample,
                    error = %e,
                    "Strict parse failed"
                );

                match self.repair(raw, schema, site, observers).await {
                    Some(value) => ParsedResponse {
                        value,
                        provenance: ParseProvenance::Repaired,
                    },
                    None => ParsedResponse {
                        value: schema.empty_default(),
                        provenance: ParseProvenance::Defaulted,
                    },
                }
            }
        };

        observers.response_parsed(&ParseEvent {
            site,
            provenance: parsed.provenance,
        });
        parsed
    }

    async fn repair(
        &self,
        raw: &str,
        schema: &ResponseSchema,
        site: CallSite,
        observers: &Observers,
    ) -> Option<Value> {
        if !self.repair {
            return None;
        }

        let messages = match JSON_REPAIR.messages(&[
            ("shape", schema.shape().describe()),
            ("schema", schema.document()),
            ("text", raw),
        ]) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build repair prompt");
                return None;
            }
        };

        let repair_site = CallSite {
            stage: Stage::Repair,
            ..site
        };
        let response = match self.call(messages, repair_site, observers).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    schema = schema.name(),
                    sample = site.sample,
                    error = %error,
                    "Repair call failed"
                );
                return None;
            }
        };

        match parse_strict(&response.content, schema) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    schema = schema.name(),
                    sample = site.sample,
                    error = %e,
                    "Repaired response is still unusable"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::UsageObserver;
    use crate::providers::ScriptedProvider;
    use faithful_core::{STATEMENTS_SCHEMA, VERDICTS_SCHEMA};
    use serde_json::json;

    fn site() -> CallSite {
        CallSite {
            group: 0,
            sample: 3,
            stage: Stage::StatementExtraction,
        }
    }

    fn parser(provider: Arc<ScriptedProvider>) -> StructuredParser {
        StructuredParser::new(provider, CompletionConfig::default())
    }

    #[tokio::test]
    async fn test_valid_reply_needs_no_repair() {
        let provider = Arc::new(ScriptedProvider::replying("unused"));
        let parsed = parser(provider.clone())
            .parse(
                "```json\n{\"statements\": [\"A.\"]}\n```",
                &STATEMENTS_SCHEMA,
                site(),
                &Observers::default(),
            )
            .await;

        assert_eq!(parsed.provenance, ParseProvenance::Strict);
        assert_eq!(parsed.value, json!({"statements": ["A."]}));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_repaired() {
        let provider = Arc::new(ScriptedProvider::replying(r#"{"statements": ["A.", "B."]}"#));
        let parsed = parser(provider.clone())
            .parse(
                r#"statements: "A.", "B.""#,
                &STATEMENTS_SCHEMA,
                site(),
                &Observers::default(),
            )
            .await;

        assert_eq!(parsed.provenance, ParseProvenance::Repaired);
        assert_eq!(parsed.value, json!({"statements": ["A.", "B."]}));
        assert_eq!(provider.calls(), 1);

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("a single JSON object"));
        assert!(prompt.contains(r#"statements: "A.", "B.""#));
    }

    #[tokio::test]
    async fn test_failed_repair_defaults() {
        let provider = Arc::new(ScriptedProvider::replying("still not json"));
        let parsed = parser(provider.clone())
            .parse("[{\"verdict\": ", &VERDICTS_SCHEMA, site(), &Observers::default())
            .await;

        assert_eq!(parsed.provenance, ParseProvenance::Defaulted);
        assert_eq!(parsed.value, json!([]));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_failure_during_repair_defaults() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::AuthError));
        let usage = Arc::new(UsageObserver::new());
        let mut observers = Observers::default();
        observers.push(usage.clone());

        let parsed = parser(provider)
            .parse("nope", &STATEMENTS_SCHEMA, site(), &observers)
            .await;

        assert_eq!(parsed.provenance, ParseProvenance::Defaulted);
        assert_eq!(parsed.value, json!({}));

        let snapshot = usage.snapshot();
        assert_eq!(snapshot.failed_calls, 1);
        assert_eq!(snapshot.defaulted_responses, 1);
    }

    #[tokio::test]
    async fn test_repair_disabled_skips_llm() {
        let provider = Arc::new(ScriptedProvider::replying(r#"{"statements": []}"#));
        let parsed = parser(provider.clone())
            .with_repair(false)
            .parse("garbage", &STATEMENTS_SCHEMA, site(), &Observers::default())
            .await;

        assert_eq!(parsed.provenance, ParseProvenance::Defaulted);
        assert_eq!(provider.calls(), 0);
    }
}
