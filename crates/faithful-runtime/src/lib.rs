//! # faithful-runtime
//!
//! LLM-driven faithfulness scoring.
//!
//! A [`FaithfulnessPipeline`] asks an LLM to break each answer into
//! statements, asks it again which statements the retrieved contexts
//! support, and reports the supported fraction. Everything deterministic
//! (parsing, correlation, aggregation) lives in `faithful-core`; this crate
//! adds the provider boundary, prompts, the repairing parser, batching and
//! observability.
//!
//! ## Key Guarantees
//!
//! 1. **Order**: scores come back in input order
//! 2. **Isolation**: a failed LLM call only affects its own sample
//! 3. **No panics on LLM text**: malformed replies are repaired once, then
//!    replaced by empty defaults
//!
//! ## Example
//!
//! ```rust,ignore
//! use faithful_runtime::{FaithfulnessConfig, FaithfulnessPipeline, ProviderRegistry};
//! use faithful_core::Sample;
//!
//! let config = FaithfulnessConfig::from_yaml_file("faithful.yaml")?;
//! let pipeline = FaithfulnessPipeline::from_config(config, &ProviderRegistry::with_defaults())?;
//!
//! let samples = vec![Sample::new(
//!     "Where is the Eiffel Tower?",
//!     "The Eiffel Tower is in Paris.",
//!     ["The Eiffel Tower is a landmark in Paris, France."],
//! )];
//! let scores = pipeline.score(&samples).await;
//! ```

use thiserror::Error;

pub mod cache;
pub mod config;
pub mod evaluator;
pub mod extractor;
pub mod hooks;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod providers;
pub mod report;

pub use cache::CachingProvider;
pub use config::{CacheSettings, ConfigError, FaithfulnessConfig, ProviderSettings, DEFAULT_BATCH_SIZE};
pub use evaluator::{Evaluation, VerdictEvaluator};
pub use extractor::{Extraction, StatementExtractor};
pub use hooks::{
    CallEvent, CallSite, FailureEvent, GroupEvent, LlmUsage, Observers, ParseEvent,
    PipelineObserver, StageEvent, TracingObserver, UsageObserver,
};
pub use orchestrator::{FaithfulnessPipeline, FaithfulnessPipelineBuilder};
pub use parser::{ParseProvenance, ParsedResponse, StructuredParser};
pub use prompts::{PromptTemplate, TemplateError, JSON_REPAIR, NLI_VERDICT, STATEMENT_EXTRACTION};
pub use providers::{
    CallContext, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, RetryPolicy, RetryingProvider, ScriptedProvider, Stage,
    TokenUsage,
};
pub use report::{FaithfulnessReport, SampleFailure, SampleOutcome};

#[cfg(feature = "anthropic")]
pub use providers::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from building or running pipeline components.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("LLM provider not configured")]
    NotConfigured,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}
