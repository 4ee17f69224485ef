//! Observability hooks for the scoring pipeline.
//!
//! The pipeline reports what it does to [`PipelineObserver`]s: group and
//! stage boundaries, every LLM call (successful or not) and how every
//! structured reply was parsed. Observers only watch; nothing they do can
//! change a score.
//!
//! Two observers are built in:
//! - [`TracingObserver`] turns events into `tracing` events
//! - [`UsageObserver`] accumulates token usage and call counters

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::parser::ParseProvenance;
use crate::providers::{CompletionResponse, ProviderError, Stage, TokenUsage};
use crate::report::SampleOutcome;

/// Where in the pipeline an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Group index
    pub group: usize,

    /// Sample index in the full input
    pub sample: usize,

    pub stage: Stage,
}

/// A group of samples entering or leaving the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEvent {
    pub group: usize,

    /// Input index of the group's first sample
    pub first_sample: usize,

    pub samples: usize,
}

/// A stage starting or finishing within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvent {
    pub group: usize,
    pub stage: Stage,

    /// LLM calls issued by this stage
    pub calls: usize,
}

/// A successful LLM call.
#[derive(Debug, Clone, Copy)]
pub struct CallEvent<'a> {
    pub site: CallSite,
    pub response: &'a CompletionResponse,
}

/// A failed LLM call.
#[derive(Debug, Clone, Copy)]
pub struct FailureEvent<'a> {
    pub site: CallSite,
    pub error: &'a ProviderError,
}

/// A structured reply after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseEvent {
    pub site: CallSite,
    pub provenance: ParseProvenance,
}

/// Receives pipeline events. Every method defaults to a no-op.
pub trait PipelineObserver: Send + Sync {
    fn group_started(&self, _event: &GroupEvent) {}

    fn stage_started(&self, _event: &StageEvent) {}

    fn call_completed(&self, _event: &CallEvent<'_>) {}

    fn call_failed(&self, _event: &FailureEvent<'_>) {}

    fn response_parsed(&self, _event: &ParseEvent) {}

    fn stage_finished(&self, _event: &StageEvent) {}

    fn group_finished(&self, _event: &GroupEvent, _outcomes: &[SampleOutcome]) {}
}

/// Fans events out to a list of observers.
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn PipelineObserver>>);

impl Observers {
    pub fn push(&mut self, observer: Arc<dyn PipelineObserver>) {
        self.0.push(observer);
    }

    /// A copy of this set with one more observer.
    pub fn with(&self, observer: Arc<dyn PipelineObserver>) -> Self {
        let mut observers = self.clone();
        observers.push(observer);
        observers
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("count", &self.0.len()).finish()
    }
}

impl PipelineObserver for Observers {
    fn group_started(&self, event: &GroupEvent) {
        self.0.iter().for_each(|o| o.group_started(event));
    }

    fn stage_started(&self, event: &StageEvent) {
        self.0.iter().for_each(|o| o.stage_started(event));
    }

    fn call_completed(&self, event: &CallEvent<'_>) {
        self.0.iter().for_each(|o| o.call_completed(event));
    }

    fn call_failed(&self, event: &FailureEvent<'_>) {
        self.0.iter().for_each(|o| o.call_failed(event));
    }

    fn response_parsed(&self, event: &ParseEvent) {
        self.0.iter().for_each(|o| o.response_parsed(event));
    }

    fn stage_finished(&self, event: &StageEvent) {
        self.0.iter().for_each(|o| o.stage_finished(event));
    }

    fn group_finished(&self, event: &GroupEvent, outcomes: &[SampleOutcome]) {
        self.0.iter().for_each(|o| o.group_finished(event, outcomes));
    }
}

/// Emits every pipeline event as a `tracing` event.
///
/// Calls and parses are logged at `trace`, boundaries at `debug`,
/// failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn group_started(&self, event: &GroupEvent) {
        tracing::debug!(
            group = event.group,
            first_sample = event.first_sample,
            samples = event.samples,
            "Group started"
        );
    }

    fn stage_started(&self, event: &StageEvent) {
        tracing::debug!(group = event.group, stage = %event.stage, calls = event.calls, "Stage started");
    }

    fn call_completed(&self, event: &CallEvent<'_>) {
        tracing::trace!(
            group = event.site.group,
            sample = event.site.sample,
            stage = %event.site.stage,
            model = %event.response.model,
            prompt_tokens = event.response.usage.prompt_tokens,
            completion_tokens = event.response.usage.completion_tokens,
            "LLM call completed"
        );
    }

    fn call_failed(&self, event: &FailureEvent<'_>) {
        tracing::warn!(
            group = event.site.group,
            sample = event.site.sample,
            stage = %event.site.stage,
            error = %event.error,
            "LLM call failed"
        );
    }

    fn response_parsed(&self, event: &ParseEvent) {
        tracing::trace!(
            sample = event.site.sample,
            stage = %event.site.stage,
            provenance = ?event.provenance,
            "Response parsed"
        );
    }

    fn stage_finished(&self, event: &StageEvent) {
        tracing::debug!(group = event.group, stage = %event.stage, "Stage finished");
    }

    fn group_finished(&self, event: &GroupEvent, outcomes: &[SampleOutcome]) {
        let failed = outcomes.iter().filter(|o| o.failure.is_some()).count();
        tracing::debug!(group = event.group, samples = outcomes.len(), failed, "Group finished");
    }
}

/// Accumulated LLM usage for a scoring run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Successful LLM calls, repairs included
    pub llm_calls: u64,

    /// LLM calls that returned an error or timed out
    pub failed_calls: u64,

    /// Calls made to repair malformed replies
    pub repair_calls: u64,

    /// Replies that only parsed after repair
    pub repaired_responses: u64,

    /// Replies replaced by the empty default
    pub defaulted_responses: u64,

    /// Tokens written to cache
    pub cache_creation_tokens: u64,

    /// Tokens read from cache
    pub cache_read_tokens: u64,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.cache_creation_tokens += u64::from(usage.cache_creation_tokens);
        self.cache_read_tokens += u64::from(usage.cache_read_tokens);
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens: input, output, cache write, cache read
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("opus-4-5") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku-4-5") => (1.0, 5.0, 1.25, 0.1),
            _ => (3.0, 15.0, 3.75, 0.3),
        };

        let per_million = |tokens: u32, rate: f64| tokens as f64 / 1_000_000.0 * rate;

        per_million(usage.prompt_tokens, input_rate)
            + per_million(usage.completion_tokens, output_rate)
            + per_million(usage.cache_creation_tokens, cache_write_rate)
            + per_million(usage.cache_read_tokens, cache_read_rate)
    }
}

/// Counts tokens, calls and parse outcomes.
#[derive(Debug, Default)]
pub struct UsageObserver {
    usage: RwLock<LlmUsage>,
}

impl UsageObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage so far.
    pub fn snapshot(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn reset(&self) {
        *self.usage.write() = LlmUsage::default();
    }
}

impl PipelineObserver for UsageObserver {
    fn call_completed(&self, event: &CallEvent<'_>) {
        let mut usage = self.usage.write();
        usage.add(&event.response.usage, &event.response.model);
        if event.site.stage == Stage::Repair {
            usage.repair_calls += 1;
        }
    }

    fn call_failed(&self, event: &FailureEvent<'_>) {
        let mut usage = self.usage.write();
        usage.failed_calls += 1;
        if event.site.stage == Stage::Repair {
            usage.repair_calls += 1;
        }
    }

    fn response_parsed(&self, event: &ParseEvent) {
        match event.provenance {
            ParseProvenance::Strict => {}
            ParseProvenance::Repaired => self.usage.write().repaired_responses += 1,
            ParseProvenance::Defaulted => self.usage.write().defaulted_responses += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn site(stage: Stage) -> CallSite {
        CallSite {
            group: 0,
            sample: 0,
            stage,
        }
    }

    fn response(prompt_tokens: u32, completion_tokens: u32) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                ..Default::default()
            },
            model: "claude-sonnet-4-5-20250514".to_string(),
            stop_reason: None,
        }
    }

    #[test]
    fn test_usage_observer_counts() {
        let observer = UsageObserver::new();
        let first = response(100, 20);
        let repair = response(50, 10);

        observer.call_completed(&CallEvent {
            site: site(Stage::StatementExtraction),
            response: &first,
        });
        observer.call_completed(&CallEvent {
            site: site(Stage::Repair),
            response: &repair,
        });
        observer.call_failed(&FailureEvent {
            site: site(Stage::VerdictEvaluation),
            error: &ProviderError::AuthError,
        });
        observer.response_parsed(&ParseEvent {
            site: site(Stage::StatementExtraction),
            provenance: ParseProvenance::Repaired,
        });

        let usage = observer.snapshot();
        assert_eq!(usage.llm_calls, 2);
        assert_eq!(usage.total_tokens, 180);
        assert_eq!(usage.failed_calls, 1);
        assert_eq!(usage.repair_calls, 1);
        assert_eq!(usage.repaired_responses, 1);
        assert_eq!(usage.defaulted_responses, 0);

        observer.reset();
        assert_eq!(observer.snapshot(), LlmUsage::default());
    }

    #[test]
    fn test_cost_estimation() {
        let mut usage = LlmUsage::default();
        usage.add(&response(1000, 500).usage, "claude-sonnet-4-5");

        // 1000 * $3/MTok + 500 * $15/MTok = $0.0105
        assert!(usage.estimated_cost > 0.01 && usage.estimated_cost < 0.011);
    }

    #[test]
    fn test_observers_fan_out() {
        #[derive(Default)]
        struct Counter(AtomicUsize);

        impl PipelineObserver for Counter {
            fn stage_started(&self, _event: &StageEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let mut observers = Observers::default();
        observers.push(a.clone());
        let observers = observers.with(b.clone());

        observers.stage_started(&StageEvent {
            group: 0,
            stage: Stage::VerdictEvaluation,
            calls: 2,
        });

        assert_eq!(observers.len(), 2);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }
}
