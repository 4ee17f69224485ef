//! Batch orchestration of the two-stage pipeline.
//!
//! Samples are scored in groups of `batch_size`. Within a group:
//! 1. all extraction calls run concurrently, then all replies are parsed
//! 2. all verdict calls run concurrently, then all replies are parsed
//! 3. each sample is aggregated
//!
//! Groups run one after another. A failed LLM call only affects its own
//! sample, which scores `Undefined(ClientFailure)`; the rest of the group
//! carries on. Output order always equals input order.

use futures::future::join_all;
use std::sync::Arc;
use tracing::Instrument;

use faithful_core::{aggregate, Sample, Score};

use crate::config::FaithfulnessConfig;
use crate::evaluator::{Evaluation, VerdictEvaluator};
use crate::extractor::{Extraction, StatementExtractor};
use crate::hooks::{
    CallEvent, CallSite, FailureEvent, GroupEvent, Observers, PipelineObserver, StageEvent,
    UsageObserver,
};
use crate::parser::StructuredParser;
use crate::providers::{
    CallContext, ChatMessage, CompletionResponse, LlmProvider, ProviderError, ProviderRegistry,
    Stage,
};
use crate::report::{FaithfulnessReport, SampleOutcome};
use crate::RuntimeError;

type StageReply = (usize, Result<CompletionResponse, ProviderError>);

/// Scores samples for faithfulness.
///
/// Build one with [`FaithfulnessPipeline::builder`]. The pipeline holds no
/// per-run state and can be shared across tasks.
pub struct FaithfulnessPipeline {
    provider: Arc<dyn LlmProvider>,
    parser: StructuredParser,
    extractor: StatementExtractor,
    evaluator: VerdictEvaluator,
    config: FaithfulnessConfig,
    observers: Observers,
}

impl FaithfulnessPipeline {
    pub fn builder() -> FaithfulnessPipelineBuilder {
        FaithfulnessPipelineBuilder::new()
    }

    /// Build a pipeline whose provider comes from `registry` per `config`.
    pub fn from_config(
        config: FaithfulnessConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let provider = config.build_provider(registry)?;
        Self::builder().provider(provider).config(config).build()
    }

    pub fn config(&self) -> &FaithfulnessConfig {
        &self.config
    }

    /// Whether the provider reports itself healthy.
    pub async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }

    /// One score per sample, in input order.
    pub async fn score(&self, samples: &[Sample]) -> Vec<Score> {
        self.evaluate(samples).await.scores()
    }

    /// Score samples and keep everything learned along the way.
    pub async fn evaluate(&self, samples: &[Sample]) -> FaithfulnessReport {
        let usage = Arc::new(UsageObserver::new());
        let observers = self.observers.with(usage.clone());
        let batch_size = self.config.batch_size;

        let mut outcomes = Vec::with_capacity(samples.len());
        for (group, chunk) in samples.chunks(batch_size).enumerate() {
            let first_sample = group * batch_size;
            let span = tracing::info_span!(
                "faithfulness_group",
                group,
                first_sample,
                samples = chunk.len()
            );

            let scored = self
                .score_group(group, first_sample, chunk, &observers)
                .instrument(span)
                .await;
            outcomes.extend(scored);
        }

        FaithfulnessReport::new(outcomes, usage.snapshot())
    }

    async fn score_group(
        &self,
        group: usize,
        first_sample: usize,
        samples: &[Sample],
        observers: &Observers,
    ) -> Vec<SampleOutcome> {
        let group_event = GroupEvent {
            group,
            first_sample,
            samples: samples.len(),
        };
        observers.group_started(&group_event);

        let mut outcomes: Vec<Option<SampleOutcome>> = vec![None; samples.len()];

        // Stage 1: statement extraction
        let mut prompts = Vec::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            match self.extractor.prompt(sample) {
                Ok(messages) => prompts.push((i, messages)),
                Err(e) => {
                    outcomes[i] = Some(SampleOutcome::failed(
                        first_sample + i,
                        Stage::StatementExtraction,
                        e.to_string(),
                    ))
                }
            }
        }

        let stage = StageEvent {
            group,
            stage: Stage::StatementExtraction,
            calls: prompts.len(),
        };
        observers.stage_started(&stage);
        let replies = self
            .call_stage(group, first_sample, stage.stage, prompts, observers)
            .await;

        let mut extracted = Vec::with_capacity(replies.len());
        for (i, reply) in replies {
            match reply {
                Ok(response) => extracted.push((i, response.content)),
                Err(e) => {
                    outcomes[i] = Some(SampleOutcome::failed(
                        first_sample + i,
                        stage.stage,
                        e.to_string(),
                    ))
                }
            }
        }

        let extractions: Vec<Extraction> = join_all(extracted.iter().map(|(i, content)| {
            let site = CallSite {
                group,
                sample: first_sample + i,
                stage: stage.stage,
            };
            self.extractor.decode(&self.parser, content, site, observers)
        }))
        .await;
        observers.stage_finished(&stage);

        // Stage 2: verdict evaluation
        let mut pending = Vec::with_capacity(extractions.len());
        let mut prompts = Vec::with_capacity(extractions.len());
        for ((i, _), extraction) in extracted.iter().zip(extractions) {
            let i = *i;
            match self.evaluator.prompt(&samples[i], &extraction.statements) {
                Ok(Some(messages)) => {
                    prompts.push((i, messages));
                    pending.push((i, extraction));
                }
                Ok(None) => {
                    let evaluation = Evaluation::sentinel(&extraction.statements);
                    outcomes[i] = Some(finish(first_sample + i, extraction, evaluation));
                }
                Err(e) => {
                    outcomes[i] = Some(partial_failure(
                        first_sample + i,
                        extraction,
                        Stage::VerdictEvaluation,
                        e.to_string(),
                    ))
                }
            }
        }

        let stage = StageEvent {
            group,
            stage: Stage::VerdictEvaluation,
            calls: prompts.len(),
        };
        observers.stage_started(&stage);
        let replies = self
            .call_stage(group, first_sample, stage.stage, prompts, observers)
            .await;

        let mut judged = Vec::with_capacity(replies.len());
        for ((i, extraction), (_, reply)) in pending.into_iter().zip(replies) {
            match reply {
                Ok(response) => judged.push((i, extraction, response.content)),
                Err(e) => {
                    outcomes[i] = Some(partial_failure(
                        first_sample + i,
                        extraction,
                        stage.stage,
                        e.to_string(),
                    ))
                }
            }
        }

        let evaluations: Vec<Evaluation> =
            join_all(judged.iter().map(|(i, extraction, content)| {
                let site = CallSite {
                    group,
                    sample: first_sample + i,
                    stage: stage.stage,
                };
                self.evaluator
                    .decode(&self.parser, content, &extraction.statements, site, observers)
            }))
            .await;
        observers.stage_finished(&stage);

        for ((i, extraction, _), evaluation) in judged.into_iter().zip(evaluations) {
            outcomes[i] = Some(finish(first_sample + i, extraction, evaluation));
        }

        let outcomes: Vec<SampleOutcome> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                outcome.unwrap_or_else(|| {
                    SampleOutcome::failed(
                        first_sample + i,
                        Stage::StatementExtraction,
                        ProviderError::MissingGeneration.to_string(),
                    )
                })
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        tracing::info!(
            group,
            samples = outcomes.len(),
            failed,
            "Group scored"
        );
        observers.group_finished(&group_event, &outcomes);

        outcomes
    }

    /// Issue one stage's prompts and report each call to the observers.
    ///
    /// Returns one reply per prompt, tagged with the prompt's position in
    /// the group.
    async fn call_stage(
        &self,
        group: usize,
        first_sample: usize,
        stage: Stage,
        prompts: Vec<(usize, Vec<ChatMessage>)>,
        observers: &Observers,
    ) -> Vec<StageReply> {
        if prompts.is_empty() {
            return Vec::new();
        }

        let (owners, messages): (Vec<usize>, Vec<Vec<ChatMessage>>) = prompts.into_iter().unzip();
        let ctx = CallContext::new(group, stage);
        let mut replies = self
            .provider
            .generate(messages, &self.config.completion, &ctx)
            .await
            .into_iter();

        owners
            .into_iter()
            .map(|i| {
                let reply = replies
                    .next()
                    .unwrap_or(Err(ProviderError::MissingGeneration));
                let site = CallSite {
                    group,
                    sample: first_sample + i,
                    stage,
                };

                match &reply {
                    Ok(response) => observers.call_completed(&CallEvent { site, response }),
                    Err(error) => {
                        tracing::warn!(
                            sample = site.sample,
                            stage = %stage,
                            error = %error,
                            "LLM call failed, sample left unscored"
                        );
                        observers.call_failed(&FailureEvent { site, error });
                    }
                }

                (i, reply)
            })
            .collect()
    }
}

fn finish(index: usize, extraction: Extraction, evaluation: Evaluation) -> SampleOutcome {
    let score = aggregate(extraction.statements.len(), &evaluation.verdicts);

    SampleOutcome {
        index,
        statements: extraction.statements,
        verdicts: evaluation.verdicts,
        score,
        failure: None,
        extraction: Some(extraction.provenance),
        evaluation: evaluation.provenance,
    }
}

fn partial_failure(
    index: usize,
    extraction: Extraction,
    stage: Stage,
    message: String,
) -> SampleOutcome {
    let mut outcome = SampleOutcome::failed(index, stage, message);
    outcome.statements = extraction.statements;
    outcome.extraction = Some(extraction.provenance);
    outcome
}

/// Builder for [`FaithfulnessPipeline`].
pub struct FaithfulnessPipelineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: FaithfulnessConfig,
    observers: Observers,
}

impl FaithfulnessPipelineBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: FaithfulnessConfig::default(),
            observers: Observers::default(),
        }
    }

    /// Set the LLM provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration. Its provider section is ignored here.
    pub fn config(mut self, config: FaithfulnessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn repair(mut self, repair: bool) -> Self {
        self.config.repair = repair;
        self
    }

    /// Add an observer.
    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<FaithfulnessPipeline, RuntimeError> {
        let provider = self.provider.ok_or(RuntimeError::NotConfigured)?;
        self.config.validate()?;

        let parser = StructuredParser::new(provider.clone(), self.config.completion.clone())
            .with_repair(self.config.repair);

        Ok(FaithfulnessPipeline {
            provider,
            parser,
            extractor: StatementExtractor::new(),
            evaluator: VerdictEvaluator::new(),
            config: self.config,
            observers: self.observers,
        })
    }
}

impl Default for FaithfulnessPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
