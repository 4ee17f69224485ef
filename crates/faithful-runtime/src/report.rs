//! Detailed results of a scoring run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faithful_core::{Score, ScoreSummary, Statement, UndefinedReason, Verdict};

use crate::hooks::LlmUsage;
use crate::parser::ParseProvenance;
use crate::providers::Stage;

/// Why a sample could not be scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFailure {
    /// Stage whose LLM call failed
    pub stage: Stage,

    /// Error as reported by the provider
    pub message: String,
}

/// Everything the pipeline learned about one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Position of the sample in the input
    pub index: usize,

    /// Statements submitted for verification (empty if extraction failed)
    pub statements: Vec<Statement>,

    /// One verdict per statement (empty if evaluation did not run)
    pub verdicts: Vec<Verdict>,

    pub score: Score,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SampleFailure>,

    /// How the extraction reply was parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ParseProvenance>,

    /// How the verdict reply was parsed; `None` when no call was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<ParseProvenance>,
}

impl SampleOutcome {
    /// Outcome of a sample whose LLM call failed at `stage`.
    pub fn failed(index: usize, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            index,
            statements: Vec::new(),
            verdicts: Vec::new(),
            score: Score::Undefined(UndefinedReason::ClientFailure),
            failure: Some(SampleFailure {
                stage,
                message: message.into(),
            }),
            extraction: None,
            evaluation: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Result of [`FaithfulnessPipeline::evaluate`](crate::FaithfulnessPipeline::evaluate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaithfulnessReport {
    /// One outcome per input sample, in input order
    pub outcomes: Vec<SampleOutcome>,

    pub summary: ScoreSummary,

    /// LLM usage of this run
    pub usage: LlmUsage,

    pub evaluated_at: DateTime<Utc>,
}

impl FaithfulnessReport {
    pub fn new(outcomes: Vec<SampleOutcome>, usage: LlmUsage) -> Self {
        let scores: Vec<Score> = outcomes.iter().map(|o| o.score).collect();

        Self {
            summary: ScoreSummary::from_scores(&scores),
            outcomes,
            usage,
            evaluated_at: Utc::now(),
        }
    }

    /// Scores in input order.
    pub fn scores(&self) -> Vec<Score> {
        self.outcomes.iter().map(|o| o.score).collect()
    }
}
