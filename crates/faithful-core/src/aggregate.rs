//! Score aggregation.
//!
//! The policy is fixed:
//! 1. `total_statements == 0` → `Undefined(NoStatements)`
//! 2. Otherwise → `count(Yes) / total_statements`
//!
//! The denominator is the number of statements submitted, not the number of
//! verdicts returned. `Indeterminate` contributes nothing to the numerator
//! and still counts in the denominator.

use serde::{Deserialize, Serialize};

use crate::types::{Score, UndefinedReason};
use crate::verdict::Verdict;

/// Reduce one sample's verdicts to a score.
pub fn aggregate(total_statements: usize, verdicts: &[Verdict]) -> Score {
    if total_statements == 0 {
        return Score::Undefined(UndefinedReason::NoStatements);
    }

    let faithful = verdicts
        .iter()
        .filter(|v| v.label.is_faithful())
        .count()
        .min(total_statements);

    Score::Defined(faithful as f64 / total_statements as f64)
}

/// Dataset-level view of a list of scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Number of scores
    pub total: usize,

    /// Scores that carry a value
    pub defined: usize,

    /// Undefined because nothing could be verified
    pub no_statements: usize,

    /// Undefined because the LLM client failed
    pub client_failures: usize,

    /// Mean of the defined scores, if any
    pub mean: Option<f64>,
}

impl ScoreSummary {
    /// Summarize scores. Undefined scores are excluded from the mean.
    pub fn from_scores(scores: &[Score]) -> Self {
        let mut summary = Self {
            total: scores.len(),
            ..Default::default()
        };
        let mut sum = 0.0;

        for score in scores {
            match score {
                Score::Defined(value) => {
                    summary.defined += 1;
                    sum += value;
                }
                Score::Undefined(UndefinedReason::NoStatements) => summary.no_statements += 1,
                Score::Undefined(UndefinedReason::ClientFailure) => summary.client_failures += 1,
            }
        }

        if summary.defined > 0 {
            summary.mean = Some(sum / summary.defined as f64);
        }

        summary
    }
}
