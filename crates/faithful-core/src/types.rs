//! Core data types: samples going in, scores coming out.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One question/answer pair together with the contexts the answer was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// The question that was asked
    pub question: String,

    /// The generated answer being judged
    pub answer: String,

    /// Retrieved contexts, in retrieval order
    #[serde(default)]
    pub contexts: Vec<String>,
}

impl Sample {
    /// Create a sample.
    pub fn new<I, S>(question: impl Into<String>, answer: impl Into<String>, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question: question.into(),
            answer: answer.into(),
            contexts: contexts.into_iter().map(Into::into).collect(),
        }
    }

    /// All contexts joined into one block, one context per line.
    pub fn joined_contexts(&self) -> String {
        self.contexts.join("\n")
    }
}

/// Why a sample has no numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    /// Nothing was submitted for verification
    NoStatements,

    /// The LLM client failed or timed out for this sample
    ClientFailure,
}

impl UndefinedReason {
    /// Stable identifier used in serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            UndefinedReason::NoStatements => "no_statements",
            UndefinedReason::ClientFailure => "client_failure",
        }
    }
}

impl fmt::Display for UndefinedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Faithfulness score of one sample.
///
/// `Undefined` is never conflated with `Defined(0.0)`: an answer judged
/// entirely unfaithful scores zero, a sample that could not be judged has
/// no score at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    /// Fraction of statements judged faithful, in `[0, 1]`
    Defined(f64),

    /// No score could be computed
    Undefined(UndefinedReason),
}

impl Score {
    /// Numeric value, if defined.
    pub fn value(&self) -> Option<f64> {
        match self {
            Score::Defined(value) => Some(*value),
            Score::Undefined(_) => None,
        }
    }

    /// Whether this score carries a value.
    pub fn is_defined(&self) -> bool {
        matches!(self, Score::Defined(_))
    }

    /// Reason the score is undefined, if it is.
    pub fn undefined_reason(&self) -> Option<UndefinedReason> {
        match self {
            Score::Defined(_) => None,
            Score::Undefined(reason) => Some(*reason),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Defined(value) => write!(f, "{:.3}", value),
            Score::Undefined(reason) => write!(f, "undefined ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_joins_contexts_by_line() {
        let sample = Sample::new("q", "a", ["first", "second"]);
        assert_eq!(sample.joined_contexts(), "first\nsecond");
    }

    #[test]
    fn test_sample_contexts_default_to_empty() {
        let sample: Sample = serde_json::from_str(r#"{"question":"q","answer":"a"}"#).unwrap();
        assert!(sample.contexts.is_empty());
    }

    #[test]
    fn test_undefined_is_not_zero() {
        let zero = Score::Defined(0.0);
        let undefined = Score::Undefined(UndefinedReason::ClientFailure);

        assert_ne!(zero, undefined);
        assert_eq!(zero.value(), Some(0.0));
        assert_eq!(undefined.value(), None);
        assert_eq!(undefined.undefined_reason(), Some(UndefinedReason::ClientFailure));
    }

    #[test]
    fn test_score_display() {
        assert_eq!(Score::Defined(0.5).to_string(), "0.500");
        assert_eq!(
            Score::Undefined(UndefinedReason::NoStatements).to_string(),
            "undefined (no_statements)"
        );
    }

    #[test]
    fn test_score_serialization() {
        let json = serde_json::to_value(Score::Undefined(UndefinedReason::ClientFailure)).unwrap();
        assert_eq!(json, serde_json::json!({"undefined": "client_failure"}));

        let json = serde_json::to_value(Score::Defined(1.0)).unwrap();
        assert_eq!(json, serde_json::json!({"defined": 1.0}));
    }
}
