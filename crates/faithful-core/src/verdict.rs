//! NLI verdicts and their correlation with submitted statements.
//!
//! The verdict reply is an array of records shaped like
//! `{"statement_2": "...", "reason": "...", "verdict": "Yes"}`. Records are
//! matched to statements by their `statement_<n>` key where one is present
//! and in range, otherwise by position among the statements still lacking a
//! verdict. The result always has exactly one verdict per statement.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{ResponseSchema, ResponseShape};
use crate::statements::Statement;

lazy_static! {
    static ref STATEMENT_KEY: Regex = Regex::new(r"^statement_(\d+)$").unwrap();
}

/// Expected reply of the verdict prompt: an array of objects.
pub static VERDICTS_SCHEMA: ResponseSchema = ResponseSchema::new(
    "verdicts",
    ResponseShape::Array,
    include_str!("../schemas/verdicts.schema.json"),
);

/// Reason attached to statements the LLM left without a verdict.
pub const UNRESOLVED_REASON: &str = "No verdict returned for this statement";

/// Reason attached to the sentinel statement.
pub const SENTINEL_REASON: &str = "The answer contains no checkable factual content";

/// Outcome of verifying one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLabel {
    /// The context entails the statement
    Yes,

    /// The context does not support the statement
    No,

    /// No usable verdict was produced
    Indeterminate,
}

impl VerdictLabel {
    /// Map an LLM verdict token. Case and surrounding whitespace are ignored.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "yes" => VerdictLabel::Yes,
            "no" => VerdictLabel::No,
            _ => VerdictLabel::Indeterminate,
        }
    }

    /// Whether this verdict counts toward the faithful fraction.
    pub fn is_faithful(&self) -> bool {
        matches!(self, VerdictLabel::Yes)
    }
}

/// The evaluator's judgment for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Index of the statement this verdict belongs to
    pub statement_index: usize,

    /// Explanation given by the LLM (may be empty)
    pub reason: String,

    /// The verdict itself
    pub label: VerdictLabel,
}

impl Verdict {
    /// Verdict for a statement the LLM did not answer.
    pub fn unresolved(statement_index: usize) -> Self {
        Self {
            statement_index,
            reason: UNRESOLVED_REASON.to_string(),
            label: VerdictLabel::Indeterminate,
        }
    }

    /// Verdict for the sentinel statement. Always `No`.
    pub fn sentinel(statement_index: usize) -> Self {
        Self {
            statement_index,
            reason: SENTINEL_REASON.to_string(),
            label: VerdictLabel::No,
        }
    }
}

/// One decoded record from the verdict reply.
#[derive(Debug, Clone, PartialEq)]
struct VerdictRecord {
    index: Option<usize>,
    reason: String,
    label: VerdictLabel,
}

impl VerdictRecord {
    fn decode(value: &Value) -> Option<Self> {
        let record = value.as_object()?;

        Some(Self {
            index: statement_index(record),
            reason: record
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            label: record
                .get("verdict")
                .and_then(Value::as_str)
                .map(VerdictLabel::from_token)
                .unwrap_or(VerdictLabel::Indeterminate),
        })
    }
}

fn statement_index(record: &Map<String, Value>) -> Option<usize> {
    record.keys().find_map(|key| {
        STATEMENT_KEY
            .captures(key)
            .and_then(|caps| caps[1].parse::<usize>().ok())
    })
}

/// Verdicts for a list that was never sent to the LLM (sentinel only).
pub fn sentinel_verdicts(statements: &[Statement]) -> Vec<Verdict> {
    statements
        .iter()
        .map(|s| Verdict::sentinel(s.index))
        .collect()
}

/// Match a parsed verdict reply against the submitted statements.
///
/// Returns exactly `statements.len()` verdicts, ordered like `statements`.
/// A reply that is not an array yields all-indeterminate verdicts.
pub fn correlate_verdicts(reply: &Value, statements: &[Statement]) -> Vec<Verdict> {
    let records: Vec<VerdictRecord> = reply
        .as_array()
        .map(|items| items.iter().filter_map(VerdictRecord::decode).collect())
        .unwrap_or_default();

    let total = statements.len();
    let mut slots: Vec<Option<VerdictRecord>> = vec![None; total];
    let mut unindexed = Vec::new();

    for record in records {
        match record.index {
            Some(n) if (1..=total).contains(&n) => {
                if slots[n - 1].is_none() {
                    slots[n - 1] = Some(record);
                } else {
                    tracing::debug!(statement = n, "Dropping duplicate verdict");
                }
            }
            _ => unindexed.push(record),
        }
    }

    let mut free = slots.iter_mut().filter(|slot| slot.is_none());
    let mut dropped = 0usize;
    for record in unindexed {
        match free.next() {
            Some(slot) => *slot = Some(record),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "Dropping verdicts beyond the submitted statements");
    }

    statements
        .iter()
        .zip(slots)
        .map(|(statement, slot)| match slot {
            _ if statement.is_sentinel() => Verdict::sentinel(statement.index),
            Some(record) => Verdict {
                statement_index: statement.index,
                reason: record.reason,
                label: record.label,
            },
            None => Verdict::unresolved(statement.index),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statements::number_statements;
    use serde_json::json;

    fn labels(verdicts: &[Verdict]) -> Vec<VerdictLabel> {
        verdicts.iter().map(|v| v.label).collect()
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(VerdictLabel::from_token("Yes"), VerdictLabel::Yes);
        assert_eq!(VerdictLabel::from_token(" NO "), VerdictLabel::No);
        assert_eq!(VerdictLabel::from_token("yes."), VerdictLabel::Indeterminate);
        assert_eq!(VerdictLabel::from_token("maybe"), VerdictLabel::Indeterminate);
        assert_eq!(VerdictLabel::from_token(""), VerdictLabel::Indeterminate);
    }

    #[test]
    fn test_indexed_records_match_their_statement() {
        let statements = number_statements(["A.", "B."]);
        let reply = json!([
            {"statement_2": "B.", "reason": "contradicted", "verdict": "No"},
            {"statement_1": "A.", "reason": "stated", "verdict": "Yes"}
        ]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(labels(&verdicts), vec![VerdictLabel::Yes, VerdictLabel::No]);
        assert_eq!(verdicts[0].reason, "stated");
        assert_eq!(verdicts[1].statement_index, 2);
    }

    #[test]
    fn test_missing_verdicts_are_indeterminate() {
        let statements = number_statements(["A.", "B."]);
        let reply = json!([{"statement_1": "A.", "verdict": "Yes"}]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[1], Verdict::unresolved(2));
    }

    #[test]
    fn test_unindexed_records_fill_by_position() {
        let statements = number_statements(["A.", "B.", "C."]);
        let reply = json!([
            {"statement_2": "B.", "verdict": "No"},
            {"reason": "first free slot", "verdict": "Yes"},
            {"reason": "second free slot", "verdict": "No"}
        ]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(
            labels(&verdicts),
            vec![VerdictLabel::Yes, VerdictLabel::No, VerdictLabel::No]
        );
        assert_eq!(verdicts[0].reason, "first free slot");
        assert_eq!(verdicts[2].reason, "second free slot");
    }

    #[test]
    fn test_duplicates_and_extras_are_dropped() {
        let statements = number_statements(["A."]);
        let reply = json!([
            {"statement_1": "A.", "verdict": "No"},
            {"statement_1": "A.", "verdict": "Yes"},
            {"statement_7": "?", "verdict": "Yes"}
        ]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(labels(&verdicts), vec![VerdictLabel::No]);
    }

    #[test]
    fn test_out_of_range_index_is_positional() {
        let statements = number_statements(["A.", "B."]);
        let reply = json!([
            {"statement_1": "A.", "verdict": "No"},
            {"statement_9": "B.", "verdict": "Yes"}
        ]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(labels(&verdicts), vec![VerdictLabel::No, VerdictLabel::Yes]);
    }

    #[test]
    fn test_unusable_records() {
        let statements = number_statements(["A.", "B."]);
        let reply = json!([
            {"statement_1": "A.", "verdict": true},
            "not a record",
            {"statement_2": "B."}
        ]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(
            labels(&verdicts),
            vec![VerdictLabel::Indeterminate, VerdictLabel::Indeterminate]
        );
    }

    #[test]
    fn test_non_array_reply() {
        let statements = number_statements(["A."]);
        let verdicts = correlate_verdicts(&json!({}), &statements);
        assert_eq!(verdicts, vec![Verdict::unresolved(1)]);
    }

    #[test]
    fn test_sentinel_is_always_no() {
        let statements = number_statements(Vec::<String>::new());
        let reply = json!([{"statement_1": "Nil", "verdict": "Yes"}]);

        let verdicts = correlate_verdicts(&reply, &statements);
        assert_eq!(verdicts, vec![Verdict::sentinel(1)]);
        assert_eq!(sentinel_verdicts(&statements), verdicts);
    }

    #[test]
    fn test_schema_requires_records() {
        assert!(VERDICTS_SCHEMA.validate(&json!([{"verdict": "Yes"}])).is_ok());
        assert!(VERDICTS_SCHEMA.validate(&json!(["Yes"])).is_err());
    }
}
