//! Statements extracted from an answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{ResponseSchema, ResponseShape};

/// Text of the statement substituted when an answer yields no statements.
pub const SENTINEL_STATEMENT: &str = "Nil";

/// Expected reply of the statement-extraction prompt: `{"statements": [...]}`.
pub static STATEMENTS_SCHEMA: ResponseSchema = ResponseSchema::new(
    "statements",
    ResponseShape::Object,
    include_str!("../schemas/statements.schema.json"),
);

/// An atomic factual claim derived from an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// 1-based position in the statement list
    pub index: usize,

    /// The claim, on a single line
    pub text: String,
}

impl Statement {
    /// Create a statement. Whitespace runs (including newlines) collapse to single spaces.
    pub fn new(index: usize, text: &str) -> Self {
        Self {
            index,
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// The "no checkable content" sentinel.
    pub fn sentinel() -> Self {
        Self::new(1, SENTINEL_STATEMENT)
    }

    /// Whether this is the sentinel statement.
    pub fn is_sentinel(&self) -> bool {
        self.text == SENTINEL_STATEMENT
    }
}

#[derive(Deserialize)]
struct StatementsPayload {
    #[serde(default)]
    statements: Vec<Value>,
}

/// Decode a parsed extraction reply into numbered statements.
///
/// Entries that are not strings are skipped. A payload that does not decode
/// at all counts as "no statements", which yields the sentinel.
pub fn statements_from_value(value: &Value) -> Vec<Statement> {
    let entries = StatementsPayload::deserialize(value)
        .map(|payload| payload.statements)
        .unwrap_or_default();

    number_statements(entries.iter().filter_map(Value::as_str))
}

/// Number statement texts from 1, dropping blank ones.
///
/// Always returns at least one statement: an empty list becomes the sentinel.
pub fn number_statements<I, S>(texts: I) -> Vec<Statement>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let statements: Vec<Statement> = texts
        .into_iter()
        .filter(|text| !text.as_ref().trim().is_empty())
        .enumerate()
        .map(|(i, text)| Statement::new(i + 1, text.as_ref()))
        .collect();

    if statements.is_empty() {
        vec![Statement::sentinel()]
    } else {
        statements
    }
}

/// Whether the list holds nothing but the sentinel.
pub fn is_sentinel_only(statements: &[Statement]) -> bool {
    !statements.is_empty() && statements.iter().all(Statement::is_sentinel)
}

/// Render `statement_<n>: <text>` lines for the verdict prompt.
pub fn statement_lines(statements: &[Statement]) -> String {
    statements
        .iter()
        .map(|s| format!("statement_{}: {}", s.index, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}
