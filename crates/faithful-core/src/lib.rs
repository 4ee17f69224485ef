//! # faithful-core
//!
//! Deterministic building blocks of faithfulness evaluation.
//!
//! Faithfulness measures how much of a generated answer is supported by the
//! context it was generated from. An LLM decomposes the answer into
//! statements and judges each statement against the context; this crate
//! handles everything around those two calls that does not need an LLM:
//!
//! - strict extraction and schema validation of structured LLM replies
//! - decoding statements (with the `"Nil"` sentinel for empty extractions)
//! - correlating NLI verdicts with the statements they judge
//! - aggregating verdicts into a [`Score`]
//!
//! ## Key Guarantees
//!
//! 1. **No LLM calls**: everything here is pure and synchronous
//! 2. **Never fails on LLM text**: malformed replies degrade to empty defaults
//! 3. **Bounded scores**: a defined score is always within `[0, 1]`
//!
//! ## Example
//!
//! ```rust
//! use faithful_core::{aggregate, correlate_verdicts, number_statements, Score};
//!
//! let statements = number_statements(["Paris is in France.", "Paris has 90 million people."]);
//! let reply = serde_json::json!([
//!     {"statement_1": "Paris is in France.", "reason": "stated", "verdict": "Yes"},
//!     {"statement_2": "Paris has 90 million people.", "reason": "wrong", "verdict": "No"}
//! ]);
//!
//! let verdicts = correlate_verdicts(&reply, &statements);
//! assert_eq!(aggregate(statements.len(), &verdicts), Score::Defined(0.5));
//! ```

pub mod aggregate;
pub mod schema;
pub mod statements;
pub mod structured;
pub mod types;
pub mod verdict;

// Re-export main types at crate root
pub use aggregate::{aggregate, ScoreSummary};
pub use schema::{ResponseSchema, ResponseShape};
pub use statements::{
    is_sentinel_only, number_statements, statement_lines, statements_from_value, Statement,
    SENTINEL_STATEMENT, STATEMENTS_SCHEMA,
};
pub use structured::{json_candidate, json_candidates, parse_or_default, parse_strict, strip_code_fence, ParseError};
pub use types::{Sample, Score, UndefinedReason};
pub use verdict::{
    correlate_verdicts, sentinel_verdicts, Verdict, VerdictLabel, VERDICTS_SCHEMA,
};
