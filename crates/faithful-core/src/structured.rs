//! Strict extraction of structured data from LLM text.
//!
//! LLM replies often wrap JSON in markdown fences or surround it with prose.
//! The strict pass tolerates exactly that much: it strips a code fence,
//! then tries each balanced JSON value in the text, in order, and keeps the
//! first one that parses and validates against the expected schema.
//! Anything else is a [`ParseError`] and is left to the caller (the runtime
//! repairs once, then falls back to the schema's empty default).

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::schema::{ResponseSchema, ResponseShape};

lazy_static! {
    /// Markdown code fence with an optional language tag.
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap();
}

/// Why a response could not be turned into the expected structure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("No JSON value found in response")]
    NoJson,

    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Response does not match {schema} schema: {}", .errors.join("; "))]
    Schema {
        schema: &'static str,
        errors: Vec<String>,
    },
}

/// Parse `raw` strictly against `schema`.
///
/// Every `{` or `[` in the text starts a candidate; the first candidate that
/// parses and validates wins. When none does, the error of the first
/// candidate is returned. Never panics.
pub fn parse_strict(raw: &str, schema: &ResponseSchema) -> Result<Value, ParseError> {
    let mut first_error = None;

    for candidate in json_candidates(raw) {
        match parse_candidate(candidate, schema) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    Err(first_error.unwrap_or(ParseError::NoJson))
}

fn parse_candidate(candidate: &str, schema: &ResponseSchema) -> Result<Value, ParseError> {
    let value: Value =
        serde_json::from_str(candidate).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let value = coerce_shape(value, schema.shape());
    schema.validate(&value)?;

    Ok(value)
}

/// Parse strictly, falling back to the schema's empty default.
pub fn parse_or_default(raw: &str, schema: &ResponseSchema) -> Value {
    match parse_strict(raw, schema) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(schema = schema.name(), error = %e, "Falling back to empty default");
            schema.empty_default()
        }
    }
}

/// Locate the text most likely to hold the JSON value.
///
/// Returns the balanced object or array starting at the first bracket.
/// When the value is truncated the remainder of the text is returned so the
/// JSON parser can report the actual problem.
pub fn json_candidate(raw: &str) -> Option<&str> {
    json_candidates(raw).next()
}

/// Every candidate JSON value in `raw`, one per opening bracket, in order.
pub fn json_candidates(raw: &str) -> impl Iterator<Item = &str> {
    let unfenced = strip_code_fence(raw);

    unfenced
        .match_indices(['{', '['])
        .map(move |(start, _)| {
            let rest = &unfenced[start..];
            match balanced_len(rest) {
                Some(len) => &rest[..len],
                None => rest.trim_end(),
            }
        })
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

/// Byte length of the balanced JSON value at the start of `text`.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Normalize an array reply before validation.
///
/// A lone record becomes a one-element array. Stray non-record items (notes,
/// nulls) are dropped as long as at least one record remains; an array
/// without any record is left as is and fails validation.
fn coerce_shape(value: Value, shape: ResponseShape) -> Value {
    match (shape, value) {
        (ResponseShape::Array, Value::Object(record)) => Value::Array(vec![Value::Object(record)]),
        (ResponseShape::Array, Value::Array(items)) if items.iter().any(Value::is_object) => {
            Value::Array(items.into_iter().filter(Value::is_object).collect())
        }
        (_, value) => value,
    }
}
