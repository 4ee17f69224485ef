//! Stage 2: context + statements → verdicts.
//!
//! A statement list holding only the sentinel is never sent to the LLM;
//! its verdict is `No` without a call.

use faithful_core::{
    correlate_verdicts, is_sentinel_only, sentinel_verdicts, statement_lines, Sample, Statement,
    Verdict, VERDICTS_SCHEMA,
};

use crate::hooks::{CallSite, Observers};
use crate::parser::{ParseProvenance, StructuredParser};
use crate::prompts::{PromptTemplate, TemplateError, NLI_VERDICT};
use crate::providers::{ChatMessage, Stage};
use crate::RuntimeError;

/// Verdicts for one sample's statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Exactly one verdict per statement, in statement order
    pub verdicts: Vec<Verdict>,

    /// `None` when no LLM call was needed
    pub provenance: Option<ParseProvenance>,
}

impl Evaluation {
    /// Deterministic verdicts for a sentinel-only list.
    pub fn sentinel(statements: &[Statement]) -> Self {
        Self {
            verdicts: sentinel_verdicts(statements),
            provenance: None,
        }
    }
}

/// Builds NLI prompts and correlates their replies with statements.
#[derive(Debug, Clone, Copy)]
pub struct VerdictEvaluator {
    template: &'static PromptTemplate,
}

impl Default for VerdictEvaluator {
    fn default() -> Self {
        Self {
            template: &NLI_VERDICT,
        }
    }
}

impl VerdictEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The NLI prompt, or `None` if the statements need no LLM call.
    pub fn prompt(
        &self,
        sample: &Sample,
        statements: &[Statement],
    ) -> Result<Option<Vec<ChatMessage>>, TemplateError> {
        if statements.is_empty() || is_sentinel_only(statements) {
            return Ok(None);
        }

        let context = sample.joined_contexts();
        let lines = statement_lines(statements);
        self.template
            .messages(&[("context", &context), ("statements", &lines)])
            .map(Some)
    }

    /// Parse a reply and match it against `statements`.
    pub async fn decode(
        &self,
        parser: &StructuredParser,
        raw: &str,
        statements: &[Statement],
        site: CallSite,
        observers: &Observers,
    ) -> Evaluation {
        let parsed = parser.parse(raw, &VERDICTS_SCHEMA, site, observers).await;

        Evaluation {
            verdicts: correlate_verdicts(&parsed.value, statements),
            provenance: Some(parsed.provenance),
        }
    }

    /// Judge the statements of a single sample, reported as sample `index`.
    pub async fn evaluate(
        &self,
        parser: &StructuredParser,
        sample: &Sample,
        statements: &[Statement],
        index: usize,
        observers: &Observers,
    ) -> Result<Evaluation, RuntimeError> {
        let Some(messages) = self.prompt(sample, statements)? else {
            return Ok(Evaluation::sentinel(statements));
        };

        let site = CallSite {
            group: 0,
            sample: index,
            stage: Stage::VerdictEvaluation,
        };
        let response = parser.call(messages, site, observers).await?;

        Ok(self
            .decode(parser, &response.content, statements, site, observers)
            .await)
    }
}
