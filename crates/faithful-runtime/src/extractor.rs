//! Stage 1: answer → statements.

use faithful_core::{statements_from_value, Sample, Statement, STATEMENTS_SCHEMA};

use crate::hooks::{CallSite, Observers};
use crate::parser::{ParseProvenance, StructuredParser};
use crate::prompts::{PromptTemplate, TemplateError, STATEMENT_EXTRACTION};
use crate::providers::{ChatMessage, Stage};
use crate::RuntimeError;

/// Statements decoded from one extraction reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Never empty: an empty extraction yields the sentinel
    pub statements: Vec<Statement>,
    pub provenance: ParseProvenance,
}

/// Builds extraction prompts and decodes their replies.
#[derive(Debug, Clone, Copy)]
pub struct StatementExtractor {
    template: &'static PromptTemplate,
}

impl Default for StatementExtractor {
    fn default() -> Self {
        Self {
            template: &STATEMENT_EXTRACTION,
        }
    }
}

impl StatementExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(&self, sample: &Sample) -> Result<Vec<ChatMessage>, TemplateError> {
        self.template
            .messages(&[("question", &sample.question), ("answer", &sample.answer)])
    }

    /// Parse a reply into numbered statements.
    pub async fn decode(
        &self,
        parser: &StructuredParser,
        raw: &str,
        site: CallSite,
        observers: &Observers,
    ) -> Extraction {
        let parsed = parser.parse(raw, &STATEMENTS_SCHEMA, site, observers).await;

        Extraction {
            statements: statements_from_value(&parsed.value),
            provenance: parsed.provenance,
        }
    }

    /// Extract statements for a single sample, reported as sample `index`.
    pub async fn extract(
        &self,
        parser: &StructuredParser,
        sample: &Sample,
        index: usize,
        observers: &Observers,
    ) -> Result<Extraction, RuntimeError> {
        let site = CallSite {
            group: 0,
            sample: index,
            stage: Stage::StatementExtraction,
        };
        let response = parser.call(self.prompt(sample)?, site, observers).await?;

        Ok(self.decode(parser, &response.content, site, observers).await)
    }
}
