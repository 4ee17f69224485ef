//! Prompt templates for the two pipeline stages and JSON repair.
//!
//! Templates are static text with named `{slot}` placeholders. Literal
//! braces, needed for the JSON examples, are written `{{` and `}}`.
//! Each template carries a version that changes whenever its wording does,
//! so scores can be traced back to the prompt that produced them.

use thiserror::Error;

use crate::providers::ChatMessage;

/// Errors from rendering a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template '{template}' has no slot named '{slot}'")]
    UnknownSlot { template: &'static str, slot: String },

    #[error("Template '{template}' is missing a value for slot '{slot}'")]
    MissingValue { template: &'static str, slot: String },

    #[error("Template '{template}' has an unterminated slot")]
    Unterminated { template: &'static str },
}

/// A versioned prompt with named slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub version: &'static str,
    pub slots: &'static [&'static str],
    pub text: &'static str,
}

impl PromptTemplate {
    /// Fill every slot. Values are inserted verbatim.
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        for slot in self.slots {
            if !values.iter().any(|(name, _)| name == slot) {
                return Err(TemplateError::MissingValue {
                    template: self.name,
                    slot: slot.to_string(),
                });
            }
        }

        let extra: usize = values.iter().map(|(_, v)| v.len()).sum();
        let mut out = String::with_capacity(self.text.len() + extra);
        let mut rest = self.text;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('{') {
                let end = tail.find('}').ok_or(TemplateError::Unterminated {
                    template: self.name,
                })?;
                let slot = &tail[1..end];
                let value = values
                    .iter()
                    .find(|(name, _)| *name == slot)
                    .filter(|_| self.slots.contains(&slot))
                    .map(|(_, value)| *value)
                    .ok_or_else(|| TemplateError::UnknownSlot {
                        template: self.name,
                        slot: slot.to_string(),
                    })?;
                out.push_str(value);
                rest = &tail[end + 1..];
            } else {
                out.push('}');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Render into a single user message.
    pub fn messages(&self, values: &[(&str, &str)]) -> Result<Vec<ChatMessage>, TemplateError> {
        Ok(vec![ChatMessage::user(self.render(values)?)])
    }
}

/// Stage 1: decompose an answer into standalone statements.
pub const STATEMENT_EXTRACTION: PromptTemplate = PromptTemplate {
    name: "statement-extraction",
    version: "1",
    slots: &["question", "answer"],
    text: r#"Create one or more statements from each sentence in the given answer.
Each statement must be a standalone factual claim that can be understood without the rest of the answer.
If the answer makes no factual claim, for example because it declines to answer, return an empty list.
Respond with JSON only.

question: Who was Albert Einstein and what is he best known for?
answer: He was a German-born theoretical physicist, widely acknowledged to be one of the greatest and most influential physicists of all time. He was best known for developing the theory of relativity, he also made important contributions to the development of the theory of quantum mechanics.
statements in json:
{{
    "statements": [
        "Albert Einstein was a German-born theoretical physicist.",
        "Albert Einstein is widely acknowledged as one of the greatest and most influential physicists of all time.",
        "Albert Einstein was best known for developing the theory of relativity.",
        "Albert Einstein made important contributions to the development of the theory of quantum mechanics."
    ]
}}

question: Cadmium Chloride is slightly soluble in this chemical, it is also called what?
answer: alcohol
statements in json:
{{
    "statements": [
        "Cadmium Chloride is slightly soluble in alcohol."
    ]
}}

question: Which team won the 2030 World Cup?
answer: Sorry, I can't provide an answer to that question.
statements in json:
{{
    "statements": []
}}

question: {question}
answer: {answer}
statements in json:
"#,
};

/// Stage 2: judge each statement against the context.
pub const NLI_VERDICT: PromptTemplate = PromptTemplate {
    name: "nli-verdict",
    version: "1",
    slots: &["context", "statements"],
    text: r#"Natural language inference. For each statement, decide whether it can be directly inferred from the context.
Return a JSON array with one record per statement, in the order given. Each record repeats the statement under its statement key, gives a short reason, and a verdict.
Only use "Yes" or "No" as verdict.

context:
John is a student at XYZ University. He is pursuing a degree in Computer Science. He is enrolled in several courses this semester, including Data Structures, Algorithms, and Database Management. John is a diligent student and spends a significant amount of time studying and completing assignments. He often stays late in the library to work on his projects.
statements:
statement_1: John is majoring in Biology.
statement_2: John is taking a course on Artificial Intelligence.
statement_3: John is a dedicated student.
statement_4: John has a part-time job.
answer:
[
    {{
        "statement_1": "John is majoring in Biology.",
        "reason": "John's major is explicitly mentioned as Computer Science. There is no information suggesting he is majoring in Biology.",
        "verdict": "No"
    }},
    {{
        "statement_2": "John is taking a course on Artificial Intelligence.",
        "reason": "The context lists the courses John is enrolled in and Artificial Intelligence is not among them.",
        "verdict": "No"
    }},
    {{
        "statement_3": "John is a dedicated student.",
        "reason": "The context says he spends a significant amount of time studying and often stays late in the library to work on his projects.",
        "verdict": "Yes"
    }},
    {{
        "statement_4": "John has a part-time job.",
        "reason": "The context says nothing about John having a part-time job.",
        "verdict": "No"
    }}
]

context:
Photosynthesis is a process used by plants, algae, and certain bacteria to convert light energy into chemical energy.
statements:
statement_1: Albert Einstein was a genius.
answer:
[
    {{
        "statement_1": "Albert Einstein was a genius.",
        "reason": "The context and statement are unrelated.",
        "verdict": "No"
    }}
]

context:
{context}
statements:
{statements}
answer:
"#,
};

/// Reformat a malformed structured reply.
pub const JSON_REPAIR: PromptTemplate = PromptTemplate {
    name: "json-repair",
    version: "1",
    slots: &["shape", "schema", "text"],
    text: r#"The text below was meant to be {shape}, but it is not valid JSON or it does not match the required JSON Schema.
Rewrite it as valid JSON matching the schema. Keep the original content: do not add, remove or reinterpret information.
Respond with the JSON only, without commentary or code fences.

JSON Schema:
{schema}

text:
{text}

JSON:
"#,
};

/// Every template, in pipeline order.
pub const ALL_TEMPLATES: [&PromptTemplate; 3] = [&STATEMENT_EXTRACTION, &NLI_VERDICT, &JSON_REPAIR];

/// Look up a template by name.
pub fn find_template(name: &str) -> Option<&'static PromptTemplate> {
    ALL_TEMPLATES.iter().copied().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_slots_and_unescapes_braces() {
        let rendered = STATEMENT_EXTRACTION
            .render(&[("question", "Where is Paris?"), ("answer", "In France.")])
            .unwrap();

        assert!(rendered.ends_with("question: Where is Paris?\nanswer: In France.\nstatements in json:\n"));
        assert!(rendered.contains("{\n    \"statements\": []\n}"));
        assert!(!rendered.contains("{{"));
        assert!(!rendered.contains("{question}"));
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let rendered = NLI_VERDICT
            .render(&[("context", "literal {answer} and {{braces}}"), ("statements", "statement_1: x")])
            .unwrap();
        assert!(rendered.contains("literal {answer} and {{braces}}"));
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let result = STATEMENT_EXTRACTION.render(&[("question", "q")]);
        assert_eq!(
            result,
            Err(TemplateError::MissingValue {
                template: "statement-extraction",
                slot: "answer".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_slot_is_an_error() {
        let template = PromptTemplate {
            name: "broken",
            version: "0",
            slots: &["a"],
            text: "{a} and {b}",
        };
        assert_eq!(
            template.render(&[("a", "x"), ("b", "y")]),
            Err(TemplateError::UnknownSlot {
                template: "broken",
                slot: "b".to_string()
            })
        );
    }

    #[test]
    fn test_unterminated_slot_is_an_error() {
        let template = PromptTemplate {
            name: "broken",
            version: "0",
            slots: &[],
            text: "dangling {slot",
        };
        assert_eq!(
            template.render(&[]),
            Err(TemplateError::Unterminated { template: "broken" })
        );
    }

    #[test]
    fn test_all_templates_render_with_their_slots() {
        for template in ALL_TEMPLATES {
            let values: Vec<(&str, &str)> = template.slots.iter().map(|s| (*s, "value")).collect();
            let rendered = template.render(&values);
            assert!(rendered.is_ok(), "{} failed: {:?}", template.name, rendered);
        }
    }

    #[test]
    fn test_verdict_examples_are_valid_json() {
        // The few-shot answers are what the model imitates.
        let rendered = NLI_VERDICT
            .render(&[("context", "c"), ("statements", "s")])
            .unwrap();
        let examples: Vec<&str> = rendered.split("answer:\n").skip(1).collect();

        for example in &examples[..examples.len() - 1] {
            let json = example.split("\n\ncontext:").next().unwrap();
            assert!(
                serde_json::from_str::<serde_json::Value>(json).is_ok(),
                "invalid example: {json}"
            );
        }
    }

    #[test]
    fn test_verdict_prompt_restricts_labels() {
        assert!(NLI_VERDICT.text.contains(r#"Only use "Yes" or "No" as verdict."#));
    }

    #[test]
    fn test_find_template() {
        assert_eq!(find_template("json-repair"), Some(&JSON_REPAIR));
        assert_eq!(find_template("nope"), None);
    }
}
