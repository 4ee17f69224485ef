//! JSON Schema validation for structured LLM responses.
//!
//! Each expected response shape is described by an embedded JSON Schema
//! document. Schemas are compiled on first use and reused afterwards.

use serde_json::Value;
use std::sync::OnceLock;

use crate::structured::ParseError;

/// Top-level shape of an expected response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A JSON object with known keys
    Object,

    /// A JSON array of records
    Array,
}

impl ResponseShape {
    /// The empty value returned when a response cannot be recovered.
    pub fn empty_default(&self) -> Value {
        match self {
            ResponseShape::Object => Value::Object(serde_json::Map::new()),
            ResponseShape::Array => Value::Array(Vec::new()),
        }
    }

    /// Short human-readable description, used in repair prompts.
    pub fn describe(&self) -> &'static str {
        match self {
            ResponseShape::Object => "a single JSON object",
            ResponseShape::Array => "a JSON array of objects",
        }
    }
}

/// An expected response: its shape plus the schema it must satisfy.
pub struct ResponseSchema {
    name: &'static str,
    shape: ResponseShape,
    document: &'static str,
    compiled: OnceLock<Result<jsonschema::Validator, String>>,
}

impl ResponseSchema {
    /// Declare a schema. Compilation is deferred until first validation.
    pub const fn new(name: &'static str, shape: ResponseShape, document: &'static str) -> Self {
        Self {
            name,
            shape,
            document,
            compiled: OnceLock::new(),
        }
    }

    /// Schema name, for logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Expected top-level shape.
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Raw JSON Schema document.
    pub fn document(&self) -> &'static str {
        self.document
    }

    /// Empty default for this schema's shape.
    pub fn empty_default(&self) -> Value {
        self.shape.empty_default()
    }

    /// Validate a parsed value against the schema.
    pub fn validate(&self, value: &Value) -> Result<(), ParseError> {
        let validator = self.validator().map_err(|e| ParseError::Schema {
            schema: self.name,
            errors: vec![e],
        })?;

        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ParseError::Schema {
                schema: self.name,
                errors,
            })
        }
    }

    fn validator(&self) -> Result<&jsonschema::Validator, String> {
        let result = self.compiled.get_or_init(|| {
            let schema_value: Value = serde_json::from_str(self.document)
                .map_err(|e| format!("Invalid schema JSON: {}", e))?;

            jsonschema::options()
                .build(&schema_value)
                .map_err(|e| format!("Failed to compile schema: {}", e))
        });

        result.as_ref().map_err(Clone::clone)
    }
}

impl std::fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish()
    }
}
