//! Response shapes and terminal-output parsing
//!
//! Validation always happens locally, even when the provider was given the
//! schema for constrained decoding.

use std::sync::Arc;

use serde_json::Value;

use crate::error::KernlError;
use crate::model::ResponseFormat;

/// What an agent's final answer must look like
#[derive(Clone, Default)]
pub enum ResponseShape {
    /// Plain text, passed through unchanged
    #[default]
    Text,
    /// A JSON document validated against `schema`
    Json {
        name: String,
        schema: Value,
        validator: Arc<jsonschema::Validator>,
    },
}

impl ResponseShape {
    /// Compile a JSON schema shape. An invalid schema is a wiring mistake and
    /// is reported immediately.
    pub fn json(name: impl Into<String>, schema: Value) -> Result<Self, KernlError> {
        let name = name.into();
        let validator = jsonschema::Validator::new(&schema).map_err(|e| {
            KernlError::Misconfiguration(format!("invalid response schema '{}': {}", name, e))
        })?;
        Ok(ResponseShape::Json {
            name,
            schema,
            validator: Arc::new(validator),
        })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ResponseShape::Text)
    }

    /// Hint attached to every model request
    pub fn response_format(&self) -> Option<ResponseFormat> {
        match self {
            ResponseShape::Text => None,
            ResponseShape::Json { name, schema, .. } => Some(ResponseFormat::JsonSchema {
                name: name.clone(),
                schema: schema.clone(),
                strict: true,
            }),
        }
    }

    /// Turn the terminal assistant text into the execution result. Either
    /// the full value is returned or an error; never a partial parse.
    pub fn parse(&self, text: &str) -> Result<Value, KernlError> {
        match self {
            ResponseShape::Text => Ok(Value::String(text.to_string())),
            ResponseShape::Json {
                name, validator, ..
            } => {
                let value: Value = serde_json::from_str(text.trim()).map_err(|e| {
                    KernlError::ModelBehavior(format!(
                        "response is not valid JSON for '{}': {}",
                        name, e
                    ))
                })?;

                if validator.is_valid(&value) {
                    return Ok(value);
                }

                let errors: Vec<String> = validator
                    .iter_errors(&value)
                    .map(|e| e.to_string())
                    .collect();
                Err(KernlError::ModelBehavior(format!(
                    "response does not match schema '{}': {}",
                    name,
                    errors.join("; ")
                )))
            }
        }
    }
}

impl std::fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseShape::Text => write!(f, "Text"),
            ResponseShape::Json { name, .. } => f.debug_struct("Json").field("name", name).finish(),
        }
    }
}
