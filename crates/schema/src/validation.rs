//! Schema validation for documents received from external collaborators.

use crate::schema;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

/// Validation error type.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result of document validation.
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    /// All error messages joined, for diagnostics.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A schema compiled once, or the reason it could not be.
type CompiledSchema = Result<JSONSchema, String>;

fn compile(schema_value: serde_json::Result<Value>) -> CompiledSchema {
    let schema_value = schema_value.map_err(|e| e.to_string())?;
    JSONSchema::compile(&schema_value).map_err(|e| e.to_string())
}

static NARRATIVE_VALIDATOR: LazyLock<CompiledSchema> = LazyLock::new(|| compile(schema::narrative_schema()));

static METRICS_VALIDATOR: LazyLock<CompiledSchema> = LazyLock::new(|| compile(schema::metrics_schema()));

fn validate_against(validator: &CompiledSchema, document: &Value) -> Result<ValidationResult, ValidationError> {
    let mut result = ValidationResult::new();

    let compiled = validator
        .as_ref()
        .map_err(|e| ValidationError::SchemaError(e.clone()))?;

    if let Err(errors) = compiled.validate(document) {
        for error in errors {
            result.add_error(ValidationError::SchemaError(format!(
                "{} at {}",
                error, error.instance_path
            )));
        }
    }

    Ok(result)
}

/// Validate a narrative interpretation document.
pub fn validate_narrative(document: &Value) -> Result<ValidationResult, ValidationError> {
    validate_against(&NARRATIVE_VALIDATOR, document)
}

/// Validate raw analyzer output before it becomes a metrics document.
pub fn validate_metrics(document: &Value) -> Result<ValidationResult, ValidationError> {
    validate_against(&METRICS_VALIDATOR, document)
}
