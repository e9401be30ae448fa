//! Form schemas for config flow steps
//!
//! A [`DataSchema`] describes the fields of a form. It is sent to the
//! frontend as a list of [`FormField`]s and used by the flow manager to
//! validate a submission before the flow sees it. Validation goes through a
//! JSON schema built from the fields: unknown keys are rejected, required
//! keys must be present and values must match their declared type. The
//! JSON schema is compiled once per shown form into a [`FormValidator`].

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::entry::ConfigData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    fn json_type(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
        }
    }
}

/// One form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid form schema: {0}")]
    InvalidSchema(String),

    #[error("{0}")]
    InvalidInput(String),
}

/// Ordered set of form fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSchema {
    fields: Vec<FormField>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            field_type,
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        default: Option<Value>,
    ) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            field_type,
            required: false,
            default,
        });
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON schema equivalent of the form
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), json!({"type": f.field_type.json_type()})))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    /// Compile the form into a validator for its submissions
    pub fn compile(&self) -> Result<FormValidator, SchemaError> {
        let compiled = JSONSchema::compile(&self.to_json_schema())
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(FormValidator {
            defaults: self
                .fields
                .iter()
                .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
                .collect(),
            compiled,
        })
    }

    /// Validate a single submission, see [`FormValidator::validate`]
    pub fn validate(&self, input: &ConfigData) -> Result<ConfigData, SchemaError> {
        self.compile()?.validate(input)
    }
}

/// Compiled form schema
pub struct FormValidator {
    compiled: JSONSchema,
    /// Defaults of optional fields
    defaults: Vec<(String, Value)>,
}

impl FormValidator {
    /// Validate a submission and fill in defaults of missing optional fields
    pub fn validate(&self, input: &ConfigData) -> Result<ConfigData, SchemaError> {
        let instance = Value::Object(input.clone().into_iter().collect());
        if let Err(errors) = self.compiled.validate(&instance) {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(SchemaError::InvalidInput(messages.join("; ")));
        }

        let mut output = input.clone();
        for (name, default) in &self.defaults {
            output
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
        Ok(output)
    }
}
