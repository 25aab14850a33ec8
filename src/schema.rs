use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::DispatchError;

/// Scalar or container type a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    /// Structural conformance check for a candidate value.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
        };
        f.write_str(name)
    }
}

/// One named field in a record schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

/// Ordered field-by-field schema for tool inputs and structured records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSchema {
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new() -> Self {
        RecordSchema::default()
    }

    /// Append a required field.
    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: true,
            default: None,
        });
        self
    }

    /// Append an optional field, filled from `default` when absent.
    pub fn optional(mut self, name: impl Into<String>, ty: ValueType, default: Value) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: false,
            default: Some(default),
        });
        self
    }

    fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Coerce raw call arguments into a validated argument map.
    ///
    /// Missing optional fields are filled from their defaults.  Missing
    /// required fields, type mismatches, and unknown keys all fail with an
    /// [`DispatchError::InvalidArgument`] listing the offending fields.
    pub fn coerce(&self, raw: &Value) -> Result<Map<String, Value>, DispatchError> {
        let empty = Map::new();
        let args = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(DispatchError::invalid_arguments(
                    vec![],
                    "arguments must be an object",
                ));
            }
        };

        let mut coerced = Map::new();
        let mut offending = Vec::new();
        let mut reasons = Vec::new();

        for spec in &self.fields {
            match args.get(&spec.name) {
                Some(value) if spec.ty.matches(value) => {
                    coerced.insert(spec.name.clone(), value.clone());
                }
                Some(_) => {
                    offending.push(spec.name.clone());
                    reasons.push(format!("field \"{}\" must be a {}", spec.name, spec.ty));
                }
                None if spec.required => {
                    offending.push(spec.name.clone());
                    reasons.push(format!("missing required field \"{}\"", spec.name));
                }
                None => {
                    if let Some(default) = &spec.default {
                        coerced.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        for key in args.keys() {
            if self.spec(key).is_none() {
                offending.push(key.clone());
                reasons.push(format!("unknown field \"{key}\""));
            }
        }

        if offending.is_empty() {
            Ok(coerced)
        } else {
            Err(DispatchError::invalid_arguments(offending, reasons.join("; ")))
        }
    }

    /// Validate a handler-produced value against this schema.
    ///
    /// Used for output records, where defaults do not apply: required
    /// fields must be present, types must match, and extra keys are
    /// rejected.  Returns a reason string on mismatch so the caller can
    /// wrap it in the appropriate error.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return Err(format!("expected a record, got {}", type_name(value))),
        };

        for spec in &self.fields {
            match obj.get(&spec.name) {
                Some(v) if spec.ty.matches(v) => {}
                Some(_) => {
                    return Err(format!("field \"{}\" must be a {}", spec.name, spec.ty));
                }
                None if spec.required => {
                    return Err(format!("missing required field \"{}\"", spec.name));
                }
                None => {}
            }
        }

        for key in obj.keys() {
            if self.spec(key).is_none() {
                return Err(format!("unexpected field \"{key}\""));
            }
        }

        Ok(())
    }
}

/// Human-readable JSON type name for diagnostics.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
