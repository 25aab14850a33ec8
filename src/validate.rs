use serde_json::Value;

use crate::schema::type_name;
use crate::tools::{OutputShape, ToolDescriptor, ToolOutput};
use crate::types::{DispatchError, ResponseEnvelope};

impl ToolDescriptor {
    /// Validate a handler's result against the declared output shape and
    /// synthesize the response envelope.
    ///
    /// Scalar and record results are wrapped as a single text content
    /// item; record and mapping shapes also carry the value as the
    /// structured payload.  Envelope shapes pass the handler's envelope
    /// through after enforcing the payload-presence invariant.
    pub fn validate_output(&self, output: ToolOutput) -> Result<ResponseEnvelope, DispatchError> {
        match (&self.output, output) {
            (OutputShape::Record(schema), ToolOutput::Value(value)) => {
                schema.check(&value).map_err(|reason| self.violation(reason))?;
                Ok(ResponseEnvelope::text(render(&value)).with_structured(value))
            }
            (OutputShape::Mapping(value_type), ToolOutput::Value(value)) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| {
                        self.violation(format!("expected a mapping, got {}", type_name(&value)))
                    })?;
                for (key, entry) in obj {
                    if !value_type.matches(entry) {
                        return Err(self.violation(format!(
                            "mapping entry \"{key}\" must be a {value_type}"
                        )));
                    }
                }
                Ok(ResponseEnvelope::text(render(&value)).with_structured(value))
            }
            (OutputShape::Alternatives(types), ToolOutput::Value(value)) => {
                let matching = types.iter().filter(|t| t.matches(&value)).count();
                if matching != 1 {
                    return Err(self.violation(format!(
                        "{} must match exactly one declared alternative, matched {matching}",
                        type_name(&value)
                    )));
                }
                Ok(ResponseEnvelope::text(render(&value)))
            }
            (OutputShape::Envelope, ToolOutput::Envelope(envelope)) => {
                self.check_payload_invariant(&envelope)?;
                Ok(envelope)
            }
            (OutputShape::ValidatedEnvelope(schema), ToolOutput::Envelope(envelope)) => {
                self.check_payload_invariant(&envelope)?;
                let payload = envelope.structured.as_ref().ok_or_else(|| {
                    self.violation("envelope is missing the structured payload to validate")
                })?;
                schema.check(payload).map_err(|reason| self.violation(reason))?;
                Ok(envelope)
            }
            (OutputShape::Envelope | OutputShape::ValidatedEnvelope(_), ToolOutput::Value(v)) => {
                Err(self.violation(format!(
                    "expected a response envelope, got a bare {}",
                    type_name(&v)
                )))
            }
            (_, ToolOutput::Envelope(_)) => {
                Err(self.violation("returned an envelope for a value-shaped contract"))
            }
        }
    }

    fn check_payload_invariant(&self, envelope: &ResponseEnvelope) -> Result<(), DispatchError> {
        if envelope.has_payload() || envelope.is_empty {
            Ok(())
        } else {
            Err(self.violation(
                "envelope has neither content nor structured payload and is not marked empty",
            ))
        }
    }

    fn violation(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::OutputValidation {
            tool: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Render a value as the text content item shown to the consumer.
/// Strings render bare; everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RecordSchema, ValueType};
    use serde_json::json;

    fn record_tool() -> ToolDescriptor {
        ToolDescriptor::new("multiply", "multiplies").output(OutputShape::Record(
            RecordSchema::new()
                .field("a", ValueType::Integer)
                .field("b", ValueType::Integer)
                .field("result", ValueType::Integer),
        ))
    }

    #[test]
    fn test_record_shape_accepts_conforming_value() {
        let env = record_tool()
            .validate_output(ToolOutput::Value(json!({"a": 2, "b": 3, "result": 6})))
            .unwrap();
        assert_eq!(env.structured.unwrap()["result"], 6);
        assert_eq!(env.content[0].text.as_deref(), Some(r#"{"a":2,"b":3,"result":6}"#));
    }

    #[test]
    fn test_record_shape_rejects_unrelated_scalar() {
        let err = record_tool()
            .validate_output(ToolOutput::Value(json!(6)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { tool, .. } if tool == "multiply"));
    }

    #[test]
    fn test_record_shape_rejects_extra_field() {
        let err = record_tool()
            .validate_output(ToolOutput::Value(
                json!({"a": 2, "b": 3, "result": 6, "note": "hi"}),
            ))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));
    }

    #[test]
    fn test_mapping_shape() {
        let tool = ToolDescriptor::new("subtract", "subtracts")
            .output(OutputShape::Mapping(ValueType::Integer));

        let env = tool
            .validate_output(ToolOutput::Value(json!({"value": -1})))
            .unwrap();
        assert_eq!(env.structured.unwrap()["value"], -1);

        let err = tool
            .validate_output(ToolOutput::Value(json!({"value": "minus one"})))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));
    }

    #[test]
    fn test_alternatives_require_exactly_one_match() {
        let tool = ToolDescriptor::new("division", "divides").output(OutputShape::Alternatives(
            vec![ValueType::Integer, ValueType::String],
        ));

        assert!(tool.validate_output(ToolOutput::Value(json!(3))).is_ok());
        assert!(tool
            .validate_output(ToolOutput::Value(json!("Not Valid")))
            .is_ok());

        let err = tool
            .validate_output(ToolOutput::Value(json!(true)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));
    }

    #[test]
    fn test_string_alternative_renders_bare() {
        let tool = ToolDescriptor::new("division", "divides").output(OutputShape::Alternatives(
            vec![ValueType::Integer, ValueType::String],
        ));
        let env = tool
            .validate_output(ToolOutput::Value(json!("Not Valid")))
            .unwrap();
        assert_eq!(env.content[0].text.as_deref(), Some("Not Valid"));
    }

    #[test]
    fn test_envelope_shape_enforces_payload_invariant() {
        let tool = ToolDescriptor::new("raw", "full control").output(OutputShape::Envelope);

        assert!(tool
            .validate_output(ToolOutput::Envelope(ResponseEnvelope::text("ok")))
            .is_ok());

        // Blank envelope without the explicit empty marker is a violation.
        let err = tool
            .validate_output(ToolOutput::Envelope(ResponseEnvelope::default()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));

        // Explicitly empty is accepted.
        assert!(tool
            .validate_output(ToolOutput::Envelope(ResponseEnvelope::empty()))
            .is_ok());
    }

    #[test]
    fn test_envelope_shape_rejects_bare_value() {
        let tool = ToolDescriptor::new("raw", "full control").output(OutputShape::Envelope);
        let err = tool
            .validate_output(ToolOutput::Value(json!("text")))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));
    }

    #[test]
    fn test_validated_envelope_checks_structured_payload() {
        let tool = ToolDescriptor::new("report", "reports").output(OutputShape::ValidatedEnvelope(
            RecordSchema::new().field("count", ValueType::Integer),
        ));

        let good = ResponseEnvelope::text("1 item").with_structured(json!({"count": 1}));
        assert!(tool.validate_output(ToolOutput::Envelope(good)).is_ok());

        let missing_payload = ResponseEnvelope::text("1 item");
        assert!(tool
            .validate_output(ToolOutput::Envelope(missing_payload))
            .is_err());

        let wrong_payload =
            ResponseEnvelope::text("1 item").with_structured(json!({"count": "one"}));
        assert!(tool
            .validate_output(ToolOutput::Envelope(wrong_payload))
            .is_err());
    }

    #[test]
    fn test_value_shape_rejects_envelope() {
        let err = record_tool()
            .validate_output(ToolOutput::Envelope(ResponseEnvelope::text("nope")))
            .unwrap_err();
        assert!(matches!(err, DispatchError::OutputValidation { .. }));
    }
}
