use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Wire error codes reported to the transport collaborator.
pub const ERR_CODE_INVALID_REQ: i32 = -32600;
pub const ERR_CODE_UNKNOWN_TOOL: i32 = -32601;
pub const ERR_CODE_BAD_ARGUMENTS: i32 = -32602;
pub const ERR_CODE_INTERNAL: i32 = -32603;
/// Implementation-defined server-error range: the handler violated its
/// declared output contract.
pub const ERR_CODE_OUTPUT_CONTRACT: i32 = -32000;

// ── Session ──

/// Opaque identity of the calling client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Request ──

/// Decoded request delivered by the transport collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestEnvelope {
    /// Identity of the calling session.
    pub session: SessionId,
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// What the request asks the server to do.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RequestKind {
    /// Invoke a registered tool by name.
    ToolCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Read a resource addressed by concrete URI.
    ResourceRead { uri: String },
    /// List registered tool descriptors.
    ListTools,
    /// List registered resource descriptors.
    ListResources,
}

// ── Response ──

/// Response from [`Dispatcher::handle()`](crate::Dispatcher::handle).
///
/// For the listing endpoints the result is pre-serialized JSON shared via
/// `Arc` — per-request cost is a single atomic ref-count increment, zero
/// data copying.
///
/// Implements [`Serialize`] so you can pass it directly to your transport
/// framework (e.g. `axum::Json(&resp)`).  The pre-serialized payload is
/// embedded verbatim by the serializer.
///
/// For structured inspection (e.g. in tests), call
/// [`into_result()`](DispatchResponse::into_result).
#[derive(Debug)]
pub struct DispatchResponse {
    kind: ResponseKind,
}

#[derive(Debug)]
enum ResponseKind {
    /// Pre-serialized listing — `Arc::clone` is ref-count only.
    Cached(Arc<RawValue>),
    /// Envelope produced by a tool or resource handler.
    Envelope(ResponseEnvelope),
    /// Typed failure.
    Error(StructuredError),
}

impl DispatchResponse {
    /// True when the request failed with a typed error.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Error(_))
    }

    /// Convert into a plain `Result` for structured inspection.
    ///
    /// Cached listing payloads are parsed back into an envelope whose
    /// structured payload holds the listing.  In production code, prefer
    /// serializing `DispatchResponse` directly.
    pub fn into_result(self) -> Result<ResponseEnvelope, StructuredError> {
        match self.kind {
            ResponseKind::Cached(raw) => {
                let value: Value = serde_json::from_str(raw.get()).unwrap_or(Value::Null);
                Ok(ResponseEnvelope::structured(value))
            }
            ResponseKind::Envelope(env) => Ok(env),
            ResponseKind::Error(err) => Err(err),
        }
    }

    // ── Internal constructors ──

    pub(crate) fn cached(raw: &Arc<RawValue>) -> Self {
        DispatchResponse {
            kind: ResponseKind::Cached(Arc::clone(raw)),
        }
    }

    pub(crate) fn ok(envelope: ResponseEnvelope) -> Self {
        DispatchResponse {
            kind: ResponseKind::Envelope(envelope),
        }
    }

    pub(crate) fn error(err: StructuredError) -> Self {
        DispatchResponse {
            kind: ResponseKind::Error(err),
        }
    }
}

impl Serialize for DispatchResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match &self.kind {
            ResponseKind::Cached(raw) => map.serialize_entry("result", raw.as_ref())?,
            ResponseKind::Envelope(env) => map.serialize_entry("result", env)?,
            ResponseKind::Error(err) => map.serialize_entry("error", err)?,
        }
        map.end()
    }
}

// ── Envelope ──

/// Uniform wrapper returned by any tool invocation or resource read.
///
/// The content sequence and the structured payload are independently
/// optional, but at least one must be present unless the envelope is
/// explicitly marked empty via [`ResponseEnvelope::empty`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Ordered content items shown to the consumer.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Optional typed record mirroring the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    /// Opaque map delivered to the calling application, not shown to the
    /// consumer of `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Set when the handler declares an intentionally empty result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_empty: bool,
}

impl ResponseEnvelope {
    /// Envelope carrying a single text content item.
    pub fn text(text: impl Into<String>) -> Self {
        ResponseEnvelope {
            content: vec![ContentBlock::text(text)],
            ..Default::default()
        }
    }

    /// Envelope carrying only a structured payload.
    pub fn structured(value: Value) -> Self {
        ResponseEnvelope {
            structured: Some(value),
            ..Default::default()
        }
    }

    /// Intentionally empty envelope — exempt from the
    /// content-or-structured invariant.
    pub fn empty() -> Self {
        ResponseEnvelope {
            is_empty: true,
            ..Default::default()
        }
    }

    /// Attach a structured payload.
    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }

    /// Attach application-visible metadata.
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// True when the envelope carries content or a structured payload.
    pub fn has_payload(&self) -> bool {
        !self.content.is_empty() || self.structured.is_some()
    }
}

/// Single content item in an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ContentBlock {
    /// Text content item.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock {
            block_type: "text".into(),
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Binary content item (already base64-encoded by the caller).
    pub fn blob(data: impl Into<String>) -> Self {
        ContentBlock {
            block_type: "blob".into(),
            text: None,
            blob: Some(data.into()),
        }
    }
}

// ── Notifications ──

/// Out-of-band event emitted by a handler through its request context,
/// delivered to the originating session in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum Notification {
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
    Progress {
        current: f64,
        total: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

// ── Errors ──

/// Error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("tool already registered: {0}")]
    DuplicateName(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {message}")]
    InvalidArgument { fields: Vec<String>, message: String },
    #[error("tool \"{tool}\" violated its output contract: {reason}")]
    OutputValidation { tool: String, reason: String },
    #[error("no resource matches uri: {0}")]
    NoMatchingResource(String),
    #[error("lifespan acquisition failed: {0}")]
    Acquisition(String),
    #[error("handler failure: {0}")]
    InternalHandler(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    /// Invalid-argument error listing the offending fields.
    pub fn invalid_arguments(fields: Vec<String>, message: impl Into<String>) -> Self {
        DispatchError::InvalidArgument {
            fields,
            message: message.into(),
        }
    }
}

/// Serializable failure reported to the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StructuredError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        StructuredError {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<DispatchError> for StructuredError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::UnknownTool(_) => StructuredError::new(ERR_CODE_UNKNOWN_TOOL, message),
            DispatchError::InvalidArgument { fields, .. } => StructuredError {
                code: ERR_CODE_BAD_ARGUMENTS,
                message,
                data: Some(serde_json::json!({ "fields": fields })),
            },
            DispatchError::NoMatchingResource(_) => {
                StructuredError::new(ERR_CODE_BAD_ARGUMENTS, message)
            }
            DispatchError::OutputValidation { .. } => {
                StructuredError::new(ERR_CODE_OUTPUT_CONTRACT, message)
            }
            _ => StructuredError::new(ERR_CODE_INTERNAL, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_kind_tags() {
        let req: RequestEnvelope = serde_json::from_value(json!({
            "session": "s-1",
            "kind": "tool-call",
            "name": "echo",
            "arguments": {"msg": "hi"}
        }))
        .unwrap();
        match req.kind {
            RequestKind::ToolCall { name, arguments } => {
                assert_eq!(name, "echo");
                assert_eq!(arguments["msg"], "hi");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_arguments_default_to_null() {
        let req: RequestEnvelope = serde_json::from_value(json!({
            "session": "s-1",
            "kind": "tool-call",
            "name": "echo"
        }))
        .unwrap();
        match req.kind {
            RequestKind::ToolCall { arguments, .. } => assert!(arguments.is_null()),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_payload_invariant() {
        assert!(ResponseEnvelope::text("hi").has_payload());
        assert!(ResponseEnvelope::structured(json!({"a": 1})).has_payload());
        let empty = ResponseEnvelope::empty();
        assert!(!empty.has_payload());
        assert!(empty.is_empty);
    }

    #[test]
    fn test_envelope_serialization_skips_absent_fields() {
        let env = ResponseEnvelope::text("hello");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert!(value.get("structured").is_none());
        assert!(value.get("meta").is_none());
        assert!(value.get("isEmpty").is_none());
    }

    #[test]
    fn test_notification_level_tag() {
        let n = Notification::Progress {
            current: 2.0,
            total: 5.0,
            message: Some("Step 2/5".into()),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["level"], "progress");
        assert_eq!(value["current"], 2.0);

        let info = serde_json::to_value(Notification::Info {
            message: "hi".into(),
        })
        .unwrap();
        assert_eq!(info["level"], "info");
    }

    #[test]
    fn test_structured_error_carries_offending_fields() {
        let err = DispatchError::invalid_arguments(
            vec!["a".into(), "b".into()],
            "missing required fields: a, b",
        );
        let wire: StructuredError = err.into();
        assert_eq!(wire.code, ERR_CODE_BAD_ARGUMENTS);
        assert_eq!(wire.data.unwrap()["fields"], json!(["a", "b"]));
    }

    #[test]
    fn test_dispatch_response_serializes_error() {
        let resp = DispatchResponse::error(StructuredError::new(ERR_CODE_UNKNOWN_TOOL, "nope"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], ERR_CODE_UNKNOWN_TOOL);
        assert!(value.get("result").is_none());
    }
}
