use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::schema::{RecordSchema, ValueType};
use crate::types::{DispatchError, ResponseEnvelope};

/// Declared shape of a tool's result, validated after every invocation.
///
/// One validation routine per variant — see `validate.rs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", content = "def", rename_all = "kebab-case")]
pub enum OutputShape {
    /// Value must satisfy the record schema field-by-field.
    Record(RecordSchema),
    /// Value must map string keys to the declared scalar type.
    Mapping(ValueType),
    /// Value must match exactly one of the declared alternatives.
    Alternatives(Vec<ValueType>),
    /// Handler returns a ready-made envelope; record validation is
    /// bypassed but the payload-presence invariant still holds.
    Envelope,
    /// Ready-made envelope whose structured payload must additionally
    /// satisfy the schema.
    ValidatedEnvelope(RecordSchema),
}

/// Immutable description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input: RecordSchema,
    pub output: OutputShape,
}

impl ToolDescriptor {
    /// Descriptor with an empty input schema and full-control output.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input: RecordSchema::new(),
            output: OutputShape::Envelope,
        }
    }

    /// Append a required input field.
    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.input = self.input.field(name, ty);
        self
    }

    /// Append an optional input field with a default.
    pub fn optional(mut self, name: impl Into<String>, ty: ValueType, default: Value) -> Self {
        self.input = self.input.optional(name, ty, default);
        self
    }

    /// Replace the whole input schema.
    pub fn input(mut self, schema: RecordSchema) -> Self {
        self.input = schema;
        self
    }

    /// Declare the output shape.
    pub fn output(mut self, shape: OutputShape) -> Self {
        self.output = shape;
        self
    }
}

/// What a tool handler hands back for output validation.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// A plain value, checked against `Record`/`Mapping`/`Alternatives`
    /// shapes and wrapped into an envelope by the registry.
    Value(Value),
    /// A ready-made envelope for the `Envelope`/`ValidatedEnvelope`
    /// shapes.
    Envelope(ResponseEnvelope),
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Value(value)
    }
}

impl From<ResponseEnvelope> for ToolOutput {
    fn from(envelope: ResponseEnvelope) -> Self {
        ToolOutput::Envelope(envelope)
    }
}

/// Handler trait for tools. Implement this or use closures via
/// [`FnToolHandler`].
#[async_trait]
pub trait ToolHandler<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: RequestContext<S>,
    ) -> Result<ToolOutput, DispatchError>;
}

/// Wraps an async closure into a ToolHandler.
pub struct FnToolHandler<F> {
    f: F,
}

impl<F> FnToolHandler<F> {
    pub fn new<S, Fut>(f: F) -> Arc<dyn ToolHandler<S>>
    where
        F: Fn(Map<String, Value>, RequestContext<S>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ToolOutput, DispatchError>> + Send + 'static,
        S: Send + Sync + 'static,
    {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut, S> ToolHandler<S> for FnToolHandler<F>
where
    F: Fn(Map<String, Value>, RequestContext<S>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ToolOutput, DispatchError>> + Send + 'static,
    S: Send + Sync + 'static,
{
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: RequestContext<S>,
    ) -> Result<ToolOutput, DispatchError> {
        (self.f)(args, ctx).await
    }
}

struct ToolEntry<S> {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler<S>>,
}

/// Maps tool names to handlers, coercing input and validating output
/// around each call.  Immutable after server startup.
pub struct ToolRegistry<S> {
    entries: HashMap<String, ToolEntry<S>>,
    order: Vec<String>,
}

impl<S: Send + Sync + 'static> ToolRegistry<S> {
    pub fn new() -> Self {
        ToolRegistry {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Fails with [`DispatchError::DuplicateName`] when
    /// the name is already taken.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler<S>>,
    ) -> Result<(), DispatchError> {
        let name = descriptor.name.clone();
        if self.entries.contains_key(&name) {
            return Err(DispatchError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.entries.insert(name, ToolEntry { descriptor, handler });
        Ok(())
    }

    /// Registered descriptors in registration order, for listings.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| &e.descriptor))
            .collect()
    }

    /// Invoke a tool end-to-end: coerce arguments, call the handler,
    /// validate the result against the declared output shape.
    pub async fn invoke(
        &self,
        name: &str,
        raw_args: &Value,
        ctx: RequestContext<S>,
    ) -> Result<ResponseEnvelope, DispatchError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        let args = entry.descriptor.input.coerce(raw_args)?;

        let output = match entry.handler.call(args, ctx).await {
            Ok(output) => output,
            // Handler failures are the server's problem, not the caller's.
            Err(DispatchError::InternalHandler(reason)) => {
                return Err(DispatchError::InternalHandler(reason));
            }
            Err(other) => return Err(DispatchError::InternalHandler(other.to_string())),
        };

        match entry.descriptor.validate_output(output) {
            Ok(envelope) => Ok(envelope),
            Err(err) => {
                // Contract violation by the handler: a server defect.
                tracing::error!(tool = name, error = %err, "output contract violation");
                Err(err)
            }
        }
    }
}

impl<S: Send + Sync + 'static> Default for ToolRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
