//! `toolserver` — a typed tool/resource dispatch kernel for Rust servers.
//!
//! An in-process request-handling runtime: register tools with declared
//! input schemas and output shapes, register resources addressed by URI
//! templates, and call [`Dispatcher::handle()`] from any HTTP framework,
//! Lambda function, or test harness.  Each invocation gets a request-scoped
//! [`RequestContext`] carrying the calling session, the lifespan-scoped
//! shared resource, and an out-of-band notification channel for
//! progress/info/debug events.
//!
//! # Quick start
//!
//! ```rust
//! use serde_json::json;
//! use toolserver::{
//!     Dispatcher, FnToolHandler, OutputShape, RequestEnvelope, RequestKind,
//!     SessionHandle, SessionId, ToolDescriptor, ToolOutput, ValueType,
//! };
//!
//! # async fn example() {
//! let mut server = Dispatcher::new("my-server", "0.1.0");
//! server
//!     .register_tool(
//!         ToolDescriptor::new("echo", "echoes the message")
//!             .field("message", ValueType::String)
//!             .output(OutputShape::Alternatives(vec![ValueType::String])),
//!         FnToolHandler::new(|args, _ctx| async move {
//!             let msg = args.get("message").and_then(|v| v.as_str()).unwrap_or("");
//!             Ok(ToolOutput::Value(json!(msg)))
//!         }),
//!     )
//!     .unwrap();
//! server.start().await.unwrap();
//!
//! // Use from any transport — decode the request, hand over a session
//! // handle, and serialize the response:
//! let (session, _notifications) = SessionHandle::detached();
//! let req = RequestEnvelope {
//!     session: SessionId::new("client-1"),
//!     kind: RequestKind::ToolCall {
//!         name: "echo".into(),
//!         arguments: json!({"message": "hello"}),
//!     },
//! };
//! let resp = server.handle(req, session).await;
//! // resp implements Serialize — pass it to axum::Json, serde_json, etc.
//! let body = serde_json::to_string(&resp).unwrap();
//! server.stop().await;
//! # }
//! ```

pub mod context;
pub mod dispatch;
pub mod lifespan;
pub mod resources;
pub mod schema;
pub mod tools;
pub mod types;
mod validate;

// Re-export the most commonly used items at the crate root.
pub use context::{NotificationSink, RequestContext, SessionHandle};
pub use dispatch::Dispatcher;
pub use lifespan::{AcquireFailure, Lifespan, LifespanManager, LifespanPhase, NullLifespan};
pub use resources::{
    FnResourceHandler, PathVars, ResourceDescriptor, ResourceHandler, ResourceRouter,
};
pub use schema::{FieldSpec, RecordSchema, ValueType};
pub use tools::{FnToolHandler, OutputShape, ToolDescriptor, ToolHandler, ToolOutput, ToolRegistry};
pub use types::{
    ContentBlock, DispatchError, DispatchResponse, Notification, RequestEnvelope, RequestKind,
    ResponseEnvelope, SessionId, StructuredError,
};
