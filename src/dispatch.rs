use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::value::{to_raw_value, RawValue};
use serde_json::json;

use crate::context::{RequestContext, SessionHandle};
use crate::lifespan::{Lifespan, LifespanManager, NullLifespan};
use crate::resources::{ResourceDescriptor, ResourceHandler, ResourceRouter};
use crate::tools::{ToolDescriptor, ToolHandler, ToolRegistry};
use crate::types::{
    DispatchError, DispatchResponse, RequestEnvelope, RequestKind, StructuredError,
    ERR_CODE_INTERNAL, ERR_CODE_INVALID_REQ,
};

/// Pre-serialized listing payloads, built once at startup.
struct ListingCache {
    tools: Arc<RawValue>,
    resources: Arc<RawValue>,
}

/// The request-handling kernel.  Register tools and resources, start the
/// lifespan, then call [`handle()`](Dispatcher::handle) from any
/// transport.
///
/// Registration happens on `&mut self` before [`start()`](Dispatcher::start);
/// afterwards the dispatcher is shared behind an `Arc` and both registries
/// are immutable, so concurrent invocations share nothing mutable beyond
/// the read-only lifespan resource.
pub struct Dispatcher<S> {
    server_name: String,
    server_version: String,
    tools: ToolRegistry<S>,
    resources: ResourceRouter<S>,
    lifespan: LifespanManager<S>,
    listings: Option<ListingCache>,
}

impl Dispatcher<()> {
    /// Dispatcher without a shared application resource.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Dispatcher::with_lifespan(name, version, NullLifespan)
    }
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    /// Dispatcher whose requests share the resource acquired by `hook`.
    pub fn with_lifespan(
        name: impl Into<String>,
        version: impl Into<String>,
        hook: impl Lifespan<State = S> + 'static,
    ) -> Self {
        Dispatcher {
            server_name: name.into(),
            server_version: version.into(),
            tools: ToolRegistry::new(),
            resources: ResourceRouter::new(),
            lifespan: LifespanManager::new(hook),
            listings: None,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Register a tool.  Fails with [`DispatchError::DuplicateName`] when
    /// the name is already taken.
    pub fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler<S>>,
    ) -> Result<(), DispatchError> {
        self.tools.register(descriptor, handler)
    }

    /// Register a resource template.  Overlapping templates are legal;
    /// the first registered one wins at resolution time.
    pub fn register_resource(
        &mut self,
        descriptor: ResourceDescriptor,
        handler: Arc<dyn ResourceHandler<S>>,
    ) {
        self.resources.register(descriptor, handler);
    }

    /// Acquire the lifespan resource and begin accepting requests.
    ///
    /// Acquisition failure is fatal: the server never becomes active and
    /// the error propagates to the embedder.  Also freezes the listing
    /// caches, so all registration must happen before this call.
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        self.lifespan.start().await?;

        let tools = json!({ "tools": self.tools.descriptors() });
        let resources = json!({ "resources": self.resources.descriptors() });
        self.listings = Some(ListingCache {
            tools: Arc::from(to_raw_value(&tools)?),
            resources: Arc::from(to_raw_value(&resources)?),
        });

        tracing::info!(
            server = %self.server_name,
            version = %self.server_version,
            "dispatcher started"
        );
        Ok(())
    }

    /// Stop accepting requests and release the lifespan resource.
    /// Idempotent; safe after a failed [`start()`](Dispatcher::start).
    pub async fn stop(&self) {
        self.lifespan.stop().await;
        tracing::info!(server = %self.server_name, "dispatcher stopped");
    }

    /// Drive one request end-to-end: build the request context, route to
    /// the tool registry or resource router, validate, and encode the
    /// response or a structured error.  Never lets a handler failure —
    /// error or panic — escape unconverted.
    pub async fn handle(&self, req: RequestEnvelope, session: SessionHandle) -> DispatchResponse {
        let state = match self.lifespan.state().await {
            Some(state) => state,
            None => {
                return DispatchResponse::error(StructuredError::new(
                    ERR_CODE_INVALID_REQ,
                    "server is not active",
                ));
            }
        };

        let ctx = RequestContext::new(
            req.session.clone(),
            state,
            session.notifications.clone(),
            session.cancel.child_token(),
        );

        match req.kind {
            RequestKind::ListTools => self.cached_listing(|c| &c.tools),
            RequestKind::ListResources => self.cached_listing(|c| &c.resources),
            RequestKind::ToolCall { name, arguments } => {
                tracing::debug!(session = %req.session, tool = %name, "tool call");
                let invocation = self.tools.invoke(&name, &arguments, ctx);
                match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(Ok(envelope)) => DispatchResponse::ok(envelope),
                    Ok(Err(err)) => DispatchResponse::error(err.into()),
                    Err(panic) => {
                        let reason = panic_message(panic);
                        tracing::error!(tool = %name, reason = %reason, "tool handler panicked");
                        DispatchResponse::error(DispatchError::InternalHandler(reason).into())
                    }
                }
            }
            RequestKind::ResourceRead { uri } => {
                tracing::debug!(session = %req.session, uri = %uri, "resource read");
                let read = self.resources.read(&uri, ctx);
                match AssertUnwindSafe(read).catch_unwind().await {
                    Ok(Ok(envelope)) => DispatchResponse::ok(envelope),
                    Ok(Err(err)) => DispatchResponse::error(err.into()),
                    Err(panic) => {
                        let reason = panic_message(panic);
                        tracing::error!(uri = %uri, reason = %reason, "resource handler panicked");
                        DispatchResponse::error(DispatchError::InternalHandler(reason).into())
                    }
                }
            }
        }
    }

    /// True while the lifespan is active and requests are being served.
    pub async fn is_active(&self) -> bool {
        self.lifespan.is_active().await
    }

    fn cached_listing(&self, pick: impl Fn(&ListingCache) -> &Arc<RawValue>) -> DispatchResponse {
        match &self.listings {
            Some(cache) => DispatchResponse::cached(pick(cache)),
            // start() builds the caches; reaching here means it did not run.
            None => DispatchResponse::error(StructuredError::new(
                ERR_CODE_INTERNAL,
                "listing caches not built",
            )),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
