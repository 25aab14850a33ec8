use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::types::{DispatchError, ResponseEnvelope};

/// Path variables bound by a matched URI template.
pub type PathVars = HashMap<String, String>;

/// Immutable description of a registered resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// URI template: literal segments plus `{placeholder}` segments that
    /// each capture one path segment.
    pub template: String,
    pub description: String,
}

impl ResourceDescriptor {
    pub fn new(template: impl Into<String>, description: impl Into<String>) -> Self {
        ResourceDescriptor {
            template: template.into(),
            description: description.into(),
        }
    }
}

/// Handler trait for resources. Returns the resource text; diagnostics
/// for expected failure modes ("File not found: …") should be returned as
/// ordinary text, while unexpected errors are converted to diagnostic
/// text by the router.
#[async_trait]
pub trait ResourceHandler<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    async fn read(
        &self,
        vars: PathVars,
        ctx: RequestContext<S>,
    ) -> Result<String, DispatchError>;
}

/// Wraps an async closure into a ResourceHandler.
pub struct FnResourceHandler<F> {
    f: F,
}

impl<F> FnResourceHandler<F> {
    pub fn new<S, Fut>(f: F) -> Arc<dyn ResourceHandler<S>>
    where
        F: Fn(PathVars, RequestContext<S>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, DispatchError>> + Send + 'static,
        S: Send + Sync + 'static,
    {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut, S> ResourceHandler<S> for FnResourceHandler<F>
where
    F: Fn(PathVars, RequestContext<S>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, DispatchError>> + Send + 'static,
    S: Send + Sync + 'static,
{
    async fn read(
        &self,
        vars: PathVars,
        ctx: RequestContext<S>,
    ) -> Result<String, DispatchError> {
        (self.f)(vars, ctx).await
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
struct UriTemplate {
    segments: Vec<Segment>,
}

impl UriTemplate {
    fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|seg| {
                if seg.starts_with('{') && seg.ends_with('}') && seg.len() > 2 {
                    Segment::Placeholder(seg[1..seg.len() - 1].to_string())
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        UriTemplate { segments }
    }

    /// Match a concrete URI, binding placeholder segments.  Placeholders
    /// match any single non-empty segment; bound values are
    /// percent-decoded and then trimmed of surrounding whitespace.
    /// Literal segments match exactly, case-sensitively.
    fn match_uri(&self, uri: &str) -> Option<PathVars> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut vars = PathVars::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    vars.insert(name.clone(), percent_decode(part).trim().to_string());
                }
            }
        }
        Some(vars)
    }
}

/// Decode `%XX` escapes, leaving malformed sequences verbatim.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct Route<S> {
    descriptor: ResourceDescriptor,
    template: UriTemplate,
    handler: Arc<dyn ResourceHandler<S>>,
}

/// Maps URI templates to handlers.  Matching is order-dependent: the
/// first-registered template that matches wins, so overlapping templates
/// are resolved deterministically rather than rejected as ambiguous.
/// Immutable after server startup.
pub struct ResourceRouter<S> {
    routes: Vec<Route<S>>,
}

impl<S: Send + Sync + 'static> ResourceRouter<S> {
    pub fn new() -> Self {
        ResourceRouter { routes: Vec::new() }
    }

    /// Register a resource template.
    pub fn register(&mut self, descriptor: ResourceDescriptor, handler: Arc<dyn ResourceHandler<S>>) {
        let template = UriTemplate::parse(&descriptor.template);
        self.routes.push(Route {
            descriptor,
            template,
            handler,
        });
    }

    /// Registered descriptors in registration order, for listings.
    pub fn descriptors(&self) -> Vec<&ResourceDescriptor> {
        self.routes.iter().map(|r| &r.descriptor).collect()
    }

    /// Resolve a concrete URI to its descriptor and bound path variables.
    pub fn resolve(&self, uri: &str) -> Result<(&ResourceDescriptor, PathVars), DispatchError> {
        self.lookup(uri).map(|(route, vars)| (&route.descriptor, vars))
    }

    /// Read a resource end-to-end.
    ///
    /// An unmatched URI is a hard [`DispatchError::NoMatchingResource`];
    /// a matched handler that fails is downgraded to a *successful* read
    /// whose content is a textual diagnostic.  Resource reads are
    /// best-effort and user-facing, unlike tool invocation.
    pub async fn read(
        &self,
        uri: &str,
        ctx: RequestContext<S>,
    ) -> Result<ResponseEnvelope, DispatchError> {
        let (route, vars) = self.lookup(uri)?;
        match route.handler.read(vars, ctx).await {
            Ok(text) => Ok(ResponseEnvelope::text(text)),
            Err(err) => {
                tracing::warn!(uri, error = %err, "resource handler failed; degrading to text");
                Ok(ResponseEnvelope::text(format!("Error reading resource: {err}")))
            }
        }
    }

    fn lookup(&self, uri: &str) -> Result<(&Route<S>, PathVars), DispatchError> {
        for route in &self.routes {
            if let Some(vars) = route.template.match_uri(uri) {
                return Ok((route, vars));
            }
        }
        Err(DispatchError::NoMatchingResource(uri.to_string()))
    }
}

impl<S: Send + Sync + 'static> Default for ResourceRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NotificationSink;
    use crate::types::SessionId;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> RequestContext<()> {
        let (sink, _rx) = NotificationSink::channel();
        RequestContext::new(
            SessionId::new("test"),
            Arc::new(()),
            sink,
            CancellationToken::new(),
        )
    }

    fn echo_vars_handler() -> Arc<dyn ResourceHandler<()>> {
        FnResourceHandler::new(|vars: PathVars, _ctx| async move {
            Ok(vars.get("name").cloned().unwrap_or_default())
        })
    }

    #[test]
    fn test_template_binds_placeholder() {
        let template = UriTemplate::parse("file:///{name}");
        let vars = template.match_uri("file:///report.pdf").unwrap();
        assert_eq!(vars["name"], "report.pdf");
    }

    #[test]
    fn test_literal_template_matches_exactly() {
        let template = UriTemplate::parse("config://settings");
        assert!(template.match_uri("config://settings").is_some());
        assert!(template.match_uri("config://Settings").is_none());
        assert!(template.match_uri("config://settings/extra").is_none());
    }

    #[test]
    fn test_placeholder_rejects_empty_segment() {
        let template = UriTemplate::parse("file:///{name}");
        assert!(template.match_uri("file:///").is_none());
    }

    #[test]
    fn test_bound_values_are_decoded_and_trimmed() {
        let template = UriTemplate::parse("file:///{name}");
        let vars = template.match_uri("file:///my%20report%20.pdf").unwrap();
        assert_eq!(vars["name"], "my report .pdf");

        let vars = template.match_uri("file:///%20padded%20").unwrap();
        assert_eq!(vars["name"], "padded");
    }

    #[test]
    fn test_malformed_escape_left_verbatim() {
        assert_eq!(percent_decode("100%zz"), "100%zz");
        assert_eq!(percent_decode("trailing%2"), "trailing%2");
        assert_eq!(percent_decode("a%2Fb"), "a/b");
    }

    #[test]
    fn test_resolve_no_match() {
        let mut router: ResourceRouter<()> = ResourceRouter::new();
        router.register(
            ResourceDescriptor::new("file:///{name}", "documents"),
            echo_vars_handler(),
        );
        let err = router.resolve("s3://bucket/key").unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingResource(uri) if uri == "s3://bucket/key"));
    }

    #[test]
    fn test_first_registered_template_wins() {
        let mut router: ResourceRouter<()> = ResourceRouter::new();
        router.register(
            ResourceDescriptor::new("file:///{name}", "first"),
            echo_vars_handler(),
        );
        router.register(
            ResourceDescriptor::new("file:///{other}", "second"),
            echo_vars_handler(),
        );
        let (descriptor, vars) = router.resolve("file:///report.pdf").unwrap();
        assert_eq!(descriptor.description, "first");
        assert_eq!(vars["name"], "report.pdf");
    }

    #[tokio::test]
    async fn test_read_returns_handler_text() {
        let mut router: ResourceRouter<()> = ResourceRouter::new();
        router.register(
            ResourceDescriptor::new("file:///{name}", "documents"),
            echo_vars_handler(),
        );
        let env = router.read("file:///notes.txt", test_ctx()).await.unwrap();
        assert_eq!(env.content[0].text.as_deref(), Some("notes.txt"));
    }

    #[tokio::test]
    async fn test_handler_error_degrades_to_diagnostic_text() {
        let mut router: ResourceRouter<()> = ResourceRouter::new();
        router.register(
            ResourceDescriptor::new("file:///{name}", "documents"),
            FnResourceHandler::new(|_vars, _ctx| async move {
                Err(DispatchError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "locked",
                )))
            }),
        );

        let env = router.read("file:///secret.pdf", test_ctx()).await.unwrap();
        let text = env.content[0].text.as_deref().unwrap();
        assert!(text.starts_with("Error reading resource:"));
    }

    #[tokio::test]
    async fn test_unmatched_uri_is_still_an_error() {
        let router: ResourceRouter<()> = ResourceRouter::new();
        let err = router.read("config://settings", test_ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoMatchingResource(_)));
    }
}
