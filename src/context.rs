use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{Notification, SessionId};

/// Write-only channel for progress/info/debug events, distinct from a
/// handler's return value.
///
/// Sends are fire-and-forget: events land on an unbounded queue in
/// emission order, and a receiver that has gone away is ignored.  The
/// kernel never drops an event that was queued before a later failure —
/// the receiving half retains everything already sent.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink {
    /// Create a sink plus the receiving half the transport drains.
    pub fn channel() -> (NotificationSink, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationSink { tx }, rx)
    }

    /// Emit an info-level event.
    pub fn info(&self, message: impl Into<String>) {
        self.send(Notification::Info {
            message: message.into(),
        });
    }

    /// Emit a debug-level event.
    pub fn debug(&self, message: impl Into<String>) {
        self.send(Notification::Debug {
            message: message.into(),
        });
    }

    /// Report progress as a current/total pair.
    pub fn report_progress(&self, current: f64, total: f64, message: Option<String>) {
        self.send(Notification::Progress {
            current,
            total,
            message,
        });
    }

    fn send(&self, notification: Notification) {
        // Closed receiver means the session went away; the event is moot.
        let _ = self.tx.send(notification);
    }
}

/// Per-request bundle handed by the transport collaborator along with the
/// request envelope: where notifications go and how cancellation is
/// signalled for this session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub notifications: NotificationSink,
    pub cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(notifications: NotificationSink) -> Self {
        SessionHandle {
            notifications,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(notifications: NotificationSink, cancel: CancellationToken) -> Self {
        SessionHandle {
            notifications,
            cancel,
        }
    }

    /// Handle wired to a fresh channel — convenient for tests and
    /// embedders that drain notifications after the call completes.
    pub fn detached() -> (SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let (sink, rx) = NotificationSink::channel();
        (SessionHandle::new(sink), rx)
    }
}

/// Per-invocation context passed to every handler.
///
/// Carries the calling session's identity, a read-only reference to the
/// lifespan-scoped resource, and the outbound notification sink.  Created
/// by the dispatcher for one invocation and destroyed when it completes;
/// it never outlives the invocation.
#[derive(Debug)]
pub struct RequestContext<S> {
    session: SessionId,
    state: Arc<S>,
    sink: NotificationSink,
    cancel: CancellationToken,
}

// Not derived: contexts are cloneable regardless of whether `S` is.
impl<S> Clone for RequestContext<S> {
    fn clone(&self) -> Self {
        RequestContext {
            session: self.session.clone(),
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> RequestContext<S> {
    pub(crate) fn new(
        session: SessionId,
        state: Arc<S>,
        sink: NotificationSink,
        cancel: CancellationToken,
    ) -> Self {
        RequestContext {
            session,
            state,
            sink,
            cancel,
        }
    }

    /// Identity of the calling session.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// The lifespan-scoped shared resource, read-only to handlers.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The outbound notification sink.
    pub fn sink(&self) -> &NotificationSink {
        &self.sink
    }

    /// Emit an info-level event to the calling session.
    pub fn info(&self, message: impl Into<String>) {
        self.sink.info(message);
    }

    /// Emit a debug-level event to the calling session.
    pub fn debug(&self, message: impl Into<String>) {
        self.sink.debug(message);
    }

    /// Report progress to the calling session.
    pub fn report_progress(&self, current: f64, total: f64, message: Option<String>) {
        self.sink.report_progress(current, total, message);
    }

    /// True once the session disconnected or the transport cancelled the
    /// request.  Long-running handlers should check this at suspension
    /// points and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
