use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::DispatchError;

/// Phase of the process-lifetime shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifespanPhase {
    Idle,
    Starting,
    Active,
    Stopping,
    Stopped,
}

/// Acquisition failure, optionally carrying whatever was acquired before
/// the failure so a later [`LifespanManager::stop`] can release it.
#[derive(Debug)]
pub struct AcquireFailure<S> {
    pub reason: String,
    pub partial: Option<S>,
}

impl<S> AcquireFailure<S> {
    pub fn new(reason: impl Into<String>) -> Self {
        AcquireFailure {
            reason: reason.into(),
            partial: None,
        }
    }

    /// Record partially-acquired state that still needs releasing.
    pub fn with_partial(mut self, partial: S) -> Self {
        self.partial = Some(partial);
        self
    }
}

/// Setup/teardown hook for the shared application resource.
///
/// `acquire` runs once before the server accepts requests; `release` runs
/// exactly once after it stops accepting them.  Release takes a shared
/// reference because request contexts may still hold clones of the
/// resource handle while teardown runs; hooks use interior mutability for
/// actual disconnect work.
#[async_trait]
pub trait Lifespan: Send + Sync {
    type State: Send + Sync + 'static;

    async fn acquire(&self) -> Result<Self::State, AcquireFailure<Self::State>>;

    async fn release(&self, state: &Self::State);
}

/// No-op lifespan for servers without a shared resource.
pub struct NullLifespan;

#[async_trait]
impl Lifespan for NullLifespan {
    type State = ();

    async fn acquire(&self) -> Result<(), AcquireFailure<()>> {
        Ok(())
    }

    async fn release(&self, _state: &()) {}
}

struct Inner<S> {
    phase: LifespanPhase,
    resource: Option<Arc<S>>,
    partial: Option<S>,
}

/// Owns the shared application resource for the server's active lifetime.
///
/// Phases run `Idle → Starting → Active → Stopping → Stopped`.  A failed
/// acquisition is fatal — the manager never enters `Active` — but any
/// partially-acquired state is retained so that `stop()` still releases
/// it.  Release runs exactly once on every exit path.
pub struct LifespanManager<S> {
    hook: Box<dyn Lifespan<State = S>>,
    inner: Mutex<Inner<S>>,
}

impl<S: Send + Sync + 'static> LifespanManager<S> {
    pub fn new(hook: impl Lifespan<State = S> + 'static) -> Self {
        LifespanManager {
            hook: Box::new(hook),
            inner: Mutex::new(Inner {
                phase: LifespanPhase::Idle,
                resource: None,
                partial: None,
            }),
        }
    }

    pub async fn phase(&self) -> LifespanPhase {
        self.inner.lock().await.phase
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.phase == LifespanPhase::Active
    }

    /// Shared handle to the resource while `Active`.
    pub async fn state(&self) -> Option<Arc<S>> {
        self.inner.lock().await.resource.clone()
    }

    /// Run acquisition and enter `Active`.
    ///
    /// Fails with [`DispatchError::Acquisition`] if acquisition fails or
    /// the manager is not `Idle`.  Failure is fatal: the manager moves to
    /// `Stopped` and only `stop()` remains meaningful, releasing whatever
    /// partial state the hook reported.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != LifespanPhase::Idle {
            return Err(DispatchError::Acquisition(format!(
                "cannot start lifespan in phase {:?}",
                inner.phase
            )));
        }
        inner.phase = LifespanPhase::Starting;

        match self.hook.acquire().await {
            Ok(state) => {
                inner.resource = Some(Arc::new(state));
                inner.phase = LifespanPhase::Active;
                tracing::info!("lifespan active");
                Ok(())
            }
            Err(failure) => {
                inner.partial = failure.partial;
                inner.phase = LifespanPhase::Stopped;
                tracing::error!(reason = %failure.reason, "lifespan acquisition failed");
                Err(DispatchError::Acquisition(failure.reason))
            }
        }
    }

    /// Release the resource exactly once and enter `Stopped`.
    ///
    /// Safe on every exit path: after `Active`, after a failed partial
    /// acquisition, and repeatedly — a second call finds nothing left to
    /// release and is a no-op.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let resource = inner.resource.take();
        let partial = inner.partial.take();

        if resource.is_none() && partial.is_none() {
            inner.phase = LifespanPhase::Stopped;
            return;
        }

        inner.phase = LifespanPhase::Stopping;
        if let Some(resource) = resource {
            self.hook.release(resource.as_ref()).await;
        }
        if let Some(partial) = partial {
            self.hook.release(&partial).await;
        }
        inner.phase = LifespanPhase::Stopped;
        tracing::info!("lifespan stopped");
    }
}
