use crate::limiter::ConcurrencyLimiter;
use crate::tracker::DataTracker;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Type-erased handler with its input already bound.
pub(crate) type BoundHandler<C, D> = Arc<
    dyn Fn(CancellationToken, DataTracker<C, D>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// A unit of work in a workflow graph.
///
/// The input is bound at construction and cloned into each invocation, so
/// the handler's input type is checked by the compiler rather than at
/// dispatch time.
pub struct Component<C, D> {
    pub(crate) name: String,
    pub(crate) handler: BoundHandler<C, D>,
    pub(crate) limiter: Option<ConcurrencyLimiter>,
    pub(crate) timeout: Option<Duration>,
}

impl<C, D> Component<C, D>
where
    C: Send + Sync + 'static,
    D: Send + 'static,
{
    /// Create a component from a name, an input value and its handler.
    pub fn new<I, F, Fut>(name: impl Into<String>, input: I, handler: F) -> Self
    where
        I: Clone + Send + Sync + 'static,
        F: Fn(CancellationToken, I, DataTracker<C, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: BoundHandler<C, D> =
            Arc::new(move |cancel: CancellationToken, tracker: DataTracker<C, D>| {
                handler(cancel, input.clone(), tracker).boxed()
            });

        Self {
            name: name.into(),
            handler,
            limiter: None,
            timeout: None,
        }
    }

    /// Create a component whose handler takes no input.
    pub fn without_input<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CancellationToken, DataTracker<C, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name, (), move |cancel, (), tracker| handler(cancel, tracker))
    }
}

impl<C, D> Component<C, D> {
    /// Bind a concurrency limiter. The handler only runs while holding a slot.
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Fail the component if its handler runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> Option<&ConcurrencyLimiter> {
        self.limiter.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<C, D> fmt::Debug for Component<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("limiter", &self.limiter)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`Workflow::add_component`](crate::Workflow::add_component).
///
/// Only used to declare dependency edges on the workflow that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    pub(crate) workflow: Uuid,
    pub(crate) index: usize,
}

impl ComponentHandle {
    /// Position of the component in registration order.
    pub fn index(&self) -> usize {
        self.index
    }
}
