//! Error types for workflow construction and execution.

use std::time::Duration;
use thiserror::Error;

/// Result type for workflow execution.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Problems with the dependency graph itself.
///
/// These are detected when `execute` is called, before any handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// The dependency graph contains a cycle through this component.
    #[error("circular dependency involving component '{component}'")]
    Cycle { component: String },

    /// A dependency edge references a handle that was not issued by this workflow.
    #[error("component '{component}' depends on a component registered in another workflow")]
    ForeignComponent { component: String },

    /// `execute` was already called on this workflow.
    #[error("workflow has already been executed")]
    AlreadyExecuted,
}

/// Errors produced by a workflow execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The graph was invalid; nothing was executed.
    #[error("invalid workflow graph: {0}")]
    Construction(#[from] ConstructionError),

    /// A handler returned an error.
    #[error("component '{component}' failed: {source}")]
    Handler {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// A handler did not finish within its configured timeout.
    #[error("component '{component}' timed out after {timeout:?}")]
    Timeout { component: String, timeout: Duration },

    /// A handler panicked.
    #[error("component '{component}' panicked: {message}")]
    Panicked { component: String, message: String },

    /// The cancellation token fired before every component finished.
    #[error("workflow execution cancelled")]
    Cancelled,

    /// Cancellation fired while a component was waiting for a limiter slot.
    #[error("component '{component}' cancelled while waiting for a concurrency slot")]
    LimiterAcquire { component: String },
}

impl WorkflowError {
    /// Whether this error was raised before execution started.
    pub fn is_construction(&self) -> bool {
        matches!(self, Self::Construction(_))
    }

    /// Whether this error stems from the cancellation token.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::LimiterAcquire { .. })
    }

    /// Name of the component that failed, if the error belongs to one.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Handler { component, .. }
            | Self::Timeout { component, .. }
            | Self::Panicked { component, .. }
            | Self::LimiterAcquire { component } => Some(component),
            Self::Construction(_) | Self::Cancelled => None,
        }
    }
}

/// Errors from [`ConcurrencyLimiter`](crate::limiter::ConcurrencyLimiter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("concurrency limiter capacity must be at least 1")]
    ZeroCapacity,

    #[error("cancelled while waiting for a concurrency slot")]
    Cancelled,

    #[error("concurrency limiter closed")]
    Closed,
}
