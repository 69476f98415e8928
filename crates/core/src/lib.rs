//! In-process DAG workflow engine.
//!
//! Components are registered on a [`Workflow`], wired together with
//! dependency edges and executed with as much parallelism as the edges and
//! any shared [`ConcurrencyLimiter`] allow. Handlers read the config and
//! mutate the shared result only through a [`DataTracker`].
//!
//! ```ignore
//! use fanout_core::{Component, DataTracker, Workflow};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut workflow = Workflow::<String, Vec<String>>::new("greet");
//! let hello = workflow.add_component(Component::without_input(
//!     "hello",
//!     |_cancel, dt: DataTracker<String, Vec<String>>| async move {
//!         dt.update(|d| d.push(format!("hello {}", dt.config())));
//!         Ok(())
//!     },
//! ));
//! let bye = workflow.add_component(Component::without_input(
//!     "bye",
//!     |_cancel, dt: DataTracker<String, Vec<String>>| async move {
//!         dt.update(|d| d.push("bye".to_string()));
//!         Ok(())
//!     },
//! ));
//! workflow.add_dependencies(bye, [hello]);
//!
//! let execution = workflow
//!     .execute(CancellationToken::new(), "world".to_string(), Vec::new())
//!     .await;
//! assert_eq!(execution.into_result()?, vec!["hello world", "bye"]);
//! ```

pub mod component;
pub mod dag;
pub mod error;
pub mod events;
mod executor;
pub mod limiter;
pub mod tracker;
pub mod types;
pub mod workflow;

pub use component::{Component, ComponentHandle};
pub use error::{ConstructionError, LimiterError, WorkflowError, WorkflowResult};
pub use events::{Event, EventSink, EventType, MemorySink, NoopSink};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use tracker::DataTracker;
pub use types::{NodeReport, NodeStatus, RunId, Status};
pub use workflow::{Execution, Workflow};

pub use tokio_util::sync::CancellationToken;
