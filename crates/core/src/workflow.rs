use crate::component::{Component, ComponentHandle};
use crate::dag::WorkflowDag;
use crate::error::{ConstructionError, WorkflowError, WorkflowResult};
use crate::events::{Event, EventSink, EventType, NoopSink};
use crate::executor::{RunOutcome, Scheduler};
use crate::tracker::DataTracker;
use crate::types::{NodeReport, NodeStatus, RunId, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A DAG of components sharing one config and one result store.
///
/// `C` is the read-only config handed to every handler and `D` the result
/// store they mutate through [`DataTracker`]. A workflow runs at most once.
pub struct Workflow<C, D> {
    id: Uuid,
    name: String,
    components: Vec<Component<C, D>>,
    // (dependent, dependency)
    edges: Vec<(ComponentHandle, ComponentHandle)>,
    sink: Arc<dyn EventSink>,
    executed: AtomicBool,
}

/// Outcome of [`Workflow::execute`].
#[derive(Debug)]
pub struct Execution<D> {
    pub run_id: RunId,
    /// The result store, possibly only partially populated on failure
    pub data: D,
    pub status: Status,
    /// Set exactly when `status` is [`Status::Failed`]
    pub error: Option<WorkflowError>,
    /// One report per component, in registration order
    pub nodes: Vec<NodeReport>,
}

impl<D> Execution<D> {
    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// First report for a component with this name.
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Number of components that ended in `status`.
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// The result store on success, the error otherwise.
    pub fn into_result(self) -> WorkflowResult<D> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.data),
        }
    }
}

impl<C, D> Workflow<C, D>
where
    C: Send + Sync + 'static,
    D: Clone + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            components: Vec::new(),
            edges: Vec::new(),
            sink: Arc::new(NoopSink),
            executed: AtomicBool::new(false),
        }
    }

    /// Send run and component lifecycle events to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Register a component. Registration order carries no scheduling meaning.
    pub fn add_component(&mut self, component: Component<C, D>) -> ComponentHandle {
        let handle = ComponentHandle {
            workflow: self.id,
            index: self.components.len(),
        };
        self.components.push(component);
        handle
    }

    /// Declare that `dependent` runs only after every handle in
    /// `dependencies` has succeeded.
    ///
    /// Edges are additive. Cycles and handles from other workflows are
    /// reported by [`execute`](Self::execute), before anything runs.
    pub fn add_dependencies(
        &mut self,
        dependent: ComponentHandle,
        dependencies: impl IntoIterator<Item = ComponentHandle>,
    ) {
        self.edges
            .extend(dependencies.into_iter().map(|dependency| (dependent, dependency)));
    }

    /// Name of the component behind `handle`, if it belongs to this workflow.
    pub fn component_name(&self, handle: ComponentHandle) -> Option<&str> {
        if handle.workflow != self.id {
            return None;
        }
        self.components.get(handle.index).map(|c| c.name())
    }

    /// Validate the graph and run every component, returning once all of
    /// them are terminal or `cancel` fires.
    ///
    /// Handlers receive a clone of `cancel` and are expected to observe it;
    /// the engine only stops dispatching new components.
    pub async fn execute(&self, cancel: CancellationToken, config: C, data: D) -> Execution<D> {
        let run_id = RunId::new();
        let started = Instant::now();

        if self.executed.swap(true, Ordering::SeqCst) {
            tracing::error!("Workflow {} has already been executed", self.name);
            return self.rejected(run_id, data, ConstructionError::AlreadyExecuted);
        }

        tracing::info!(
            "Starting workflow execution: workflow={}, run_id={}, components={}",
            self.name,
            run_id,
            self.components.len()
        );

        let names: Vec<String> = self.components.iter().map(|c| c.name.clone()).collect();
        let dag = match WorkflowDag::build(self.id, &names, &self.edges) {
            Ok(dag) => dag,
            Err(e) => {
                tracing::error!("Invalid workflow graph: workflow={}, error={}", self.name, e);
                return self.rejected(run_id, data, e);
            }
        };

        self.emit(
            run_id,
            EventType::RunStarted {
                workflow: self.name.clone(),
                components: self.components.len(),
            },
        );

        let tracker = DataTracker::new(config, data);
        let RunOutcome { nodes, error } = Scheduler::new(
            run_id,
            &self.components,
            dag,
            tracker.clone(),
            cancel,
            self.sink.clone(),
        )
        .run()
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = match &error {
            None => {
                tracing::info!(
                    "Workflow execution completed: workflow={}, run_id={}",
                    self.name,
                    run_id
                );
                self.emit(run_id, EventType::RunCompleted { duration_ms });
                Status::Done
            }
            Some(e) => {
                tracing::error!(
                    "Workflow execution failed: workflow={}, run_id={}, error={}",
                    self.name,
                    run_id,
                    e
                );
                self.emit(
                    run_id,
                    EventType::RunFailed {
                        error: e.to_string(),
                        duration_ms,
                    },
                );
                Status::Failed
            }
        };

        Execution {
            run_id,
            data: tracker.into_data(),
            status,
            error,
            nodes,
        }
    }

    /// Outcome for a run that was refused before any handler ran.
    fn rejected(&self, run_id: RunId, data: D, error: ConstructionError) -> Execution<D> {
        let nodes = self
            .components
            .iter()
            .map(|c| {
                let mut report = NodeReport::pending(&c.name);
                report.status = NodeStatus::Skipped;
                report
            })
            .collect();

        Execution {
            run_id,
            data,
            status: Status::Failed,
            error: Some(error.into()),
            nodes,
        }
    }

    fn emit(&self, run_id: RunId, event_type: EventType) {
        self.sink.emit(Event::new(run_id, event_type));
    }
}
