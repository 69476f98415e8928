//! Dependency-count scheduler.
//!
//! Every dispatched component runs in its own tokio task. Tasks report back
//! over a channel and the coordinator loop, which owns all node state,
//! releases dependents as their last dependency succeeds.

use crate::component::{BoundHandler, Component};
use crate::dag::WorkflowDag;
use crate::error::WorkflowError;
use crate::events::{Event, EventSink, EventType};
use crate::limiter::ConcurrencyLimiter;
use crate::tracker::DataTracker;
use crate::types::{NodeReport, NodeStatus, RunId};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Message sent from a component task to the coordinator
enum NodeMessage {
    /// Limiter slot acquired, handler about to run
    Started { node: usize, at: DateTime<Utc> },
    /// Handler returned (or never ran); any limiter slot is already released
    Finished {
        node: usize,
        result: Result<(), WorkflowError>,
        duration: Option<Duration>,
        at: DateTime<Utc>,
    },
}

/// Final state of a run as seen by the coordinator
pub(crate) struct RunOutcome {
    pub nodes: Vec<NodeReport>,
    pub error: Option<WorkflowError>,
}

pub(crate) struct Scheduler<'a, C, D> {
    run_id: RunId,
    components: &'a [Component<C, D>],
    dag: WorkflowDag,
    tracker: DataTracker<C, D>,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
    reports: Vec<NodeReport>,
    terminal: usize,
}

impl<'a, C, D> Scheduler<'a, C, D>
where
    C: Send + Sync + 'static,
    D: Send + 'static,
{
    pub fn new(
        run_id: RunId,
        components: &'a [Component<C, D>],
        dag: WorkflowDag,
        tracker: DataTracker<C, D>,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let reports = components
            .iter()
            .map(|c| NodeReport::pending(&c.name))
            .collect();

        Self {
            run_id,
            components,
            dag,
            tracker,
            cancel,
            sink,
            reports,
            terminal: 0,
        }
    }

    /// Drive the graph until every component is terminal or `cancel` fires.
    pub async fn run(mut self) -> RunOutcome {
        let total = self.dag.len();
        let mut remaining = self.dag.dependency_counts();
        let mut first_error: Option<WorkflowError> = None;
        let (tx, mut rx) = mpsc::unbounded_channel();

        if self.cancel.is_cancelled() {
            return self.cancelled(&mut rx);
        }

        for node in self.dag.entry_nodes() {
            self.dispatch(node, &tx);
        }

        while self.terminal < total {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(&mut rx),
                message = rx.recv() => match message {
                    Some(message) => message,
                    // Unreachable while `tx` is alive
                    None => break,
                },
            };

            let Some((node, result)) = self.record(message) else {
                continue;
            };

            match result {
                Ok(()) => {
                    for dependent in self.dag.dependents(node) {
                        if self.reports[dependent].status != NodeStatus::Pending {
                            continue;
                        }
                        remaining[dependent] -= 1;
                        if remaining[dependent] == 0 {
                            self.dispatch(dependent, &tx);
                        }
                    }
                }
                Err(e) => {
                    self.skip_descendants(node);
                    first_error.get_or_insert(e);
                }
            }
        }

        RunOutcome {
            nodes: self.reports,
            error: first_error,
        }
    }

    /// Apply a task message to the node reports. Returns the outcome when
    /// the message finished a node.
    fn record(&mut self, message: NodeMessage) -> Option<(usize, Result<(), WorkflowError>)> {
        match message {
            NodeMessage::Started { node, at } => {
                tracing::debug!("Component started: {}", self.reports[node].name);
                self.reports[node].status = NodeStatus::Running;
                self.reports[node].started_at = Some(at);
                self.emit(EventType::NodeStarted {
                    component: self.reports[node].name.clone(),
                });
                None
            }
            NodeMessage::Finished {
                node,
                result,
                duration,
                at,
            } => {
                self.reports[node].completed_at = Some(at);
                self.reports[node].duration = duration;

                match &result {
                    Ok(()) => {
                        self.terminal += 1;
                        self.reports[node].status = NodeStatus::Succeeded;
                        self.emit(EventType::NodeSucceeded {
                            component: self.reports[node].name.clone(),
                            duration_ms: duration.map_or(0, |d| d.as_millis() as u64),
                        });
                    }
                    // The handler never ran
                    Err(e) if e.is_cancellation() => {
                        self.reports[node].error = Some(e.to_string());
                        self.skip(node, e.to_string());
                    }
                    Err(e) => {
                        self.terminal += 1;
                        tracing::warn!(
                            "Component failed: {}, error={}",
                            self.reports[node].name,
                            e
                        );
                        self.reports[node].status = NodeStatus::Failed;
                        self.reports[node].error = Some(e.to_string());
                        self.emit(EventType::NodeFailed {
                            component: self.reports[node].name.clone(),
                            error: e.to_string(),
                        });
                    }
                }

                Some((node, result))
            }
        }
    }

    /// Mark a component Ready and spawn its task.
    fn dispatch(&mut self, node: usize, tx: &mpsc::UnboundedSender<NodeMessage>) {
        let component = &self.components[node];
        tracing::debug!("Dispatching component: {}", component.name);
        self.reports[node].status = NodeStatus::Ready;

        let task = NodeTask {
            node,
            name: component.name.clone(),
            handler: component.handler.clone(),
            limiter: component.limiter.clone(),
            timeout: component.timeout,
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
            tx: tx.clone(),
        };

        // Detached: cancellation stops dispatch but never aborts a running handler.
        tokio::spawn(task.run());
    }

    /// Skip every not-yet-dispatched component downstream of a failure.
    fn skip_descendants(&mut self, node: usize) {
        let failed = self.reports[node].name.clone();

        for descendant in self.dag.descendants(node) {
            if self.reports[descendant].status != NodeStatus::Pending {
                continue;
            }
            tracing::info!(
                "Skipping component {} due to failed dependency {}",
                self.reports[descendant].name,
                failed
            );
            self.skip(descendant, format!("dependency '{}' failed", failed));
        }
    }

    fn skip(&mut self, node: usize, reason: String) {
        self.reports[node].status = NodeStatus::Skipped;
        self.terminal += 1;
        self.emit(EventType::NodeSkipped {
            component: self.reports[node].name.clone(),
            reason,
        });
    }

    /// Stop scheduling. Messages already sent by tasks are applied first, so
    /// a handler that finished is reported as such. Components that never
    /// started (including those queued on a limiter) are skipped; running
    /// handlers are left to observe the token.
    fn cancelled(mut self, rx: &mut mpsc::UnboundedReceiver<NodeMessage>) -> RunOutcome {
        tracing::warn!("Workflow execution cancelled: run_id={}", self.run_id);

        while let Ok(message) = rx.try_recv() {
            self.record(message);
        }

        for node in 0..self.reports.len() {
            let status = self.reports[node].status;
            match status {
                NodeStatus::Ready if self.components[node].limiter.is_some() => {
                    let error = WorkflowError::LimiterAcquire {
                        component: self.reports[node].name.clone(),
                    };
                    self.reports[node].error = Some(error.to_string());
                    self.skip(node, error.to_string());
                }
                NodeStatus::Pending | NodeStatus::Ready => {
                    self.skip(node, "workflow cancelled".to_string());
                }
                _ => {}
            }
        }

        self.emit(EventType::RunCancelled {
            reason: "cancellation token fired".to_string(),
        });

        RunOutcome {
            nodes: self.reports,
            error: Some(WorkflowError::Cancelled),
        }
    }

    fn emit(&self, event_type: EventType) {
        self.sink.emit(Event::new(self.run_id, event_type));
    }
}

/// Everything a spawned component needs, detached from the scheduler
struct NodeTask<C, D> {
    node: usize,
    name: String,
    handler: BoundHandler<C, D>,
    limiter: Option<ConcurrencyLimiter>,
    timeout: Option<Duration>,
    tracker: DataTracker<C, D>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<NodeMessage>,
}

impl<C, D> NodeTask<C, D>
where
    C: Send + Sync + 'static,
    D: Send + 'static,
{
    async fn run(self) {
        let NodeTask {
            node,
            name,
            handler,
            limiter,
            timeout,
            tracker,
            cancel,
            tx,
        } = self;

        let permit = match &limiter {
            Some(limiter) => match limiter.acquire(&cancel).await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    tracing::debug!("Component {} could not acquire a slot: {}", name, e);
                    let _ = tx.send(NodeMessage::Finished {
                        node,
                        result: Err(WorkflowError::LimiterAcquire { component: name }),
                        duration: None,
                        at: Utc::now(),
                    });
                    return;
                }
            },
            None => None,
        };

        if cancel.is_cancelled() {
            drop(permit);
            let _ = tx.send(NodeMessage::Finished {
                node,
                result: Err(WorkflowError::Cancelled),
                duration: None,
                at: Utc::now(),
            });
            return;
        }

        let _ = tx.send(NodeMessage::Started {
            node,
            at: Utc::now(),
        });

        let start = Instant::now();
        let result = invoke(&name, handler, timeout, tracker, cancel).await;
        let duration = start.elapsed();

        // Release the slot before the coordinator sees this node as terminal.
        drop(permit);

        let _ = tx.send(NodeMessage::Finished {
            node,
            result,
            duration: Some(duration),
            at: Utc::now(),
        });
    }
}

/// Run a handler, mapping errors, timeouts and panics onto [`WorkflowError`].
async fn invoke<C, D>(
    name: &str,
    handler: BoundHandler<C, D>,
    timeout: Option<Duration>,
    tracker: DataTracker<C, D>,
    cancel: CancellationToken,
) -> Result<(), WorkflowError> {
    let call = AssertUnwindSafe(async move { handler(cancel, tracker).await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(WorkflowError::Timeout {
                    component: name.to_string(),
                    timeout: limit,
                })
            }
        },
        None => call.await,
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(WorkflowError::Handler {
            component: name.to_string(),
            source,
        }),
        Err(panic) => Err(WorkflowError::Panicked {
            component: name.to_string(),
            message: panic_message(&*panic),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
