//! Spawned run driver exposing snapshot and event streams.
//!
//! [`WorkflowExecutor::start`] moves one run onto a Tokio task and hands the
//! caller a [`RunHandle`]: a watch receiver for consistent state snapshots, a
//! channel of lifecycle events for live display, a cancel control, and the
//! terminal state on `wait`.

use std::sync::Arc;

use tokio::sync::{
    mpsc::{UnboundedReceiver, unbounded_channel},
    watch,
};
use tokio::task::JoinHandle;
use tracing::warn;

use apiflow_types::{ExecutionState, RunEvent};

use super::{CancelHandle, StatePublisher, WorkflowRunRequest, drive_workflow_run};
use crate::invoker::{EndpointInvoker, NoopInvoker};

/// Starts workflow runs against a shared endpoint invoker.
pub struct WorkflowExecutor {
    invoker: Arc<dyn EndpointInvoker>,
}

impl WorkflowExecutor {
    pub fn new(invoker: Arc<dyn EndpointInvoker>) -> Self {
        Self { invoker }
    }

    /// An executor over the echoing [`NoopInvoker`], for previews and tests.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopInvoker))
    }

    /// Begins a fresh run and returns its handle.
    ///
    /// Every call constructs a brand-new execution state; a completed run is
    /// discarded rather than resumed, and nothing from an earlier run leaks
    /// into the new resolution context.
    pub fn start(&self, request: WorkflowRunRequest) -> RunHandle {
        let step_ids: Vec<String> = request
            .workflow
            .steps_in_execution_order()
            .iter()
            .map(|step| step.id.clone())
            .collect();
        let initial = ExecutionState::new_run(request.workflow.identifier(), step_ids);

        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (event_tx, event_rx) = unbounded_channel();
        let cancel = CancelHandle::new();
        let publisher = StatePublisher::new(snapshot_tx, Some(event_tx));
        let invoker = Arc::clone(&self.invoker);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move { drive_workflow_run(&request, invoker.as_ref(), &publisher, &task_cancel).await });

        RunHandle {
            snapshots: snapshot_rx,
            events: event_rx,
            cancel,
            task,
        }
    }
}

/// Caller-side view of one in-flight run.
pub struct RunHandle {
    snapshots: watch::Receiver<ExecutionState>,
    events: UnboundedReceiver<RunEvent>,
    cancel: CancelHandle,
    task: JoinHandle<ExecutionState>,
}

impl RunHandle {
    /// A consistent snapshot of the run state at this moment.
    pub fn snapshot(&self) -> ExecutionState {
        self.snapshots.borrow().clone()
    }

    /// An independent snapshot subscription for other observers.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.snapshots.clone()
    }

    /// The next lifecycle event, or `None` once the run has completed and
    /// the stream drained.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Requests a stop before the next step starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to reach its terminal state.
    pub async fn wait(mut self) -> ExecutionState {
        match (&mut self.task).await {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "workflow run task ended abnormally");
                self.snapshot()
            }
        }
    }
}
