//! Workflow execution: the sequential step loop and its state machine.
//!
//! One call to [`drive_workflow_run`] is one run: it constructs a fresh
//! [`ExecutionState`], walks the steps in ascending `order`, resolves each
//! step's parameters, awaits the endpoint invoker, and records outcomes.
//! The run is strictly sequential and fail-fast — the first resolution or
//! invocation error halts it, leaving later steps `Pending`.
//!
//! The executor owns its state privately and publishes an immutable snapshot
//! through a [`StatePublisher`] after every transition, so concurrent
//! observers never see a torn update. Cancellation is checked between steps,
//! never mid-invocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map as JsonMap, Value};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, warn};

use apiflow_types::{ExecutionState, ExecutionStepResult, RunEvent, RunStatus, StepRunStatus, Workflow};

use crate::condition::{eval_condition, normalize_condition};
use crate::invoker::EndpointInvoker;
use crate::resolve::{ResolutionContext, resolve_parameters};

pub mod runner;
pub use runner::{RunHandle, WorkflowExecutor};

/// Everything one run needs: the definition plus caller-supplied values.
#[derive(Debug, Clone)]
pub struct WorkflowRunRequest {
    /// Read-only workflow definition.
    pub workflow: Workflow,
    /// Workflow-level inputs, addressed by `${input.<name>}` placeholders.
    pub inputs: JsonMap<String, Value>,
    /// Run-level parameter map; a fallback used verbatim for steps that
    /// declare no parameters of their own.
    pub parameters: JsonMap<String, Value>,
}

impl WorkflowRunRequest {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            inputs: JsonMap::new(),
            parameters: JsonMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: JsonMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_parameters(mut self, parameters: JsonMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Publishes state snapshots and lifecycle events to run observers.
///
/// Both channels are optional so the core loop can run unobserved (tests,
/// fire-and-forget callers) without conditional code at every transition.
pub struct StatePublisher {
    snapshot_tx: Option<watch::Sender<ExecutionState>>,
    event_tx: Option<UnboundedSender<RunEvent>>,
}

impl StatePublisher {
    pub fn new(snapshot_tx: watch::Sender<ExecutionState>, event_tx: Option<UnboundedSender<RunEvent>>) -> Self {
        Self {
            snapshot_tx: Some(snapshot_tx),
            event_tx,
        }
    }

    /// A publisher with no observers.
    pub fn disabled() -> Self {
        Self {
            snapshot_tx: None,
            event_tx: None,
        }
    }

    fn publish(&self, state: &ExecutionState) {
        if let Some(snapshot_tx) = &self.snapshot_tx {
            snapshot_tx.send_replace(state.clone());
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(event_tx) = &self.event_tx {
            let _ = event_tx.send(event);
        }
    }
}

/// Requests a stop between steps; never interrupts an in-flight invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one run to its terminal state and returns it.
///
/// Terminal status is `Failed` after a step error, `Paused` after external
/// cancellation, and `Completed` otherwise — including when a conditional
/// gate evaluated false and halted the remainder of the run.
pub async fn drive_workflow_run(
    request: &WorkflowRunRequest,
    invoker: &dyn EndpointInvoker,
    publisher: &StatePublisher,
    cancel: &CancelHandle,
) -> ExecutionState {
    let ordered = request.workflow.steps_in_execution_order();
    let mut state = ExecutionState::new_run(request.workflow.identifier(), ordered.iter().map(|step| step.id.clone()));
    let mut context = ResolutionContext::with_inputs(request.inputs.clone());

    let run_started_at = Utc::now();
    state.status = RunStatus::Running;
    state.started_at = Some(run_started_at);
    publisher.publish(&state);
    publisher.emit(RunEvent::RunStarted {
        workflow_id: state.workflow_id.clone(),
        at: run_started_at,
    });

    let mut failed = false;
    let mut cancelled = false;

    for (index, step) in ordered.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(workflow = %state.workflow_id, "cancellation requested; stopping before step {}", index);
            cancelled = true;
            break;
        }

        state.current_step_index = index;
        let step_started_at = Utc::now();
        let timer = Instant::now();
        {
            let record = &mut state.steps[index];
            record.status = StepRunStatus::Running;
            record.started_at = Some(step_started_at);
        }
        publisher.publish(&state);
        publisher.emit(RunEvent::StepStarted {
            index,
            step_id: step.id.clone(),
            at: step_started_at,
        });

        if let Some(gate) = step.condition().and_then(normalize_condition)
            && !eval_condition(&gate, &context)
        {
            debug!(step = %step.id, condition = %gate, "conditional gate false; halting remainder of run");
            finish_step(&mut state.steps[index], StepRunStatus::Skipped, None, None);
            publisher.publish(&state);
            publisher.emit(step_finished_event(index, &state.steps[index], timer));
            break;
        }

        // Precedence: a step with declared parameters uses them verbatim; the
        // run-level map applies only to steps that declare none at all.
        let resolved = if step.parameters.is_empty() {
            Ok(request.parameters.clone())
        } else {
            resolve_parameters(&step.parameters, &context)
        };
        let resolved = match resolved {
            Ok(map) => map,
            Err(error) => {
                warn!(step = %step.id, %error, "parameter resolution failed");
                finish_step(&mut state.steps[index], StepRunStatus::Error, None, Some(error.to_string()));
                failed = true;
                publisher.publish(&state);
                publisher.emit(step_finished_event(index, &state.steps[index], timer));
                break;
            }
        };

        match invoker.invoke(&step.endpoint_id, &resolved).await {
            Ok(result) => {
                context.record_step_result(step.id.clone(), result.clone());
                finish_step(&mut state.steps[index], StepRunStatus::Success, Some(result), None);
                publisher.publish(&state);
                publisher.emit(step_finished_event(index, &state.steps[index], timer));
            }
            Err(error) => {
                warn!(step = %step.id, %error, "endpoint invocation failed");
                finish_step(&mut state.steps[index], StepRunStatus::Error, None, Some(error.message));
                failed = true;
                publisher.publish(&state);
                publisher.emit(step_finished_event(index, &state.steps[index], timer));
                break;
            }
        }
    }

    state.status = if failed {
        RunStatus::Failed
    } else if cancelled {
        RunStatus::Paused
    } else {
        RunStatus::Completed
    };
    let run_finished_at = Utc::now();
    state.finished_at = Some(run_finished_at);
    publisher.publish(&state);
    publisher.emit(RunEvent::RunCompleted {
        status: state.status,
        at: run_finished_at,
        error: state.failure_summary(),
    });

    state
}

fn finish_step(record: &mut ExecutionStepResult, status: StepRunStatus, result: Option<Value>, error: Option<String>) {
    record.status = status;
    record.finished_at = Some(Utc::now());
    record.result = result;
    record.error = error;
}

fn step_finished_event(index: usize, record: &ExecutionStepResult, timer: Instant) -> RunEvent {
    RunEvent::StepFinished {
        index,
        step_id: record.step_id.clone(),
        status: record.status,
        result: record.result.clone(),
        error: record.error.clone(),
        duration_ms: timer.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Per-endpoint scripted outcomes, recording every invocation.
    struct ScriptedInvoker {
        outcomes: HashMap<String, Result<Value, String>>,
        calls: Mutex<Vec<(String, JsonMap<String, Value>)>>,
    }

    impl ScriptedInvoker {
        fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn succeed(mut self, endpoint_id: &str, result: Value) -> Self {
            self.outcomes.insert(endpoint_id.to_string(), Ok(result));
            self
        }

        fn fail(mut self, endpoint_id: &str, message: &str) -> Self {
            self.outcomes.insert(endpoint_id.to_string(), Err(message.to_string()));
            self
        }

        fn calls(&self) -> Vec<(String, JsonMap<String, Value>)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl EndpointInvoker for ScriptedInvoker {
        async fn invoke(&self, endpoint_id: &str, parameters: &JsonMap<String, Value>) -> Result<Value, InvokeError> {
            self.calls
                .lock()
                .expect("lock")
                .push((endpoint_id.to_string(), parameters.clone()));
            match self.outcomes.get(endpoint_id) {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(message)) => Err(InvokeError::new(message.clone())),
                None => Ok(json!({"status": "ok"})),
            }
        }
    }

    fn workflow(document: Value) -> Workflow {
        serde_json::from_value(document).expect("parse workflow")
    }

    async fn run(request: &WorkflowRunRequest, invoker: &ScriptedInvoker) -> ExecutionState {
        drive_workflow_run(request, invoker, &StatePublisher::disabled(), &CancelHandle::new()).await
    }

    #[tokio::test]
    async fn three_successful_steps_complete_in_order() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "all-green",
            "steps": [
                { "id": "a", "endpointId": "e-a", "order": 0 },
                { "id": "b", "endpointId": "e-b", "order": 1 },
                { "id": "c", "endpointId": "e-c", "order": 2 }
            ]
        })));
        let invoker = ScriptedInvoker::new();

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.steps.iter().all(|step| step.status == StepRunStatus::Success));
        assert_eq!(
            invoker.calls().iter().map(|(endpoint, _)| endpoint.clone()).collect::<Vec<_>>(),
            vec!["e-a", "e-b", "e-c"]
        );

        // Sequential ordering: a step finishes before the next one starts,
        // and the run finishes no earlier than its last step.
        for window in state.steps.windows(2) {
            assert!(window[0].finished_at.expect("finished") <= window[1].started_at.expect("started"));
        }
        assert!(state.finished_at.expect("run finished") >= state.steps[2].finished_at.expect("finished"));
    }

    #[tokio::test]
    async fn chained_reference_passes_prior_output() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "chained",
            "steps": [
                { "id": "step-0", "endpointId": "get-users", "order": 0 },
                {
                    "id": "step-1", "endpointId": "create-order", "order": 1,
                    "parameters": { "userId": "${steps.step-0.id}" }
                }
            ]
        })));
        let invoker = ScriptedInvoker::new().succeed("get-users", json!({"id": "u1"}));

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Completed);
        let calls = invoker.calls();
        assert_eq!(calls[1].0, "create-order");
        assert_eq!(calls[1].1.get("userId"), Some(&json!("u1")));
    }

    #[tokio::test]
    async fn missing_field_fails_resolution_before_invocation() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "broken-chain",
            "steps": [
                { "id": "step-0", "endpointId": "get-users", "order": 0 },
                {
                    "id": "step-1", "endpointId": "create-order", "order": 1,
                    "parameters": { "userId": "${steps.step-0.id}" }
                },
                { "id": "step-2", "endpointId": "notify", "order": 2 }
            ]
        })));
        let invoker = ScriptedInvoker::new().succeed("get-users", json!({"name": "x"}));

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Failed);
        let failed = state.step("step-1").expect("step-1");
        assert_eq!(failed.status, StepRunStatus::Error);
        assert!(failed.error.as_deref().expect("error").contains("missing field 'id'"));

        // Fail-fast: step-1 never reached the invoker, step-2 never started.
        assert_eq!(invoker.calls().len(), 1);
        assert_eq!(state.step("step-2").expect("step-2").status, StepRunStatus::Pending);
        assert_eq!(
            state.failure_summary().as_deref(),
            Some("Step 2 of 3 failed: missing field 'id' in result of step 'step-0'")
        );
    }

    #[tokio::test]
    async fn invocation_failure_is_terminal() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "one-shot",
            "steps": [
                { "id": "only", "endpointId": "flaky", "order": 0 }
            ]
        })));
        let invoker = ScriptedInvoker::new().fail("flaky", "HTTP 500: internal error");

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.current_step_index, 0);
        assert!(state.finished_at.is_some());
        let only = &state.steps[0];
        assert_eq!(only.status, StepRunStatus::Error);
        assert_eq!(only.error.as_deref(), Some("HTTP 500: internal error"));
        assert!(only.finished_at.is_some());
    }

    #[tokio::test]
    async fn step_parameters_take_precedence_over_run_parameters() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "precedence",
            "steps": [
                {
                    "id": "declares", "endpointId": "e-a", "order": 0,
                    "parameters": { "note": "own" }
                },
                { "id": "inherits", "endpointId": "e-b", "order": 1 }
            ]
        })))
        .with_parameters(
            json!({"note": "global", "extra": 1})
                .as_object()
                .expect("object")
                .clone(),
        );
        let invoker = ScriptedInvoker::new();

        let state = run(&request, &invoker).await;
        assert_eq!(state.status, RunStatus::Completed);

        let calls = invoker.calls();
        // Declared parameters are used verbatim; the global map is not merged in.
        assert_eq!(calls[0].1, json!({"note": "own"}).as_object().expect("object").clone());
        // A step declaring none falls back to the whole global map.
        assert_eq!(calls[1].1, json!({"note": "global", "extra": 1}).as_object().expect("object").clone());
    }

    #[tokio::test]
    async fn forward_reference_rejects_with_unresolved_reference() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "forward",
            "steps": [
                {
                    "id": "step-0", "endpointId": "e-a", "order": 0,
                    "parameters": { "early": "${steps.step-1.id}" }
                },
                { "id": "step-1", "endpointId": "e-b", "order": 1 }
            ]
        })));
        let invoker = ScriptedInvoker::new();

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Failed);
        let failed = &state.steps[0];
        assert_eq!(failed.status, StepRunStatus::Error);
        assert!(failed.error.as_deref().expect("error").contains("unresolved reference"));
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn false_gate_halts_the_run_without_failure() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "gated",
            "steps": [
                { "id": "a", "endpointId": "e-a", "order": 0 },
                {
                    "id": "b", "endpointId": "e-b", "order": 1,
                    "conditionalLogic": { "condition": "steps.a.status == \"done\"" }
                },
                { "id": "c", "endpointId": "e-c", "order": 2 }
            ]
        })));
        let invoker = ScriptedInvoker::new().succeed("e-a", json!({"status": "pending"}));

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.step("a").expect("a").status, StepRunStatus::Success);
        assert_eq!(state.step("b").expect("b").status, StepRunStatus::Skipped);
        assert_eq!(state.step("c").expect("c").status, StepRunStatus::Pending);
        assert_eq!(invoker.calls().len(), 1);
    }

    #[tokio::test]
    async fn true_gate_lets_the_run_continue() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "gated",
            "steps": [
                { "id": "a", "endpointId": "e-a", "order": 0 },
                {
                    "id": "b", "endpointId": "e-b", "order": 1,
                    "conditionalLogic": { "condition": "${ steps.a.status == \"ok\" }" }
                }
            ]
        })));
        let invoker = ScriptedInvoker::new().succeed("e-a", json!({"status": "ok"}));

        let state = run(&request, &invoker).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.step("b").expect("b").status, StepRunStatus::Success);
        assert_eq!(invoker.calls().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_between_steps_pauses_the_run() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "cancelled",
            "steps": [
                { "id": "a", "endpointId": "e-a", "order": 0 },
                { "id": "b", "endpointId": "e-b", "order": 1 }
            ]
        })));
        let invoker = ScriptedInvoker::new();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let state = drive_workflow_run(&request, &invoker, &StatePublisher::disabled(), &cancel).await;

        assert_eq!(state.status, RunStatus::Paused);
        assert!(state.steps.iter().all(|step| step.status == StepRunStatus::Pending));
        assert!(invoker.calls().is_empty());
        assert!(state.finished_at.is_some());
    }

    #[tokio::test]
    async fn inputs_resolve_and_events_stream_in_lifecycle_order() {
        let request = WorkflowRunRequest::new(workflow(json!({
            "name": "evented",
            "steps": [
                {
                    "id": "a", "endpointId": "e-a", "order": 0,
                    "parameters": { "region": "${input.region}" }
                }
            ]
        })))
        .with_inputs(json!({"region": "us"}).as_object().expect("object").clone());
        let invoker = ScriptedInvoker::new();

        let (snapshot_tx, snapshot_rx) = watch::channel(ExecutionState::new_run("evented", ["a".to_string()]));
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let publisher = StatePublisher::new(snapshot_tx, Some(event_tx));

        let state = drive_workflow_run(&request, &invoker, &publisher, &CancelHandle::new()).await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(invoker.calls()[0].1.get("region"), Some(&json!("us")));

        // The watch channel holds the final snapshot.
        assert_eq!(*snapshot_rx.borrow(), state);

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
        assert!(matches!(events.get(1), Some(RunEvent::StepStarted { step_id, .. }) if step_id == "a"));
        assert!(matches!(
            events.get(2),
            Some(RunEvent::StepFinished { status: StepRunStatus::Success, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunCompleted { status: RunStatus::Completed, error: None, .. })
        ));
    }
}
