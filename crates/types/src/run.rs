//! Execution-state types recorded by the workflow executor.
//!
//! One run owns one [`ExecutionState`]; a re-run always constructs a fresh
//! state rather than mutating a completed one. The executor mutates its
//! private copy and publishes immutable snapshots, so these types are plain
//! cloneable data with no interior mutability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Overall status of one execution run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Constructed but not started.
    #[default]
    Idle,
    /// Steps are executing.
    Running,
    /// Stopped between steps by external cancellation.
    Paused,
    /// Every executed step succeeded (a false conditional gate still
    /// completes the run).
    Completed,
    /// A step failed; the run halted at that step.
    Failed,
}

impl RunStatus {
    /// True once the run can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Completed | RunStatus::Failed)
    }
}

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    /// Not reached yet.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Conditional gate evaluated false; the step did not execute.
    Skipped,
    /// Invocation returned a result.
    Success,
    /// Resolution or invocation failed.
    Error,
}

impl StepRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepRunStatus::Skipped | StepRunStatus::Success | StepRunStatus::Error)
    }
}

/// Per-step outcome record.
///
/// Transitions exactly once from `Pending` to `Running`, then exactly once to
/// a terminal status; a step never re-enters `Running` within the same run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStepResult {
    pub step_id: String,
    pub status: StepRunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque success payload recorded from the invoker.
    #[serde(default)]
    pub result: Option<Value>,
    /// Human-readable failure message.
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionStepResult {
    /// A fresh record in `Pending` state.
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepRunStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// The mutable, per-run record the executor maintains and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub workflow_id: String,
    pub status: RunStatus,
    /// One record per workflow step, in execution order.
    pub steps: Vec<ExecutionStepResult>,
    /// Index (into `steps`) of the step currently or most recently executing.
    pub current_step_index: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Constructs the state for a brand-new run: idle, every step pending.
    pub fn new_run(workflow_id: impl Into<String>, step_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: RunStatus::Idle,
            steps: step_ids.into_iter().map(ExecutionStepResult::pending).collect(),
            current_step_index: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Looks up a step record by step id.
    pub fn step(&self, step_id: &str) -> Option<&ExecutionStepResult> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// The first errored step, when the run failed.
    pub fn failed_step(&self) -> Option<&ExecutionStepResult> {
        self.steps.iter().find(|step| step.status == StepRunStatus::Error)
    }

    /// Post-mortem diagnostic naming the failing step and its position,
    /// e.g. `Step 2 of 5 failed: missing field 'token' in result of step 'login'`.
    pub fn failure_summary(&self) -> Option<String> {
        let (position, step) = self
            .steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.status == StepRunStatus::Error)?;
        let message = step.error.as_deref().unwrap_or("unknown error");
        Some(format!("Step {} of {} failed: {}", position + 1, self.steps.len(), message))
    }
}

/// Lifecycle notification emitted as a run progresses, for live display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { workflow_id: String, at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    StepStarted {
        index: usize,
        step_id: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepFinished {
        index: usize,
        step_id: String,
        status: StepRunStatus,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        status: RunStatus,
        at: DateTime<Utc>,
        #[serde(default)]
        error: Option<String>,
    },
}
