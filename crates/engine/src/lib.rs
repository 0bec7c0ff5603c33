//! # Apiflow Engine
//!
//! Executes API workflows: ordered sequences of endpoint calls with
//! parameter bindings between steps. The engine is built from two tightly
//! coupled pieces:
//!
//! - **`resolve`**: turns a step's declared parameters — literals or
//!   references to prior step outputs (`${steps.<id>.<path>}`) and workflow
//!   inputs (`${input.<name>}`) — into a concrete map at the moment the step
//!   is about to execute. Pure and deterministic.
//! - **`executor`**: drives one run step by step, awaiting an
//!   [`EndpointInvoker`](invoker::EndpointInvoker) per step, recording
//!   per-step outcomes into an observable
//!   [`ExecutionState`](apiflow_types::ExecutionState), and halting on the
//!   first failure. Snapshots publish after every transition; cancellation is
//!   honored between steps.
//!
//! Supporting modules: **`condition`** evaluates step gates, **`invoker`**
//! defines the invocation boundary with echo and HTTP-gateway
//! implementations, and **`error`** holds the run-fatal error taxonomy.
//!
//! ## Usage
//!
//! ```rust
//! use apiflow_engine::executor::{WorkflowExecutor, WorkflowRunRequest};
//! use apiflow_types::{RunStatus, Workflow};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let workflow: Workflow = serde_json::from_value(serde_json::json!({
//!     "name": "demo",
//!     "steps": [
//!         { "id": "step-0", "endpointId": "get-users", "order": 0 }
//!     ]
//! }))
//! .expect("parse workflow");
//!
//! let executor = WorkflowExecutor::noop();
//! let state = executor.start(WorkflowRunRequest::new(workflow)).wait().await;
//! assert_eq!(state.status, RunStatus::Completed);
//! # }
//! ```

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use apiflow_types::{EndpointCatalog, EndpointDescriptor, Workflow};

pub mod condition;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod resolve;

pub use error::{InvokeError, ResolutionError};
pub use executor::{CancelHandle, RunHandle, StatePublisher, WorkflowExecutor, WorkflowRunRequest, drive_workflow_run};
pub use invoker::{EndpointInvoker, GatewayInvoker, NoopInvoker};
pub use resolve::{ResolutionContext, resolve_parameters, resolve_value};

/// Loads a workflow document from the filesystem.
///
/// Documents are the camelCase JSON shape emitted by workflow assembly tools;
/// YAML parses through the same path since it is a superset of JSON.
pub fn load_workflow_file(file_path: impl AsRef<Path>) -> Result<Workflow> {
    let file_path = file_path.as_ref();
    let file_content =
        fs::read_to_string(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;

    serde_yaml::from_str(&file_content).with_context(|| format!("Unsupported workflow document: {}", file_path.display()))
}

/// Loads an endpoint catalog from the filesystem.
///
/// Accepts either a bare descriptor list or a document with the descriptors
/// under an `endpoints` key, in YAML or JSON.
pub fn load_endpoints_file(file_path: impl AsRef<Path>) -> Result<EndpointCatalog> {
    let file_path = file_path.as_ref();
    let file_content =
        fs::read_to_string(file_path).with_context(|| format!("Failed to read endpoints file: {}", file_path.display()))?;

    #[derive(Deserialize)]
    struct EndpointsDocument {
        endpoints: Vec<EndpointDescriptor>,
    }

    if let Ok(document) = serde_yaml::from_str::<EndpointsDocument>(&file_content) {
        return Ok(EndpointCatalog::from_descriptors(document.endpoints));
    }

    if let Ok(descriptors) = serde_yaml::from_str::<Vec<EndpointDescriptor>>(&file_content) {
        return Ok(EndpointCatalog::from_descriptors(descriptors));
    }

    anyhow::bail!(
        "Unsupported endpoints document format in {}. Expected one of:\n\
         - A list of endpoint descriptors\n\
         - A document with descriptors under an 'endpoints' key\n\
         ",
        file_path.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_workflow_document() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let workflow_path = temp_dir.path().join("workflow.yaml");

        fs::write(
            &workflow_path,
            r#"
name: user-onboarding
specId: spec-1
steps:
  - id: step-0
    endpointId: get-users
    order: 0
  - id: step-1
    endpointId: create-order
    order: 1
    parameters:
      userId: ${steps.step-0.id}
"#,
        )
        .expect("write workflow");

        let workflow = load_workflow_file(&workflow_path).expect("load workflow");
        assert_eq!(workflow.name, "user-onboarding");
        assert_eq!(workflow.spec_id.as_deref(), Some("spec-1"));
        assert_eq!(workflow.steps.len(), 2);
        assert!(workflow.steps[1].parameters["userId"].is_reference());
    }

    #[test]
    fn loads_json_workflow_document() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let workflow_path = temp_dir.path().join("workflow.json");

        fs::write(
            &workflow_path,
            r#"{"name": "minimal", "steps": [{"id": "a", "endpointId": "e", "order": 0}]}"#,
        )
        .expect("write workflow");

        let workflow = load_workflow_file(&workflow_path).expect("load workflow");
        assert_eq!(workflow.name, "minimal");
        assert_eq!(workflow.steps[0].endpoint_id, "e");
    }

    #[test]
    fn rejects_malformed_workflow_document() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let workflow_path = temp_dir.path().join("workflow.yaml");
        fs::write(&workflow_path, "steps: \"not a list\"").expect("write workflow");

        let error = load_workflow_file(&workflow_path).expect_err("must fail");
        assert!(error.to_string().contains("Unsupported workflow document"));
    }

    #[test]
    fn loads_endpoints_as_bare_list_or_wrapped_document() {
        let temp_dir = tempfile::tempdir().expect("tempdir");

        let bare_path = temp_dir.path().join("endpoints.json");
        fs::write(&bare_path, r#"[{"id": "get-users", "method": "GET", "path": "/users"}]"#).expect("write endpoints");
        let catalog = load_endpoints_file(&bare_path).expect("load endpoints");
        assert!(catalog.contains("get-users"));

        let wrapped_path = temp_dir.path().join("endpoints.yaml");
        fs::write(
            &wrapped_path,
            r#"
endpoints:
  - id: create-order
    method: POST
    path: /orders
"#,
        )
        .expect("write endpoints");
        let catalog = load_endpoints_file(&wrapped_path).expect("load endpoints");
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("create-order"));
    }
}
