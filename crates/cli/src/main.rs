use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{Map as JsonMap, Value};
use tracing::Level;

use apiflow_api::GatewayClient;
use apiflow_engine::executor::{WorkflowExecutor, WorkflowRunRequest};
use apiflow_engine::invoker::{EndpointInvoker, GatewayInvoker, NoopInvoker};
use apiflow_engine::{load_endpoints_file, load_workflow_file};
use apiflow_types::{EndpointCatalog, ExecutionState, RunEvent, RunStatus, StepRunStatus, Workflow, validate_workflow};

#[derive(Parser)]
#[command(name = "apiflow", about = "Run API workflows against live endpoints", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a workflow document for definition mistakes
    Validate {
        /// Path to the workflow YAML/JSON document
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Optional endpoint catalog to check endpoint references against
        #[arg(long)]
        endpoints: Option<PathBuf>,
    },
    /// Execute a workflow and stream per-step progress
    Run {
        /// Path to the workflow YAML/JSON document
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Optional endpoint catalog to check endpoint references against
        #[arg(long)]
        endpoints: Option<PathBuf>,
        /// Execution gateway base URL (defaults to APIFLOW_GATEWAY_URL)
        #[arg(long)]
        base_url: Option<String>,
        /// Workflow input as name=value; values parse as JSON when possible
        #[arg(long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, Value)>,
        /// Run-level fallback parameter as name=value
        #[arg(long = "param", value_parser = parse_key_value)]
        parameters: Vec<(String, Value)>,
        /// Echo each call instead of hitting the gateway
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { file, endpoints } => {
            let workflow = load_workflow_file(&file)?;
            let catalog = load_catalog(endpoints.as_deref())?;
            Ok(if report_validation(&workflow, catalog.as_ref()) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Run {
            file,
            endpoints,
            base_url,
            inputs,
            parameters,
            dry_run,
        } => {
            let workflow = load_workflow_file(&file)?;
            let catalog = load_catalog(endpoints.as_deref())?;
            if report_validation(&workflow, catalog.as_ref()) {
                return Ok(ExitCode::FAILURE);
            }
            run_workflow(workflow, base_url, inputs, parameters, dry_run).await
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_catalog(path: Option<&std::path::Path>) -> Result<Option<EndpointCatalog>> {
    path.map(load_endpoints_file).transpose()
}

/// Prints every finding and returns true when any of them is fatal.
fn report_validation(workflow: &Workflow, catalog: Option<&EndpointCatalog>) -> bool {
    let issues = validate_workflow(workflow, catalog);
    for issue in &issues {
        let severity = if issue.is_fatal() { "error" } else { "warning" };
        match &issue.step_id {
            Some(step_id) => eprintln!("{severity}: step '{step_id}': {}", issue.message),
            None => eprintln!("{severity}: {}", issue.message),
        }
    }
    issues.iter().any(|issue| issue.is_fatal())
}

async fn run_workflow(
    workflow: Workflow,
    base_url: Option<String>,
    inputs: Vec<(String, Value)>,
    parameters: Vec<(String, Value)>,
    dry_run: bool,
) -> Result<ExitCode> {
    let invoker: Arc<dyn EndpointInvoker> = if dry_run {
        Arc::new(NoopInvoker)
    } else {
        let client = match base_url {
            Some(base_url) => GatewayClient::new(base_url)?,
            None => GatewayClient::from_env()?,
        };
        Arc::new(GatewayInvoker::new(client))
    };

    let request = WorkflowRunRequest::new(workflow)
        .with_inputs(collect_object(inputs))
        .with_parameters(collect_object(parameters));
    let total_steps = request.workflow.steps.len();

    let executor = WorkflowExecutor::new(invoker);
    let mut handle = executor.start(request);

    while let Some(event) = handle.next_event().await {
        match event {
            RunEvent::RunStarted { workflow_id, .. } => println!("running workflow '{workflow_id}' ({total_steps} steps)"),
            RunEvent::StepStarted { index, step_id, .. } => {
                println!("[{}/{}] {} ...", index + 1, total_steps, step_id);
            }
            RunEvent::StepFinished {
                step_id, status, error, ..
            } => match status {
                StepRunStatus::Success => println!("  {step_id}: success"),
                StepRunStatus::Skipped => println!("  {step_id}: skipped (condition false; remaining steps will not run)"),
                _ => println!("  {step_id}: {}", error.as_deref().unwrap_or("failed")),
            },
            RunEvent::RunCompleted { .. } => break,
        }
    }

    let state = handle.wait().await;
    print_summary(&state);

    Ok(match state.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_summary(state: &ExecutionState) {
    println!();
    println!("run {}: {:?}", state.workflow_id, state.status);
    for step in &state.steps {
        let outcome = match step.status {
            StepRunStatus::Success => "success".to_string(),
            StepRunStatus::Skipped => "skipped".to_string(),
            StepRunStatus::Pending => "pending".to_string(),
            StepRunStatus::Running => "running".to_string(),
            StepRunStatus::Error => format!("error: {}", step.error.as_deref().unwrap_or("unknown")),
        };
        println!("  {} {}", step.step_id, outcome);
    }
    if let Some(summary) = state.failure_summary() {
        println!();
        println!("{summary}");
    }
}

/// Parses `name=value` arguments; values parse as JSON when possible and fall
/// back to plain strings, so `--input count=3` stays numeric and
/// `--input region=us` stays text.
fn parse_key_value(argument: &str) -> Result<(String, Value), String> {
    let (name, raw_value) = argument
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{argument}'"))?;
    if name.is_empty() {
        return Err(format!("expected name=value, got '{argument}'"));
    }
    let value = serde_json::from_str(raw_value).unwrap_or_else(|_| Value::String(raw_value.to_string()));
    Ok((name.to_string(), value))
}

fn collect_object(entries: Vec<(String, Value)>) -> JsonMap<String, Value> {
    entries.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_value_parsing_keeps_json_types_and_falls_back_to_strings() {
        assert_eq!(parse_key_value("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(parse_key_value("enabled=true").unwrap(), ("enabled".into(), json!(true)));
        assert_eq!(parse_key_value("region=us").unwrap(), ("region".into(), json!("us")));
        assert_eq!(parse_key_value("note=a=b").unwrap(), ("note".into(), json!("a=b")));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
