//! Workflow preflight validation.
//!
//! These checks catch definition mistakes before a run starts: duplicate or
//! dangling step ids, references that are guaranteed to fail at execution
//! time, and missing required endpoint parameters. Checks are presence-only —
//! parameter *types* are never validated against endpoint schemas.

use std::collections::{HashMap, HashSet};

use crate::endpoint::EndpointCatalog;
use crate::workflow::{ParameterValue, Workflow, looks_like_placeholder};

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The workflow cannot execute correctly.
    Error,
    /// Suspicious but runnable.
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Step the finding is anchored to, when applicable.
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn error(step_id: Option<&str>, message: String) -> Self {
        Self {
            severity: Severity::Error,
            step_id: step_id.map(str::to_string),
            message,
        }
    }

    fn warning(step_id: Option<&str>, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            step_id: step_id.map(str::to_string),
            message,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Validates a workflow definition, optionally against an endpoint catalog.
///
/// Returns every finding rather than stopping at the first, so callers can
/// present a complete report.
pub fn validate_workflow(workflow: &Workflow, catalog: Option<&EndpointCatalog>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if workflow.steps.is_empty() {
        issues.push(ValidationIssue::warning(None, "workflow has no steps".into()));
        return issues;
    }

    let mut seen_ids = HashSet::new();
    for step in &workflow.steps {
        if !seen_ids.insert(step.id.as_str()) {
            issues.push(ValidationIssue::error(
                Some(&step.id),
                format!("duplicate step identifier '{}'", step.id),
            ));
        }
    }

    let mut orders_seen: HashMap<u32, &str> = HashMap::new();
    for step in &workflow.steps {
        if let Some(earlier) = orders_seen.insert(step.order, &step.id) {
            issues.push(ValidationIssue::warning(
                Some(&step.id),
                format!(
                    "order {} is shared with step '{}'; declaration order breaks the tie",
                    step.order, earlier
                ),
            ));
        }
    }

    // Position of each step in execution order, for forward-reference checks.
    let ordered = workflow.steps_in_execution_order();
    let positions: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(position, step)| (step.id.as_str(), position))
        .collect();

    for (position, step) in ordered.iter().enumerate() {
        if let Some(catalog) = catalog {
            validate_against_catalog(step, catalog, &mut issues);
        }

        for (parameter_name, value) in &step.parameters {
            match value {
                ParameterValue::StepReference { step_id, .. } => match positions.get(step_id.as_str()) {
                    None => issues.push(ValidationIssue::error(
                        Some(&step.id),
                        format!("parameter '{}' references unknown step '{}'", parameter_name, step_id),
                    )),
                    Some(&referenced_position) if referenced_position >= position => {
                        issues.push(ValidationIssue::error(
                            Some(&step.id),
                            format!(
                                "parameter '{}' references step '{}' which has not executed yet at this point in the run",
                                parameter_name, step_id
                            ),
                        ));
                    }
                    Some(_) => {}
                },
                literal if looks_like_placeholder(literal) => {
                    issues.push(ValidationIssue::warning(
                        Some(&step.id),
                        format!(
                            "parameter '{}' looks like a placeholder but did not parse as one: {}",
                            parameter_name, literal
                        ),
                    ));
                }
                _ => {}
            }
        }

        if let Some(logic) = &step.conditional_logic
            && let Some(next_step_id) = &logic.next_step_id
            && !positions.contains_key(next_step_id.as_str())
        {
            issues.push(ValidationIssue::error(
                Some(&step.id),
                format!("nextStepId '{}' does not name a step in this workflow", next_step_id),
            ));
        }
    }

    issues
}

fn validate_against_catalog(step: &crate::workflow::WorkflowStep, catalog: &EndpointCatalog, issues: &mut Vec<ValidationIssue>) {
    let Some(descriptor) = catalog.get(&step.endpoint_id) else {
        issues.push(ValidationIssue::error(
            Some(&step.id),
            format!("unknown endpoint '{}'", step.endpoint_id),
        ));
        return;
    };

    if step.parameters.is_empty() {
        // Run-level parameters may still satisfy these at execution time.
        if descriptor.required_parameters().next().is_some() {
            issues.push(ValidationIssue::warning(
                Some(&step.id),
                format!(
                    "endpoint '{}' has required parameters but the step declares none; they must come from run-level parameters",
                    step.endpoint_id
                ),
            ));
        }
        return;
    }

    for required in descriptor.required_parameters() {
        if !step.parameters.contains_key(&required.name) {
            issues.push(ValidationIssue::error(
                Some(&step.id),
                format!(
                    "required parameter '{}' of endpoint '{}' is not provided",
                    required.name, step.endpoint_id
                ),
            ));
        }
    }
}
