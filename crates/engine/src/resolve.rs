//! Parameter resolution against accumulated run state.
//!
//! Resolution is a pure function of (declared parameters, resolution
//! context): the same inputs always produce the same concrete map or the
//! same error. The context grows monotonically during a run — a step's
//! result becomes visible to later steps only — so forward references are
//! simply absent from the context and fail as
//! [`ResolutionError::UnresolvedReference`].
//!
//! Resolved values preserve the JSON type of their source field; there is no
//! implicit stringification.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use apiflow_types::ParameterValue;

use crate::error::ResolutionError;

/// Values available to placeholder resolution for the step about to run.
#[derive(Debug, Default, Clone)]
pub struct ResolutionContext {
    /// Workflow-level inputs supplied by the caller.
    pub inputs: JsonMap<String, Value>,
    /// Recorded results of steps that completed successfully, keyed by step id.
    pub steps: HashMap<String, Value>,
}

impl ResolutionContext {
    /// A context seeded with workflow inputs and no step results.
    pub fn with_inputs(inputs: JsonMap<String, Value>) -> Self {
        Self {
            inputs,
            steps: HashMap::new(),
        }
    }

    /// Records a step's successful result, making it visible to later steps.
    pub fn record_step_result(&mut self, step_id: impl Into<String>, result: Value) {
        self.steps.insert(step_id.into(), result);
    }
}

/// Resolves a step's declared parameters into a concrete map.
///
/// Literals pass through unchanged; references are looked up in the context.
/// The first failing entry aborts resolution with its specific error.
pub fn resolve_parameters(
    parameters: &IndexMap<String, ParameterValue>,
    context: &ResolutionContext,
) -> Result<JsonMap<String, Value>, ResolutionError> {
    let mut resolved = JsonMap::with_capacity(parameters.len());
    for (name, value) in parameters {
        resolved.insert(name.clone(), resolve_value(value, context)?);
    }
    Ok(resolved)
}

/// Resolves a single parameter value against the context.
pub fn resolve_value(value: &ParameterValue, context: &ResolutionContext) -> Result<Value, ResolutionError> {
    match value {
        ParameterValue::Literal(literal) => Ok(literal.clone()),
        ParameterValue::StepReference { step_id, field_path } => {
            let result = context
                .steps
                .get(step_id)
                .ok_or_else(|| ResolutionError::UnresolvedReference {
                    placeholder: value.to_string(),
                    step_id: step_id.clone(),
                })?;
            navigate_field_path(result, field_path).ok_or_else(|| ResolutionError::MissingField {
                step_id: step_id.clone(),
                field_path: field_path.clone(),
            })
        }
        ParameterValue::InputReference { name } => context
            .inputs
            .get(name)
            .cloned()
            .ok_or_else(|| ResolutionError::MissingInput { name: name.clone() }),
    }
}

/// Navigates a dotted path through objects and numeric array indices.
///
/// Returns `None` when any segment is missing or applied to the wrong JSON
/// type; `Null` along the way counts as missing.
fn navigate_field_path(root: &Value, field_path: &str) -> Option<Value> {
    let mut current = root;
    for segment in field_path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}
