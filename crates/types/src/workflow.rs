//! Strongly typed workflow definitions shared across the engine and CLI.
//!
//! A [`Workflow`] is an ordered collection of [`WorkflowStep`]s, each bound to
//! an endpoint descriptor by id and carrying a parameter map. Parameter values
//! are parsed once, at deserialization time, into [`ParameterValue`] variants
//! so the resolver never re-inspects placeholder strings at execution time.
//!
//! The wire shape is the camelCase JSON produced by workflow assembly tools
//! (`endpointId`, `conditionalLogic`, `specId`); YAML documents with the same
//! field names load through the identical serde path.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// An ordered sequence of endpoint calls with parameter bindings between steps.
///
/// The executor treats a workflow as read-only input for a single run; steps
/// are never mutated during execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Stable identifier assigned by the document store, when present.
    #[serde(default)]
    pub id: Option<String>,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Identifier of the OpenAPI spec this workflow was assembled against.
    #[serde(default)]
    pub spec_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Steps in declaration order; execution order is the ascending `order`
    /// field with ties broken by declaration order.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Identifier used for run state and telemetry; falls back to the name
    /// for documents the store has not assigned an id yet.
    pub fn identifier(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Steps sorted into execution order. The sort is stable, so steps with
    /// duplicated `order` values keep their declaration order.
    pub fn steps_in_execution_order(&self) -> Vec<&WorkflowStep> {
        let mut ordered: Vec<&WorkflowStep> = self.steps.iter().collect();
        ordered.sort_by_key(|step| step.order);
        ordered
    }

    /// Looks up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }
}

/// One endpoint call within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique identifier within the workflow; the addressable key for
    /// cross-step references.
    pub id: String,
    /// Opaque reference to an endpoint descriptor owned by the ingestion
    /// collaborator.
    pub endpoint_id: String,
    /// Execution position; ascending order defines the run sequence.
    pub order: u32,
    /// Assembly rationale carried over from AI-generated workflows.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Parameter map; values are literals or references to prior step
    /// outputs / workflow inputs.
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterValue>,
    /// Optional conditional gate evaluated before the step executes.
    #[serde(default)]
    pub conditional_logic: Option<ConditionalLogic>,
}

impl WorkflowStep {
    /// The gate expression, when one is declared and non-empty.
    pub fn condition(&self) -> Option<&str> {
        self.conditional_logic
            .as_ref()
            .and_then(|logic| logic.condition.as_deref())
            .map(str::trim)
            .filter(|expression| !expression.is_empty())
    }
}

/// Conditional-execution metadata attached to a step.
///
/// `next_step_id` is preserved from assembled documents and validated against
/// the step list, but execution is strictly linear: a false condition halts
/// the remainder of the run rather than branching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalLogic {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub next_step_id: Option<String>,
}

/// A step parameter value, parsed once at workflow-construction time.
///
/// A JSON string deserializes into a reference variant iff the entire string
/// is a placeholder of the form `${steps.<stepId>.<fieldPath>}` or
/// `${input.<name>}`; everything else (numbers, booleans, objects, arrays,
/// and plain or partially-templated strings) stays a [`ParameterValue::Literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Concrete value passed through to the endpoint unchanged.
    Literal(Value),
    /// Reference to a field of a prior step's recorded result.
    StepReference {
        step_id: String,
        /// Dotted path into the step result, e.g. `response.data.token`.
        field_path: String,
    },
    /// Reference to a workflow-level input by name.
    InputReference { name: String },
}

impl ParameterValue {
    /// Classifies a raw JSON value into a literal or a reference.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => parse_placeholder(&text).unwrap_or(ParameterValue::Literal(Value::String(text))),
            other => ParameterValue::Literal(other),
        }
    }

    /// True for either reference variant.
    pub fn is_reference(&self) -> bool {
        !matches!(self, ParameterValue::Literal(_))
    }

    /// The placeholder string form of a reference; `None` for literals.
    pub fn placeholder(&self) -> Option<String> {
        match self {
            ParameterValue::Literal(_) => None,
            reference => Some(reference.to_string()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Literal(value) => match value {
                Value::String(text) => formatter.write_str(text),
                other => formatter.write_str(&other.to_string()),
            },
            ParameterValue::StepReference { step_id, field_path } => {
                write!(formatter, "${{steps.{step_id}.{field_path}}}")
            }
            ParameterValue::InputReference { name } => write!(formatter, "${{input.{name}}}"),
        }
    }
}

impl Serialize for ParameterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParameterValue::Literal(value) => value.serialize(serializer),
            reference => serializer.serialize_str(&reference.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ParameterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(ParameterValue::from_value(value))
    }
}

/// Parses a whole-string placeholder into a reference variant.
///
/// Returns `None` when the text is not exactly one placeholder over a
/// supported root (`steps.` with a field path, or `input.`).
fn parse_placeholder(text: &str) -> Option<ParameterValue> {
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    let inner = inner.trim();
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }

    if let Some(rest) = inner.strip_prefix("steps.") {
        let (step_id, field_path) = rest.split_once('.')?;
        if step_id.is_empty() || field_path.is_empty() {
            return None;
        }
        return Some(ParameterValue::StepReference {
            step_id: step_id.to_string(),
            field_path: field_path.to_string(),
        });
    }

    if let Some(name) = inner.strip_prefix("input.") {
        if name.is_empty() {
            return None;
        }
        return Some(ParameterValue::InputReference { name: name.to_string() });
    }

    None
}

/// True when a literal string looks like a mistyped placeholder, e.g.
/// `${steps.create}` without a field path. Used by preflight validation.
pub fn looks_like_placeholder(value: &ParameterValue) -> bool {
    match value {
        ParameterValue::Literal(Value::String(text)) => {
            let trimmed = text.trim();
            trimmed.starts_with("${steps.") || trimmed.starts_with("${input.")
        }
        _ => false,
    }
}
