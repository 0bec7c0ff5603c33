//! Conditional-gate expression evaluation.
//!
//! Step gates use a small, safe expression form evaluated against the
//! resolution context: `==` / `!=` comparisons, leading `!` negation, and
//! bare truthiness. Operands are context paths rooted at `steps.<stepId>` or
//! `input.<name>` (dotted navigation, numeric array indices) or JSON
//! literals. An optional `${ ... }` wrapper is stripped before evaluation so
//! authored gates may use the same placeholder syntax as parameters.

use serde_json::Value;

use crate::resolve::ResolutionContext;

/// Normalizes a gate expression: trims, strips an outer `${ ... }` wrapper,
/// and returns `None` when nothing remains.
pub fn normalize_condition(raw_expression: &str) -> Option<String> {
    let trimmed = raw_expression.trim();
    let inner = match trimmed.strip_prefix("${") {
        Some(stripped) => {
            let inner = stripped.trim();
            inner.strip_suffix('}').unwrap_or(inner).trim()
        }
        None => trimmed,
    };
    if inner.is_empty() { None } else { Some(inner.to_string()) }
}

/// Evaluates a normalized gate expression against the context.
///
/// Unresolvable operands evaluate as empty/falsy rather than erroring: a gate
/// over a missing value reads as "condition not met", matching the reference
/// behavior of skipping rather than failing.
pub fn eval_condition(expression: &str, context: &ResolutionContext) -> bool {
    let trimmed = expression.trim();

    if let Some(negated) = trimmed.strip_prefix('!')
        && !negated.starts_with('=')
    {
        return !eval_condition(negated, context);
    }

    if let Some(result) = evaluate_comparison(trimmed, "!=", context) {
        return !result;
    }
    if let Some(result) = evaluate_comparison(trimmed, "==", context) {
        return result;
    }
    evaluate_truthiness(trimmed, context)
}

/// Evaluates `left <operator> right`, returning `Some(left == right)` when the
/// operator is present at the top level, otherwise `None`.
fn evaluate_comparison(expression: &str, operator: &str, context: &ResolutionContext) -> Option<bool> {
    let position = find_top_level_operator(expression, operator)?;
    let left = expression[..position].trim();
    let right = expression[position + operator.len()..].trim();
    let left_value = resolve_operand(left, context);
    let right_value = resolve_operand(right, context);
    Some(format_operand(left_value.as_ref()) == format_operand(right_value.as_ref()))
}

/// Truthy when the operand resolves to `true`, `1`, or any non-empty value.
fn evaluate_truthiness(expression: &str, context: &ResolutionContext) -> bool {
    match resolve_operand(expression, context) {
        Some(Value::Bool(flag)) => flag,
        Some(value) => {
            let rendered = format_operand(Some(&value));
            rendered == "true" || rendered == "1" || !rendered.is_empty()
        }
        None => false,
    }
}

/// Resolves an operand to a JSON value: a quoted/JSON literal, or a context
/// path rooted at `steps.` / `input.`.
fn resolve_operand(expression: &str, context: &ResolutionContext) -> Option<Value> {
    let trimmed = expression.trim();

    if looks_like_json_literal(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
    {
        return Some(value);
    }

    if let Some(rest) = trimmed.strip_prefix("steps.") {
        let mut segments = rest.split('.');
        let step_id = segments.next()?;
        let root = context.steps.get(step_id)?;
        return navigate_segments(root, segments);
    }

    if let Some(rest) = trimmed.strip_prefix("input.") {
        let mut segments = rest.split('.');
        let name = segments.next()?;
        let root = context.inputs.get(name)?;
        return navigate_segments(root, segments);
    }

    None
}

fn navigate_segments<'a>(root: &Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = root;
    for segment in segments {
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

fn looks_like_json_literal(expression: &str) -> bool {
    let starts_like_number = expression
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false);
    expression.starts_with('"')
        || expression.starts_with('[')
        || expression.starts_with('{')
        || expression == "null"
        || expression == "true"
        || expression == "false"
        || starts_like_number
}

fn format_operand(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Finds `operator` outside quoted string literals.
fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_double_quote = false;
    for (index, character) in expression.char_indices() {
        if character == '"' {
            in_double_quote = !in_double_quote;
            continue;
        }
        if !in_double_quote && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map as JsonMap, json};

    fn context() -> ResolutionContext {
        let mut inputs = JsonMap::new();
        inputs.insert("environment".into(), json!("production"));
        inputs.insert("enabled".into(), json!(true));
        inputs.insert("empty".into(), json!(""));

        let mut context = ResolutionContext::with_inputs(inputs);
        context.record_step_result("build", json!({"status": "succeeded", "attempts": 2}));
        context
    }

    #[test]
    fn normalization_strips_placeholder_wrapper() {
        assert_eq!(normalize_condition("  input.enabled "), Some("input.enabled".into()));
        assert_eq!(normalize_condition("${ input.enabled }"), Some("input.enabled".into()));
        assert_eq!(normalize_condition("${}"), None);
        assert_eq!(normalize_condition("   "), None);
    }

    #[test]
    fn equality_compares_resolved_values() {
        let context = context();
        assert!(eval_condition("input.environment == \"production\"", &context));
        assert!(!eval_condition("input.environment == \"staging\"", &context));
        assert!(eval_condition("steps.build.status == \"succeeded\"", &context));
        assert!(eval_condition("steps.build.attempts == 2", &context));
    }

    #[test]
    fn inequality_and_negation() {
        let context = context();
        assert!(eval_condition("input.environment != \"staging\"", &context));
        assert!(!eval_condition("input.environment != \"production\"", &context));
        assert!(eval_condition("!input.empty", &context));
        assert!(!eval_condition("!input.enabled", &context));
    }

    #[test]
    fn truthiness_of_bare_paths() {
        let context = context();
        assert!(eval_condition("input.enabled", &context));
        assert!(eval_condition("steps.build.status", &context));
        assert!(!eval_condition("input.empty", &context));
        assert!(!eval_condition("input.absent", &context));
        assert!(!eval_condition("steps.never_ran.status", &context));
    }

    #[test]
    fn quoted_operators_are_not_split() {
        let context = context();
        assert!(!eval_condition("input.environment == \"a == b\"", &context));
    }
}
