//! Parameter templates and condition expressions.
//!
//! The whole grammar:
//!
//! | form         | meaning                                                   |
//! |--------------|-----------------------------------------------------------|
//! | `{{name}}`   | context key `name`; an unresolved parameter stays literal |
//! | `${a.b.c}`   | dotted path through nested objects; missing → `null`      |
//! | `l == r`     | equality after resolving both sides                       |
//! | `l != r`     | inequality after resolving both sides                     |
//! | anything else in a condition | truthiness of that context key            |
//!
//! Templates only match a whole string. There is no substitution inside a
//! larger string.

use serde_json::{Map, Number, Value};

use concerto_contracts::error::{OrchestraError, OrchestraResult};

use crate::definition::LoopItems;

fn template_name(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    // "{{a}} == {{b}}" is a comparison, not one oddly named key.
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn path_expr(s: &str) -> Option<&str> {
    Some(s.strip_prefix("${")?.strip_suffix('}')?.trim())
}

/// Walk `path` (dot-separated) through nested objects.
pub fn lookup_path<'v>(context: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Resolve one parameter value against `context`.
pub fn resolve_value(value: &Value, context: &Map<String, Value>) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    if let Some(name) = template_name(s) {
        return context.get(name).cloned().unwrap_or_else(|| value.clone());
    }
    if let Some(path) = path_expr(s) {
        return lookup_path(context, path).cloned().unwrap_or(Value::Null);
    }
    value.clone()
}

/// Resolve every parameter value. Keys are kept as they are.
pub fn resolve_parameters(parameters: &Map<String, Value>, context: &Map<String, Value>) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, context)))
        .collect()
}

/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Bare literal coercion: int, then float, then bool, then string.
fn coerce_literal(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn resolve_operand(raw: &str, context: &Map<String, Value>) -> Value {
    if let Some(name) = template_name(raw) {
        return context.get(name).cloned().unwrap_or(Value::Null);
    }
    if let Some(path) = path_expr(raw) {
        return lookup_path(context, path).cloned().unwrap_or(Value::Null);
    }
    coerce_literal(raw)
}

/// Numbers compare by value, so `1 == 1.0`. Everything else is JSON equality.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn compare(condition: &str, operator: &str, context: &Map<String, Value>) -> OrchestraResult<Option<bool>> {
    let Some((left, right)) = condition.split_once(operator) else {
        return Ok(None);
    };
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() {
        return Err(OrchestraError::ConditionEvaluationError {
            condition: condition.to_string(),
            reason: format!("'{}' needs an operand on both sides", operator),
        });
    }
    let equal = values_equal(&resolve_operand(left, context), &resolve_operand(right, context));
    Ok(Some(if operator == "==" { equal } else { !equal }))
}

/// Evaluate a step condition against `context`.
pub fn evaluate_condition(condition: &str, context: &Map<String, Value>) -> OrchestraResult<bool> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err(OrchestraError::ConditionEvaluationError {
            condition: condition.to_string(),
            reason: "condition is empty".to_string(),
        });
    }
    if let Some(name) = template_name(condition) {
        return Ok(context.get(name).is_some_and(is_truthy));
    }
    if let Some(result) = compare(condition, "==", context)? {
        return Ok(result);
    }
    if let Some(result) = compare(condition, "!=", context)? {
        return Ok(result);
    }
    Ok(context.get(condition).is_some_and(is_truthy))
}

/// Items a loop step iterates over. A missing or `null` source is empty.
pub fn resolve_loop_items(items: &LoopItems, context: &Map<String, Value>) -> Result<Vec<Value>, String> {
    let reference = match items {
        LoopItems::Literal(items) => return Ok(items.clone()),
        LoopItems::Reference(reference) => reference.trim(),
    };
    let source = if let Some(name) = template_name(reference) {
        context.get(name)
    } else if let Some(path) = path_expr(reference) {
        lookup_path(context, path)
    } else {
        context.get(reference)
    };
    match source {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(format!(
            "loop source '{}' is not a list (found {})",
            reference,
            json_type(other)
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use concerto_contracts::error::OrchestraError;

    use super::*;
    use crate::definition::LoopItems;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("context fixture must be an object, got {}", other),
        }
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    #[test]
    fn direct_template_resolves_or_stays_literal() {
        let context = ctx(json!({ "task1_result": 42 }));
        let params = ctx(json!({
            "value": "{{task1_result}}",
            "spaced": "{{ task1_result }}",
            "missing": "{{nope}}",
            "inline": "id={{task1_result}}",
            "number": 7
        }));
        let resolved = resolve_parameters(&params, &context);
        assert_eq!(resolved["value"], 42);
        assert_eq!(resolved["spaced"], 42);
        assert_eq!(resolved["missing"], "{{nope}}");
        assert_eq!(resolved["inline"], "id={{task1_result}}");
        assert_eq!(resolved["number"], 7);
    }

    #[test]
    fn path_template_walks_objects_and_yields_null_when_missing() {
        let context = ctx(json!({ "user": { "profile": { "name": "ada" } }, "list": [1] }));
        assert_eq!(resolve_value(&json!("${user.profile.name}"), &context), "ada");
        assert_eq!(resolve_value(&json!("${user.missing.name}"), &context), Value::Null);
        assert_eq!(resolve_value(&json!("${list.0}"), &context), Value::Null);
    }

    // ── Conditions ───────────────────────────────────────────────────────────

    #[test]
    fn whole_template_condition_is_truthiness() {
        let context = ctx(json!({ "yes": true, "no": false, "zero": 0, "empty": "", "full": [1] }));
        assert!(evaluate_condition("{{yes}}", &context).unwrap());
        assert!(!evaluate_condition("{{no}}", &context).unwrap());
        assert!(!evaluate_condition("{{zero}}", &context).unwrap());
        assert!(!evaluate_condition("{{empty}}", &context).unwrap());
        assert!(!evaluate_condition("{{absent}}", &context).unwrap());
        assert!(evaluate_condition("full", &context).unwrap());
        assert!(!evaluate_condition("absent", &context).unwrap());
    }

    #[test]
    fn comparisons_coerce_literals() {
        let context = ctx(json!({ "count": 3, "ratio": 0.5, "flag": true, "mode": "fast" }));
        assert!(evaluate_condition("{{count}} == 3", &context).unwrap());
        assert!(evaluate_condition("{{count}} == 3.0", &context).unwrap());
        assert!(evaluate_condition("${ratio} == 0.5", &context).unwrap());
        assert!(evaluate_condition("{{flag}} == TRUE", &context).unwrap());
        assert!(evaluate_condition("{{mode}} == fast", &context).unwrap());
        assert!(evaluate_condition("{{mode}} != slow", &context).unwrap());
        assert!(!evaluate_condition("{{count}} != 3", &context).unwrap());
        assert!(evaluate_condition("{{absent}} != 3", &context).unwrap());
    }

    #[test]
    fn templates_on_both_sides_form_a_comparison() {
        let context = ctx(json!({ "a": 3, "b": 3, "c": 4, "{{a}} == {{b}}": false }));
        // Compared operand by operand, never looked up as one key.
        assert!(evaluate_condition("{{a}} == {{b}}", &context).unwrap());
        assert!(!evaluate_condition("{{a}} == {{c}}", &context).unwrap());
        assert!(evaluate_condition("{{a}} != {{c}}", &context).unwrap());
        assert_eq!(template_name("{{a}} == {{b}}"), None);
        assert_eq!(
            resolve_value(&json!("{{a}} == {{b}}"), &context),
            json!("{{a}} == {{b}}")
        );
    }

    #[test]
    fn equality_is_checked_before_inequality() {
        // Split at the first "==", so the right side is the literal "a != b".
        let context = ctx(json!({ "x": "a != b" }));
        assert!(evaluate_condition("{{x}} == a != b", &context).unwrap());
    }

    #[test]
    fn malformed_conditions_are_errors() {
        let context = Map::new();
        for bad in ["", "   ", "== 3", "{{x}} !="] {
            match evaluate_condition(bad, &context) {
                Err(OrchestraError::ConditionEvaluationError { .. }) => {}
                other => panic!("expected ConditionEvaluationError for {:?}, got {:?}", bad, other),
            }
        }
    }

    // ── Loop sources ─────────────────────────────────────────────────────────

    #[test]
    fn loop_sources_resolve_by_reference() {
        let context = ctx(json!({ "xs": [1, 2], "team": { "members": ["a"] }, "n": 5, "none": null }));
        let reference = |r: &str| resolve_loop_items(&LoopItems::Reference(r.to_string()), &context);

        assert_eq!(reference("xs").unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(reference("{{xs}}").unwrap().len(), 2);
        assert_eq!(reference("${team.members}").unwrap(), vec![json!("a")]);
        assert!(reference("missing").unwrap().is_empty());
        assert!(reference("none").unwrap().is_empty());
        assert!(reference("n").unwrap_err().contains("not a list"));

        let literal = resolve_loop_items(&LoopItems::Literal(vec![]), &context).unwrap();
        assert!(literal.is_empty());
    }
}
