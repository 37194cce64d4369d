//! Goal evaluation (§4.5): a dotted JSONPath-lite path plus a condition,
//! evaluated against the JSON a spawn returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A condition to test a resolved JSON value against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Resolved value equals the given JSON value.
    Eq(Value),
    /// Resolved value does not equal the given JSON value.
    Neq(Value),
    /// Resolved numeric value is less than the given threshold.
    Lt(f64),
    /// Resolved numeric value is less than or equal to the given threshold.
    Lte(f64),
    /// Resolved numeric value is greater than the given threshold.
    Gt(f64),
    /// Resolved numeric value is greater than or equal to the given threshold.
    Gte(f64),
    /// Resolved numeric value falls within `[lo, hi]` inclusive.
    Between(f64, f64),
    /// Resolved value is one of the given JSON values.
    In(Vec<Value>),
}

/// `{ path, condition }`, evaluated once per turn against the parsed
/// spawn output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Dotted path, e.g. `$.score` or `$.result.score`.
    pub path: String,
    /// Condition the resolved value must satisfy.
    pub condition: Condition,
}

/// Parse a numeric out of any JSON scalar: a native number, or a string
/// that parses as one. Anything else is not numeric.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Walk `$.a.b.c` through nested object members. A leading `$` is
/// stripped; an empty path resolves to the root. A missing member at
/// any point resolves to `None` rather than an error.
fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.strip_prefix('$').unwrap_or(path);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in trimmed.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

impl Goal {
    /// Resolve `self.path` against `value` and test the condition. A
    /// missing path is goal-not-met, never an error.
    pub fn is_met(&self, value: &Value) -> bool {
        let Some(found) = resolve(value, &self.path) else {
            return false;
        };
        match &self.condition {
            Condition::Eq(want) => found == want,
            Condition::Neq(want) => found != want,
            Condition::Lt(want) => as_f64(found).is_some_and(|n| n < *want),
            Condition::Lte(want) => as_f64(found).is_some_and(|n| n <= *want),
            Condition::Gt(want) => as_f64(found).is_some_and(|n| n > *want),
            Condition::Gte(want) => as_f64(found).is_some_and(|n| n >= *want),
            Condition::Between(lo, hi) => as_f64(found).is_some_and(|n| n >= *lo && n <= *hi),
            Condition::In(list) => list.contains(found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gte_condition_resolves_nested_path() {
        let goal = Goal {
            path: "$.score".to_string(),
            condition: Condition::Gte(0.8),
        };
        assert!(!goal.is_met(&json!({"score": 0.2})));
        assert!(!goal.is_met(&json!({"score": 0.5})));
        assert!(goal.is_met(&json!({"score": 0.9})));
    }

    #[test]
    fn missing_path_is_never_met() {
        let goal = Goal {
            path: "$.result.score".to_string(),
            condition: Condition::Gte(0.0),
        };
        assert!(!goal.is_met(&json!({"other": 1})));
    }

    #[test]
    fn numeric_coercion_from_string() {
        let goal = Goal {
            path: "$.score".to_string(),
            condition: Condition::Gt(0.5),
        };
        assert!(goal.is_met(&json!({"score": "0.75"})));
    }

    #[test]
    fn in_condition_matches_raw_json_values() {
        let goal = Goal {
            path: "$.status".to_string(),
            condition: Condition::In(vec![json!("done"), json!("complete")]),
        };
        assert!(goal.is_met(&json!({"status": "done"})));
        assert!(!goal.is_met(&json!({"status": "pending"})));
    }
}
