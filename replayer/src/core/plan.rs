//! Plan types produced by the planner and consumed by the runtime.
//!
//! Plans are immutable once built: the runtime reads them, it never edits
//! them. A fresh plan (with a fresh id) is built per goal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One intent bound to a primary skill and ordered fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlanStep {
    pub step_id: String,
    pub intent: String,
    /// Primary skill chosen by the planner's ranking.
    pub skill_id: String,
    pub description: String,
    /// Resolved values, or unresolved `{{input.<key>}}` placeholder tokens.
    #[serde(default)]
    pub input_bindings: BTreeMap<String, Value>,
    /// Signals the result must exhibit for the default verifier to pass it.
    #[serde(default)]
    pub expected_signals: Vec<String>,
    /// Remaining candidates in ranked order, tried after the primary.
    #[serde(default)]
    pub fallback_skill_ids: Vec<String>,
    pub max_attempts: u32,
}

/// Ordered steps for one goal, plus a metadata snapshot taken at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub plan_id: String,
    pub goal_id: String,
    pub steps: Vec<AgentPlanStep>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Render the token the planner emits for a required input the goal did not
/// provide.
pub fn unresolved_placeholder(key: &str) -> Value {
    Value::String(format!("{{{{input.{key}}}}}"))
}

/// Whether a bound value is an unresolved placeholder. Executors must treat
/// these as binding errors, never as literal input.
pub fn is_unresolved_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(text) if text.starts_with("{{input.") && text.ends_with("}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_round_trips_through_detection() {
        let token = unresolved_placeholder("row_id");
        assert_eq!(token, json!("{{input.row_id}}"));
        assert!(is_unresolved_placeholder(&token));
    }

    #[test]
    fn resolved_values_are_not_placeholders() {
        assert!(!is_unresolved_placeholder(&json!("plain text")));
        assert!(!is_unresolved_placeholder(&json!(42)));
        assert!(!is_unresolved_placeholder(&json!({"x": 1})));
    }
}
