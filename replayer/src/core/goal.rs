//! Goal and mutable run-state types.
//!
//! These types define stable contracts between the planner, the runtime, and
//! the per-event dispatch. A goal is immutable input; [`AgentState`] is the
//! single mutable value a run owns and is never shared across concurrent
//! runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of work a goal represents. Selects the canonical intent sequence
/// when the goal does not request intents explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentGoalType {
    RepetitiveTask,
    WebTask,
    DataEntry,
    Custom,
}

/// Execution budget limits for a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConstraints {
    /// Attempts allowed per skill per step, within [1, 10].
    pub max_step_attempts: u32,
    /// Upper bound on plan length, within [1, 200].
    pub max_total_steps: usize,
    /// Carried for custom verifiers; the default verifier always verifies.
    pub require_verification: bool,
}

impl Default for AgentConstraints {
    fn default() -> Self {
        Self {
            max_step_attempts: 3,
            max_total_steps: 20,
            require_verification: true,
        }
    }
}

impl AgentConstraints {
    /// Check the documented ranges. The planner rejects goals that fail this.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.max_step_attempts) {
            return Err(format!(
                "max_step_attempts must be within [1, 10], got {}",
                self.max_step_attempts
            ));
        }
        if !(1..=200).contains(&self.max_total_steps) {
            return Err(format!(
                "max_total_steps must be within [1, 200], got {}",
                self.max_total_steps
            ));
        }
        Ok(())
    }
}

/// Abstract description of what one agent run should accomplish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGoal {
    pub goal_id: String,
    pub name: String,
    pub goal_type: AgentGoalType,
    #[serde(default)]
    pub description: String,
    /// Signal names a step must exhibit when its skill declares none.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Ordered intents; empty means "use the goal type's canonical sequence".
    #[serde(default)]
    pub requested_intents: Vec<String>,
    /// Free-form inputs bound into plan steps by required-input key.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub constraints: AgentConstraints,
}

impl AgentGoal {
    pub fn new(goal_id: impl Into<String>, name: impl Into<String>, goal_type: AgentGoalType) -> Self {
        Self {
            goal_id: goal_id.into(),
            name: name.into(),
            goal_type,
            description: String::new(),
            success_criteria: Vec::new(),
            requested_intents: Vec::new(),
            inputs: BTreeMap::new(),
            constraints: AgentConstraints::default(),
        }
    }

    /// Requested intents with surrounding whitespace stripped and blank
    /// entries dropped.
    pub fn normalized_intents(&self) -> Vec<String> {
        self.requested_intents
            .iter()
            .map(|intent| intent.trim())
            .filter(|intent| !intent.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Mutable state owned by exactly one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub active_window_title: Option<String>,
    pub current_url: Option<String>,
    /// Grows via last-write-wins merges from action results.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Keyed by step id; overwritten on every attempt, never accumulated.
    #[serde(default)]
    pub observations: BTreeMap<String, Value>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow merge: new keys override old ones.
    pub fn merge_variables(&mut self, updates: BTreeMap<String, Value>) {
        self.variables.extend(updates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalized_intents_drops_blanks() {
        let mut goal = AgentGoal::new("g1", "Goal", AgentGoalType::Custom);
        goal.requested_intents = vec![
            " locate_target ".to_string(),
            String::new(),
            "  ".to_string(),
            "apply_action".to_string(),
        ];
        assert_eq!(goal.normalized_intents(), vec!["locate_target", "apply_action"]);
    }

    #[test]
    fn merge_variables_is_last_write_wins() {
        let mut state = AgentState::new();
        state.variables.insert("a".to_string(), json!(1));
        state.merge_variables(BTreeMap::from([
            ("a".to_string(), json!(2)),
            ("b".to_string(), json!(true)),
        ]));
        assert_eq!(state.variables["a"], json!(2));
        assert_eq!(state.variables["b"], json!(true));
    }

    #[test]
    fn constraints_validate_ranges() {
        let mut constraints = AgentConstraints::default();
        assert!(constraints.validate().is_ok());
        constraints.max_step_attempts = 11;
        assert!(constraints.validate().is_err());
        constraints.max_step_attempts = 1;
        constraints.max_total_steps = 0;
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn goal_type_serializes_snake_case() {
        let rendered = serde_json::to_string(&AgentGoalType::RepetitiveTask).expect("serialize");
        assert_eq!(rendered, "\"repetitive_task\"");
    }
}
