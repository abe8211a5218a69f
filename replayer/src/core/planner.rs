//! Deterministic plan construction from a goal and the available skills.
//!
//! Given the same registry contents, goal, and state, `build_plan` selects
//! the same primaries and fallbacks on every call (only the plan id is
//! fresh). Ranking uses a stable descending sort, so equal-scored candidates
//! keep registration order; downstream replay correctness leans on this.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::core::goal::{AgentGoal, AgentGoalType, AgentState};
use crate::core::plan::{AgentPlan, AgentPlanStep, unresolved_placeholder};
use crate::core::skill::{SkillDescriptor, SkillRegistry};

/// Bonus when a skill declares required inputs and the goal provides all of
/// them.
const INPUT_COVERAGE_BONUS: f64 = 0.12;
/// Bonus for web-task goals once a page is already open.
const WEB_CONTEXT_BONUS: f64 = 0.03;
/// Bonus for data-entry goals that carry a row reference.
const ROW_INPUT_BONUS: f64 = 0.04;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no registered skill can handle intent '{0}'")]
    NoSkillForIntent(String),
    #[error("generated plan has {steps} steps, exceeding max_total_steps {max}")]
    TooManySteps { steps: usize, max: usize },
    #[error("invalid goal: {0}")]
    InvalidGoal(String),
}

/// Canonical intent sequence per goal type, used when the goal requests none.
fn default_intents(goal_type: AgentGoalType) -> &'static [&'static str] {
    match goal_type {
        AgentGoalType::RepetitiveTask => &[
            "prepare_context",
            "locate_target",
            "apply_action",
            "verify_outcome",
            "persist_result",
        ],
        AgentGoalType::WebTask => &[
            "open_page",
            "locate_target",
            "apply_action",
            "verify_outcome",
        ],
        AgentGoalType::DataEntry => &[
            "locate_target",
            "fill_value",
            "verify_outcome",
            "persist_result",
        ],
        AgentGoalType::Custom => &["locate_target", "apply_action", "verify_outcome"],
    }
}

/// Builds a deterministic action plan from goal + available skills.
pub struct GoalPlanner<'a> {
    skills: &'a SkillRegistry,
}

impl<'a> GoalPlanner<'a> {
    pub fn new(skills: &'a SkillRegistry) -> Self {
        Self { skills }
    }

    pub fn build_plan(&self, goal: &AgentGoal, state: &AgentState) -> Result<AgentPlan, PlanError> {
        goal.constraints.validate().map_err(PlanError::InvalidGoal)?;

        let requested = goal.normalized_intents();
        let intents: Vec<String> = if requested.is_empty() {
            default_intents(goal.goal_type)
                .iter()
                .map(|intent| (*intent).to_string())
                .collect()
        } else {
            requested
        };

        let mut steps = Vec::with_capacity(intents.len());
        for (index, intent) in intents.iter().enumerate() {
            let (selected, fallbacks) = self.select_skills_for_intent(intent, goal, state)?;
            let step = AgentPlanStep {
                step_id: format!("s{:02}", index + 1),
                intent: intent.clone(),
                skill_id: selected.skill_id.clone(),
                description: format!("{} ({intent})", selected.name),
                input_bindings: build_input_bindings(goal, selected),
                expected_signals: if selected.default_success_signals.is_empty() {
                    goal.success_criteria.clone()
                } else {
                    selected.default_success_signals.clone()
                },
                fallback_skill_ids: fallbacks
                    .iter()
                    .map(|descriptor| descriptor.skill_id.clone())
                    .collect(),
                max_attempts: goal.constraints.max_step_attempts,
            };
            debug!(
                step_id = %step.step_id,
                intent = %step.intent,
                skill = %step.skill_id,
                fallbacks = step.fallback_skill_ids.len(),
                "planned step"
            );
            steps.push(step);
        }

        if steps.len() > goal.constraints.max_total_steps {
            return Err(PlanError::TooManySteps {
                steps: steps.len(),
                max: goal.constraints.max_total_steps,
            });
        }

        Ok(AgentPlan {
            plan_id: Uuid::new_v4().simple().to_string(),
            goal_id: goal.goal_id.clone(),
            steps,
            metadata: BTreeMap::from([
                ("goal_type".to_string(), json!(goal.goal_type)),
                (
                    "active_window_title".to_string(),
                    json!(state.active_window_title),
                ),
                ("current_url".to_string(), json!(state.current_url)),
            ]),
        })
    }

    fn select_skills_for_intent(
        &self,
        intent: &str,
        goal: &AgentGoal,
        state: &AgentState,
    ) -> Result<(&'a SkillDescriptor, Vec<&'a SkillDescriptor>), PlanError> {
        let mut candidates = self.skills.skills_for_intent(intent);
        if candidates.is_empty() {
            return Err(PlanError::NoSkillForIntent(intent.to_string()));
        }

        // Stable sort: equal scores keep registration order.
        candidates.sort_by(|a, b| {
            skill_score(b, goal, state).total_cmp(&skill_score(a, goal, state))
        });
        let primary = candidates[0];
        let fallbacks = candidates[1..].to_vec();
        Ok((primary, fallbacks))
    }
}

fn skill_score(descriptor: &SkillDescriptor, goal: &AgentGoal, state: &AgentState) -> f64 {
    let mut score = descriptor.reliability_score;
    if !descriptor.required_inputs.is_empty()
        && descriptor
            .required_inputs
            .iter()
            .all(|key| goal.inputs.contains_key(key))
    {
        score += INPUT_COVERAGE_BONUS;
    }
    if goal.goal_type == AgentGoalType::WebTask && state.current_url.is_some() {
        score += WEB_CONTEXT_BONUS;
    }
    if goal.goal_type == AgentGoalType::DataEntry && goal.inputs.contains_key("row_id") {
        score += ROW_INPUT_BONUS;
    }
    score
}

fn build_input_bindings(goal: &AgentGoal, skill: &SkillDescriptor) -> BTreeMap<String, Value> {
    let mut bindings = BTreeMap::new();
    for key in &skill.required_inputs {
        let value = goal
            .inputs
            .get(key)
            .cloned()
            .unwrap_or_else(|| unresolved_placeholder(key));
        bindings.insert(key.clone(), value);
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::is_unresolved_placeholder;
    use crate::test_support::descriptor;
    use serde_json::json;

    fn goal(goal_type: AgentGoalType) -> AgentGoal {
        AgentGoal::new("g1", "Goal", goal_type)
    }

    #[test]
    fn plan_covers_each_resolved_intent_once() {
        let mut registry = SkillRegistry::new();
        registry.register(descriptor("prep", "prepare_context"));
        registry.register(descriptor("locate", "locate_target"));
        registry.register(descriptor("apply", "apply_action"));
        registry.register(descriptor("verify", "verify_outcome"));
        registry.register(descriptor("persist", "persist_result"));

        let planner = GoalPlanner::new(&registry);
        let plan = planner
            .build_plan(&goal(AgentGoalType::RepetitiveTask), &AgentState::new())
            .expect("plan");

        assert_eq!(plan.steps.len(), 5);
        assert_eq!(plan.steps[0].step_id, "s01");
        for step in &plan.steps {
            let selected = registry.get(&step.skill_id).expect("descriptor");
            assert!(
                selected
                    .supported_intents
                    .iter()
                    .any(|intent| intent.eq_ignore_ascii_case(&step.intent))
            );
        }
    }

    #[test]
    fn missing_intent_fails_before_execution() {
        let registry = SkillRegistry::new();
        let planner = GoalPlanner::new(&registry);
        let err = planner
            .build_plan(&goal(AgentGoalType::Custom), &AgentState::new())
            .unwrap_err();
        assert_eq!(err, PlanError::NoSkillForIntent("locate_target".to_string()));
    }

    #[test]
    fn plan_rejects_too_many_steps() {
        let mut registry = SkillRegistry::new();
        registry.register(descriptor("locate", "locate_target"));
        registry.register(descriptor("apply", "apply_action"));
        registry.register(descriptor("verify", "verify_outcome"));

        let mut goal = goal(AgentGoalType::Custom);
        goal.constraints.max_total_steps = 2;
        let planner = GoalPlanner::new(&registry);
        let err = planner.build_plan(&goal, &AgentState::new()).unwrap_err();
        assert_eq!(err, PlanError::TooManySteps { steps: 3, max: 2 });
    }

    #[test]
    fn invalid_constraints_are_rejected_up_front() {
        let mut registry = SkillRegistry::new();
        registry.register(descriptor("locate", "locate_target"));
        let mut goal = goal(AgentGoalType::Custom);
        goal.constraints.max_step_attempts = 0;
        let planner = GoalPlanner::new(&registry);
        assert!(matches!(
            planner.build_plan(&goal, &AgentState::new()),
            Err(PlanError::InvalidGoal(_))
        ));
    }

    #[test]
    fn input_coverage_bonus_promotes_satisfied_skill() {
        let mut registry = SkillRegistry::new();
        let mut needy = descriptor("needy", "apply_action");
        needy.required_inputs = vec!["button_name".to_string()];
        needy.reliability_score = 0.8;
        let mut plain = descriptor("plain", "apply_action");
        plain.reliability_score = 0.85;
        registry.register(plain);
        registry.register(needy);

        let mut goal = goal(AgentGoalType::Custom);
        goal.requested_intents = vec!["apply_action".to_string()];
        goal.inputs.insert("button_name".to_string(), json!("left"));

        let planner = GoalPlanner::new(&registry);
        let plan = planner.build_plan(&goal, &AgentState::new()).expect("plan");
        // 0.8 + 0.12 beats 0.85.
        assert_eq!(plan.steps[0].skill_id, "needy");
        assert_eq!(plan.steps[0].fallback_skill_ids, vec!["plain".to_string()]);
    }

    #[test]
    fn goal_type_bonuses_apply_under_their_conditions() {
        let skill = descriptor("apply", "apply_action");

        let mut web_goal = goal(AgentGoalType::WebTask);
        web_goal.requested_intents = vec!["apply_action".to_string()];
        let mut state = AgentState::new();
        let base = skill_score(&skill, &web_goal, &state);
        state.current_url = Some("https://example.test/form".to_string());
        assert!((skill_score(&skill, &web_goal, &state) - base - WEB_CONTEXT_BONUS).abs() < 1e-9);

        let mut entry_goal = goal(AgentGoalType::DataEntry);
        entry_goal.requested_intents = vec!["apply_action".to_string()];
        let base = skill_score(&skill, &entry_goal, &AgentState::new());
        entry_goal.inputs.insert("row_id".to_string(), json!("r7"));
        assert!(
            (skill_score(&skill, &entry_goal, &AgentState::new()) - base - ROW_INPUT_BONUS).abs()
                < 1e-9
        );
    }

    #[test]
    fn input_bonus_needs_a_non_empty_requirement_set() {
        // A skill with no required inputs never earns the coverage bonus.
        let skill = descriptor("apply", "apply_action");
        let mut goal = goal(AgentGoalType::Custom);
        goal.inputs.insert("anything".to_string(), json!(1));
        assert_eq!(
            skill_score(&skill, &goal, &AgentState::new()),
            skill.reliability_score
        );
    }

    #[test]
    fn equal_scores_keep_registration_order() {
        let mut registry = SkillRegistry::new();
        registry.register(descriptor("first", "apply_action"));
        registry.register(descriptor("second", "apply_action"));
        registry.register(descriptor("third", "apply_action"));

        let mut goal = goal(AgentGoalType::Custom);
        goal.requested_intents = vec!["apply_action".to_string()];
        let planner = GoalPlanner::new(&registry);
        let plan = planner.build_plan(&goal, &AgentState::new()).expect("plan");

        assert_eq!(plan.steps[0].skill_id, "first");
        assert_eq!(
            plan.steps[0].fallback_skill_ids,
            vec!["second".to_string(), "third".to_string()]
        );
    }

    #[test]
    fn repeated_builds_select_identically() {
        let mut registry = SkillRegistry::new();
        let mut strong = descriptor("strong", "locate_target");
        strong.reliability_score = 0.9;
        registry.register(descriptor("weak", "locate_target"));
        registry.register(strong);
        registry.register(descriptor("apply", "apply_action"));
        registry.register(descriptor("verify", "verify_outcome"));

        let goal = goal(AgentGoalType::Custom);
        let state = AgentState::new();
        let planner = GoalPlanner::new(&registry);
        let first = planner.build_plan(&goal, &state).expect("plan");
        let second = planner.build_plan(&goal, &state).expect("plan");

        assert_ne!(first.plan_id, second.plan_id);
        for (a, b) in first.steps.iter().zip(&second.steps) {
            assert_eq!(a.skill_id, b.skill_id);
            assert_eq!(a.fallback_skill_ids, b.fallback_skill_ids);
        }
    }

    #[test]
    fn unbound_required_inputs_become_placeholders() {
        let mut registry = SkillRegistry::new();
        let mut locate = descriptor("locate", "locate_target");
        locate.required_inputs = vec!["event_payload".to_string(), "button_name".to_string()];
        registry.register(locate);

        let mut goal = goal(AgentGoalType::Custom);
        goal.requested_intents = vec!["locate_target".to_string()];
        goal.inputs.insert("button_name".to_string(), json!("left"));

        let planner = GoalPlanner::new(&registry);
        let plan = planner.build_plan(&goal, &AgentState::new()).expect("plan");
        let bindings = &plan.steps[0].input_bindings;
        assert_eq!(bindings["button_name"], json!("left"));
        assert!(is_unresolved_placeholder(&bindings["event_payload"]));
    }

    #[test]
    fn empty_skill_signals_fall_back_to_goal_criteria() {
        let mut registry = SkillRegistry::new();
        registry.register(descriptor("apply", "apply_action"));

        let mut goal = goal(AgentGoalType::Custom);
        goal.requested_intents = vec!["apply_action".to_string()];
        goal.success_criteria = vec!["done".to_string()];

        let planner = GoalPlanner::new(&registry);
        let plan = planner.build_plan(&goal, &AgentState::new()).expect("plan");
        assert_eq!(plan.steps[0].expected_signals, vec!["done".to_string()]);
    }
}
