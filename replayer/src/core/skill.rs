//! Skill catalog and the handler contract.
//!
//! A skill is a named capability (descriptor) optionally bound to a handler
//! that performs it. The registry remembers registration order: intent lookup
//! returns matches unranked in that order, and the planner's stable sort
//! falls back to it on score ties, so the order skills are registered in is
//! part of the deterministic contract.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::goal::{AgentGoal, AgentState};
use crate::core::plan::AgentPlanStep;

/// Catalog entry describing one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub skill_id: String,
    pub name: String,
    /// Intents this skill can fulfill. Matched case-insensitively.
    pub supported_intents: Vec<String>,
    /// Goal input keys the skill needs bound before it can run.
    #[serde(default)]
    pub required_inputs: Vec<String>,
    /// Signals a successful run emits when the goal declares none.
    #[serde(default)]
    pub default_success_signals: Vec<String>,
    /// Prior success rate in [0, 1]; the planner's base ranking score.
    #[serde(default = "default_reliability")]
    pub reliability_score: f64,
}

fn default_reliability() -> f64 {
    0.8
}

/// Snapshot taken before each attempt and handed to the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub attempt: u32,
    pub intent: String,
    pub active_window_title: Option<String>,
    pub current_url: Option<String>,
    pub state_variables: BTreeMap<String, Value>,
}

/// Contract every skill handler must return.
///
/// `verified` is tri-state on purpose: `None` leaves verification to the
/// signal check, while an explicit `Some(false)` vetoes the step even when
/// `success` is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    pub message: String,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub state_updates: BTreeMap<String, Value>,
    #[serde(default)]
    pub evidence: BTreeMap<String, Value>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            verified: Some(true),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            verified: Some(false),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signals.push(signal.into());
        self
    }

    pub fn with_state_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_updates.insert(key.into(), value);
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }
}

/// Execution side of a skill. Implementations must not panic; a returned
/// `Err` is recovered by the runtime into a synthetic failure result.
pub trait SkillHandler {
    fn invoke(
        &self,
        step: &AgentPlanStep,
        goal: &AgentGoal,
        state: &mut AgentState,
        observation: &Observation,
        attempt: u32,
    ) -> Result<ActionResult>;
}

impl<F> SkillHandler for F
where
    F: Fn(&AgentPlanStep, &AgentGoal, &mut AgentState, &Observation, u32) -> Result<ActionResult>,
{
    fn invoke(
        &self,
        step: &AgentPlanStep,
        goal: &AgentGoal,
        state: &mut AgentState,
        observation: &Observation,
        attempt: u32,
    ) -> Result<ActionResult> {
        self(step, goal, state, observation, attempt)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no skill registered with id '{0}'")]
    UnknownSkill(String),
}

/// In-memory skill catalog used by the planner and the runtime.
#[derive(Default)]
pub struct SkillRegistry {
    order: Vec<String>,
    skills: HashMap<String, SkillDescriptor>,
    handlers: HashMap<String, Box<dyn SkillHandler>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by id. An overwritten skill keeps its original
    /// position in registration order.
    pub fn register(&mut self, descriptor: SkillDescriptor) {
        if !self.skills.contains_key(&descriptor.skill_id) {
            self.order.push(descriptor.skill_id.clone());
        }
        self.skills.insert(descriptor.skill_id.clone(), descriptor);
    }

    /// Bind a handler to an already-registered skill.
    pub fn register_handler(
        &mut self,
        skill_id: &str,
        handler: Box<dyn SkillHandler>,
    ) -> Result<(), RegistryError> {
        if !self.skills.contains_key(skill_id) {
            return Err(RegistryError::UnknownSkill(skill_id.to_string()));
        }
        self.handlers.insert(skill_id.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, skill_id: &str) -> Option<&SkillDescriptor> {
        self.skills.get(skill_id)
    }

    pub fn handler_for(&self, skill_id: &str) -> Option<&dyn SkillHandler> {
        self.handlers.get(skill_id).map(|handler| handler.as_ref())
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> Vec<&SkillDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.skills.get(id))
            .collect()
    }

    /// All skills supporting `intent`, case-insensitively, in registration
    /// order. Unranked; ranking is the planner's job.
    pub fn skills_for_intent(&self, intent: &str) -> Vec<&SkillDescriptor> {
        let needle = intent.trim().to_lowercase();
        self.list()
            .into_iter()
            .filter(|descriptor| {
                descriptor
                    .supported_intents
                    .iter()
                    .any(|supported| supported.to_lowercase() == needle)
            })
            .collect()
    }
}
