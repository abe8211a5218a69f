//! Plan execution: the observe → act → verify cycle.
//!
//! The runtime walks a plan strictly in order. Per step it tries the primary
//! skill and then each fallback; per skill it retries up to the step's
//! attempt budget. The first verified attempt advances the plan; a step that
//! exhausts every candidate fails the whole run. Failure is a value on the
//! summary, never an `Err` — errors out of handlers are recovered locally
//! into synthetic failure results.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cancel::{CancelToken, sleep_with_cancel};
use crate::core::goal::{AgentGoal, AgentState};
use crate::core::plan::{AgentPlan, AgentPlanStep};
use crate::core::skill::{ActionResult, Observation, SkillHandler, SkillRegistry};

/// Produces the observation snapshot handed to handlers and the verifier.
pub trait Observer {
    fn observe(
        &self,
        goal: &AgentGoal,
        step: &AgentPlanStep,
        state: &AgentState,
        attempt: u32,
    ) -> Observation;
}

/// Decides whether an attempt's result counts as verified.
pub trait Verifier {
    fn verify(
        &self,
        step: &AgentPlanStep,
        state: &AgentState,
        observation: &Observation,
        result: &ActionResult,
    ) -> bool;
}

/// Snapshot of attempt number, intent, and the state the handler will see.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultObserver;

impl Observer for DefaultObserver {
    fn observe(
        &self,
        _goal: &AgentGoal,
        step: &AgentPlanStep,
        state: &AgentState,
        attempt: u32,
    ) -> Observation {
        Observation {
            attempt,
            intent: step.intent.clone(),
            active_window_title: state.active_window_title.clone(),
            current_url: state.current_url.clone(),
            state_variables: state.variables.clone(),
        }
    }
}

/// Default policy: `success` must be true, an explicit `verified: false`
/// vetoes, and when the step expects signals the result must carry all of
/// them (order irrelevant).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl Verifier for DefaultVerifier {
    fn verify(
        &self,
        step: &AgentPlanStep,
        _state: &AgentState,
        _observation: &Observation,
        result: &ActionResult,
    ) -> bool {
        if !result.success {
            return false;
        }
        if result.verified == Some(false) {
            return false;
        }
        if step.expected_signals.is_empty() {
            return true;
        }
        step.expected_signals
            .iter()
            .all(|expected| result.signals.iter().any(|signal| signal == expected))
    }
}

/// One attempt (or handler miss) against one skill within one step.
/// Append-only within a run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepTrace {
    pub step_id: String,
    pub intent: String,
    pub selected_skill_id: String,
    /// Attempt number; 0 means the skill had no registered handler.
    pub attempt: u32,
    pub verified: bool,
    pub message: String,
    pub observation: Value,
    pub evidence: Value,
}

/// Outcome of one plan execution, including the final state.
#[derive(Debug, serde::Serialize)]
pub struct AgentRunSummary {
    pub plan_id: String,
    pub goal_id: String,
    pub completed: bool,
    pub completed_steps: usize,
    pub failed_step_id: Option<String>,
    pub traces: Vec<StepTrace>,
    pub state: AgentState,
}

/// Executes agent plans against a skill registry.
pub struct AgentRuntime<'a> {
    skills: &'a SkillRegistry,
    observer: Box<dyn Observer + 'a>,
    verifier: Box<dyn Verifier + 'a>,
    retry_backoff: Duration,
    cancel: CancelToken,
}

impl<'a> AgentRuntime<'a> {
    pub fn new(skills: &'a SkillRegistry) -> Self {
        Self {
            skills,
            observer: Box::new(DefaultObserver),
            verifier: Box::new(DefaultVerifier),
            retry_backoff: Duration::ZERO,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl Observer + 'a) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_verifier(mut self, verifier: impl Verifier + 'a) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    /// Pause between retry attempts, observed against `cancel`. An
    /// interrupted backoff abandons the step's remaining candidates; the run
    /// ends as a normal failure, not mid-action.
    pub fn with_retry_backoff(mut self, backoff: Duration, cancel: CancelToken) -> Self {
        self.retry_backoff = backoff;
        self.cancel = cancel;
        self
    }

    /// Execute `plan` in step order. The first unverified step halts the run.
    #[instrument(skip_all, fields(plan_id = %plan.plan_id, goal_id = %goal.goal_id))]
    pub fn run(&self, goal: &AgentGoal, plan: &AgentPlan, state: AgentState) -> AgentRunSummary {
        let mut state = state;
        let mut traces = Vec::new();
        let mut completed_steps = 0;

        for step in &plan.steps {
            let verified = self.run_step(goal, step, &mut state, &mut traces);
            if !verified {
                warn!(
                    failed_step = %step.step_id,
                    completed_steps,
                    traces = traces.len(),
                    "run failed"
                );
                return AgentRunSummary {
                    plan_id: plan.plan_id.clone(),
                    goal_id: goal.goal_id.clone(),
                    completed: false,
                    completed_steps,
                    failed_step_id: Some(step.step_id.clone()),
                    traces,
                    state,
                };
            }
            completed_steps += 1;
        }

        info!(completed_steps, traces = traces.len(), "run completed");
        AgentRunSummary {
            plan_id: plan.plan_id.clone(),
            goal_id: goal.goal_id.clone(),
            completed: true,
            completed_steps,
            failed_step_id: None,
            traces,
            state,
        }
    }

    fn run_step(
        &self,
        goal: &AgentGoal,
        step: &AgentPlanStep,
        state: &mut AgentState,
        traces: &mut Vec<StepTrace>,
    ) -> bool {
        let candidates =
            std::iter::once(&step.skill_id).chain(step.fallback_skill_ids.iter());

        for skill_id in candidates {
            let Some(handler) = self.skills.handler_for(skill_id) else {
                // A skill without a handler consumes no attempt budget.
                traces.push(StepTrace {
                    step_id: step.step_id.clone(),
                    intent: step.intent.clone(),
                    selected_skill_id: skill_id.clone(),
                    attempt: 0,
                    verified: false,
                    message: format!("no handler for skill '{skill_id}'"),
                    observation: Value::Null,
                    evidence: Value::Null,
                });
                continue;
            };

            for attempt in 1..=step.max_attempts {
                let observation = self.observer.observe(goal, step, state, attempt);
                state.observations.insert(
                    step.step_id.clone(),
                    serde_json::to_value(&observation).unwrap_or(Value::Null),
                );

                let result = match handler.invoke(step, goal, state, &observation, attempt) {
                    Ok(result) => result,
                    Err(err) => ActionResult::failure(format!("skill handler error: {err:#}")),
                };

                state.merge_variables(result.state_updates.clone());

                let verified = self.verifier.verify(step, state, &observation, &result);
                let trace = StepTrace {
                    step_id: step.step_id.clone(),
                    intent: step.intent.clone(),
                    selected_skill_id: skill_id.clone(),
                    attempt,
                    verified,
                    message: result.message.clone(),
                    observation: serde_json::to_value(&observation).unwrap_or(Value::Null),
                    evidence: serde_json::to_value(&result.evidence).unwrap_or(Value::Null),
                };
                if verified {
                    debug!(step = %step.step_id, skill = %skill_id, attempt, "attempt verified");
                } else {
                    warn!(
                        step = %step.step_id,
                        skill = %skill_id,
                        attempt,
                        message = %trace.message,
                        "attempt unverified"
                    );
                }
                traces.push(trace);

                if verified {
                    return true;
                }

                let more_attempts_remain = attempt < step.max_attempts;
                if more_attempts_remain
                    && !self.retry_backoff.is_zero()
                    && !sleep_with_cancel(self.retry_backoff, &self.cancel)
                {
                    return false;
                }
            }
        }
        false
    }
}
