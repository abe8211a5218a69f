//! Per-event goal and skill construction.
//!
//! Each replayable event kind maps to a purpose-built goal requesting
//! exactly `[locate_target, apply_action, verify_outcome]`, plus a fresh
//! registry holding only the three skills that single event needs. The
//! mapping is a dispatch table over [`TeachEventKind`]: every kind has a
//! pure factory producing descriptor/handler pairs, and handlers are small
//! structs over the platform seams rather than ad hoc closures. Kinds
//! without a factory are not dispatched; the scheduler records them as
//! skipped.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value, json};

use crate::core::goal::{AgentGoal, AgentGoalType, AgentState};
use crate::core::plan::{AgentPlanStep, is_unresolved_placeholder};
use crate::core::skill::{ActionResult, Observation, SkillDescriptor, SkillHandler, SkillRegistry};
use crate::io::platform::{InputInjector, MouseButton};
use crate::io::session::TeachEvent;
use crate::locator::SmartLocator;

/// Seams shared by every event's handlers.
pub struct ReplayDeps {
    pub input: Arc<dyn InputInjector>,
    pub locator: Arc<SmartLocator>,
}

/// A goal plus the registry able to execute it.
pub struct EventDispatch {
    pub goal: AgentGoal,
    pub registry: SkillRegistry,
}

/// Build the goal and skill set for one event, or `None` for kinds that
/// cannot be replayed.
pub fn dispatch_for_event(event: &TeachEvent, deps: &ReplayDeps) -> Option<EventDispatch> {
    use crate::io::session::TeachEventKind as Kind;
    match event.event_type {
        Kind::MouseClick => Some(mouse_click_dispatch(event, deps)),
        Kind::MouseScroll => Some(mouse_scroll_dispatch(event, deps)),
        Kind::KeyPress => Some(key_press_dispatch(event, deps)),
        Kind::Hotkey => Some(hotkey_dispatch(event, deps)),
        _ => None,
    }
}

const REPLAY_INTENTS: [&str; 3] = ["locate_target", "apply_action", "verify_outcome"];

fn replay_goal(
    event: &TeachEvent,
    name: &str,
    inputs: Vec<(&str, Value)>,
    success_criterion: &str,
) -> AgentGoal {
    let mut goal = AgentGoal::new(
        event.event_id.clone(),
        name,
        AgentGoalType::RepetitiveTask,
    );
    goal.requested_intents = REPLAY_INTENTS.iter().map(|intent| (*intent).to_string()).collect();
    goal.success_criteria = vec![success_criterion.to_string()];
    for (key, value) in inputs {
        goal.inputs.insert(key.to_string(), value);
    }
    goal
}

fn skill(
    skill_id: &str,
    name: &str,
    intent: &str,
    required_inputs: &[&str],
    signal: &str,
    reliability_score: f64,
) -> SkillDescriptor {
    SkillDescriptor {
        skill_id: skill_id.to_string(),
        name: name.to_string(),
        supported_intents: vec![intent.to_string()],
        required_inputs: required_inputs.iter().map(|key| (*key).to_string()).collect(),
        default_success_signals: vec![signal.to_string()],
        reliability_score,
    }
}

fn bind(registry: &mut SkillRegistry, descriptor: SkillDescriptor, handler: Box<dyn SkillHandler>) {
    let skill_id = descriptor.skill_id.clone();
    registry.register(descriptor);
    registry
        .register_handler(&skill_id, handler)
        .expect("descriptor registered above");
}

fn binding_str(step: &AgentPlanStep, key: &str) -> Option<String> {
    let value = step.input_bindings.get(key)?;
    if is_unresolved_placeholder(value) {
        return None;
    }
    value.as_str().map(str::to_string)
}

fn binding_object<'a>(step: &'a AgentPlanStep, key: &str) -> Option<&'a Map<String, Value>> {
    let value = step.input_bindings.get(key)?;
    if is_unresolved_placeholder(value) {
        return None;
    }
    value.as_object()
}

fn variable_i64(state: &AgentState, key: &str) -> Option<i64> {
    state.variables.get(key).and_then(Value::as_i64)
}

fn variable_flag(state: &AgentState, key: &str) -> bool {
    state
        .variables
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// mouse_click

fn mouse_click_dispatch(event: &TeachEvent, deps: &ReplayDeps) -> EventDispatch {
    let button_name = event
        .payload
        .get("button")
        .and_then(Value::as_str)
        .unwrap_or("left")
        .to_lowercase();

    let goal = replay_goal(
        event,
        "Replay mouse click",
        vec![
            ("event_payload", Value::Object(event.payload.clone())),
            ("button_name", json!(button_name)),
        ],
        "click_verified",
    );

    let mut registry = SkillRegistry::new();
    bind(
        &mut registry,
        skill(
            "ui_locate_click",
            "Locate click target",
            "locate_target",
            &["event_payload", "button_name"],
            "target_located",
            0.9,
        ),
        Box::new(LocateClickTarget {
            locator: deps.locator.clone(),
        }),
    );
    bind(
        &mut registry,
        skill(
            "ui_apply_click",
            "Apply mouse click",
            "apply_action",
            &["button_name"],
            "click_applied",
            0.92,
        ),
        Box::new(ApplyClick {
            input: deps.input.clone(),
        }),
    );
    bind(
        &mut registry,
        skill(
            "ui_verify_click",
            "Verify mouse click",
            "verify_outcome",
            &[],
            "click_verified",
            0.88,
        ),
        Box::new(VerifyClick),
    );

    EventDispatch { goal, registry }
}

struct LocateClickTarget {
    locator: Arc<SmartLocator>,
}

impl SkillHandler for LocateClickTarget {
    fn invoke(
        &self,
        step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let Some(payload) = binding_object(step, "event_payload") else {
            return Ok(ActionResult::failure("missing event payload"));
        };
        let Some(target) = self.locator.resolve_click_target(payload) else {
            return Ok(ActionResult::failure("no click target resolved"));
        };
        let button_name = binding_str(step, "button_name")
            .unwrap_or_else(|| "left".to_string())
            .to_lowercase();
        state
            .variables
            .insert("button_name".to_string(), json!(button_name));
        Ok(ActionResult::success("target located")
            .with_signal("target_located")
            .with_state_update("target_x", json!(target.x))
            .with_state_update("target_y", json!(target.y))
            .with_evidence("target", json!([target.x, target.y])))
    }
}

struct ApplyClick {
    input: Arc<dyn InputInjector>,
}

impl SkillHandler for ApplyClick {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let (Some(target_x), Some(target_y)) = (
            variable_i64(state, "target_x"),
            variable_i64(state, "target_y"),
        ) else {
            return Ok(ActionResult::failure("target coordinates are missing"));
        };
        let button_name = state
            .variables
            .get("button_name")
            .and_then(Value::as_str)
            .unwrap_or("left")
            .to_string();
        let button = MouseButton::from_name(&button_name);
        let point = crate::core::geometry::Point::new(target_x as i32, target_y as i32);
        self.input.move_pointer(point)?;
        self.input.click(button, 1)?;
        Ok(ActionResult::success("click applied")
            .with_signal("click_applied")
            .with_state_update("click_applied", json!(true))
            .with_evidence("clicked_point", json!([target_x, target_y]))
            .with_evidence("button", json!(button_name)))
    }
}

struct VerifyClick;

impl SkillHandler for VerifyClick {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let clicked = variable_flag(state, "click_applied");
        let target_x = variable_i64(state, "target_x");
        let target_y = variable_i64(state, "target_y");
        if !clicked || target_x.is_none() || target_y.is_none() {
            return Ok(ActionResult::failure("click not applied"));
        }
        Ok(ActionResult::success("click verified")
            .with_signal("click_verified")
            .with_evidence("target", json!([target_x, target_y])))
    }
}

// ---------------------------------------------------------------------------
// mouse_scroll

fn mouse_scroll_dispatch(event: &TeachEvent, deps: &ReplayDeps) -> EventDispatch {
    let goal = replay_goal(
        event,
        "Replay mouse scroll",
        vec![("event_payload", Value::Object(event.payload.clone()))],
        "scroll_verified",
    );

    let mut registry = SkillRegistry::new();
    bind(
        &mut registry,
        skill(
            "ui_locate_scroll",
            "Locate scroll position",
            "locate_target",
            &["event_payload"],
            "scroll_resolved",
            0.9,
        ),
        Box::new(LocateScroll),
    );
    bind(
        &mut registry,
        skill(
            "ui_apply_scroll",
            "Apply mouse scroll",
            "apply_action",
            &[],
            "scroll_applied",
            0.92,
        ),
        Box::new(ApplyScroll {
            input: deps.input.clone(),
        }),
    );
    bind(
        &mut registry,
        skill(
            "ui_verify_scroll",
            "Verify mouse scroll",
            "verify_outcome",
            &[],
            "scroll_verified",
            0.85,
        ),
        Box::new(VerifyScroll),
    );

    EventDispatch { goal, registry }
}

struct LocateScroll;

impl SkillHandler for LocateScroll {
    fn invoke(
        &self,
        step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let Some(payload) = binding_object(step, "event_payload") else {
            return Ok(ActionResult::failure("missing event payload"));
        };
        let dx = payload.get("dx").and_then(Value::as_i64).unwrap_or(0);
        let dy = payload.get("dy").and_then(Value::as_i64).unwrap_or(0);
        let mut result = ActionResult::success("scroll resolved")
            .with_signal("scroll_resolved")
            .with_state_update("scroll_dx", json!(dx))
            .with_state_update("scroll_dy", json!(dy))
            .with_evidence("delta", json!([dx, dy]));
        if let (Some(x), Some(y)) = (
            payload.get("x").and_then(Value::as_i64),
            payload.get("y").and_then(Value::as_i64),
        ) {
            result = result
                .with_state_update("scroll_x", json!(x))
                .with_state_update("scroll_y", json!(y));
        }
        state.variables.extend(result.state_updates.clone());
        Ok(result)
    }
}

struct ApplyScroll {
    input: Arc<dyn InputInjector>,
}

impl SkillHandler for ApplyScroll {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let (Some(dx), Some(dy)) = (
            variable_i64(state, "scroll_dx"),
            variable_i64(state, "scroll_dy"),
        ) else {
            return Ok(ActionResult::failure("scroll delta is missing"));
        };
        if let (Some(x), Some(y)) = (variable_i64(state, "scroll_x"), variable_i64(state, "scroll_y"))
        {
            self.input
                .move_pointer(crate::core::geometry::Point::new(x as i32, y as i32))?;
        }
        self.input.scroll(dx as i32, dy as i32)?;
        Ok(ActionResult::success("scroll applied")
            .with_signal("scroll_applied")
            .with_state_update("scroll_applied", json!(true))
            .with_evidence("delta", json!([dx, dy])))
    }
}

struct VerifyScroll;

impl SkillHandler for VerifyScroll {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        if !variable_flag(state, "scroll_applied") {
            return Ok(ActionResult::failure("scroll not applied"));
        }
        Ok(ActionResult::success("scroll verified").with_signal("scroll_verified"))
    }
}

// ---------------------------------------------------------------------------
// key_press

fn key_press_dispatch(event: &TeachEvent, deps: &ReplayDeps) -> EventDispatch {
    let key_name = event
        .payload
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let goal = replay_goal(
        event,
        "Replay key press",
        vec![("key_name", json!(key_name))],
        "key_verified",
    );

    let mut registry = SkillRegistry::new();
    bind(
        &mut registry,
        skill(
            "ui_locate_key_press",
            "Locate key press input",
            "locate_target",
            &["key_name"],
            "key_resolved",
            0.9,
        ),
        Box::new(ResolveKey),
    );
    bind(
        &mut registry,
        skill(
            "ui_apply_key_press",
            "Apply key press",
            "apply_action",
            &["key_name"],
            "key_applied",
            0.92,
        ),
        Box::new(ApplyKeyPress {
            input: deps.input.clone(),
        }),
    );
    bind(
        &mut registry,
        skill(
            "ui_verify_key_press",
            "Verify key press",
            "verify_outcome",
            &[],
            "key_verified",
            0.85,
        ),
        Box::new(VerifyKeyPress),
    );

    EventDispatch { goal, registry }
}

struct ResolveKey;

impl SkillHandler for ResolveKey {
    fn invoke(
        &self,
        step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let key_name = binding_str(step, "key_name")
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        // The escape key is the replay stop signal; re-injecting it would
        // cancel the session from inside itself.
        if key_name.is_empty() || key_name == "esc" {
            return Ok(ActionResult::failure("invalid key name for replay"));
        }
        state
            .variables
            .insert("key_name".to_string(), json!(key_name.clone()));
        Ok(ActionResult::success("key resolved")
            .with_signal("key_resolved")
            .with_state_update("key_name", json!(key_name.clone()))
            .with_evidence("key_name", json!(key_name)))
    }
}

struct ApplyKeyPress {
    input: Arc<dyn InputInjector>,
}

impl SkillHandler for ApplyKeyPress {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let key_name = state
            .variables
            .get("key_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if key_name.is_empty() {
            return Ok(ActionResult::failure("missing key name in state"));
        }
        self.input.press_key(&key_name)?;
        self.input.release_key(&key_name)?;
        Ok(ActionResult::success("key press applied")
            .with_signal("key_applied")
            .with_state_update("key_applied", json!(true))
            .with_evidence("key_name", json!(key_name)))
    }
}

struct VerifyKeyPress;

impl SkillHandler for VerifyKeyPress {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        if !variable_flag(state, "key_applied") {
            return Ok(ActionResult::failure("key was not applied"));
        }
        Ok(ActionResult::success("key press verified")
            .with_signal("key_verified")
            .with_evidence(
                "key_name",
                state.variables.get("key_name").cloned().unwrap_or(Value::Null),
            ))
    }
}

// ---------------------------------------------------------------------------
// hotkey

fn hotkey_dispatch(event: &TeachEvent, deps: &ReplayDeps) -> EventDispatch {
    let key_name = event
        .payload
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let modifiers = event
        .payload
        .get("modifiers")
        .cloned()
        .unwrap_or_else(|| json!([]));

    let goal = replay_goal(
        event,
        "Replay hotkey",
        vec![("key_name", json!(key_name)), ("modifiers", modifiers)],
        "hotkey_verified",
    );

    let mut registry = SkillRegistry::new();
    bind(
        &mut registry,
        skill(
            "ui_locate_hotkey",
            "Locate hotkey input",
            "locate_target",
            &["key_name", "modifiers"],
            "hotkey_resolved",
            0.9,
        ),
        Box::new(ResolveHotkey),
    );
    bind(
        &mut registry,
        skill(
            "ui_apply_hotkey",
            "Apply hotkey",
            "apply_action",
            &["key_name", "modifiers"],
            "hotkey_applied",
            0.92,
        ),
        Box::new(ApplyHotkey {
            input: deps.input.clone(),
        }),
    );
    bind(
        &mut registry,
        skill(
            "ui_verify_hotkey",
            "Verify hotkey",
            "verify_outcome",
            &[],
            "hotkey_verified",
            0.85,
        ),
        Box::new(VerifyHotkey),
    );

    EventDispatch { goal, registry }
}

struct ResolveHotkey;

impl SkillHandler for ResolveHotkey {
    fn invoke(
        &self,
        step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let key_name = binding_str(step, "key_name")
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let Some(modifiers_value) = step
            .input_bindings
            .get("modifiers")
            .filter(|value| !is_unresolved_placeholder(value))
            .and_then(Value::as_array)
        else {
            return Ok(ActionResult::failure("invalid hotkey payload"));
        };
        if key_name.is_empty() || key_name == "esc" {
            return Ok(ActionResult::failure("invalid hotkey payload"));
        }
        let modifiers: Vec<String> = modifiers_value
            .iter()
            .filter_map(Value::as_str)
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        state
            .variables
            .insert("hotkey_key_name".to_string(), json!(key_name.clone()));
        state
            .variables
            .insert("hotkey_modifiers".to_string(), json!(modifiers.clone()));
        Ok(ActionResult::success("hotkey resolved")
            .with_signal("hotkey_resolved")
            .with_state_update("hotkey_key_name", json!(key_name.clone()))
            .with_state_update("hotkey_modifiers", json!(modifiers.clone()))
            .with_evidence("key_name", json!(key_name))
            .with_evidence("modifiers", json!(modifiers)))
    }
}

struct ApplyHotkey {
    input: Arc<dyn InputInjector>,
}

impl SkillHandler for ApplyHotkey {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        let key_name = state
            .variables
            .get("hotkey_key_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let Some(modifiers) = state
            .variables
            .get("hotkey_modifiers")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
        else {
            return Ok(ActionResult::failure("missing hotkey state"));
        };
        if key_name.is_empty() {
            return Ok(ActionResult::failure("missing hotkey state"));
        }

        // Hold modifiers around the key tap; release in reverse order.
        let mut pressed = Vec::new();
        for modifier in &modifiers {
            self.input.press_key(modifier)?;
            pressed.push(modifier.clone());
        }
        self.input.press_key(&key_name)?;
        self.input.release_key(&key_name)?;
        for modifier in pressed.iter().rev() {
            self.input.release_key(modifier)?;
        }

        Ok(ActionResult::success("hotkey applied")
            .with_signal("hotkey_applied")
            .with_state_update("hotkey_applied", json!(true))
            .with_evidence("key_name", json!(key_name))
            .with_evidence("modifiers_used", json!(pressed)))
    }
}

struct VerifyHotkey;

impl SkillHandler for VerifyHotkey {
    fn invoke(
        &self,
        _step: &AgentPlanStep,
        _goal: &AgentGoal,
        state: &mut AgentState,
        _observation: &Observation,
        _attempt: u32,
    ) -> Result<ActionResult> {
        if !variable_flag(state, "hotkey_applied") {
            return Ok(ActionResult::failure("hotkey was not applied"));
        }
        Ok(ActionResult::success("hotkey verified")
            .with_signal("hotkey_verified")
            .with_evidence(
                "key_name",
                state
                    .variables
                    .get("hotkey_key_name")
                    .cloned()
                    .unwrap_or(Value::Null),
            )
            .with_evidence(
                "modifiers",
                state
                    .variables
                    .get("hotkey_modifiers")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            ))
    }
}
