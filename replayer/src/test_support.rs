//! Test-only helpers: deterministic constructors and scripted platform
//! fakes. Nothing here touches a real screen or input device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};

use crate::core::geometry::{Point, Rect};
use crate::core::plan::{AgentPlan, AgentPlanStep};
use crate::core::skill::SkillDescriptor;
use crate::io::platform::{InputInjector, MouseButton, TemplateMatcher, WindowInfo, WindowMetadata};

/// Create a descriptor with default fields supporting a single intent.
pub fn descriptor(skill_id: &str, intent: &str) -> SkillDescriptor {
    SkillDescriptor {
        skill_id: skill_id.to_string(),
        name: skill_id.to_string(),
        supported_intents: vec![intent.to_string()],
        required_inputs: Vec::new(),
        default_success_signals: Vec::new(),
        reliability_score: 0.8,
    }
}

/// Create a plan step with no bindings, signals, or fallbacks.
pub fn step(step_id: &str, intent: &str, skill_id: &str) -> AgentPlanStep {
    AgentPlanStep {
        step_id: step_id.to_string(),
        intent: intent.to_string(),
        skill_id: skill_id.to_string(),
        description: format!("{skill_id} ({intent})"),
        input_bindings: Default::default(),
        expected_signals: Vec::new(),
        fallback_skill_ids: Vec::new(),
        max_attempts: 1,
    }
}

/// Wrap steps into a plan with fixed ids.
pub fn plan_with_steps(steps: Vec<AgentPlanStep>) -> AgentPlan {
    AgentPlan {
        plan_id: "plan-test".to_string(),
        goal_id: "g1".to_string(),
        steps,
        metadata: Default::default(),
    }
}

/// One recorded call against [`ScriptedMatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCall {
    pub template: PathBuf,
    pub region: Option<Rect>,
    pub confidence: f64,
}

/// Template matcher scripted with per-template hit points.
///
/// Hits outside the searched region are not returned, which makes region
/// priority observable from tests. `fail_templates` simulates capture
/// failures for specific templates.
#[derive(Default)]
pub struct ScriptedMatcher {
    hits: HashMap<PathBuf, Vec<Point>>,
    fail_templates: Vec<PathBuf>,
    calls: Mutex<Vec<MatchCall>>,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, template: impl Into<PathBuf>, points: Vec<Point>) -> Self {
        self.hits.insert(template.into(), points);
        self
    }

    pub fn with_failure(mut self, template: impl Into<PathBuf>) -> Self {
        self.fail_templates.push(template.into());
        self
    }

    pub fn calls(&self) -> Vec<MatchCall> {
        self.calls.lock().expect("matcher calls lock").clone()
    }
}

fn contains(region: Rect, point: Point) -> bool {
    point.x >= region.left
        && point.x < region.left + region.width
        && point.y >= region.top
        && point.y < region.top + region.height
}

impl TemplateMatcher for ScriptedMatcher {
    fn find_all(
        &self,
        template: &Path,
        region: Option<Rect>,
        confidence: f64,
    ) -> Result<Vec<Point>> {
        self.calls.lock().expect("matcher calls lock").push(MatchCall {
            template: template.to_path_buf(),
            region,
            confidence,
        });
        if self.fail_templates.iter().any(|path| path == template) {
            return Err(anyhow!("capture failed for {}", template.display()));
        }
        let hits = self.hits.get(template).cloned().unwrap_or_default();
        Ok(match region {
            Some(region) => hits
                .into_iter()
                .filter(|point| contains(region, *point))
                .collect(),
            None => hits,
        })
    }
}

/// Everything an [`RecordingInjector`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedAction {
    MovePointer(Point),
    Click(MouseButton, u32),
    Scroll(i32, i32),
    PressKey(String),
    ReleaseKey(String),
}

/// Input injector that records actions instead of performing them.
#[derive(Default)]
pub struct RecordingInjector {
    actions: Mutex<Vec<InjectedAction>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<InjectedAction> {
        self.actions.lock().expect("injector actions lock").clone()
    }

    fn record(&self, action: InjectedAction) {
        self.actions.lock().expect("injector actions lock").push(action);
    }
}

impl InputInjector for RecordingInjector {
    fn move_pointer(&self, point: Point) -> Result<()> {
        self.record(InjectedAction::MovePointer(point));
        Ok(())
    }

    fn click(&self, button: MouseButton, count: u32) -> Result<()> {
        self.record(InjectedAction::Click(button, count));
        Ok(())
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.record(InjectedAction::Scroll(dx, dy));
        Ok(())
    }

    fn press_key(&self, key: &str) -> Result<()> {
        self.record(InjectedAction::PressKey(key.to_string()));
        Ok(())
    }

    fn release_key(&self, key: &str) -> Result<()> {
        self.record(InjectedAction::ReleaseKey(key.to_string()));
        Ok(())
    }
}

/// Window lookup scripted with a fixed answer.
#[derive(Default)]
pub struct StaticWindows {
    active: Option<WindowInfo>,
    fail: bool,
}

impl StaticWindows {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_active(title: &str, rect: Rect) -> Self {
        Self {
            active: Some(WindowInfo {
                title: title.to_string(),
                rect,
            }),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            active: None,
            fail: true,
        }
    }
}

impl WindowMetadata for StaticWindows {
    fn active_window(&self) -> Result<Option<WindowInfo>> {
        if self.fail {
            return Err(anyhow!("window metadata unavailable"));
        }
        Ok(self.active.clone())
    }
}

/// Payload for a recorded mouse click with smart-locator anchors.
pub fn click_payload(x: i32, y: i32, anchors: Vec<Value>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("x".to_string(), json!(x));
    payload.insert("y".to_string(), json!(y));
    payload.insert("button".to_string(), json!("left"));
    payload.insert(
        "smart_locator".to_string(),
        json!({"version": 1, "anchors": anchors}),
    );
    payload
}

/// One anchor entry for [`click_payload`].
pub fn anchor_entry(anchor_id: &str, path: &str, dx: i32, dy: i32, weight: f64) -> Value {
    json!({
        "anchor_id": anchor_id,
        "path": path,
        "dx": dx,
        "dy": dy,
        "weight": weight,
    })
}
