//! Timed replay of a recorded session.
//!
//! The scheduler walks events in timestamp order, reproduces the original
//! inter-event gaps under a speed factor, and turns each replayable event
//! into one planner + runtime execution over a fresh skill set. Replay is
//! best-effort across events: one event's failure is recorded and the
//! sequence continues. Cancellation is cooperative; it stops the run before
//! the next event or repeat loop, never mid-action.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::cancel::{CancelToken, sleep_with_cancel};
use crate::config::ReplayerConfig;
use crate::core::goal::AgentState;
use crate::core::planner::GoalPlanner;
use crate::dispatch::{ReplayDeps, dispatch_for_event};
use crate::io::platform::{InputInjector, TemplateMatcher, WindowMetadata};
use crate::io::session::{TeachEvent, TeachSession, default_diagnostics_path, write_json};
use crate::locator::SmartLocator;
use crate::runtime::{AgentRunSummary, AgentRuntime};

/// Options for one replay invocation.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Timing multiplier; non-positive values fall back to 1.0 and values
    /// above the configured cap are clamped.
    pub speed_factor: f64,
    /// How many times to run the whole sequence. Zero means one pass.
    pub repeat_count: u32,
    /// Persist the diagnostics report even without an explicit path.
    pub save_diagnostics: bool,
    /// Explicit report path; implies persistence.
    pub diagnostics_path: Option<PathBuf>,
    /// Directory for default-named reports.
    pub artifacts_dir: PathBuf,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            repeat_count: 1,
            save_diagnostics: false,
            diagnostics_path: None,
            artifacts_dir: PathBuf::from("artifacts"),
        }
    }
}

/// Outcome of one event within a replay.
#[derive(Debug, Clone, Serialize)]
pub struct EventDiagnostic {
    pub event_id: String,
    pub event_type: String,
    pub applied: bool,
    pub reason: String,
    pub details: Map<String, Value>,
}

/// Aggregated result of a replay invocation.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub session_id: String,
    pub replayed_events: usize,
    pub skipped_events: usize,
    pub speed_factor: f64,
    pub stopped_by_user: bool,
    pub loops_completed: u32,
    pub diagnostics: Vec<EventDiagnostic>,
    pub diagnostics_file: Option<PathBuf>,
}

/// Drives recorded events through the agent runtime with original timing.
pub struct ReplayScheduler {
    deps: ReplayDeps,
    config: ReplayerConfig,
    cancel: CancelToken,
}

impl ReplayScheduler {
    pub fn new(
        input: Arc<dyn InputInjector>,
        matcher: Arc<dyn TemplateMatcher>,
        windows: Arc<dyn WindowMetadata>,
        config: ReplayerConfig,
    ) -> Self {
        let locator = Arc::new(SmartLocator::new(matcher, windows, config.locator.clone()));
        Self {
            deps: ReplayDeps { input, locator },
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token an external listener (typically an escape-key watcher thread)
    /// sets to stop the replay.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replay a session's events, honoring speed factor, repeats, and
    /// cancellation. Events are re-sorted by timestamp defensively; the
    /// recorder already stores them in order.
    #[instrument(skip_all, fields(session_id = %session.session_id, events = session.events.len()))]
    pub fn replay_session(
        &self,
        session: &TeachSession,
        options: &ReplayOptions,
    ) -> Result<ReplaySummary> {
        let mut events = session.events.clone();
        events.sort_by_key(|event| event.timestamp);

        let speed = self.normalize_speed(options.speed_factor);
        let repeats = options.repeat_count.max(1);

        let mut summary = ReplaySummary {
            session_id: session.session_id.clone(),
            replayed_events: 0,
            skipped_events: 0,
            speed_factor: speed,
            stopped_by_user: false,
            loops_completed: 0,
            diagnostics: Vec::new(),
            diagnostics_file: None,
        };

        if events.is_empty() {
            return self.finish(summary, options);
        }

        let first_time = event_time_ms(&events[0]);
        'loops: for loop_index in 0..repeats {
            if self.cancel.is_cancelled() {
                break;
            }
            info!(loop_index, "starting replay pass");
            let mut previous_time = first_time;
            for event in &events {
                if self.cancel.is_cancelled() {
                    break 'loops;
                }
                let current_time = event_time_ms(event);
                let delta_ms = (current_time - previous_time).max(0);
                if delta_ms > 0 {
                    let wait = Duration::from_secs_f64(delta_ms as f64 / 1000.0 / speed);
                    if !sleep_with_cancel(wait, &self.cancel) {
                        break 'loops;
                    }
                }
                previous_time = current_time;

                let diagnostic = self.apply_event(event)?;
                if diagnostic.applied {
                    summary.replayed_events += 1;
                } else {
                    summary.skipped_events += 1;
                }
                summary.diagnostics.push(diagnostic);
            }
            summary.loops_completed += 1;
        }

        summary.stopped_by_user = self.cancel.is_cancelled();
        self.finish(summary, options)
    }

    /// Run one event through plan → runtime, or record why it was skipped.
    ///
    /// A planning error is a configuration bug (a factory registered a skill
    /// set that cannot cover its own intents); it aborts the whole replay
    /// rather than being swallowed per event.
    fn apply_event(&self, event: &TeachEvent) -> Result<EventDiagnostic> {
        let event_type = event_type_name(event);
        let Some(dispatch) = dispatch_for_event(event, &self.deps) else {
            return Ok(EventDiagnostic {
                event_id: event.event_id.clone(),
                event_type,
                applied: false,
                reason: "unsupported_event_type".to_string(),
                details: Map::new(),
            });
        };

        let planner = GoalPlanner::new(&dispatch.registry);
        let plan = planner
            .build_plan(&dispatch.goal, &AgentState::new())
            .with_context(|| format!("plan event {}", event.event_id))?;

        let runtime = AgentRuntime::new(&dispatch.registry).with_retry_backoff(
            Duration::from_millis(self.config.replay.retry_backoff_ms),
            self.cancel.clone(),
        );
        let run = runtime.run(&dispatch.goal, &plan, AgentState::new());
        log_run(event, &run);

        if run.completed {
            let mut details = Map::new();
            details.insert("traces".to_string(), json!(run.traces.len()));
            return Ok(EventDiagnostic {
                event_id: event.event_id.clone(),
                event_type,
                applied: true,
                reason: "agent_completed".to_string(),
                details,
            });
        }

        let last_trace_message = run
            .traces
            .last()
            .map(|trace| trace.message.clone())
            .unwrap_or_default();
        let mut details = Map::new();
        details.insert("failed_step_id".to_string(), json!(run.failed_step_id));
        details.insert("completed_steps".to_string(), json!(run.completed_steps));
        details.insert("trace_count".to_string(), json!(run.traces.len()));
        details.insert(
            "last_trace_message".to_string(),
            json!(last_trace_message),
        );
        Ok(EventDiagnostic {
            event_id: event.event_id.clone(),
            event_type,
            applied: false,
            reason: "agent_failed".to_string(),
            details,
        })
    }

    fn normalize_speed(&self, value: f64) -> f64 {
        if !value.is_finite() || value <= 0.0 {
            return 1.0;
        }
        value.min(self.config.replay.max_speed_factor)
    }

    fn finish(&self, mut summary: ReplaySummary, options: &ReplayOptions) -> Result<ReplaySummary> {
        info!(
            replayed = summary.replayed_events,
            skipped = summary.skipped_events,
            loops = summary.loops_completed,
            stopped = summary.stopped_by_user,
            "replay finished"
        );
        if options.save_diagnostics || options.diagnostics_path.is_some() {
            let path = options.diagnostics_path.clone().unwrap_or_else(|| {
                default_diagnostics_path(&options.artifacts_dir, &summary.session_id)
            });
            write_json(&path, &summary).context("persist replay diagnostics")?;
            summary.diagnostics_file = Some(path);
        }
        Ok(summary)
    }
}

/// Event offset in milliseconds: an explicit recorded offset wins, else the
/// absolute timestamp (deltas against the first event cancel the epoch out).
fn event_time_ms(event: &TeachEvent) -> i64 {
    if let Some(t_ms) = event.payload.get("t_ms").and_then(Value::as_i64) {
        return t_ms.max(0);
    }
    event.timestamp.timestamp_millis()
}

fn event_type_name(event: &TeachEvent) -> String {
    serde_json::to_value(event.event_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", event.event_type))
}

fn log_run(event: &TeachEvent, run: &AgentRunSummary) {
    if run.completed {
        info!(
            event_id = %event.event_id,
            traces = run.traces.len(),
            "replay agent completed"
        );
    } else {
        warn!(
            event_id = %event.event_id,
            failed_step = ?run.failed_step_id,
            traces = run.traces.len(),
            "replay agent failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::session::TeachEventKind;
    use crate::test_support::{RecordingInjector, ScriptedMatcher, StaticWindows};
    use chrono::{TimeZone, Utc};

    fn scheduler() -> ReplayScheduler {
        ReplayScheduler::new(
            Arc::new(RecordingInjector::new()),
            Arc::new(ScriptedMatcher::new()),
            Arc::new(StaticWindows::none()),
            ReplayerConfig::default(),
        )
    }

    fn key_event(event_id: &str, key: &str, t_ms: i64) -> TeachEvent {
        let mut payload = Map::new();
        payload.insert("key".to_string(), json!(key));
        payload.insert("t_ms".to_string(), json!(t_ms));
        TeachEvent {
            event_id: event_id.to_string(),
            event_type: TeachEventKind::KeyPress,
            payload,
            sensitive: false,
            timestamp: Utc
                .timestamp_millis_opt(1_767_258_000_000 + t_ms)
                .single()
                .expect("timestamp"),
        }
    }

    fn session(events: Vec<TeachEvent>) -> TeachSession {
        TeachSession {
            session_id: "sess-1".to_string(),
            name: "demo".to_string(),
            status: crate::io::session::TeachSessionStatus::Finished,
            started_at: Utc
                .timestamp_millis_opt(1_767_258_000_000)
                .single()
                .expect("timestamp"),
            finished_at: None,
            events,
        }
    }

    #[test]
    fn speed_factor_normalizes_and_caps() {
        let scheduler = scheduler();
        assert_eq!(scheduler.normalize_speed(1.5), 1.5);
        assert_eq!(scheduler.normalize_speed(0.0), 1.0);
        assert_eq!(scheduler.normalize_speed(-2.0), 1.0);
        assert_eq!(scheduler.normalize_speed(f64::NAN), 1.0);
        assert_eq!(scheduler.normalize_speed(99.0), 10.0);
    }

    #[test]
    fn event_time_prefers_recorded_offset() {
        let event = key_event("e1", "enter", 1234);
        assert_eq!(event_time_ms(&event), 1234);

        let mut event = key_event("e2", "enter", 0);
        event.payload.remove("t_ms");
        assert_eq!(event_time_ms(&event), event.timestamp.timestamp_millis());
    }

    #[test]
    fn negative_recorded_offsets_clamp_to_zero() {
        let event = key_event("e1", "enter", -50);
        assert_eq!(event_time_ms(&event), 0);
    }

    #[test]
    fn empty_session_yields_empty_summary() {
        let summary = scheduler()
            .replay_session(&session(Vec::new()), &ReplayOptions::default())
            .expect("replay");
        assert_eq!(summary.replayed_events, 0);
        assert_eq!(summary.skipped_events, 0);
        assert_eq!(summary.loops_completed, 0);
        assert!(!summary.stopped_by_user);
    }

    #[test]
    fn unsupported_events_are_skipped_with_reason() {
        let mut event = key_event("e1", "enter", 0);
        event.event_type = TeachEventKind::ClipboardCopy;
        let summary = scheduler()
            .replay_session(&session(vec![event]), &ReplayOptions::default())
            .expect("replay");
        assert_eq!(summary.skipped_events, 1);
        assert_eq!(summary.diagnostics[0].reason, "unsupported_event_type");
        assert_eq!(summary.diagnostics[0].event_type, "clipboard_copy");
    }

    #[test]
    fn failed_events_carry_failure_details() {
        // The escape key is refused at locate, so the agent fails.
        let summary = scheduler()
            .replay_session(&session(vec![key_event("e1", "esc", 0)]), &ReplayOptions::default())
            .expect("replay");
        assert_eq!(summary.skipped_events, 1);
        let diagnostic = &summary.diagnostics[0];
        assert_eq!(diagnostic.reason, "agent_failed");
        assert_eq!(diagnostic.details["failed_step_id"], json!("s01"));
        assert_eq!(diagnostic.details["completed_steps"], json!(0));
    }

    #[test]
    fn repeat_count_runs_the_sequence_again() {
        let summary = scheduler()
            .replay_session(
                &session(vec![key_event("e1", "enter", 0), key_event("e2", "a", 10)]),
                &ReplayOptions {
                    repeat_count: 2,
                    ..ReplayOptions::default()
                },
            )
            .expect("replay");
        assert_eq!(summary.replayed_events, 4);
        assert_eq!(summary.loops_completed, 2);
    }

    #[test]
    fn repeat_count_zero_still_runs_one_pass() {
        let summary = scheduler()
            .replay_session(
                &session(vec![key_event("e1", "enter", 0)]),
                &ReplayOptions {
                    repeat_count: 0,
                    ..ReplayOptions::default()
                },
            )
            .expect("replay");
        assert_eq!(summary.replayed_events, 1);
        assert_eq!(summary.loops_completed, 1);
    }

    #[test]
    fn pre_cancelled_token_stops_before_any_event() {
        let scheduler = scheduler();
        scheduler.cancel_token().cancel();
        let summary = scheduler
            .replay_session(
                &session(vec![key_event("e1", "enter", 0)]),
                &ReplayOptions::default(),
            )
            .expect("replay");
        assert_eq!(summary.replayed_events, 0);
        assert!(summary.stopped_by_user);
        assert_eq!(summary.loops_completed, 0);
    }

    #[test]
    fn diagnostics_report_is_persisted_on_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.json");
        let summary = scheduler()
            .replay_session(
                &session(vec![key_event("e1", "enter", 0)]),
                &ReplayOptions {
                    diagnostics_path: Some(path.clone()),
                    ..ReplayOptions::default()
                },
            )
            .expect("replay");
        assert_eq!(summary.diagnostics_file, Some(path.clone()));
        let contents = std::fs::read_to_string(&path).expect("read report");
        assert!(contents.contains("\"agent_completed\""));
        assert!(contents.contains("sess-1"));
    }

    #[test]
    fn default_report_lands_in_artifacts_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let summary = scheduler()
            .replay_session(
                &session(vec![key_event("e1", "enter", 0)]),
                &ReplayOptions {
                    save_diagnostics: true,
                    artifacts_dir: temp.path().to_path_buf(),
                    ..ReplayOptions::default()
                },
            )
            .expect("replay");
        let path = summary.diagnostics_file.expect("report path");
        assert!(path.starts_with(temp.path()));
        assert!(path.exists());
    }
}
