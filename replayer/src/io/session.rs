//! Teach session input and diagnostics output.
//!
//! The read path consumes the recorder's JSON export format; this crate
//! never writes session storage. The write path persists replay diagnostics
//! reports for the reporting layer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recorder lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeachSessionStatus {
    Recording,
    Finished,
}

/// Everything the recorder can capture. Only `mouse_click`, `mouse_scroll`,
/// `key_press`, and `hotkey` are replayable; the rest pass through replay as
/// skipped events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeachEventKind {
    OpenUrl,
    Click,
    Fill,
    WaitFor,
    MouseClick,
    MouseScroll,
    KeyPress,
    Hotkey,
    ClipboardCopy,
    ClipboardPaste,
    WindowSwitch,
    Checkpoint,
}

/// One captured input event, consumed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachEvent {
    pub event_id: String,
    pub event_type: TeachEventKind,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub sensitive: bool,
    pub timestamp: DateTime<Utc>,
}

/// A recorded session as exported by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachSession {
    pub session_id: String,
    pub name: String,
    pub status: TeachSessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<TeachEvent>,
}

/// Load a session from the recorder's JSON export.
pub fn load_session(path: &Path) -> Result<TeachSession> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let session: TeachSession =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(session)
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Default diagnostics report path for a session under `artifacts_dir`.
pub fn default_diagnostics_path(artifacts_dir: &Path, session_id: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    artifacts_dir.join(format!("replay_diagnostics_{session_id}_{stamp}.json"))
}
