//! Platform capability seams.
//!
//! The traits here decouple replay from the actual screen and input stack
//! (template matching, pointer/keyboard injection, window metadata). Tests
//! use scripted implementations that return predetermined results without
//! touching a display. Every operation can fail for environmental reasons
//! (no screen, missing template file, no active window); callers treat those
//! failures as "no evidence" and degrade, they never abort a replay over
//! them.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::geometry::{Point, Rect};

/// Pointer button for click injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Lenient parse: recorded payloads occasionally carry odd casing or
    /// unknown names, which fall back to the left button.
    pub fn from_name(name: &str) -> MouseButton {
        match name.trim().to_lowercase().as_str() {
            "right" => MouseButton::Right,
            "middle" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// Title and bounds of a top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    pub rect: Rect,
}

/// Find all occurrences of a template image on screen.
pub trait TemplateMatcher {
    /// Return the center of every match of `template` at or above
    /// `confidence`, searched within `region` (or the whole screen when
    /// `None`). Implementations compare in grayscale.
    fn find_all(
        &self,
        template: &Path,
        region: Option<Rect>,
        confidence: f64,
    ) -> Result<Vec<Point>>;
}

/// Inject pointer and keyboard input.
pub trait InputInjector {
    fn move_pointer(&self, point: Point) -> Result<()>;

    fn click(&self, button: MouseButton, count: u32) -> Result<()>;

    fn scroll(&self, dx: i32, dy: i32) -> Result<()>;

    /// Press and hold a named key ("ctrl", "shift", "enter", "a", ...).
    fn press_key(&self, key: &str) -> Result<()>;

    fn release_key(&self, key: &str) -> Result<()>;
}

/// Look up metadata about the currently focused window.
pub trait WindowMetadata {
    /// `Ok(None)` when no window is focused or the desktop cannot say.
    fn active_window(&self) -> Result<Option<WindowInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_parse_is_lenient() {
        assert_eq!(MouseButton::from_name("Right"), MouseButton::Right);
        assert_eq!(MouseButton::from_name(" middle "), MouseButton::Middle);
        assert_eq!(MouseButton::from_name("left"), MouseButton::Left);
        assert_eq!(MouseButton::from_name("trackball"), MouseButton::Left);
    }
}
