//! Anchor-consensus resolution of recorded click targets.
//!
//! A recorded click carries a set of anchor templates: small screenshots
//! taken around the original click point, each with its offset and weight.
//! At replay time every surviving anchor is searched for on the live screen,
//! its matches are translated back into the click's frame, and the pure
//! consensus scoring in [`crate::core::consensus`] decides whether the
//! anchors agree well enough to click at all. Partial anchor sets and
//! malformed payload entries are tolerated; platform failures count as "no
//! match", never as errors.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::config::LocatorConfig;
use crate::core::consensus::{ClickProposal, dedupe_points, select_click_point};
use crate::core::geometry::{Point, Rect};
use crate::io::platform::{TemplateMatcher, WindowMetadata};

/// One anchor template captured by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTemplate {
    pub anchor_id: String,
    pub path: PathBuf,
    /// Offset of the anchor's center from the recorded click point.
    pub dx: i32,
    pub dy: i32,
    pub weight: f64,
}

/// Window the click was recorded in, as far as the payload knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWindow {
    pub title: Option<String>,
    pub rect: Rect,
}

/// Evidence available for one locate call.
#[derive(Debug, Clone, PartialEq)]
pub struct LocateRequest {
    /// The click point as originally recorded, when known.
    pub recorded_point: Option<Point>,
    pub recorded_window: Option<RecordedWindow>,
    pub anchors: Vec<AnchorTemplate>,
}

impl LocateRequest {
    /// Parse a recorded event payload. Returns `None` when the payload has
    /// no usable `smart_locator` block; individual malformed anchors are
    /// skipped rather than failing the whole request.
    pub fn from_payload(payload: &Map<String, Value>) -> Option<LocateRequest> {
        let anchors_raw = payload
            .get("smart_locator")?
            .as_object()?
            .get("anchors")?
            .as_array()?;

        let mut anchors = Vec::new();
        for (index, anchor) in anchors_raw.iter().enumerate() {
            let Some(anchor) = anchor.as_object() else {
                continue;
            };
            let Some(path) = anchor.get("path").and_then(Value::as_str).filter(|p| !p.is_empty())
            else {
                continue;
            };
            let (Some(dx), Some(dy)) = (
                anchor.get("dx").and_then(Value::as_i64),
                anchor.get("dy").and_then(Value::as_i64),
            ) else {
                continue;
            };
            let Some(weight) = anchor.get("weight").and_then(Value::as_f64) else {
                continue;
            };
            let anchor_id = anchor
                .get("anchor_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("a{index}"));
            anchors.push(AnchorTemplate {
                anchor_id,
                path: PathBuf::from(path),
                dx: dx as i32,
                dy: dy as i32,
                weight,
            });
        }

        Some(LocateRequest {
            recorded_point: point_from_payload(payload),
            recorded_window: window_from_payload(payload),
            anchors,
        })
    }
}

fn point_from_payload(payload: &Map<String, Value>) -> Option<Point> {
    let x = payload.get("x").and_then(Value::as_i64)?;
    let y = payload.get("y").and_then(Value::as_i64)?;
    Some(Point::new(x as i32, y as i32))
}

fn window_from_payload(payload: &Map<String, Value>) -> Option<RecordedWindow> {
    let context = payload.get("window_context")?.as_object()?;
    let left = context.get("left").and_then(Value::as_i64)?;
    let top = context.get("top").and_then(Value::as_i64)?;
    let width = context.get("width").and_then(Value::as_i64)?;
    let height = context.get("height").and_then(Value::as_i64)?;
    let rect = Rect::checked(left as i32, top as i32, width as i32, height as i32)?;
    let title = context
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| payload.get("window_title").and_then(Value::as_str))
        .map(str::to_string);
    Some(RecordedWindow { title, rect })
}

/// Case-insensitive substring containment, either direction.
fn titles_fuzzy_match(left: &str, right: &str) -> bool {
    let left = left.trim().to_lowercase();
    let right = right.trim().to_lowercase();
    if left.is_empty() || right.is_empty() {
        return false;
    }
    left.contains(&right) || right.contains(&left)
}

/// Resolves where a recorded click target currently lives on screen.
pub struct SmartLocator {
    matcher: Arc<dyn TemplateMatcher>,
    windows: Arc<dyn WindowMetadata>,
    config: LocatorConfig,
}

impl SmartLocator {
    pub fn new(
        matcher: Arc<dyn TemplateMatcher>,
        windows: Arc<dyn WindowMetadata>,
        config: LocatorConfig,
    ) -> Self {
        Self {
            matcher,
            windows,
            config,
        }
    }

    /// Resolve the current click point from anchor consensus, or refuse.
    #[instrument(skip_all, fields(anchors = request.anchors.len()))]
    pub fn resolve(&self, request: &LocateRequest) -> Option<Point> {
        let mut proposals = Vec::new();
        for anchor in &request.anchors {
            let centers = self.matched_centers(anchor, request);
            for center in centers {
                proposals.push(ClickProposal {
                    point: center.offset(-anchor.dx, -anchor.dy),
                    weight: anchor.weight,
                    anchor_id: anchor.anchor_id.clone(),
                });
            }
        }
        let selected = select_click_point(&proposals, request.recorded_point, &self.config);
        debug!(proposals = proposals.len(), resolved = ?selected, "consensus outcome");
        selected
    }

    /// Smart resolution with the recorded point as a last-ditch fallback.
    pub fn resolve_click_target(&self, payload: &Map<String, Value>) -> Option<Point> {
        if let Some(request) = LocateRequest::from_payload(payload) {
            if let Some(point) = self.resolve(&request) {
                return Some(point);
            }
        }
        point_from_payload(payload)
    }

    /// Search the anchor's regions in priority order and return the first
    /// region's deduplicated match centers.
    fn matched_centers(&self, anchor: &AnchorTemplate, request: &LocateRequest) -> Vec<Point> {
        for region in self.search_regions(anchor, request) {
            let centers = match self.matcher.find_all(
                &anchor.path,
                region,
                self.config.match_confidence,
            ) {
                Ok(centers) => centers,
                Err(err) => {
                    // Capture failures mean "no evidence here", not abort.
                    warn!(
                        anchor = %anchor.anchor_id,
                        error = %format!("{err:#}"),
                        "template match failed"
                    );
                    Vec::new()
                }
            };
            let centers = dedupe_points(&centers, self.config.match_dedup_tolerance_px);
            if !centers.is_empty() {
                return centers;
            }
        }
        Vec::new()
    }

    /// Priority order: square around the anchor's expected position, then
    /// the active window (only when its title fuzzy-matches the recorded
    /// one) or the recorded window rectangle, then the whole screen when no
    /// region is derivable at all.
    fn search_regions(&self, anchor: &AnchorTemplate, request: &LocateRequest) -> Vec<Option<Rect>> {
        let mut regions: Vec<Rect> = Vec::new();

        if let Some(reference) = request.recorded_point {
            let expected = reference.offset(anchor.dx, anchor.dy);
            if let Some(local) = Rect::around(expected, self.config.anchor_search_radius_px) {
                regions.push(local);
            }
        }

        if let Some(recorded) = &request.recorded_window {
            let active_rect = recorded.title.as_deref().and_then(|recorded_title| {
                match self.windows.active_window() {
                    Ok(Some(active)) if titles_fuzzy_match(&active.title, recorded_title) => {
                        Some(active.rect)
                    }
                    Ok(_) => None,
                    Err(err) => {
                        debug!(error = %format!("{err:#}"), "active window lookup failed");
                        None
                    }
                }
            });
            let window_rect = active_rect.unwrap_or(recorded.rect);
            if !regions.contains(&window_rect) {
                regions.push(window_rect);
            }
        }

        if regions.is_empty() {
            return vec![None];
        }
        regions.into_iter().map(Some).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedMatcher, StaticWindows, anchor_entry, click_payload};
    use serde_json::json;

    fn locator(matcher: ScriptedMatcher, windows: StaticWindows) -> SmartLocator {
        SmartLocator::new(
            Arc::new(matcher),
            Arc::new(windows),
            LocatorConfig::default(),
        )
    }

    #[test]
    fn resolves_consensus_from_two_agreeing_anchors() {
        let matcher = ScriptedMatcher::new()
            .with_hits("target.png", vec![Point::new(200, 150)])
            .with_hits("top.png", vec![Point::new(200, 120)]);
        let payload = click_payload(
            200,
            150,
            vec![
                anchor_entry("target", "target.png", 0, 0, 1.0),
                anchor_entry("top", "top.png", 0, -30, 0.65),
            ],
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        let resolved = locator(matcher, StaticWindows::none()).resolve(&request);
        assert_eq!(resolved, Some(Point::new(200, 150)));
    }

    #[test]
    fn expected_position_region_is_searched_first() {
        let matcher = Arc::new(
            ScriptedMatcher::new().with_hits("top.png", vec![Point::new(200, 120)]),
        );
        let mut payload = click_payload(200, 150, vec![anchor_entry("top", "top.png", 0, -30, 0.65)]);
        payload.insert(
            "window_context".to_string(),
            json!({"title": "Editor", "left": 0, "top": 0, "width": 800, "height": 600}),
        );
        let request = LocateRequest::from_payload(&payload).expect("request");

        let locator = SmartLocator::new(
            matcher.clone(),
            Arc::new(StaticWindows::none()),
            LocatorConfig::default(),
        );
        locator.resolve(&request);

        // The first search is the 170px square around the anchor's expected
        // position (200, 120); the hit there stops the sweep, so the window
        // rect is never searched.
        let calls = matcher.calls();
        assert_eq!(calls.len(), 1);
        let region = calls[0].region.expect("region");
        // Top edge clamps to the screen: 120 - 170 < 0.
        assert_eq!(
            region,
            Rect {
                left: 30,
                top: 0,
                width: 340,
                height: 340
            }
        );
        assert_eq!(calls[0].confidence, 0.9);
    }

    #[test]
    fn single_anchor_refuses_even_with_recorded_point() {
        let matcher = ScriptedMatcher::new().with_hits("target.png", vec![Point::new(200, 150)]);
        let payload = click_payload(200, 150, vec![anchor_entry("target", "target.png", 0, 0, 1.0)]);
        let request = LocateRequest::from_payload(&payload).expect("request");
        let resolved = locator(matcher, StaticWindows::none()).resolve(&request);
        assert_eq!(resolved, None);
    }

    #[test]
    fn matcher_errors_degrade_to_no_match() {
        let matcher = ScriptedMatcher::new()
            .with_failure("target.png")
            .with_hits("top.png", vec![Point::new(200, 120)]);
        let payload = click_payload(
            200,
            150,
            vec![
                anchor_entry("target", "target.png", 0, 0, 1.0),
                anchor_entry("top", "top.png", 0, -30, 0.65),
            ],
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        // Only one anchor produced evidence, so consensus refuses.
        let resolved = locator(matcher, StaticWindows::none()).resolve(&request);
        assert_eq!(resolved, None);
    }

    #[test]
    fn resolve_click_target_falls_back_to_recorded_point() {
        let matcher = ScriptedMatcher::new();
        let payload = click_payload(320, 240, vec![anchor_entry("target", "target.png", 0, 0, 1.0)]);
        let resolved = locator(matcher, StaticWindows::none()).resolve_click_target(&payload);
        assert_eq!(resolved, Some(Point::new(320, 240)));
    }

    #[test]
    fn malformed_anchor_entries_are_skipped() {
        let payload = click_payload(
            100,
            100,
            vec![
                json!({"path": "", "dx": 0, "dy": 0, "weight": 1.0}),
                json!({"path": "ok.png", "dx": "left", "dy": 0, "weight": 1.0}),
                json!("not an object"),
                anchor_entry("good", "good.png", 5, 5, 0.65),
            ],
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        assert_eq!(request.anchors.len(), 1);
        assert_eq!(request.anchors[0].anchor_id, "good");
    }

    #[test]
    fn missing_smart_locator_block_yields_no_request() {
        let mut payload = Map::new();
        payload.insert("x".to_string(), json!(10));
        payload.insert("y".to_string(), json!(20));
        assert_eq!(LocateRequest::from_payload(&payload), None);
    }

    #[test]
    fn anchor_id_defaults_to_positional_name() {
        let payload = click_payload(
            100,
            100,
            vec![json!({"path": "a.png", "dx": 0, "dy": 0, "weight": 1.0})],
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        assert_eq!(request.anchors[0].anchor_id, "a0");
    }

    #[test]
    fn fuzzy_title_match_is_substring_either_direction() {
        assert!(titles_fuzzy_match("Invoice Editor - v2", "invoice editor"));
        assert!(titles_fuzzy_match("editor", "Invoice Editor - v2"));
        assert!(!titles_fuzzy_match("Invoice Editor", "Browser"));
        assert!(!titles_fuzzy_match("", "Browser"));
    }

    #[test]
    fn window_tier_uses_active_rect_when_titles_match() {
        // No recorded point: the window tier is the only region source.
        let anchors = vec![
            anchor_entry("target", "target.png", 0, 0, 1.0),
            anchor_entry("left", "left.png", -30, 0, 0.65),
        ];
        let mut payload = click_payload(0, 0, anchors);
        payload.remove("x");
        payload.remove("y");
        payload.insert(
            "window_context".to_string(),
            json!({"title": "Invoice Editor", "left": 0, "top": 0, "width": 400, "height": 300}),
        );

        // Active window moved right; matches live inside its rect only.
        let matcher = ScriptedMatcher::new()
            .with_hits("target.png", vec![Point::new(700, 150)])
            .with_hits("left.png", vec![Point::new(670, 150)]);
        let windows = StaticWindows::with_active(
            "Invoice Editor - March",
            Rect::checked(500, 0, 400, 300).expect("rect"),
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        let resolved = locator(matcher, windows).resolve(&request);
        assert_eq!(resolved, Some(Point::new(700, 150)));
    }

    #[test]
    fn window_tier_falls_back_to_recorded_rect_on_title_mismatch() {
        let anchors = vec![
            anchor_entry("target", "target.png", 0, 0, 1.0),
            anchor_entry("left", "left.png", -30, 0, 0.65),
        ];
        let mut payload = click_payload(0, 0, anchors);
        payload.remove("x");
        payload.remove("y");
        payload.insert(
            "window_context".to_string(),
            json!({"title": "Invoice Editor", "left": 0, "top": 0, "width": 400, "height": 300}),
        );

        let matcher = ScriptedMatcher::new()
            .with_hits("target.png", vec![Point::new(200, 150)])
            .with_hits("left.png", vec![Point::new(170, 150)]);
        // Unrelated window is focused; its rect must not be searched.
        let windows = StaticWindows::with_active(
            "Browser",
            Rect::checked(500, 0, 400, 300).expect("rect"),
        );
        let request = LocateRequest::from_payload(&payload).expect("request");
        let resolved = locator(matcher, windows).resolve(&request);
        assert_eq!(resolved, Some(Point::new(200, 150)));
    }

    #[test]
    fn window_lookup_failure_degrades_to_recorded_rect() {
        let anchors = vec![
            anchor_entry("target", "target.png", 0, 0, 1.0),
            anchor_entry("left", "left.png", -30, 0, 0.65),
        ];
        let mut payload = click_payload(0, 0, anchors);
        payload.remove("x");
        payload.remove("y");
        payload.insert(
            "window_context".to_string(),
            json!({"title": "Invoice Editor", "left": 0, "top": 0, "width": 400, "height": 300}),
        );

        let matcher = ScriptedMatcher::new()
            .with_hits("target.png", vec![Point::new(200, 150)])
            .with_hits("left.png", vec![Point::new(170, 150)]);
        let request = LocateRequest::from_payload(&payload).expect("request");
        let resolved = locator(matcher, StaticWindows::failing()).resolve(&request);
        assert_eq!(resolved, Some(Point::new(200, 150)));
    }
}
