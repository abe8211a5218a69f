//! Replayer configuration (TOML).
//!
//! The consensus thresholds are empirical constants carried over from the
//! recorder's field tuning. They are exposed as named, human-editable fields
//! rather than embedded literals so deployments can retune them without a
//! rebuild. Missing fields default to the tuned values.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Top-level configuration for locator and replay behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayerConfig {
    pub locator: LocatorConfig,
    pub replay: ReplayConfig,
}

/// Tunables for the anchor-consensus locator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    /// Minimum template-match confidence passed to the matcher.
    pub match_confidence: f64,

    /// Match centers closer than this are treated as one hit.
    pub match_dedup_tolerance_px: i32,

    /// Radius of the square searched around an anchor's expected position.
    pub anchor_search_radius_px: i32,

    /// Click proposals join an existing cluster within this radius.
    pub cluster_tolerance_px: i32,

    /// Distance at which the expected-position penalty saturates.
    pub distance_penalty_divisor_px: f64,

    /// Penalty applied to a cluster at (or beyond) the saturation distance.
    pub distance_penalty_max: f64,

    /// Minimum consensus score a cluster must reach to be accepted.
    pub min_score: f64,

    /// Minimum lead over the runner-up cluster; closer races are refused.
    pub min_margin: f64,
}

/// Tunables for replay pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Speed factors above this are capped.
    pub max_speed_factor: f64,

    /// Pause between retry attempts within one step. Zero disables backoff.
    pub retry_backoff_ms: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            match_confidence: 0.9,
            match_dedup_tolerance_px: 8,
            anchor_search_radius_px: 170,
            cluster_tolerance_px: 14,
            distance_penalty_divisor_px: 220.0,
            distance_penalty_max: 0.35,
            min_score: 1.15,
            min_margin: 0.16,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_speed_factor: 10.0,
            retry_backoff_ms: 0,
        }
    }
}

impl Default for ReplayerConfig {
    fn default() -> Self {
        Self {
            locator: LocatorConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl ReplayerConfig {
    pub fn validate(&self) -> Result<()> {
        let locator = &self.locator;
        if !(0.0..=1.0).contains(&locator.match_confidence) {
            return Err(anyhow!("locator.match_confidence must be within [0, 1]"));
        }
        if locator.match_dedup_tolerance_px < 0 || locator.cluster_tolerance_px < 0 {
            return Err(anyhow!("locator tolerances must be >= 0"));
        }
        if locator.anchor_search_radius_px <= 0 {
            return Err(anyhow!("locator.anchor_search_radius_px must be > 0"));
        }
        if locator.distance_penalty_divisor_px <= 0.0 {
            return Err(anyhow!("locator.distance_penalty_divisor_px must be > 0"));
        }
        if locator.distance_penalty_max < 0.0 {
            return Err(anyhow!("locator.distance_penalty_max must be >= 0"));
        }
        if locator.min_score <= 0.0 {
            return Err(anyhow!("locator.min_score must be > 0"));
        }
        if locator.min_margin < 0.0 {
            return Err(anyhow!("locator.min_margin must be >= 0"));
        }
        if self.replay.max_speed_factor <= 0.0 {
            return Err(anyhow!("replay.max_speed_factor must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReplayerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReplayerConfig> {
    if !path.exists() {
        let cfg = ReplayerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReplayerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ReplayerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
