use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppResult;

const APP_DIR: &str = "ScreenHealth";
const DEFAULT_DEBUG_DIR: &str = "screen_health_debug";

pub const ENV_DEBUG: &str = "SCREEN_HEALTH_DEBUG";
pub const ENV_DEBUG_SAVE: &str = "SCREEN_HEALTH_DEBUG_SAVE";
pub const ENV_DEBUG_DIR: &str = "SCREEN_HEALTH_DEBUG_DIR";
pub const ENV_DEBUG_EVERY_N: &str = "SCREEN_HEALTH_DEBUG_EVERY_N";

fn default_red_min() -> u8 {
    150
}

fn default_dominance_ratio() -> f32 {
    1.6
}

fn default_lock_timeout_ms() -> u64 {
    250
}

fn default_log_every_n_ticks() -> u32 {
    20
}

/// Per-pixel redness classification constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RednessSettings {
    /// Minimum red channel for a pixel to count as red
    #[serde(default = "default_red_min")]
    pub red_min: u8,
    /// Red must be at least this multiple of max(G, B)
    #[serde(default = "default_dominance_ratio")]
    pub dominance_ratio: f32,
}

impl Default for RednessSettings {
    fn default() -> Self {
        Self {
            red_min: default_red_min(),
            dominance_ratio: default_dominance_ratio(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTuning {
    /// Capture bound per tick; `None` uses the tick interval
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CaptureTuning {
    pub fn bound(&self, tick_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(tick_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// How long calibration waits for the shared capture source
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSettings {
    /// Log per-detector values every `log_every_n_ticks` ticks
    #[serde(default)]
    pub log_values: bool,
    #[serde(default = "default_log_every_n_ticks")]
    pub log_every_n_ticks: u32,
    /// Save ROI crops as PNG (one per detector plus every forwarded hit)
    #[serde(default)]
    pub save_roi_images: bool,
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            log_values: false,
            log_every_n_ticks: default_log_every_n_ticks(),
            save_roi_images: false,
            save_dir: None,
        }
    }
}

impl DebugSettings {
    pub fn is_enabled(&self) -> bool {
        self.log_values || self.save_roi_images
    }

    /// Directory crops are written to when saving is on
    pub fn effective_save_dir(&self) -> Option<PathBuf> {
        if !self.save_roi_images {
            return None;
        }
        Some(
            self.save_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEBUG_DIR)),
        )
    }
}

/// Engine settings shared by every profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redness: RednessSettings,
    #[serde(default)]
    pub capture: CaptureTuning,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(default)]
    pub debug: DebugSettings,
}

impl Settings {
    /// Load settings from the platform config directory
    ///
    /// Creates the file with defaults when it does not exist yet. Environment
    /// overrides are applied on top and never written back.
    pub fn load() -> AppResult<Self> {
        let path = Self::settings_path()?;
        let mut settings = if path.exists() {
            let settings = Self::load_from(&path)?;
            info!("Loaded settings from: {}", path.display());
            settings
        } else {
            let settings = Settings::default();
            settings.save_to(&path)?;
            info!("Created default settings at: {}", path.display());
            settings
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn settings_path() -> AppResult<PathBuf> {
        Ok(app_dir()?.join("settings.json"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply debug overrides from `lookup`
    ///
    /// Flags only switch features on; an unparsable cadence is ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if lookup(ENV_DEBUG).is_some_and(|v| is_truthy(&v)) {
            self.debug.log_values = true;
        }
        if lookup(ENV_DEBUG_SAVE).is_some_and(|v| is_truthy(&v)) {
            self.debug.save_roi_images = true;
        }
        if let Some(raw) = lookup(ENV_DEBUG_EVERY_N) {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.debug.log_every_n_ticks = n.max(1),
                Err(_) => warn!("Ignoring {}={:?}: not a number", ENV_DEBUG_EVERY_N, raw),
            }
        }
        if let Some(dir) = lookup(ENV_DEBUG_DIR).filter(|d| !d.trim().is_empty()) {
            self.debug.save_dir = Some(PathBuf::from(dir));
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `<config_dir>/ScreenHealth`
pub fn app_dir() -> AppResult<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Unable to locate config directory"))?;
    Ok(base.join(APP_DIR))
}

pub fn logs_dir() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("logs"))
}
