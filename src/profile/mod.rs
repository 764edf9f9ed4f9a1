/// Profile documents
///
/// A profile is the declarative description of what to watch: one detector
/// variant plus the capture cadence. Profiles are exported verbatim as JSON,
/// so serialization must be deterministic (ordered maps, omitted `None`s).
pub mod detector;
pub mod roi;

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

pub use detector::{
    DetectorConfig, FallbackMode, HealthBarConfig, HealthBarMode, HealthNumberConfig,
    PercentDrop, Readout, RednessConfig, Rgb, ValueDrop,
};
pub use roi::{Direction, NormalizedRect, PixelRect, Roi};

pub const MIN_TICK_MS: u64 = 10;

fn default_monitor_index() -> u32 {
    1
}

fn default_tick_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// 1-based monitor index, matching the numbering users see
    #[serde(default = "default_monitor_index")]
    pub monitor_index: u32,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            monitor_index: default_monitor_index(),
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ProfileMeta>,
    pub name: String,
    #[serde(default)]
    pub capture: CaptureSettings,
    pub detector: DetectorConfig,
}

impl Profile {
    pub fn new(name: impl Into<String>, capture: CaptureSettings, detector: DetectorConfig) -> Self {
        Self {
            meta: None,
            name: name.into(),
            capture,
            detector,
        }
    }

    /// Parse a profile document
    ///
    /// Only checks the document shape; call `validate` before running it.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        serde_json::from_str(json).map_err(ProfileError::Parse)
    }

    /// Export the profile document
    pub fn to_json(&self) -> Result<String, ProfileError> {
        serde_json::to_string_pretty(self).map_err(ProfileError::Parse)
    }

    /// Identifier reported by `status()`: the preset id when the profile came
    /// from a preset, its name otherwise
    pub fn profile_id(&self) -> &str {
        self.meta
            .as_ref()
            .and_then(|meta| meta.preset_id.as_deref())
            .unwrap_or(&self.name)
    }

    /// Full schema validation
    ///
    /// Reports `TemplateMismatch` for health-number bitstrings whose length
    /// disagrees with the template dimensions, `Invalid` for everything else.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::Invalid("name must not be empty".into()));
        }
        if self.capture.monitor_index < 1 {
            return Err(ProfileError::Invalid("capture.monitor_index must be >= 1".into()));
        }
        if self.capture.tick_ms < MIN_TICK_MS {
            return Err(ProfileError::Invalid(format!(
                "capture.tick_ms must be >= {MIN_TICK_MS}, got {}",
                self.capture.tick_ms
            )));
        }
        self.detector.validate()
    }
}
