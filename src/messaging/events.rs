/// Detection events
///
/// Events are what the engine produces for consumers. They serialize to a
/// flat JSON record tagged by `type`; optional fields are omitted.
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::profile::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Damage moment, debounced per detector
    Hit,
    /// Health bar fill, every tick
    HealthPercent,
    /// Newly accepted numeric health value
    HealthValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Unix epoch milliseconds
    pub ts: u64,
    /// Detector variant that produced the event (`redness_rois`, ...)
    pub source_detector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl Event {
    fn base(kind: EventKind, ts: u64, source_detector: &str) -> Self {
        Self {
            kind,
            ts,
            source_detector: source_detector.to_string(),
            roi: None,
            intensity: None,
            direction: None,
            percent: None,
            value: None,
        }
    }

    pub fn hit(ts: u64, source_detector: &str, intensity: f32) -> Self {
        Self {
            intensity: Some(intensity.clamp(0.0, 1.0)),
            ..Self::base(EventKind::Hit, ts, source_detector)
        }
    }

    pub fn health_percent(ts: u64, source_detector: &str, percent: f32) -> Self {
        Self {
            percent: Some(percent),
            ..Self::base(EventKind::HealthPercent, ts, source_detector)
        }
    }

    pub fn health_value(ts: u64, source_detector: &str, value: i64) -> Self {
        Self {
            value: Some(value),
            ..Self::base(EventKind::HealthValue, ts, source_detector)
        }
    }

    pub fn with_roi(mut self, roi: impl Into<String>) -> Self {
        self.roi = Some(roi.into());
        self
    }

    pub fn with_direction(mut self, direction: Option<Direction>) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_percent(mut self, percent: Option<f32>) -> Self {
        self.percent = percent;
        self
    }

    pub fn with_value(mut self, value: Option<i64>) -> Self {
        self.value = value;
        self
    }

    pub fn is_hit(&self) -> bool {
        self.kind == EventKind::Hit
    }
}

/// Current wall-clock time in Unix epoch milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
