/// Runtime detector dispatch
///
/// `ActiveDetector` is the stateful counterpart of `DetectorConfig`: one
/// variant per detector type, evaluated once per tick on the crops of the
/// profile's ROIs.
use image::RgbaImage;
use serde::Serialize;

use super::health_bar::HealthBarDetector;
use super::health_number::HealthNumberDetector;
use super::redness::RednessDetector;
use crate::config::Settings;
use crate::ocr::templates::DigitTemplates;
use crate::profile::{DetectorConfig, Direction, Roi};

/// Per-tick measurement of a detector
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    Redness {
        intensity: f32,
        /// Strongest ROI, first declared on ties
        roi: Option<String>,
        direction: Option<Direction>,
        /// One score per ROI, in declared order
        scores: Vec<f32>,
    },
    HealthBar {
        percent: Option<f32>,
    },
    HealthNumber {
        value: Option<i64>,
    },
}

impl Signal {
    /// Compact form for periodic debug logging
    pub fn summary(&self) -> String {
        match self {
            Signal::Redness {
                intensity, scores, ..
            } => format!("intensity={intensity:.3} scores={scores:.3?}"),
            Signal::HealthBar { percent } => match percent {
                Some(p) => format!("percent={p:.4}"),
                None => "percent=null".into(),
            },
            Signal::HealthNumber { value } => match value {
                Some(v) => format!("read={v}"),
                None => "read=null".into(),
            },
        }
    }
}

/// Hit candidate, before the debounce gate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub intensity: f32,
    pub roi: Option<String>,
    pub direction: Option<Direction>,
    pub percent: Option<f32>,
    pub value: Option<i64>,
}

/// Informational reading, forwarded without debouncing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Percent(f32),
    Value(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub signal: Signal,
    pub hit: Option<Hit>,
    pub reading: Option<Reading>,
}

#[derive(Debug, Clone)]
pub enum ActiveDetector {
    Redness(RednessDetector),
    HealthBar(HealthBarDetector),
    HealthNumber(HealthNumberDetector),
}

impl ActiveDetector {
    /// Fresh detector state for a validated profile
    pub fn from_config(config: &DetectorConfig, settings: &Settings) -> Self {
        match config {
            DetectorConfig::RednessRois(cfg) => {
                ActiveDetector::Redness(RednessDetector::new(cfg.clone(), settings.redness))
            }
            DetectorConfig::HealthBar(cfg) => {
                ActiveDetector::HealthBar(HealthBarDetector::new(cfg.clone()))
            }
            DetectorConfig::HealthNumber(cfg) => {
                ActiveDetector::HealthNumber(HealthNumberDetector::new(cfg))
            }
        }
    }

    /// Evaluate one tick
    ///
    /// `crops[i]` must be the crop of `config.rois()[i]`. `templates` is the
    /// snapshot taken at tick start; only the health-number detector reads it.
    pub fn evaluate(&mut self, crops: &[RgbaImage], templates: &DigitTemplates) -> Outcome {
        match self {
            ActiveDetector::Redness(d) => d.evaluate(crops),
            ActiveDetector::HealthBar(d) => d.evaluate(crops.first()),
            ActiveDetector::HealthNumber(d) => d.evaluate(crops.first(), templates),
        }
    }
}

/// Regions to capture for `config`, with their position in the crop list
pub fn capture_plan(config: &DetectorConfig) -> Vec<Roi> {
    config.rois().into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{NormalizedRect, RednessConfig};
    use image::Rgba;

    #[test]
    fn test_dispatch_redness() {
        let config = DetectorConfig::RednessRois(RednessConfig {
            rois: vec![Roi::new("center", NormalizedRect::new(0.4, 0.4, 0.2, 0.2))],
            min_score: 0.35,
            cooldown_ms: 200,
        });
        let mut detector = ActiveDetector::from_config(&config, &Settings::default());
        let crop = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let outcome = detector.evaluate(&[crop], &DigitTemplates::new(4, 4, 0));
        assert_eq!(outcome.hit.map(|h| h.intensity), Some(1.0));
        assert_eq!(capture_plan(&config).len(), 1);
    }

    #[test]
    fn test_signal_summary() {
        assert_eq!(Signal::HealthNumber { value: None }.summary(), "read=null");
        assert_eq!(
            Signal::HealthBar { percent: Some(0.5) }.summary(),
            "percent=0.5000"
        );
    }
}
