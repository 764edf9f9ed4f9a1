/// Detector configuration variants
///
/// Exactly one detector is active per profile. The JSON form is tagged by
/// `type` with the variant fields inlined next to it.
use serde::{Deserialize, Serialize};

use super::roi::Roi;
use crate::error::ProfileError;
use crate::ocr::templates::DigitTemplates;

pub const MAX_TOLERANCE_L1: u32 = 765;

fn default_min_score() -> f32 {
    0.35
}

fn default_redness_cooldown_ms() -> u64 {
    200
}

fn default_tolerance_l1() -> u32 {
    120
}

fn default_fallback_min() -> f32 {
    0.5
}

fn default_ocr_threshold() -> f32 {
    0.6
}

/// Largest integer upscale before digit slicing
pub const MAX_SCALE: u32 = 16;

fn default_scale() -> u32 {
    1
}

fn check_unit(field: &str, v: f32) -> Result<(), ProfileError> {
    if !v.is_finite() || !(0.0..=1.0).contains(&v) {
        return Err(ProfileError::Invalid(format!("{field} must be in [0, 1], got {v}")));
    }
    Ok(())
}

/// RGB triple, serialized as `[r, g, b]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Manhattan distance between two colors, in [0, 765]
    pub fn l1(&self, r: u8, g: u8, b: u8) -> u32 {
        self.0.abs_diff(r) as u32 + self.1.abs_diff(g) as u32 + self.2.abs_diff(b) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    RednessRois(RednessConfig),
    HealthBar(HealthBarConfig),
    HealthNumber(HealthNumberConfig),
}

impl DetectorConfig {
    /// Wire name of the variant, also used as `source_detector` on events
    pub fn kind(&self) -> &'static str {
        match self {
            DetectorConfig::RednessRois(_) => "redness_rois",
            DetectorConfig::HealthBar(_) => "health_bar",
            DetectorConfig::HealthNumber(_) => "health_number",
        }
    }

    /// Regions the detector needs captured each tick, in declared order
    pub fn rois(&self) -> Vec<&Roi> {
        match self {
            DetectorConfig::RednessRois(cfg) => cfg.rois.iter().collect(),
            DetectorConfig::HealthBar(cfg) => vec![&cfg.roi],
            DetectorConfig::HealthNumber(cfg) => vec![&cfg.roi],
        }
    }

    pub fn cooldown_ms(&self) -> u64 {
        match self {
            DetectorConfig::RednessRois(cfg) => cfg.cooldown_ms,
            DetectorConfig::HealthBar(cfg) => cfg.hit_on_decrease.cooldown_ms,
            DetectorConfig::HealthNumber(cfg) => cfg.hit_on_decrease.cooldown_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        match self {
            DetectorConfig::RednessRois(cfg) => cfg.validate(),
            DetectorConfig::HealthBar(cfg) => cfg.validate(),
            DetectorConfig::HealthNumber(cfg) => cfg.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RednessConfig {
    pub rois: Vec<Roi>,
    /// Minimum intensity for a hit. A crop without a single red pixel never
    /// hits, even at 0.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_redness_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl RednessConfig {
    fn validate(&self) -> Result<(), ProfileError> {
        if self.rois.is_empty() {
            return Err(ProfileError::Invalid(
                "redness_rois detector must include a non-empty 'rois' list".into(),
            ));
        }
        for (idx, roi) in self.rois.iter().enumerate() {
            roi.validate(&format!("detector.rois[{idx}]"))?;
        }
        check_unit("detector.min_score", self.min_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBarMode {
    ColorSampling,
    ThresholdFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    #[default]
    Brightness,
    Saturation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentDrop {
    pub min_drop: f32,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthBarConfig {
    pub roi: Roi,
    pub mode: HealthBarMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_rgb: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_rgb: Option<Rgb>,
    #[serde(default = "default_tolerance_l1")]
    pub tolerance_l1: u32,
    #[serde(default)]
    pub fallback_mode: FallbackMode,
    #[serde(default = "default_fallback_min")]
    pub fallback_min: f32,
    pub hit_on_decrease: PercentDrop,
}

impl HealthBarConfig {
    fn validate(&self) -> Result<(), ProfileError> {
        self.roi.validate("detector.roi")?;
        if self.mode == HealthBarMode::ColorSampling
            && (self.filled_rgb.is_none() || self.empty_rgb.is_none())
        {
            return Err(ProfileError::Invalid(
                "color_sampling requires filled_rgb and empty_rgb".into(),
            ));
        }
        if self.tolerance_l1 > MAX_TOLERANCE_L1 {
            return Err(ProfileError::Invalid(format!(
                "detector.tolerance_l1 must be in [0, {MAX_TOLERANCE_L1}]"
            )));
        }
        check_unit("detector.fallback_min", self.fallback_min)?;
        check_unit("detector.hit_on_decrease.min_drop", self.hit_on_decrease.min_drop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readout {
    pub min: i64,
    pub max: i64,
    pub stable_reads: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDrop {
    pub min_drop: i64,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthNumberConfig {
    pub roi: Roi,
    pub digits: u32,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_ocr_threshold")]
    pub threshold: f32,
    #[serde(default = "default_scale")]
    pub scale: u32,
    pub readout: Readout,
    pub hit_on_decrease: ValueDrop,
    pub templates: DigitTemplates,
}

impl HealthNumberConfig {
    fn validate(&self) -> Result<(), ProfileError> {
        self.roi.validate("detector.roi")?;
        if self.digits < 1 {
            return Err(ProfileError::Invalid("detector.digits must be >= 1".into()));
        }
        check_unit("detector.threshold", self.threshold)?;
        if !(1..=MAX_SCALE).contains(&self.scale) {
            return Err(ProfileError::Invalid(format!(
                "detector.scale must be between 1 and {MAX_SCALE}"
            )));
        }
        if self.readout.min > self.readout.max {
            return Err(ProfileError::Invalid(
                "detector.readout.min must be <= readout.max".into(),
            ));
        }
        if self.readout.stable_reads < 1 {
            return Err(ProfileError::Invalid(
                "detector.readout.stable_reads must be >= 1".into(),
            ));
        }
        if self.hit_on_decrease.min_drop < 1 {
            return Err(ProfileError::Invalid(
                "detector.hit_on_decrease.min_drop must be >= 1".into(),
            ));
        }
        self.templates.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_l1() {
        let filled = Rgb(220, 40, 40);
        assert_eq!(filled.l1(220, 40, 40), 0);
        assert_eq!(filled.l1(40, 40, 40), 180);
        assert_eq!(Rgb(0, 0, 0).l1(255, 255, 255), MAX_TOLERANCE_L1);
    }

    #[test]
    fn test_tagged_json_shape() {
        let json = r#"{
            "type": "redness_rois",
            "rois": [{"name": "left", "direction": "left", "rect": {"x": 0, "y": 0, "w": 0.1, "h": 1}}]
        }"#;
        let cfg: DetectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind(), "redness_rois");
        assert_eq!(cfg.cooldown_ms(), 200);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_color_sampling_requires_colors() {
        let json = r#"{
            "type": "health_bar",
            "roi": {"name": "hp", "rect": {"x": 0.1, "y": 0.9, "w": 0.3, "h": 0.02}},
            "mode": "color_sampling",
            "hit_on_decrease": {"min_drop": 0.02, "cooldown_ms": 150}
        }"#;
        let cfg: DetectorConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(cfg.validate(), Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_health_number_rejects_zero_min_drop() {
        let json = r#"{
            "type": "health_number",
            "roi": {"name": "hp", "rect": {"x": 0.1, "y": 0.9, "w": 0.05, "h": 0.03}},
            "digits": 3,
            "readout": {"min": 0, "max": 200, "stable_reads": 2},
            "hit_on_decrease": {"min_drop": 0, "cooldown_ms": 150},
            "templates": {"width": 8, "height": 12}
        }"#;
        let cfg: DetectorConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(cfg.validate(), Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_health_number_bounds_scale_and_template_size() {
        let with = |scale: u32, side: u32| {
            format!(
                r#"{{
                    "type": "health_number",
                    "roi": {{"name": "hp", "rect": {{"x": 0.1, "y": 0.9, "w": 0.05, "h": 0.03}}}},
                    "digits": 3,
                    "scale": {scale},
                    "readout": {{"min": 0, "max": 200, "stable_reads": 2}},
                    "hit_on_decrease": {{"min_drop": 5, "cooldown_ms": 150}},
                    "templates": {{"width": {side}, "height": 12}}
                }}"#
            )
        };
        let parse = |json: String| serde_json::from_str::<DetectorConfig>(&json).unwrap();

        assert!(parse(with(MAX_SCALE, 8)).validate().is_ok());
        assert!(matches!(
            parse(with(200_000_000, 8)).validate(),
            Err(ProfileError::Invalid(msg)) if msg.contains("scale")
        ));
        assert!(matches!(
            parse(with(2, 100_000)).validate(),
            Err(ProfileError::Invalid(msg)) if msg.contains("templates")
        ));
    }
}
