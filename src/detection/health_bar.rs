/// Health bar fill estimation
///
/// The bar is sampled along the ROI's longer axis. A sample (column for a
/// horizontal bar, row for a vertical one) counts as filled when at least
/// half of its pixels are classified as filled.
use image::RgbaImage;

use super::detector::{Hit, Outcome, Reading, Signal};
use crate::profile::{FallbackMode, HealthBarConfig, HealthBarMode};

/// Drops smaller than this are float noise, not damage
const DROP_EPSILON: f32 = 1e-6;

/// Mean channel value in [0, 1]
pub fn brightness(r: u8, g: u8, b: u8) -> f32 {
    (r as f32 + g as f32 + b as f32) / 3.0 / 255.0
}

/// HSV-style saturation in [0, 1]; black is unsaturated
pub fn saturation(r: u8, g: u8, b: u8) -> f32 {
    let max = r.max(g).max(b);
    if max == 0 {
        return 0.0;
    }
    let min = r.min(g).min(b);
    (max - min) as f32 / max as f32
}

fn pixel_filled(config: &HealthBarConfig, r: u8, g: u8, b: u8) -> bool {
    match config.mode {
        HealthBarMode::ColorSampling => match (config.filled_rgb, config.empty_rgb) {
            (Some(filled), Some(empty)) => {
                let df = filled.l1(r, g, b);
                df <= config.tolerance_l1 && df < empty.l1(r, g, b)
            }
            _ => false,
        },
        HealthBarMode::ThresholdFallback => {
            let v = match config.fallback_mode {
                FallbackMode::Brightness => brightness(r, g, b),
                FallbackMode::Saturation => saturation(r, g, b),
            };
            v >= config.fallback_min
        }
    }
}

/// Filled and total sample counts for one crop
pub fn sample_counts(crop: &RgbaImage, config: &HealthBarConfig) -> (u32, u32) {
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return (0, 0);
    }
    let horizontal = w >= h;
    let (samples, depth) = if horizontal { (w, h) } else { (h, w) };

    let mut filled_samples = 0;
    for s in 0..samples {
        let mut filled = 0;
        for d in 0..depth {
            let (x, y) = if horizontal { (s, d) } else { (d, s) };
            let p = crop.get_pixel(x, y);
            if pixel_filled(config, p[0], p[1], p[2]) {
                filled += 1;
            }
        }
        if filled * 2 >= depth {
            filled_samples += 1;
        }
    }
    (filled_samples, samples)
}

/// `filled / total` for the crop, `None` for an empty crop
pub fn fill_percent(crop: &RgbaImage, config: &HealthBarConfig) -> Option<f32> {
    match sample_counts(crop, config) {
        (_, 0) => None,
        (filled, total) => Some((filled as f32 / total as f32).clamp(0.0, 1.0)),
    }
}

#[derive(Debug, Clone)]
pub struct HealthBarDetector {
    config: HealthBarConfig,
    last_percent: Option<f32>,
}

impl HealthBarDetector {
    pub fn new(config: HealthBarConfig) -> Self {
        Self {
            config,
            last_percent: None,
        }
    }

    pub fn last_percent(&self) -> Option<f32> {
        self.last_percent
    }

    pub fn evaluate(&mut self, crop: Option<&RgbaImage>) -> Outcome {
        let percent = crop.and_then(|c| fill_percent(c, &self.config));
        let Some(percent) = percent else {
            return Outcome {
                signal: Signal::HealthBar { percent: None },
                hit: None,
                reading: None,
            };
        };

        let hit = self.last_percent.and_then(|last| {
            let drop = last - percent;
            (drop > DROP_EPSILON && drop + DROP_EPSILON >= self.config.hit_on_decrease.min_drop)
                .then(|| Hit {
                    intensity: drop.clamp(0.0, 1.0),
                    roi: Some(self.config.roi.name.clone()),
                    direction: self.config.roi.direction,
                    percent: Some(percent),
                    value: None,
                })
        });
        self.last_percent = Some(percent);

        Outcome {
            signal: Signal::HealthBar {
                percent: Some(percent),
            },
            hit,
            reading: Some(Reading::Percent(percent)),
        }
    }
}
