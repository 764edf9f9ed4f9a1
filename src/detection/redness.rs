/// Red-vignette detection over one or more ROIs
use image::RgbaImage;

use super::detector::{Hit, Outcome, Signal};
use crate::config::RednessSettings;
use crate::profile::RednessConfig;

/// Per-pixel red classification
#[inline]
pub fn is_red(r: u8, g: u8, b: u8, tuning: &RednessSettings) -> bool {
    r >= tuning.red_min && r as f32 >= tuning.dominance_ratio * g.max(b) as f32
}

/// Fraction of red pixels in `crop`, in [0, 1]
pub fn redness_score(crop: &RgbaImage, tuning: &RednessSettings) -> f32 {
    let total = crop.width() as usize * crop.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let red = crop
        .pixels()
        .filter(|p| is_red(p[0], p[1], p[2], tuning))
        .count();
    (red as f32 / total as f32).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct RednessDetector {
    config: RednessConfig,
    tuning: RednessSettings,
}

impl RednessDetector {
    pub fn new(config: RednessConfig, tuning: RednessSettings) -> Self {
        Self { config, tuning }
    }

    pub fn config(&self) -> &RednessConfig {
        &self.config
    }

    /// Score every ROI crop, in declared order
    pub fn scores(&self, crops: &[RgbaImage]) -> Vec<f32> {
        crops.iter().map(|c| redness_score(c, &self.tuning)).collect()
    }

    /// `crops[i]` is the crop of `config.rois[i]`
    pub fn evaluate(&self, crops: &[RgbaImage]) -> Outcome {
        let scores = self.scores(crops);

        // Strict comparison keeps the first declared ROI on ties
        let mut best: Option<(usize, f32)> = None;
        for (idx, &score) in scores.iter().enumerate() {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        let (idx, intensity) = best.unwrap_or((0, 0.0));
        let roi = self.config.rois.get(idx);
        let signal = Signal::Redness {
            intensity,
            roi: roi.map(|r| r.name.clone()),
            direction: roi.and_then(|r| r.direction),
            scores,
        };

        let hit = (intensity > 0.0 && intensity >= self.config.min_score).then(|| Hit {
            intensity,
            roi: roi.map(|r| r.name.clone()),
            direction: roi.and_then(|r| r.direction),
            percent: None,
            value: None,
        });

        Outcome {
            signal,
            hit,
            reading: None,
        }
    }
}
