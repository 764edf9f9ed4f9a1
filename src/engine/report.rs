/// One-shot evaluation of a profile against a still frame
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbaImage;
use serde::Serialize;

use super::debug::save_crop;
use crate::capture::crop;
use crate::config::Settings;
use crate::detection::{capture_plan, ActiveDetector, Hit, Signal};
use crate::error::ProfileError;
use crate::ocr::matching::ReadReport;
use crate::ocr::DigitReader;
use crate::ocr::templates::DigitTemplates;
use crate::profile::{DetectorConfig, PixelRect, Profile};
use crate::utils::micros;

#[derive(Debug, Clone, Serialize)]
pub struct RoiReport {
    pub name: String,
    pub rect: PixelRect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub profile_id: String,
    pub detector: &'static str,
    pub frame_size: (u32, u32),
    pub rois: Vec<RoiReport>,
    pub signal: Signal,
    /// Hit candidate the frame would produce on its own (no history, no cooldown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<Hit>,
    /// Digit matching details, health-number profiles only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<ReadReport>,
    pub capture_us: f64,
    pub evaluate_us: f64,
}

/// Evaluate `profile` once on `frame`
///
/// Starts nothing and emits no events. When `out_dir` is set, every ROI crop
/// is written there as PNG.
pub fn run_test(
    profile: &Profile,
    frame: &RgbaImage,
    settings: &Settings,
    out_dir: Option<&Path>,
) -> Result<TestReport, ProfileError> {
    profile.validate()?;

    let t_capture = Instant::now();
    let mut rois = Vec::new();
    let mut crops = Vec::new();
    for roi in capture_plan(&profile.detector) {
        let (rect, image) = crop(frame, &roi.rect);
        rois.push(RoiReport {
            name: roi.name.clone(),
            rect,
            saved: None,
        });
        crops.push(image);
    }
    let capture_us = micros(t_capture.elapsed());

    let empty = DigitTemplates::new(0, 0, 0);
    let templates = match &profile.detector {
        DetectorConfig::HealthNumber(cfg) => &cfg.templates,
        _ => &empty,
    };

    let t_eval = Instant::now();
    let mut detector = ActiveDetector::from_config(&profile.detector, settings);
    let outcome = detector.evaluate(&crops, templates);
    let ocr = match &profile.detector {
        DetectorConfig::HealthNumber(cfg) => crops
            .first()
            .map(|c| DigitReader::from_config(cfg).read(c, &cfg.templates)),
        _ => None,
    };
    let evaluate_us = micros(t_eval.elapsed());

    if let Some(dir) = out_dir {
        let kind = profile.detector.kind();
        for (roi, image) in rois.iter_mut().zip(&crops) {
            roi.saved = save_crop(dir, kind, &roi.name, image).ok();
        }
    }

    Ok(TestReport {
        profile_id: profile.profile_id().to_string(),
        detector: profile.detector.kind(),
        frame_size: frame.dimensions(),
        rois,
        signal: outcome.signal,
        hit: outcome.hit,
        ocr,
        capture_us,
        evaluate_us,
    })
}
