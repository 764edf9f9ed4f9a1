/// Digit template calibration
///
/// Learns and tests templates from a still frame with the same
/// preprocessing and matching the detection loop uses. Nothing here touches
/// the loop: frames come from the shared capture source under a short,
/// bounded lock, and learned templates are published to the store as a new
/// snapshot.
use std::time::Duration;

use image::RgbaImage;
use tracing::{debug, info};

use crate::capture::{crop, SharedCapture};
use crate::config::CalibrationSettings;
use crate::error::{CalibrationError, CaptureError};
use crate::ocr::matching::ReadReport;
use crate::ocr::templates::{check_dimensions, DigitTemplates, TemplateSnapshot, TemplateStore};
use crate::ocr::DigitReader;
use crate::profile::{DetectorConfig, HealthNumberConfig, Profile};

/// Grabs still frames for calibration
pub struct Calibrator {
    capture: SharedCapture,
    lock_timeout: Duration,
}

impl Calibrator {
    pub fn new(capture: SharedCapture, settings: &CalibrationSettings) -> Self {
        Self {
            capture,
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
        }
    }

    /// Full frame of `monitor_index`
    ///
    /// Fails with `CaptureError::Busy` when the loop holds the source for
    /// longer than the lock timeout.
    pub fn grab_still_frame(&self, monitor_index: u32) -> Result<RgbaImage, CalibrationError> {
        let mut source = self
            .capture
            .try_lock_for(self.lock_timeout)
            .ok_or(CaptureError::Busy)?;
        let frame = source.grab_frame(monitor_index)?;
        debug!(
            "Calibration frame grabbed: monitor {} {}x{}",
            monitor_index,
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }
}

/// The health-number section of `profile`
pub fn health_number_config(profile: &Profile) -> Result<&HealthNumberConfig, CalibrationError> {
    match &profile.detector {
        DetectorConfig::HealthNumber(cfg) => Ok(cfg),
        other => Err(CalibrationError::WrongDetector(other.kind())),
    }
}

fn check_truth(truth: &str, digits: u32) -> Result<Vec<char>, CalibrationError> {
    if truth.chars().any(char::is_whitespace) {
        return Err(CalibrationError::InvalidGroundTruth(truth.to_string()));
    }
    let chars: Vec<char> = truth.chars().collect();
    if chars.len() != digits as usize {
        return Err(CalibrationError::GroundTruthLength {
            truth: truth.to_string(),
            expected: digits as usize,
            actual: chars.len(),
        });
    }
    Ok(chars)
}

/// Learn one template per slice of the ROI crop of `frame`
///
/// Slice `i` is stored under `truth[i]`, overwriting any previous template
/// for that character. The ground truth is checked before anything is
/// fingerprinted; a rejected call leaves the store untouched.
pub fn learn(
    store: &TemplateStore,
    frame: &RgbaImage,
    config: &HealthNumberConfig,
    truth: &str,
) -> Result<TemplateSnapshot, CalibrationError> {
    let chars = check_truth(truth, config.digits)?;
    let (rect, roi_crop) = crop(frame, &config.roi.rect);
    let reader = DigitReader::from_config(config);

    let snapshot = store.update(|templates| -> Result<(), CalibrationError> {
        let prints = reader.fingerprints(&roi_crop, templates.width(), templates.height());
        if prints.len() != chars.len() {
            return Err(CalibrationError::UnreadableCrop {
                expected: chars.len(),
                actual: prints.len(),
            });
        }
        for (ch, bits) in chars.iter().zip(prints) {
            templates.insert(*ch, bits)?;
        }
        Ok(())
    })?;

    info!(
        "Learned '{}' from {}x{} crop at ({}, {}); {} templates known",
        truth,
        rect.width,
        rect.height,
        rect.left,
        rect.top,
        snapshot.digits().len()
    );
    Ok(snapshot)
}

/// Single read of the ROI crop of `frame`; no stability gate, no events
pub fn test(frame: &RgbaImage, config: &HealthNumberConfig, templates: &DigitTemplates) -> ReadReport {
    let (_, roi_crop) = crop(frame, &config.roi.rect);
    DigitReader::from_config(config).read(&roi_crop, templates)
}

/// Change the fingerprint size of the store, clearing every template
pub fn resize_templates(
    store: &TemplateStore,
    width: u32,
    height: u32,
) -> Result<TemplateSnapshot, CalibrationError> {
    check_dimensions(width, height)?;
    let snapshot = store.update(|templates| -> Result<(), CalibrationError> {
        templates.set_dimensions(width, height);
        Ok(())
    })?;
    info!("Templates resized to {}x{}", width, height);
    Ok(snapshot)
}
