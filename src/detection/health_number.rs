/// Numeric health readout via template OCR
///
/// A read only becomes the accepted value after `readout.stable_reads`
/// consecutive identical in-range reads. A null or out-of-range read breaks
/// the streak.
use image::RgbaImage;

use super::detector::{Hit, Outcome, Reading, Signal};
use crate::ocr::matching::ReadReport;
use crate::ocr::templates::DigitTemplates;
use crate::ocr::DigitReader;
use crate::profile::{HealthNumberConfig, Readout, Roi, ValueDrop};

/// Value drop that maps to full hit intensity
pub const FULL_INTENSITY_DROP: f32 = 25.0;

#[derive(Debug, Clone)]
pub struct HealthNumberDetector {
    reader: DigitReader,
    roi: Roi,
    readout: Readout,
    drop: ValueDrop,
    candidate: Option<(i64, u32)>,
    accepted: Option<i64>,
    last_report: Option<ReadReport>,
}

impl HealthNumberDetector {
    pub fn new(config: &HealthNumberConfig) -> Self {
        Self {
            reader: DigitReader::from_config(config),
            roi: config.roi.clone(),
            readout: config.readout,
            drop: config.hit_on_decrease,
            candidate: None,
            accepted: None,
            last_report: None,
        }
    }

    pub fn accepted(&self) -> Option<i64> {
        self.accepted
    }

    /// Report of the most recent read, for debug logging
    pub fn last_report(&self) -> Option<&ReadReport> {
        self.last_report.as_ref()
    }

    /// Candidate value and how many consecutive ticks it has been read
    pub fn candidate(&self) -> Option<(i64, u32)> {
        self.candidate
    }

    fn in_range(&self, value: i64) -> bool {
        (self.readout.min..=self.readout.max).contains(&value)
    }

    pub fn evaluate(&mut self, crop: Option<&RgbaImage>, templates: &DigitTemplates) -> Outcome {
        let value = crop.and_then(|c| {
            let report = self.reader.read(c, templates);
            let value = report.value.filter(|&v| self.in_range(v));
            self.last_report = Some(report);
            value
        });

        let signal = Signal::HealthNumber { value };
        let Some(value) = value else {
            self.candidate = None;
            return Outcome {
                signal,
                hit: None,
                reading: None,
            };
        };

        let count = match self.candidate {
            Some((v, n)) if v == value => n.saturating_add(1),
            _ => 1,
        };
        self.candidate = Some((value, count));
        if count < self.readout.stable_reads {
            return Outcome {
                signal,
                hit: None,
                reading: None,
            };
        }

        let previous = self.accepted.replace(value);
        if previous == Some(value) {
            return Outcome {
                signal,
                hit: None,
                reading: None,
            };
        }

        let hit = previous.and_then(|prev| {
            let drop = prev - value;
            (drop >= self.drop.min_drop).then(|| Hit {
                intensity: (drop as f32 / FULL_INTENSITY_DROP).clamp(0.0, 1.0),
                roi: Some(self.roi.name.clone()),
                direction: self.roi.direction,
                percent: None,
                value: Some(value),
            })
        });

        Outcome {
            signal,
            hit,
            reading: Some(Reading::Value(value)),
        }
    }
}
