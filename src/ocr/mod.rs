/// Template-based digit recognition for numeric health readouts
///
/// The module is split into focused submodules:
/// - `preprocessing`: grayscale, binarize, invert, integer upscale
/// - `matching`: equal-width segmentation and Hamming template matching
/// - `templates`: the learned template set and its copy-on-write store
///
/// # Public API
///
/// The main interface is `DigitReader`, shared by the detection loop and the
/// calibration tool so both read a crop identically:
/// - `fingerprints()`: per-slice bitstrings at the template dimensions
/// - `read()`: one match of a crop against a template snapshot
///
/// # Example
/// ```no_run
/// use screen_health::ocr::DigitReader;
/// use screen_health::ocr::templates::DigitTemplates;
/// use image::RgbaImage;
///
/// let reader = DigitReader::new(3, 0.6, false, 2);
/// let templates = DigitTemplates::new(8, 12, 20);
/// let crop = RgbaImage::new(24, 12); // captured ROI
///
/// let report = reader.read(&crop, &templates);
/// if let Some(value) = report.value {
///     tracing::info!("HP = {}", value);
/// }
/// ```
pub mod matching;
pub mod preprocessing;
pub mod templates;

use image::RgbaImage;

use crate::profile::HealthNumberConfig;
use matching::ReadReport;
use preprocessing::Binarizer;
use templates::DigitTemplates;

/// Reads a fixed number of digits from an ROI crop
#[derive(Debug, Clone, Copy)]
pub struct DigitReader {
    binarizer: Binarizer,
    digits: u32,
}

impl DigitReader {
    /// # Arguments
    /// * `digits` - Number of equal-width slices
    /// * `threshold` - Ink threshold as a fraction of full intensity
    /// * `invert` - Dark digits on a light background
    /// * `scale` - Integer upscale factor applied before slicing
    pub fn new(digits: u32, threshold: f32, invert: bool, scale: u32) -> Self {
        Self {
            binarizer: Binarizer::new(threshold, invert, scale),
            digits: digits.max(1),
        }
    }

    pub fn from_config(config: &HealthNumberConfig) -> Self {
        Self::new(config.digits, config.threshold, config.invert, config.scale)
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// One bitstring per slice, resampled to `width` x `height`
    ///
    /// Empty when the crop is empty or too large to upscale.
    pub fn fingerprints(&self, crop: &RgbaImage, width: u32, height: u32) -> Vec<String> {
        let bitmap = self.binarizer.binarize(crop);
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Vec::new();
        }
        matching::segment(&bitmap, self.digits)
            .iter()
            .map(|slice| matching::fingerprint(slice, width, height))
            .collect()
    }

    /// Single match of `crop` against `templates`, no stability gating
    pub fn read(&self, crop: &RgbaImage, templates: &DigitTemplates) -> ReadReport {
        let prints = self.fingerprints(crop, templates.width(), templates.height());
        if prints.is_empty() {
            return ReadReport {
                value: None,
                text: None,
                slices: Vec::new(),
                reason: Some("crop is empty or too large to upscale".into()),
            };
        }
        matching::match_fingerprints(&prints, templates)
    }
}
