/// Debug artifacts: periodic value logging and ROI crop saving
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::{info, warn};

use crate::config::DebugSettings;
use crate::messaging::now_ms;

/// Replace everything but ASCII alphanumerics, '-' and '_' with '_'
pub fn sanitize_file_part(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{ts_ms}_{kind}_{name}_{w}x{h}.png`
pub fn crop_file_name(ts_ms: u64, kind: &str, name: &str, width: u32, height: u32) -> String {
    format!(
        "{}_{}_{}_{}x{}.png",
        ts_ms,
        sanitize_file_part(kind),
        sanitize_file_part(name),
        width,
        height
    )
}

/// Write `crop` into `dir`, returning the file path
pub fn save_crop(dir: &Path, kind: &str, name: &str, crop: &RgbaImage) -> image::ImageResult<PathBuf> {
    let path = dir.join(crop_file_name(now_ms(), kind, name, crop.width(), crop.height()));
    crop.save(&path)?;
    Ok(path)
}

/// Best-effort debug output for one loop run
///
/// Saving failures are logged and never fail the tick.
pub struct DebugRecorder {
    log_values: bool,
    every_n: u64,
    save_dir: Option<PathBuf>,
    saved_once: HashSet<String>,
}

impl DebugRecorder {
    pub fn new(settings: &DebugSettings) -> Self {
        let mut save_dir = settings.effective_save_dir();
        if let Some(dir) = &save_dir {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(
                    "Disabling ROI crop saving, cannot create {}: {}",
                    dir.display(),
                    err
                );
                save_dir = None;
            }
        }

        if settings.log_values {
            info!(
                "Debug enabled: log_values={} every_n={} save_roi_images={} dir={:?}",
                settings.log_values,
                settings.log_every_n_ticks,
                save_dir.is_some(),
                save_dir
            );
        }

        Self {
            log_values: settings.log_values,
            every_n: settings.log_every_n_ticks.max(1) as u64,
            save_dir,
            saved_once: HashSet::new(),
        }
    }

    pub fn saving(&self) -> bool {
        self.save_dir.is_some()
    }

    /// Whether values are logged on tick number `tick` (0-based)
    pub fn should_log(&self, tick: u64) -> bool {
        self.log_values && tick % self.every_n == 0
    }

    /// Save the first crop seen for `kind`/`name`
    pub fn save_example(&mut self, kind: &str, name: &str, crop: &RgbaImage) -> Option<PathBuf> {
        if self.save_dir.is_none() {
            return None;
        }
        let key = format!("{kind}:{name}");
        if self.saved_once.contains(&key) {
            return None;
        }
        let saved = self.save(kind, name, crop);
        if saved.is_some() {
            self.saved_once.insert(key);
        }
        saved
    }

    /// Save unconditionally (forwarded hits)
    pub fn save(&self, kind: &str, name: &str, crop: &RgbaImage) -> Option<PathBuf> {
        let dir = self.save_dir.as_ref()?;
        match save_crop(dir, kind, name, crop) {
            Ok(path) => {
                info!("Saved ROI kind={} name={} file={}", kind, name, path.display());
                Some(path)
            }
            Err(err) => {
                warn!("Failed to save ROI kind={} name={}: {}", kind, name, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_sanitize_file_part() {
        assert_eq!(sanitize_file_part("hp bar/left"), "hp_bar_left");
        assert_eq!(sanitize_file_part("__ok-1__"), "ok-1");
        assert_eq!(sanitize_file_part("???"), "unnamed");
    }

    #[test]
    fn test_crop_file_name() {
        assert_eq!(
            crop_file_name(1700, "health_bar_hit", "HP bar", 120, 8),
            "1700_health_bar_hit_HP_bar_120x8.png"
        );
    }

    #[test]
    fn test_example_saved_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DebugSettings {
            save_roi_images: true,
            save_dir: Some(dir.path().to_path_buf()),
            ..DebugSettings::default()
        };
        let mut recorder = DebugRecorder::new(&settings);
        let crop = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));

        let first = recorder.save_example("redness_rois", "left", &crop).unwrap();
        assert!(first.exists());
        assert!(recorder.save_example("redness_rois", "left", &crop).is_none());
        assert!(recorder.save("redness_rois_hit", "left", &crop).is_some());

        let saved = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(saved, 2);
    }

    #[test]
    fn test_disabled_recorder_saves_nothing() {
        let recorder = DebugRecorder::new(&DebugSettings::default());
        assert!(!recorder.saving());
        assert!(!recorder.should_log(0));
        let crop = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        assert!(recorder.save("k", "n", &crop).is_none());
    }

    #[test]
    fn test_log_cadence() {
        let settings = DebugSettings {
            log_values: true,
            log_every_n_ticks: 20,
            ..DebugSettings::default()
        };
        let recorder = DebugRecorder::new(&settings);
        assert!(recorder.should_log(0));
        assert!(!recorder.should_log(19));
        assert!(recorder.should_log(40));
    }
}
