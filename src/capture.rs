use std::sync::Arc;

use image::{imageops, RgbaImage};
use parking_lot::Mutex;
use tracing::debug;
use xcap::Monitor;

use crate::error::CaptureError;
use crate::profile::{NormalizedRect, PixelRect};

/// Source of screen pixels
///
/// Implementations return only the requested rectangle; the detection loop
/// never asks for a full frame. Monitor indices are 1-based.
///
/// # Failure policy
/// There is no silent fallback between backends or monitors:
/// - `Unavailable`: no usable display or permission denied; never retried
/// - `InvalidMonitor`: the requested monitor does not exist
/// - `Backend`: one capture failed; the caller may try again next tick
pub trait CaptureSource: Send {
    /// Capture `rect` of monitor `monitor_index`
    fn grab(&mut self, monitor_index: u32, rect: &NormalizedRect)
        -> Result<RgbaImage, CaptureError>;

    /// Dimensions of the monitor in the pixel space `grab` crops from
    fn frame_size(&mut self, monitor_index: u32) -> Result<(u32, u32), CaptureError>;

    /// Capture the whole monitor (calibration only)
    fn grab_frame(&mut self, monitor_index: u32) -> Result<RgbaImage, CaptureError> {
        self.grab(monitor_index, &NormalizedRect::full())
    }
}

/// Capture source shared between the detection loop and calibration callers
pub type SharedCapture = Arc<Mutex<Box<dyn CaptureSource>>>;

pub fn shared(source: impl CaptureSource + 'static) -> SharedCapture {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Crop `rect` out of an already captured frame
pub fn crop(frame: &RgbaImage, rect: &NormalizedRect) -> (PixelRect, RgbaImage) {
    let px = rect.to_pixels(frame.width(), frame.height());
    let image = imageops::crop_imm(frame, px.left, px.top, px.width, px.height).to_image();
    (px, image)
}

/// Live desktop capture via `xcap`
///
/// Monitors are enumerated on every call so hot-plugged displays are picked
/// up without restarting the loop.
#[derive(Debug, Default)]
pub struct XcapSource;

impl XcapSource {
    pub fn new() -> Self {
        Self
    }

    fn monitor(monitor_index: u32) -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()
            .map_err(|err| CaptureError::Unavailable(format!("failed to enumerate monitors: {err}")))?;
        if monitors.is_empty() {
            return Err(CaptureError::Unavailable("no monitors detected".into()));
        }
        let idx = monitor_index
            .checked_sub(1)
            .ok_or(CaptureError::InvalidMonitor(monitor_index))? as usize;
        monitors
            .into_iter()
            .nth(idx)
            .ok_or(CaptureError::InvalidMonitor(monitor_index))
    }
}

impl CaptureSource for XcapSource {
    fn grab(
        &mut self,
        monitor_index: u32,
        rect: &NormalizedRect,
    ) -> Result<RgbaImage, CaptureError> {
        let monitor = Self::monitor(monitor_index)?;
        let width = monitor.width().unwrap_or(0);
        let height = monitor.height().unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "monitor {monitor_index} reports an empty frame"
            )));
        }

        let px = rect.to_pixels(width, height);
        let image = monitor
            .capture_region(px.left, px.top, px.width, px.height)
            .map_err(|err| CaptureError::Backend(Box::new(err)))?;
        debug!(
            "Captured {}x{} at ({}, {}) on monitor {}",
            image.width(),
            image.height(),
            px.left,
            px.top,
            monitor_index
        );
        Ok(image)
    }

    fn frame_size(&mut self, monitor_index: u32) -> Result<(u32, u32), CaptureError> {
        let monitor = Self::monitor(monitor_index)?;
        Ok((monitor.width().unwrap_or(0), monitor.height().unwrap_or(0)))
    }

    fn grab_frame(&mut self, monitor_index: u32) -> Result<RgbaImage, CaptureError> {
        Self::monitor(monitor_index)?
            .capture_image()
            .map_err(|err| CaptureError::Backend(Box::new(err)))
    }
}

/// Serves crops of a single still frame, for offline tests and reports
#[derive(Debug, Clone)]
pub struct StillFrame {
    frame: RgbaImage,
}

impl StillFrame {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }
}

impl CaptureSource for StillFrame {
    fn grab(
        &mut self,
        _monitor_index: u32,
        rect: &NormalizedRect,
    ) -> Result<RgbaImage, CaptureError> {
        Ok(crop(&self.frame, rect).1)
    }

    fn frame_size(&mut self, _monitor_index: u32) -> Result<(u32, u32), CaptureError> {
        Ok(self.frame.dimensions())
    }

    fn grab_frame(&mut self, _monitor_index: u32) -> Result<RgbaImage, CaptureError> {
        Ok(self.frame.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    /// 1-based, as used by `capture.monitor_index`
    pub index: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

impl std::fmt::Display for MonitorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Display {} · {}x{} ({}){}",
            self.index,
            self.width,
            self.height,
            self.name,
            if self.is_primary { " [primary]" } else { "" }
        )
    }
}

pub fn list_monitors() -> Result<Vec<MonitorInfo>, CaptureError> {
    let monitors = Monitor::all()
        .map_err(|err| CaptureError::Unavailable(format!("failed to enumerate monitors: {err}")))?;
    Ok(monitors
        .into_iter()
        .enumerate()
        .map(|(idx, monitor)| MonitorInfo {
            index: idx as u32 + 1,
            name: monitor.name().unwrap_or_else(|_| "Unknown".to_string()),
            width: monitor.width().unwrap_or(0),
            height: monitor.height().unwrap_or(0),
            is_primary: monitor.is_primary().unwrap_or(false),
        })
        .collect())
}
