/// Regions of interest in normalized screen coordinates
///
/// A profile never stores pixel coordinates: every rectangle is expressed as
/// a fraction of the monitor so the same profile works across resolutions.
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Slack for `x + w <= 1` checks on values that went through a UI slider.
const EDGE_EPSILON: f32 = 1e-6;

/// Hit direction reported alongside a redness hit
///
/// Closed vocabulary, wire-stable. Consumers pick their own fallback when a
/// hit carries no direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Front,
    Back,
    Left,
    Right,
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Front,
        Direction::Back,
        Direction::Left,
        Direction::Right,
        Direction::FrontLeft,
        Direction::FrontRight,
        Direction::BackLeft,
        Direction::BackRight,
    ];

    /// Wire name of the direction
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Front => "front",
            Direction::Back => "back",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::FrontLeft => "front_left",
            Direction::FrontRight => "front_right",
            Direction::BackLeft => "back_left",
            Direction::BackRight => "back_right",
        }
    }
}

/// Rectangle in normalized coordinates (0-1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole frame
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn validate(&self, field: &str) -> Result<(), ProfileError> {
        for (name, v) in [("x", self.x), ("y", self.y), ("w", self.w), ("h", self.h)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(ProfileError::Invalid(format!(
                    "{field}.{name} must be in [0, 1], got {v}"
                )));
            }
        }
        if self.w <= 0.0 || self.h <= 0.0 {
            return Err(ProfileError::Invalid(format!(
                "{field}.w and {field}.h must be > 0"
            )));
        }
        if self.x + self.w > 1.0 + EDGE_EPSILON || self.y + self.h > 1.0 + EDGE_EPSILON {
            return Err(ProfileError::Invalid(format!(
                "{field} must fit inside the frame (x+w <= 1, y+h <= 1)"
            )));
        }
        Ok(())
    }

    /// Convert to a pixel rectangle inside a `frame_w` x `frame_h` frame
    ///
    /// The origin is clamped into the frame and the size is clamped to at
    /// least one pixel and at most the remainder of the frame, so the result
    /// is always a valid crop.
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> PixelRect {
        let frame_w = frame_w.max(1);
        let frame_h = frame_h.max(1);

        let left = (self.x * frame_w as f32).round() as u32;
        let top = (self.y * frame_h as f32).round() as u32;
        let width = ((self.w * frame_w as f32).round() as u32).max(1);
        let height = ((self.h * frame_h as f32).round() as u32).max(1);

        let left = left.min(frame_w - 1);
        let top = top.min(frame_h - 1);

        PixelRect {
            left,
            top,
            width: width.min(frame_w - left).max(1),
            height: height.min(frame_h - top).max(1),
        }
    }
}

/// Pixel rectangle relative to the monitor origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Named region watched by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub rect: NormalizedRect,
}

impl Roi {
    pub fn new(name: impl Into<String>, rect: NormalizedRect) -> Self {
        Self {
            name: name.into(),
            direction: None,
            rect,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn validate(&self, field: &str) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::Invalid(format!("{field}.name must not be empty")));
        }
        self.rect.validate(&format!("{field}.rect"))
    }
}
