//! Screen-region health detection engine
//!
//! Watches small regions of a monitor and turns visual damage cues (a red
//! vignette, a health bar, a numeric health readout) into `hit`,
//! `health_percent` and `health_value` events.
//!
//! ```no_run
//! use screen_health::capture::{shared, XcapSource};
//! use screen_health::config::Settings;
//! use screen_health::engine::DetectionEngine;
//! use screen_health::profile::Profile;
//!
//! # fn main() -> anyhow::Result<()> {
//! let profile = Profile::from_json(&std::fs::read_to_string("profile.json")?)?;
//! let engine = DetectionEngine::new(shared(XcapSource::new()), Settings::load()?);
//! let (events, _id) = engine.subscribe();
//! engine.start(profile)?;
//! for event in events.iter().take(10) {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! engine.stop();
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod capture;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod ocr;
pub mod profile;
pub mod state;
pub mod utils;

pub use engine::{DetectionEngine, EngineStatus};
pub use error::{CalibrationError, CaptureError, EngineError, ProfileError};
pub use messaging::{Event, EventKind};
pub use profile::Profile;
