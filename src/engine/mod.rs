/// Detection engine: owns the active profile and the loop thread
///
/// The engine is a scoped resource. Create one per control-plane session,
/// share it by cloning the handle, and drop it (or call `stop`) to end
/// detection. `start` and `stop` serialize on a control lock; `stop` returns
/// only after the loop thread has exited.
pub mod debug;
pub mod report;
mod ticker;

use std::path::Path;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::calibration::{self, Calibrator};
use crate::capture::SharedCapture;
use crate::config::{DebugSettings, Settings};
use crate::error::{CalibrationError, CaptureError, EngineError};
use crate::messaging::{Event, EventBus, SubscriberId};
use crate::ocr::matching::ReadReport;
use crate::ocr::templates::{DigitTemplates, TemplateSnapshot, TemplateStore, MIN_TEMPLATE_SIDE};
use crate::profile::{DetectorConfig, Profile};
use crate::state::{LoopState, LoopStateMachine};
use report::TestReport;
use ticker::{LoopCommand, LoopContext};

/// Counters of the current (or last) run
#[derive(Debug, Clone, Default)]
pub(crate) struct RunStats {
    pub ticks: u64,
    pub overruns: u64,
    pub events_received: u64,
    pub last_event_ts: Option<u64>,
    pub last_hit_ts: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub profile_id: Option<String>,
    pub events_received: u64,
    pub last_event_ts: Option<u64>,
    pub last_hit_ts: Option<u64>,
    pub ticks: u64,
    pub overruns: u64,
    pub last_error: Option<String>,
    pub debug: DebugSettings,
}

#[derive(Clone)]
pub struct DetectionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    settings: Settings,
    capture: SharedCapture,
    bus: EventBus,
    templates: TemplateStore,
    control: Mutex<()>,
    lifecycle: Arc<Mutex<LoopStateMachine>>,
    stats: Arc<Mutex<RunStats>>,
    profile: Mutex<Option<Profile>>,
    loop_thread: Mutex<Option<thread::JoinHandle<()>>>,
    loop_cmd_tx: Mutex<Option<Sender<LoopCommand>>>,
}

impl EngineInner {
    fn shutdown_loop_thread(&self) {
        if let Some(tx) = self.loop_cmd_tx.lock().take() {
            let _ = tx.send(LoopCommand::Stop);
        }
        if let Some(handle) = self.loop_thread.lock().take() {
            if handle.join().is_err() {
                error!("Detection loop thread panicked");
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown_loop_thread();
    }
}

impl DetectionEngine {
    pub fn new(capture: SharedCapture, settings: Settings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                settings,
                capture,
                bus: EventBus::new(),
                templates: TemplateStore::new(placeholder_templates()),
                control: Mutex::new(()),
                lifecycle: Arc::new(Mutex::new(LoopStateMachine::new())),
                stats: Arc::new(Mutex::new(RunStats::default())),
                profile: Mutex::new(None),
                loop_thread: Mutex::new(None),
                loop_cmd_tx: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        self.inner.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.bus.unsubscribe(id)
    }

    pub fn state(&self) -> LoopState {
        self.inner.lifecycle.lock().state()
    }

    /// Live template store read by the loop at every tick start
    pub fn templates(&self) -> &TemplateStore {
        &self.inner.templates
    }

    /// Validate `profile`, check the capture source and start ticking
    ///
    /// Fails without any state change on an invalid profile or unavailable
    /// capture, and with `AlreadyRunning` unless the engine is idle.
    pub fn start(&self, profile: Profile) -> Result<EngineStatus, EngineError> {
        let _control = self.inner.control.lock();

        self.inner
            .lifecycle
            .lock()
            .begin_start()
            .map_err(|_| EngineError::AlreadyRunning)?;

        // A loop that stopped on its own still has a handle to reap
        self.inner.shutdown_loop_thread();

        if let Err(err) = self.prepare(&profile) {
            self.inner.lifecycle.lock().abort_start();
            warn!("Start rejected for '{}': {}", profile.name, err);
            return Err(err);
        }

        let templates = match &profile.detector {
            DetectorConfig::HealthNumber(cfg) => cfg.templates.clone(),
            _ => placeholder_templates(),
        };
        self.inner.templates.install(templates);
        *self.inner.stats.lock() = RunStats::default();
        *self.inner.profile.lock() = Some(profile.clone());

        let (cmd_tx, cmd_rx) = unbounded();
        let ctx = LoopContext {
            profile: profile.clone(),
            settings: self.inner.settings.clone(),
            capture: Arc::clone(&self.inner.capture),
            templates: self.inner.templates.clone(),
            bus: self.inner.bus.clone(),
            stats: Arc::clone(&self.inner.stats),
            lifecycle: Arc::clone(&self.inner.lifecycle),
            cmd_rx,
        };

        // Running before the thread exists so a loop that fails on its first
        // tick can move the state back to Idle
        self.inner
            .lifecycle
            .lock()
            .mark_running()
            .map_err(|_| EngineError::AlreadyRunning)?;

        let spawned = thread::Builder::new()
            .name("screen-health-loop".into())
            .spawn(move || ticker::run_detection_loop(ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.lifecycle.lock().mark_idle();
                *self.inner.profile.lock() = None;
                return Err(EngineError::ThreadSpawnFailed(err));
            }
        };

        *self.inner.loop_cmd_tx.lock() = Some(cmd_tx);
        *self.inner.loop_thread.lock() = Some(handle);

        info!("Detection started: profile={}", profile.profile_id());
        Ok(self.status())
    }

    fn prepare(&self, profile: &Profile) -> Result<(), EngineError> {
        profile.validate()?;

        let lock_timeout = self.inner.settings.capture.bound(profile.capture.tick_ms)
            + std::time::Duration::from_millis(self.inner.settings.calibration.lock_timeout_ms);
        let mut source = self
            .inner
            .capture
            .try_lock_for(lock_timeout)
            .ok_or(CaptureError::Busy)?;
        let (width, height) = source.frame_size(profile.capture.monitor_index)?;
        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "monitor {} reports an empty frame",
                profile.capture.monitor_index
            ))
            .into());
        }
        info!(
            "Capture check ok: monitor {} is {}x{}",
            profile.capture.monitor_index, width, height
        );
        Ok(())
    }

    /// Stop the loop and wait for it to exit; idempotent
    pub fn stop(&self) -> EngineStatus {
        let _control = self.inner.control.lock();

        let stopping = self.inner.lifecycle.lock().begin_stop().is_ok();
        self.inner.shutdown_loop_thread();
        self.inner.lifecycle.lock().mark_idle();
        if stopping {
            info!("Detection stopped");
        }
        self.status()
    }

    pub fn status(&self) -> EngineStatus {
        let stats = self.inner.stats.lock().clone();
        let running = self.inner.lifecycle.lock().state().is_running();
        EngineStatus {
            running,
            profile_id: self
                .inner
                .profile
                .lock()
                .as_ref()
                .map(|p| p.profile_id().to_string()),
            events_received: stats.events_received,
            last_event_ts: stats.last_event_ts,
            last_hit_ts: stats.last_hit_ts,
            ticks: stats.ticks,
            overruns: stats.overruns,
            last_error: stats.last_error,
            debug: self.inner.settings.debug.clone(),
        }
    }

    /// Active profile with the templates currently in use
    pub fn active_profile(&self) -> Option<Profile> {
        let mut profile = self.inner.profile.lock().clone()?;
        if let DetectorConfig::HealthNumber(cfg) = &mut profile.detector {
            cfg.templates = DigitTemplates::clone(&self.inner.templates.snapshot());
        }
        Some(profile)
    }

    /// One-shot evaluation of `profile` on `frame`; does not start the loop
    pub fn test(
        &self,
        profile: &Profile,
        frame: &RgbaImage,
        out_dir: Option<&Path>,
    ) -> Result<TestReport, EngineError> {
        Ok(report::run_test(profile, frame, &self.inner.settings, out_dir)?)
    }

    pub fn calibrator(&self) -> Calibrator {
        Calibrator::new(
            Arc::clone(&self.inner.capture),
            &self.inner.settings.calibration,
        )
    }

    /// Learn digit templates for `profile`
    ///
    /// When `profile` is the one currently running, the live store is updated
    /// and the loop picks the new set up on its next tick. Otherwise the
    /// profile's own templates are extended and returned for the caller to
    /// save back; the live store is left alone.
    pub fn learn(
        &self,
        profile: &Profile,
        frame: &RgbaImage,
        truth: &str,
    ) -> Result<TemplateSnapshot, CalibrationError> {
        let config = calibration::health_number_config(profile)?;
        if self.is_live(profile) {
            return calibration::learn(&self.inner.templates, frame, config, truth);
        }
        let store = TemplateStore::new(config.templates.clone());
        calibration::learn(&store, frame, config, truth)
    }

    /// Read `frame` once with the templates `profile` would run with
    pub fn test_digits(
        &self,
        profile: &Profile,
        frame: &RgbaImage,
    ) -> Result<ReadReport, CalibrationError> {
        let config = calibration::health_number_config(profile)?;
        if self.is_live(profile) {
            return Ok(calibration::test(frame, config, &self.inner.templates.snapshot()));
        }
        Ok(calibration::test(frame, config, &config.templates))
    }

    /// Whether `profile` is the health-number profile the loop is running
    fn is_live(&self, profile: &Profile) -> bool {
        if !self.inner.lifecycle.lock().state().is_running() {
            return false;
        }
        self.inner.profile.lock().as_ref().is_some_and(|active| {
            active.profile_id() == profile.profile_id()
                && matches!(active.detector, DetectorConfig::HealthNumber(_))
        })
    }
}

/// Template set used while no health-number profile is active
fn placeholder_templates() -> DigitTemplates {
    DigitTemplates::new(MIN_TEMPLATE_SIDE, MIN_TEMPLATE_SIDE, 0)
}
