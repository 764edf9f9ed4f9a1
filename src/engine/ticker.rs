/// Fixed-cadence detection loop
///
/// One tick: snapshot templates, capture the detector's ROIs under the shared
/// capture lock, evaluate, gate hits, publish events, then sleep for the rest
/// of the interval. The sleep is a `recv_timeout` on the command channel so
/// a stop request interrupts it. A panicking tick ends the run like a lost
/// capture source: the error is recorded and the engine goes back to idle.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::debug::DebugRecorder;
use super::RunStats;
use crate::capture::SharedCapture;
use crate::config::Settings;
use crate::detection::{capture_plan, ActiveDetector, DebounceGate, Outcome, Reading};
use crate::error::CaptureError;
use crate::messaging::{now_ms, Event, EventBus};
use crate::ocr::templates::TemplateStore;
use crate::profile::{Profile, Roi};
use crate::state::LoopStateMachine;
use crate::utils::{micros, LatencyStats, TickTiming};

/// Overruns between two warnings
const OVERRUN_WARN_EVERY: u64 = 50;
/// Transient capture failures between two warnings
const CAPTURE_WARN_EVERY: u64 = 50;

pub(super) enum LoopCommand {
    Stop,
}

pub(super) struct LoopContext {
    pub profile: Profile,
    pub settings: Settings,
    pub capture: SharedCapture,
    pub templates: TemplateStore,
    pub bus: EventBus,
    pub stats: Arc<Mutex<RunStats>>,
    pub lifecycle: Arc<Mutex<LoopStateMachine>>,
    pub cmd_rx: Receiver<LoopCommand>,
}

enum CaptureOutcome {
    Crops(Vec<RgbaImage>),
    /// Lock or capture exceeded the bound
    Overrun,
    /// One grab failed; try again next tick
    Transient(CaptureError),
    /// Stop the loop
    Fatal(CaptureError),
}

fn capture_rois(
    capture: &SharedCapture,
    monitor_index: u32,
    rois: &[Roi],
    bound: Duration,
) -> CaptureOutcome {
    let started = Instant::now();
    let Some(mut source) = capture.try_lock_for(bound) else {
        return CaptureOutcome::Overrun;
    };

    let mut crops = Vec::with_capacity(rois.len());
    for roi in rois {
        match source.grab(monitor_index, &roi.rect) {
            Ok(crop) => crops.push(crop),
            Err(err @ (CaptureError::Unavailable(_) | CaptureError::InvalidMonitor(_))) => {
                return CaptureOutcome::Fatal(err)
            }
            Err(err) => return CaptureOutcome::Transient(err),
        }
    }

    if started.elapsed() > bound {
        return CaptureOutcome::Overrun;
    }
    CaptureOutcome::Crops(crops)
}

/// Publishes events with non-decreasing timestamps and keeps the counters
struct Emitter {
    bus: EventBus,
    stats: Arc<Mutex<RunStats>>,
    kind: &'static str,
    last_ts: u64,
}

impl Emitter {
    fn stamp(&mut self) -> u64 {
        self.last_ts = self.last_ts.max(now_ms());
        self.last_ts
    }

    fn emit(&mut self, event: Event) {
        {
            let mut stats = self.stats.lock();
            stats.events_received += 1;
            stats.last_event_ts = Some(event.ts);
            if event.is_hit() {
                stats.last_hit_ts = Some(event.ts);
            }
        }
        self.bus.publish(&event);
    }

    fn reading(&mut self, reading: Reading) {
        let ts = self.stamp();
        let event = match reading {
            Reading::Percent(p) => Event::health_percent(ts, self.kind, p),
            Reading::Value(v) => Event::health_value(ts, self.kind, v),
        };
        self.emit(event);
    }
}

pub(super) fn run_detection_loop(ctx: LoopContext) {
    let LoopContext {
        profile,
        settings,
        capture,
        templates,
        bus,
        stats,
        lifecycle,
        cmd_rx,
    } = ctx;

    let tick = Duration::from_millis(profile.capture.tick_ms);
    let bound = settings.capture.bound(profile.capture.tick_ms);
    let monitor_index = profile.capture.monitor_index;
    let rois = capture_plan(&profile.detector);
    let kind = profile.detector.kind();

    let mut detector = ActiveDetector::from_config(&profile.detector, &settings);
    let mut gate = DebounceGate::new(profile.detector.cooldown_ms());
    let mut recorder = DebugRecorder::new(&settings.debug);
    let mut emitter = Emitter {
        bus,
        stats: Arc::clone(&stats),
        kind,
        last_ts: 0,
    };
    let mut latency = LatencyStats::new();
    let mut tick_no: u64 = 0;
    let mut capture_failures: u64 = 0;

    info!(
        "Detection loop running: profile='{}' detector={} tick={}ms monitor={}",
        profile.name, kind, profile.capture.tick_ms, monitor_index
    );

    loop {
        match cmd_rx.try_recv() {
            Ok(LoopCommand::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let t0 = Instant::now();
        let snapshot = templates.snapshot();
        let mut timing = TickTiming::new();

        // Ok(true) marks an abandoned tick, Err stops the loop
        let tick_result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<bool, CaptureError> {
            match capture_rois(&capture, monitor_index, &rois, bound) {
                CaptureOutcome::Crops(crops) => {
                    timing.capture_us = micros(t0.elapsed());

                    let t_eval = Instant::now();
                    let outcome = detector.evaluate(&crops, &snapshot);
                    timing.evaluate_us = micros(t_eval.elapsed());

                    let t_emit = Instant::now();
                    handle_outcome(
                        &outcome,
                        &crops,
                        &rois,
                        kind,
                        &mut gate,
                        &mut emitter,
                        &recorder,
                    );
                    timing.emit_us = micros(t_emit.elapsed());

                    if recorder.saving() {
                        for (roi, crop) in rois.iter().zip(&crops) {
                            recorder.save_example(kind, &roi.name, crop);
                        }
                    }
                    if recorder.should_log(tick_no) {
                        info!("[{}] tick={} {}", kind, tick_no, outcome.signal.summary());
                    }
                }
                CaptureOutcome::Overrun => return Ok(true),
                CaptureOutcome::Transient(err) => {
                    capture_failures += 1;
                    if capture_failures % CAPTURE_WARN_EVERY == 1 {
                        warn!("Capture failed ({} so far): {}", capture_failures, err);
                    } else {
                        debug!("Capture failed: {}", err);
                    }
                }
                CaptureOutcome::Fatal(err) => return Err(err),
            }
            Ok(false)
        }));

        let overrun = match tick_result {
            Ok(Ok(overrun)) => overrun,
            Ok(Err(err)) => {
                error!("Capture unavailable, stopping detection: {}", err);
                stop_with_error(&stats, &lifecycle, err.to_string());
                break;
            }
            Err(payload) => {
                let message = format!("detection tick panicked: {}", panic_message(payload.as_ref()));
                error!("{}", message);
                stop_with_error(&stats, &lifecycle, message);
                break;
            }
        };

        let elapsed = t0.elapsed();
        timing.total_us = micros(elapsed);
        latency.add(timing);
        tick_no += 1;

        let overruns = {
            let mut s = stats.lock();
            s.ticks += 1;
            if overrun || elapsed >= tick {
                s.overruns += 1;
                Some(s.overruns)
            } else {
                None
            }
        };

        match overruns {
            Some(n) => {
                if n % OVERRUN_WARN_EVERY == 0 {
                    warn!("{} tick overruns so far (tick={}ms)", n, profile.capture.tick_ms);
                } else {
                    debug!("Tick overrun: {:?} >= {:?}", elapsed, tick);
                }
                if elapsed < tick && wait_or_stop(&cmd_rx, tick - elapsed) {
                    break;
                }
            }
            None => {
                if wait_or_stop(&cmd_rx, tick - elapsed) {
                    break;
                }
            }
        }
    }

    latency.log_report(profile.capture.tick_ms);
    info!("Detection loop stopped after {} ticks", tick_no);
}

fn stop_with_error(stats: &Mutex<RunStats>, lifecycle: &Mutex<LoopStateMachine>, message: String) {
    stats.lock().last_error = Some(message);
    lifecycle.lock().mark_idle();
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Sleep for `timeout`; true when a stop was requested
fn wait_or_stop(cmd_rx: &Receiver<LoopCommand>, timeout: Duration) -> bool {
    match cmd_rx.recv_timeout(timeout) {
        Ok(LoopCommand::Stop) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

fn handle_outcome(
    outcome: &Outcome,
    crops: &[RgbaImage],
    rois: &[Roi],
    kind: &'static str,
    gate: &mut DebounceGate,
    emitter: &mut Emitter,
    recorder: &DebugRecorder,
) {
    if let Some(reading) = outcome.reading {
        emitter.reading(reading);
    }

    let Some(hit) = &outcome.hit else {
        return;
    };
    if !gate.should_forward_at(Instant::now()) {
        debug!("[{}] hit suppressed by cooldown", kind);
        return;
    }

    let ts = emitter.stamp();
    let mut event = Event::hit(ts, kind, hit.intensity)
        .with_direction(hit.direction)
        .with_percent(hit.percent)
        .with_value(hit.value);
    if let Some(roi) = &hit.roi {
        event = event.with_roi(roi.clone());
    }
    debug!(
        "[{}] hit intensity={:.3} roi={:?} direction={:?}",
        kind, hit.intensity, hit.roi, hit.direction
    );
    emitter.emit(event);

    if recorder.saving() {
        let idx = hit
            .roi
            .as_ref()
            .and_then(|name| rois.iter().position(|r| &r.name == name))
            .unwrap_or(0);
        if let (Some(roi), Some(crop)) = (rois.get(idx), crops.get(idx)) {
            recorder.save(&format!("{kind}_hit"), &roi.name, crop);
        }
    }
}
