// Engine lifecycle tests with a scripted in-memory capture source

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use screen_health::capture::{crop, shared, CaptureSource};
use screen_health::config::Settings;
use screen_health::engine::DetectionEngine;
use screen_health::error::{CalibrationError, CaptureError, EngineError, ProfileError};
use screen_health::messaging::{Event, EventKind};
use screen_health::ocr::templates::DigitTemplates;
use screen_health::profile::{
    CaptureSettings, DetectorConfig, HealthBarConfig, HealthBarMode, HealthNumberConfig,
    NormalizedRect, PercentDrop, Profile, Readout, RednessConfig, Rgb, Roi, ValueDrop,
};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const FILLED: Rgba<u8> = Rgba([220, 40, 40, 255]);
const EMPTY: Rgba<u8> = Rgba([40, 40, 40, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const INK: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Serves whatever frame the test put on screen; `None` means the display
/// went away
#[derive(Clone)]
struct ScriptedScreen {
    frame: Arc<Mutex<Option<RgbaImage>>>,
    grabs: Arc<AtomicU64>,
    grab_delay_ms: Arc<AtomicU64>,
    crash: Arc<AtomicBool>,
}

impl ScriptedScreen {
    fn showing(frame: RgbaImage) -> Self {
        Self {
            frame: Arc::new(Mutex::new(Some(frame))),
            grabs: Arc::new(AtomicU64::new(0)),
            grab_delay_ms: Arc::new(AtomicU64::new(0)),
            crash: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every grab takes at least `ms`
    fn slow_down(&self, ms: u64) {
        self.grab_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// The next grabs panic
    fn crash_on_grab(&self) {
        self.crash.store(true, Ordering::SeqCst);
    }

    fn show(&self, frame: RgbaImage) {
        *self.frame.lock() = Some(frame);
    }

    fn disconnect(&self) {
        *self.frame.lock() = None;
    }

    fn grabs(&self) -> u64 {
        self.grabs.load(Ordering::SeqCst)
    }
}

impl CaptureSource for ScriptedScreen {
    fn grab(&mut self, _monitor_index: u32, rect: &NormalizedRect) -> Result<RgbaImage, CaptureError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        if self.crash.load(Ordering::SeqCst) {
            panic!("scripted grab failure");
        }
        let delay = self.grab_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        match self.frame.lock().as_ref() {
            Some(frame) => Ok(crop(frame, rect).1),
            None => Err(CaptureError::Unavailable("display disconnected".into())),
        }
    }

    fn frame_size(&mut self, _monitor_index: u32) -> Result<(u32, u32), CaptureError> {
        self.frame
            .lock()
            .as_ref()
            .map(|f| f.dimensions())
            .ok_or_else(|| CaptureError::Unavailable("display disconnected".into()))
    }
}

fn engine_with(screen: &ScriptedScreen) -> DetectionEngine {
    DetectionEngine::new(shared(screen.clone()), Settings::default())
}

fn redness_profile(tick_ms: u64, cooldown_ms: u64) -> Profile {
    Profile::new(
        "vignette",
        CaptureSettings {
            monitor_index: 1,
            tick_ms,
        },
        DetectorConfig::RednessRois(RednessConfig {
            rois: vec![Roi::new("center", NormalizedRect::new(0.25, 0.25, 0.5, 0.5))],
            min_score: 0.35,
            cooldown_ms,
        }),
    )
}

fn bar_profile() -> Profile {
    Profile::new(
        "hp bar",
        CaptureSettings {
            monitor_index: 1,
            tick_ms: 20,
        },
        DetectorConfig::HealthBar(HealthBarConfig {
            roi: Roi::new("bar", NormalizedRect::full()),
            mode: HealthBarMode::ColorSampling,
            filled_rgb: Some(Rgb(220, 40, 40)),
            empty_rgb: Some(Rgb(40, 40, 40)),
            tolerance_l1: 120,
            fallback_mode: Default::default(),
            fallback_min: 0.5,
            hit_on_decrease: PercentDrop {
                min_drop: 0.02,
                cooldown_ms: 150,
            },
        }),
    )
}

fn bar_frame(empty: u32) -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(100, 4, FILLED);
    for x in (100 - empty)..100 {
        for y in 0..4 {
            frame.put_pixel(x, y, EMPTY);
        }
    }
    frame
}

/// Receive events until `pred` matches or `timeout` elapses
fn wait_for(events: &Receiver<Event>, timeout: Duration, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    seen
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_scenario_d_short_tick_is_invalid() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, RED));
    let engine = engine_with(&screen);

    let err = engine.start(redness_profile(5, 200)).unwrap_err();
    assert!(matches!(err, EngineError::Profile(ProfileError::Invalid(_))));

    let status = engine.status();
    assert!(!status.running);
    assert_eq!(status.profile_id, None);
    assert_eq!(screen.grabs(), 0);
}

#[test]
fn test_scenario_e_second_start_is_rejected() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, BLACK));
    let engine = engine_with(&screen);

    let status = engine.start(redness_profile(20, 200)).unwrap();
    assert!(status.running);
    assert_eq!(status.profile_id.as_deref(), Some("vignette"));

    let err = engine.start(redness_profile(20, 200)).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning));

    let stopped = engine.stop();
    assert!(!stopped.running);
    // Idempotent
    assert!(!engine.stop().running);

    // Startable again after stop
    assert!(engine.start(redness_profile(20, 200)).unwrap().running);
    engine.stop();
}

#[test]
fn test_start_fails_before_state_change_when_capture_unavailable() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, RED));
    screen.disconnect();
    let engine = engine_with(&screen);

    let err = engine.start(redness_profile(20, 200)).unwrap_err();
    assert!(matches!(err, EngineError::Capture(CaptureError::Unavailable(_))));

    let status = engine.status();
    assert!(!status.running);
    assert_eq!(status.ticks, 0);
    assert_eq!(status.profile_id, None);
}

#[test]
fn test_forwarded_hits_respect_cooldown() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, RED));
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();

    engine.start(redness_profile(10, 200)).unwrap();
    std::thread::sleep(Duration::from_millis(700));
    let status = engine.stop();

    let hits: Vec<Event> = events.try_iter().filter(Event::is_hit).collect();
    assert!(hits.len() >= 2, "expected repeated hits, got {}", hits.len());
    assert!(hits.len() <= 4, "cooldown not enforced: {} hits", hits.len());
    for pair in hits.windows(2) {
        // Wall-clock ms are truncated; the gate itself runs on a monotonic clock
        assert!(pair[1].ts >= pair[0].ts + 199, "hits {:?}", pair);
    }
    for hit in &hits {
        assert_eq!(hit.intensity, Some(1.0));
        assert_eq!(hit.roi.as_deref(), Some("center"));
        assert_eq!(hit.source_detector, "redness_rois");
    }

    assert!(status.ticks > hits.len() as u64);
    assert_eq!(status.events_received, hits.len() as u64);
    assert_eq!(status.last_hit_ts, hits.last().map(|e| e.ts));
}

#[test]
fn test_health_bar_drop_emits_one_hit() {
    let screen = ScriptedScreen::showing(bar_frame(0));
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();

    engine.start(bar_profile()).unwrap();
    let before = wait_for(&events, Duration::from_secs(2), |e| {
        e.kind == EventKind::HealthPercent
    });
    assert_eq!(before.last().and_then(|e| e.percent), Some(1.0));

    screen.show(bar_frame(10));
    let after = wait_for(&events, Duration::from_secs(2), |e| {
        e.kind == EventKind::HealthPercent && e.percent.is_some_and(|p| p < 0.95)
    });
    std::thread::sleep(Duration::from_millis(100));
    engine.stop();

    let mut all = before;
    all.extend(after);
    all.extend(events.try_iter());

    let hits: Vec<&Event> = all.iter().filter(|e| e.is_hit()).collect();
    assert_eq!(hits.len(), 1);
    let hit = hits[0];
    assert!((hit.intensity.unwrap() - 0.1).abs() < 1e-3);
    assert!((hit.percent.unwrap() - 0.9).abs() < 1e-3);

    let last_percent = all
        .iter()
        .rev()
        .find_map(|e| (e.kind == EventKind::HealthPercent).then_some(e.percent))
        .flatten()
        .unwrap();
    assert!((last_percent - 0.9).abs() < 1e-3);

    // Event stream is ordered by timestamp
    assert!(all.windows(2).all(|w| w[0].ts <= w[1].ts));
}

#[test]
fn test_capture_loss_mid_run_stops_loop() {
    let screen = ScriptedScreen::showing(bar_frame(0));
    let engine = engine_with(&screen);

    engine.start(bar_profile()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.status().ticks > 2));

    screen.disconnect();
    assert!(wait_until(Duration::from_secs(2), || !engine.status().running));

    let status = engine.status();
    let error = status.last_error.expect("the failure is recorded");
    assert!(error.contains("display disconnected"), "{}", error);

    // No automatic retry
    let grabs = screen.grabs();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(screen.grabs(), grabs);

    // stop() after the loop died on its own is still fine
    assert!(!engine.stop().running);
}

fn glyph_seven() -> RgbaImage {
    // 4x4 '7' glyph, each bit drawn as a 2x2 block, three digits wide
    let bits = "1111000100010001";
    let mut frame = RgbaImage::from_pixel(24, 8, BLACK);
    for cell in 0..3 {
        for (i, bit) in bits.chars().enumerate() {
            if bit != '1' {
                continue;
            }
            let x = cell * 8 + (i as u32 % 4) * 2;
            let y = (i as u32 / 4) * 2;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                frame.put_pixel(x + dx, y + dy, INK);
            }
        }
    }
    frame
}

fn digits_profile(name: &str, templates: DigitTemplates) -> Profile {
    Profile::new(
        name,
        CaptureSettings {
            monitor_index: 1,
            tick_ms: 20,
        },
        DetectorConfig::HealthNumber(HealthNumberConfig {
            roi: Roi::new("hp", NormalizedRect::full()),
            digits: 3,
            invert: false,
            threshold: 0.5,
            scale: 1,
            readout: Readout {
                min: 0,
                max: 999,
                stable_reads: 2,
            },
            hit_on_decrease: ValueDrop {
                min_drop: 5,
                cooldown_ms: 200,
            },
            templates,
        }),
    )
}

fn number_templates(profile: &Profile) -> &DigitTemplates {
    match &profile.detector {
        DetectorConfig::HealthNumber(cfg) => &cfg.templates,
        other => panic!("not a health_number profile: {}", other.kind()),
    }
}

#[test]
fn test_templates_learned_while_running_are_picked_up() {
    let frame = glyph_seven();
    let screen = ScriptedScreen::showing(frame.clone());
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();

    let profile = digits_profile("digits", DigitTemplates::new(4, 4, 1));
    engine.start(profile.clone()).unwrap();

    // Nothing learned yet: no values
    assert!(wait_until(Duration::from_secs(2), || engine.status().ticks > 3));
    assert!(events.try_iter().all(|e| e.kind != EventKind::HealthValue));

    let snapshot = engine.learn(&profile, &frame, "777").unwrap();
    assert_eq!(snapshot.get('7'), Some("1111000100010001"));

    let seen = wait_for(&events, Duration::from_secs(2), |e| {
        e.kind == EventKind::HealthValue
    });
    assert_eq!(seen.last().and_then(|e| e.value), Some(777));

    let report = engine.test_digits(&profile, &frame).unwrap();
    assert_eq!(report.value, Some(777));

    let active = engine.active_profile().unwrap();
    assert_eq!(number_templates(&active).digits().len(), 1);
    engine.stop();
}

#[test]
fn test_learning_an_inactive_profile_uses_its_own_templates() {
    let frame = glyph_seven();
    let screen = ScriptedScreen::showing(frame.clone());
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();
    let mut profile = digits_profile("big digits", DigitTemplates::new(8, 12, 20));

    // Idle engine: the profile's 8x12 set is extended, not the engine's
    let learned = engine.learn(&profile, &frame, "777").unwrap();
    assert_eq!((learned.width(), learned.height()), (8, 12));
    assert_eq!(learned.hamming_max(), 20);
    assert_eq!(learned.get('7').map(str::len), Some(96));
    assert!(engine.templates().snapshot().is_empty());

    // Before saving, the profile still has nothing to read with
    assert_eq!(engine.test_digits(&profile, &frame).unwrap().value, None);

    // Saved back into the profile, the set survives a start
    if let DetectorConfig::HealthNumber(cfg) = &mut profile.detector {
        cfg.templates = (*learned).clone();
    }
    assert_eq!(engine.test_digits(&profile, &frame).unwrap().value, Some(777));

    engine.start(profile.clone()).unwrap();
    let seen = wait_for(&events, Duration::from_secs(2), |e| {
        e.kind == EventKind::HealthValue
    });
    assert_eq!(seen.last().and_then(|e| e.value), Some(777));
    let active = engine.active_profile().unwrap();
    assert_eq!(number_templates(&active), &*learned);
    engine.stop();

    // Running a different profile: still not the live store
    engine.start(redness_profile(20, 0)).unwrap();
    let other = digits_profile("other digits", DigitTemplates::new(5, 5, 3));
    let learned = engine.learn(&other, &frame, "777").unwrap();
    assert_eq!((learned.width(), learned.height()), (5, 5));
    assert!(engine.templates().snapshot().is_empty());
    engine.stop();
}

#[test]
fn test_dropping_engine_stops_loop() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, BLACK));
    {
        let engine = engine_with(&screen);
        engine.start(redness_profile(10, 0)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || screen.grabs() > 0));
    }
    let grabs = screen.grabs();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(screen.grabs(), grabs);
}

#[test]
fn test_calibrator_shares_capture_with_running_loop() {
    let screen = ScriptedScreen::showing(glyph_seven());
    let engine = engine_with(&screen);
    engine.start(redness_profile(20, 0)).unwrap();

    let frame = engine
        .calibrator()
        .grab_still_frame(1)
        .expect("the loop releases the capture lock between ticks");
    assert_eq!(frame.dimensions(), (24, 8));
    engine.stop();
}

#[test]
fn test_one_shot_test_does_not_start_the_loop() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, BLACK));
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();

    let frame = RgbaImage::from_pixel(40, 40, RED);
    let report = engine.test(&redness_profile(50, 200), &frame, None).unwrap();
    assert_eq!(report.detector, "redness_rois");
    assert_eq!(report.rois[0].rect.width, 20);
    assert!(report.hit.is_some());

    assert!(engine.test(&redness_profile(5, 200), &frame, None).is_err());
    assert!(!engine.status().running);
    assert_eq!(screen.grabs(), 0);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_slow_capture_counts_one_overrun_per_tick() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, RED));
    screen.slow_down(30);
    let engine = engine_with(&screen);
    let (events, _id) = engine.subscribe();

    engine.start(redness_profile(10, 0)).unwrap();
    assert!(wait_until(Duration::from_secs(3), || engine.status().ticks >= 3));
    let status = engine.stop();

    assert!(status.overruns >= 3, "{:?}", status);
    assert!(status.overruns <= status.ticks, "{:?}", status);
    // Every tick ran past the bound, so no crop was ever evaluated
    assert!(events.try_iter().all(|e| !e.is_hit()));
    assert_eq!(status.events_received, 0);
}

#[test]
fn test_start_rejects_templates_of_the_wrong_length() {
    let screen = ScriptedScreen::showing(glyph_seven());
    let engine = engine_with(&screen);

    let templates: DigitTemplates = serde_json::from_str(
        r#"{"width": 4, "height": 4, "hamming_max": 1, "digits": {"7": "0101"}}"#,
    )
    .unwrap();
    let err = engine.start(digits_profile("stale", templates)).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Profile(ProfileError::TemplateMismatch { expected: 16, actual: 4, .. })
    ));
    let status = engine.status();
    assert!(!status.running);
    assert_eq!(status.profile_id, None);
    assert_eq!(screen.grabs(), 0);
}

#[test]
fn test_calibrator_reports_busy_while_a_tick_holds_capture() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, BLACK));
    screen.slow_down(400);
    let engine = engine_with(&screen);

    engine.start(redness_profile(1000, 0)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || screen.grabs() >= 1));

    let err = engine.calibrator().grab_still_frame(1).unwrap_err();
    assert!(matches!(err, CalibrationError::Capture(CaptureError::Busy)), "{err}");
    engine.stop();
}

#[test]
fn test_panicking_tick_stops_the_loop_and_records_it() {
    let screen = ScriptedScreen::showing(RgbaImage::from_pixel(40, 40, BLACK));
    let engine = engine_with(&screen);

    engine.start(redness_profile(10, 0)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.status().ticks > 1));

    screen.crash_on_grab();
    assert!(wait_until(Duration::from_secs(2), || !engine.status().running));

    let error = engine.status().last_error.expect("the panic is recorded");
    assert!(error.contains("panicked"), "{}", error);
    assert!(error.contains("scripted grab failure"), "{}", error);

    // No retry after the panic; stop() still reaps the thread
    let grabs = screen.grabs();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(screen.grabs(), grabs);
    assert!(!engine.stop().running);
}
