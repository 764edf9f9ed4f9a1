use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use image::RgbaImage;
use sysinfo::System;

use screen_health::calibration;
use screen_health::capture::{list_monitors, shared, XcapSource};
use screen_health::config::{logs_dir, Settings};
use screen_health::engine::DetectionEngine;
use screen_health::error::AppResult;
use screen_health::ocr::templates::TemplateStore;
use screen_health::profile::{DetectorConfig, Profile};

const LOG_TARGET_STARTUP: &str = "screen_health::startup";

const USAGE: &str = "\
Usage: screen-health <command>

Commands:
  run <profile.json> [--seconds N]          Run detection, print events as JSON lines
  test <profile.json> <frame.png> [--out DIR]
                                            Evaluate a profile once on a still frame
  learn <profile.json> <frame.png> <truth> [--out FILE]
                                            Learn digit templates from a still frame
  resize-templates <profile.json> <w> <h>   Change template size (clears learned digits)
  monitors                                  List monitors";

/// Initialize tracing with file rotation
///
/// Logs are written to `<config_dir>/ScreenHealth/logs/screen-health.YYYY-MM-DD.log`.
/// Debug builds also log to stderr so stdout stays machine readable.
fn initialize_tracing() {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = logs_dir().unwrap_or_else(|_| PathBuf::from("logs"));
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let file_appender = rolling::daily(&log_dir, "screen-health.log");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!("Log directory: {}", log_dir.display());
}

fn log_runtime_environment() {
    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());

    tracing::info!(
        target: LOG_TARGET_STARTUP,
        "Starting screen-health v{} ({})",
        version,
        std::env::consts::ARCH
    );
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);

    match list_monitors() {
        Ok(monitors) => {
            tracing::info!(target: LOG_TARGET_STARTUP, "Monitors: {} detected", monitors.len());
            for monitor in &monitors {
                tracing::debug!(target: LOG_TARGET_STARTUP, "  {}", monitor);
            }
        }
        Err(e) => tracing::warn!(target: LOG_TARGET_STARTUP, "Monitor enumeration failed: {}", e),
    }
}

fn main() {
    initialize_tracing();
    log_runtime_environment();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = dispatch(&args) {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(args: &[String]) -> AppResult<()> {
    let (command, rest) = match args.split_first() {
        Some((command, rest)) => (command.as_str(), rest),
        None => {
            println!("{USAGE}");
            return Ok(());
        }
    };
    let (positional, options) = split_options(rest)?;

    match (command, positional.as_slice()) {
        ("run", [profile]) => {
            let seconds = options
                .get("--seconds")
                .map(|s| s.parse::<u64>())
                .transpose()
                .context("--seconds must be a whole number")?;
            run(Path::new(profile), seconds.map(Duration::from_secs))
        }
        ("test", [profile, frame]) => test(
            Path::new(profile),
            Path::new(frame),
            options.get("--out").map(PathBuf::from),
        ),
        ("learn", [profile, frame, truth]) => learn(
            Path::new(profile),
            Path::new(frame),
            truth,
            options.get("--out").map(PathBuf::from),
        ),
        ("resize-templates", [profile, width, height]) => {
            let width: u32 = width.parse().context("width must be a whole number")?;
            let height: u32 = height.parse().context("height must be a whole number")?;
            resize_templates(Path::new(profile), width, height)
        }
        ("monitors", []) => {
            for monitor in list_monitors()? {
                println!("{}", monitor);
            }
            Ok(())
        }
        ("help" | "--help" | "-h", _) => {
            println!("{USAGE}");
            Ok(())
        }
        _ => bail!("Invalid arguments\n\n{USAGE}"),
    }
}

/// Split `--name value` pairs from positional arguments
fn split_options(
    args: &[String],
) -> AppResult<(Vec<String>, std::collections::HashMap<String, String>)> {
    let mut positional = Vec::new();
    let mut options = std::collections::HashMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            let value = iter
                .next()
                .with_context(|| format!("{} needs a value", arg))?;
            options.insert(arg.clone(), value.clone());
        } else {
            positional.push(arg.clone());
        }
    }
    Ok((positional, options))
}

fn load_profile(path: &Path) -> AppResult<Profile> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    Profile::from_json(&json).with_context(|| format!("Invalid profile {}", path.display()))
}

fn save_profile(profile: &Profile, path: &Path) -> AppResult<()> {
    let json = profile.to_json()?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Profile written to {}", path.display());
    Ok(())
}

fn load_frame(path: &Path) -> AppResult<RgbaImage> {
    let frame = image::open(path)
        .with_context(|| format!("Failed to open frame {}", path.display()))?
        .to_rgba8();
    Ok(frame)
}

fn run(profile_path: &Path, duration: Option<Duration>) -> AppResult<()> {
    let profile = load_profile(profile_path)?;
    let settings = Settings::load().context("Failed to load settings")?;
    let engine = DetectionEngine::new(shared(XcapSource::new()), settings);

    let (events, _subscriber) = engine.subscribe();
    engine.start(profile).context("Failed to start detection")?;

    let started = Instant::now();
    loop {
        let wait = match duration {
            Some(total) => match total.checked_sub(started.elapsed()) {
                Some(left) => left.min(Duration::from_millis(500)),
                None => break,
            },
            None => Duration::from_millis(500),
        };
        if let Ok(event) = events.recv_timeout(wait) {
            println!("{}", serde_json::to_string(&event)?);
        }
        if !engine.status().running {
            break;
        }
    }

    let status = engine.stop();
    eprintln!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(error) = status.last_error {
        bail!("Detection stopped: {}", error);
    }
    Ok(())
}

fn test(profile_path: &Path, frame_path: &Path, out_dir: Option<PathBuf>) -> AppResult<()> {
    let profile = load_profile(profile_path)?;
    let frame = load_frame(frame_path)?;
    if let Some(dir) = &out_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let settings = Settings::load().context("Failed to load settings")?;
    let report = screen_health::engine::report::run_test(&profile, &frame, &settings, out_dir.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn learn(profile_path: &Path, frame_path: &Path, truth: &str, out: Option<PathBuf>) -> AppResult<()> {
    let mut profile = load_profile(profile_path)?;
    let frame = load_frame(frame_path)?;

    let config = calibration::health_number_config(&profile)?;
    let store = TemplateStore::new(config.templates.clone());
    calibration::learn(&store, &frame, config, truth)?;
    let report = calibration::test(&frame, config, &store.snapshot());
    println!("{}", serde_json::to_string_pretty(&report)?);

    store_templates(&mut profile, &store);
    save_profile(&profile, out.as_deref().unwrap_or(profile_path))
}

fn resize_templates(profile_path: &Path, width: u32, height: u32) -> AppResult<()> {
    let mut profile = load_profile(profile_path)?;
    let config = calibration::health_number_config(&profile)?;
    let store = TemplateStore::new(config.templates.clone());
    calibration::resize_templates(&store, width, height)?;

    store_templates(&mut profile, &store);
    save_profile(&profile, profile_path)
}

fn store_templates(profile: &mut Profile, store: &TemplateStore) {
    if let DetectorConfig::HealthNumber(cfg) = &mut profile.detector {
        cfg.templates = (*store.snapshot()).clone();
    }
}
