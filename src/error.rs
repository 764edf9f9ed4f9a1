use thiserror::Error;

/// Library-level errors using thiserror for structured error handling.
///
/// These errors represent domain-specific failures of the detection engine.
/// Application code (the CLI, settings loading) wraps them with anyhow context.

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Permission denied, unsupported session, or no usable display.
    /// Never retried automatically.
    #[error("Screen capture unavailable: {0}")]
    Unavailable(String),

    /// The shared capture source is held by another caller. Safe to retry.
    #[error("Screen capture busy")]
    Busy,

    #[error("Invalid monitor index: {0}")]
    InvalidMonitor(u32),

    #[error("Screen capture failed")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid profile: {0}")]
    Invalid(String),

    #[error("Template '{digit}' has {actual} bits, expected {expected}")]
    TemplateMismatch {
        digit: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to parse profile")]
    Parse(#[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Detection already running")]
    AlreadyRunning,

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Failed to start detection thread")]
    ThreadSpawnFailed(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Ground truth '{truth}' has {actual} characters, expected {expected}")]
    GroundTruthLength {
        truth: String,
        expected: usize,
        actual: usize,
    },

    #[error("Ground truth must not contain whitespace: '{0}'")]
    InvalidGroundTruth(String),

    #[error("ROI crop gave {actual} slices, expected {expected}")]
    UnreadableCrop { expected: usize, actual: usize },

    #[error("Profile detector is '{0}', calibration needs 'health_number'")]
    WrongDetector(&'static str),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Type alias for application Results using anyhow for context chaining
pub type AppResult<T> = anyhow::Result<T>;
