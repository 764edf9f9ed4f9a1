/// Detection module
///
/// Turns ROI crops into signals, hit candidates and readings.
///
/// ## Architecture
///
/// ```text
/// ActiveDetector
///   ├── RednessDetector       (red-pixel fraction per ROI)
///   ├── HealthBarDetector     (fill percent along the longer axis)
///   └── HealthNumberDetector  (template OCR + stability gate)
///            │
///            ▼
///        Outcome { signal, hit?, reading? }
///            │
///            ▼
///      DebounceGate (hits only)
/// ```

pub mod debounce;
pub mod detector;
pub mod health_bar;
pub mod health_number;
pub mod redness;

pub use debounce::DebounceGate;
pub use detector::{capture_plan, ActiveDetector, Hit, Outcome, Reading, Signal};
pub use health_bar::HealthBarDetector;
pub use health_number::HealthNumberDetector;
pub use redness::RednessDetector;
