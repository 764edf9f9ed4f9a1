use std::time::{Duration, Instant};

/// Per-detector hit rate limiter
///
/// Forwards the first hit, then suppresses hits until `cooldown` has elapsed
/// since the last forwarded one. Suppressed hits are dropped, not queued, and
/// do not extend the cooldown. Uses the monotonic clock only.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    last_forwarded: Option<Instant>,
    cooldown: Duration,
}

impl DebounceGate {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            last_forwarded: None,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether a hit observed at `now` is forwarded
    pub fn should_forward_at(&mut self, now: Instant) -> bool {
        match self.last_forwarded {
            Some(last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                self.last_forwarded = Some(now);
                true
            }
        }
    }

    pub fn should_forward(&mut self) -> bool {
        self.should_forward_at(Instant::now())
    }

    pub fn reset(&mut self) {
        self.last_forwarded = None;
    }
}
