/// Detection loop lifecycle
///
/// `Idle -> Starting -> Running -> Stopping -> Idle`. `Starting` covers
/// profile validation and the capture check; `Stopping` covers the wait for
/// the in-flight tick and the loop thread.
use std::time::{Duration, Instant};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LoopState {
    #[default]
    Idle,

    Starting,

    Running { since: Instant },

    Stopping,
}

impl LoopState {
    pub fn is_idle(&self) -> bool {
        matches!(self, LoopState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, LoopState::Running { .. })
    }

    /// Time since the loop started ticking
    pub fn running_duration(&self) -> Option<Duration> {
        match self {
            LoopState::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    AlreadyRunning,
    NotRunning,
    InTransition,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::AlreadyRunning => write!(f, "Detection is already running"),
            TransitionError::NotRunning => write!(f, "Detection is not running"),
            TransitionError::InTransition => {
                write!(f, "Cannot perform action during state transition")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Guarded transitions between `LoopState`s
#[derive(Debug, Default)]
pub struct LoopStateMachine {
    state: LoopState,
}

impl LoopStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Idle -> Starting
    ///
    /// Any non-idle state rejects with `AlreadyRunning`: a second `start()`
    /// without an intervening `stop()` must fail, even mid-transition.
    pub fn begin_start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LoopState::Idle => {
                self.state = LoopState::Starting;
                Ok(())
            }
            _ => Err(TransitionError::AlreadyRunning),
        }
    }

    /// Starting -> Running
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LoopState::Starting => {
                self.state = LoopState::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(TransitionError::InTransition),
        }
    }

    /// Starting -> Idle, when validation or the capture check fails
    pub fn abort_start(&mut self) {
        if self.state == LoopState::Starting {
            self.state = LoopState::Idle;
        }
    }

    /// Running -> Stopping
    pub fn begin_stop(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LoopState::Running { .. } => {
                self.state = LoopState::Stopping;
                Ok(())
            }
            LoopState::Idle => Err(TransitionError::NotRunning),
            _ => Err(TransitionError::InTransition),
        }
    }

    /// Any -> Idle, once the loop thread has exited
    pub fn mark_idle(&mut self) {
        self.state = LoopState::Idle;
    }
}
