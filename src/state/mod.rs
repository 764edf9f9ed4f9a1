/// State management module
///
/// Lifecycle of the detection loop with guarded transitions.

pub mod process_state;

pub use process_state::{LoopState, LoopStateMachine, TransitionError};
