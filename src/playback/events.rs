use std::time::Duration;

/// Progress notifications for the presentation layer. Advisory only:
/// ignoring them never changes replay behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StepStarted {
        index: usize,
        total: usize,
        description: String,
    },
    /// Emitted repeatedly during waits and page settles; a final event
    /// with `remaining == 0` closes the countdown.
    Countdown { remaining: Duration },
    Typing { chars: usize, masked: bool },
    Completed { name: String },
    Cancelled { reason: String },
}
