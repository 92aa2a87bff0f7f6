use chrono::{DateTime, Local};
use thiserror::Error;

/// Failures of the tracking engine.
///
/// Starting an already running session or stopping an idle one are not
/// errors; see [`StartOutcome`](super::engine::StartOutcome) and
/// [`StopOutcome`](super::engine::StopOutcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("idle threshold must be a positive number of seconds, got {0}")]
    InvalidThreshold(i64),

    #[error("idle threshold cannot change while a session is running")]
    SessionRunning,

    /// An idle episode would end at or before its start. Only a clock jump or
    /// a locking bug can produce this.
    #[error("idle episode would end at {end} but started at {start}")]
    InvariantViolation {
        start: DateTime<Local>,
        end: DateTime<Local>,
    },
}
