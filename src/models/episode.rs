use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::tracker::error::TrackerError;

/// A closed interval during which the user was classified idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleEpisode {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub duration_secs: f64,
}

impl IdleEpisode {
    pub fn close(start: DateTime<Local>, end: DateTime<Local>) -> Result<Self, TrackerError> {
        if end <= start {
            return Err(TrackerError::InvariantViolation { start, end });
        }
        let duration_secs = end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
        Ok(Self {
            start,
            end,
            duration_secs,
        })
    }
}
