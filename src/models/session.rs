use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Summary of one completed tracking session, as stored in the `idle` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Option<i32>,
    pub start_time: DateTime<Local>,
    pub stop_time: DateTime<Local>,
    pub procrastination_score: i32,
    pub total_idle_time: f64, // in seconds
    pub idle_events: i32,
}
