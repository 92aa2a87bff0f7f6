use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::UnboundedSender;

use crate::input::ActivitySource;
use crate::models::episode::IdleEpisode;
use crate::models::session::SessionRecord;
use crate::tracker::episodes::EpisodeLog;
use crate::tracker::error::TrackerError;

pub const DEFAULT_IDLE_THRESHOLD_SECS: i64 = 20;
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idle { opened_at: DateTime<Local> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { threshold_secs: i64 },
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(SessionRecord),
    NotRunning,
}

/// Point-in-time view of the tracker, taken under a single read lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub active: bool,
    pub is_idle: bool,
    /// Silence since the last activity, whether or not the threshold was crossed.
    pub idle_seconds: i64,
    pub last_activity_at: DateTime<Local>,
    pub score: u8,
    pub total_idle_secs: f64,
    pub episode_count: usize,
    pub threshold_secs: i64,
    pub started_at: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
    /// Backdated start of the open idle episode, if any.
    pub idle_since: Option<DateTime<Local>>,
}

#[derive(Debug)]
struct TrackerState {
    active: bool,
    threshold_secs: i64,
    last_activity_at: DateTime<Local>,
    started_at: Option<DateTime<Local>>,
    stopped_at: Option<DateTime<Local>>,
    idle: IdleState,
    episodes: EpisodeLog,
}

/// Idle/activity state machine shared by the ticker, the input hook and the
/// request layer.
///
/// Every mutation goes through one write lock. Completed sessions are handed
/// to the persistence channel only after that lock has been released.
pub struct IdleTracker {
    state: RwLock<TrackerState>,
    source: Arc<dyn ActivitySource>,
    persistence: Mutex<Option<UnboundedSender<SessionRecord>>>,
}

fn validate_threshold(threshold_secs: i64) -> Result<i64, TrackerError> {
    if threshold_secs > 0 {
        Ok(threshold_secs)
    } else {
        Err(TrackerError::InvalidThreshold(threshold_secs))
    }
}

/// Episode count as stored in the `idle_events` column, saturating at `i32::MAX`.
fn idle_events_column(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

impl IdleTracker {
    pub fn new(
        threshold_secs: i64,
        source: Arc<dyn ActivitySource>,
        persistence: Option<UnboundedSender<SessionRecord>>,
    ) -> Result<Self, TrackerError> {
        let threshold_secs = validate_threshold(threshold_secs)?;
        Ok(Self {
            state: RwLock::new(TrackerState {
                active: false,
                threshold_secs,
                last_activity_at: Local::now(),
                started_at: None,
                stopped_at: None,
                idle: IdleState::Active,
                episodes: EpisodeLog::new(),
            }),
            source,
            persistence: Mutex::new(persistence),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.read().active
    }

    #[cfg(test)]
    pub fn idle_state(&self) -> IdleState {
        self.read().idle
    }

    pub fn start(&self, threshold_secs: Option<i64>, now: DateTime<Local>) -> Result<StartOutcome, TrackerError> {
        let threshold_secs = threshold_secs.map(validate_threshold).transpose()?;

        let mut state = self.write();
        if state.active {
            log::debug!("Start requested while a session is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(threshold_secs) = threshold_secs {
            state.threshold_secs = threshold_secs;
        }
        state.active = true;
        state.last_activity_at = now;
        state.started_at = Some(now);
        state.stopped_at = None;
        state.idle = IdleState::Active;
        state.episodes.clear();
        self.source.arm();

        log::info!(
            "Tracking started at {} (idle threshold {}s)",
            now.format(DISPLAY_FORMAT),
            state.threshold_secs
        );
        Ok(StartOutcome::Started {
            threshold_secs: state.threshold_secs,
        })
    }

    /// Ends the running session. An open idle episode is closed as of `now`
    /// before the score is computed.
    ///
    /// If that final episode would be empty or inverted the session is still
    /// stopped and persisted without it, and the violation is returned.
    pub fn stop(&self, now: DateTime<Local>) -> Result<StopOutcome, TrackerError> {
        let (record, violation) = {
            let mut state = self.write();
            if !state.active {
                log::debug!("Stop requested while no session is running");
                return Ok(StopOutcome::NotRunning);
            }

            state.active = false;
            state.stopped_at = Some(now);
            self.source.disarm();

            let mut violation = None;
            if let IdleState::Idle { opened_at } = state.idle {
                state.idle = IdleState::Active;
                match IdleEpisode::close(opened_at, now) {
                    Ok(episode) => state.episodes.push(episode),
                    Err(e) => violation = Some(e),
                }
            }

            let record = SessionRecord {
                id: None,
                start_time: state.started_at.unwrap_or(now),
                stop_time: now,
                procrastination_score: i32::from(state.episodes.score()),
                total_idle_time: state.episodes.total_idle_secs(),
                idle_events: idle_events_column(state.episodes.len()),
            };
            (record, violation)
        };

        log::info!(
            "Tracking stopped at {}: score={}, idle={:.2}s over {} episodes",
            now.format(DISPLAY_FORMAT),
            record.procrastination_score,
            record.total_idle_time,
            record.idle_events
        );
        self.dispatch(&record);

        match violation {
            Some(e) => {
                log::error!("Dropped final idle episode on stop: {}", e);
                Err(e)
            }
            None => Ok(StopOutcome::Stopped(record)),
        }
    }

    /// Clears the episode log without touching the run state.
    pub fn reset(&self) {
        let mut state = self.write();
        if state.episodes.is_empty() {
            return;
        }
        let dropped = state.episodes.len();
        state.episodes.clear();
        log::info!("Cleared {} idle episodes", dropped);
    }

    /// Changes the threshold used by the next session.
    pub fn configure(&self, threshold_secs: i64) -> Result<(), TrackerError> {
        let threshold_secs = validate_threshold(threshold_secs)?;
        let mut state = self.write();
        if state.active {
            return Err(TrackerError::SessionRunning);
        }
        state.threshold_secs = threshold_secs;
        Ok(())
    }

    pub fn on_activity(&self, at: DateTime<Local>) -> Result<(), TrackerError> {
        let mut state = self.write();
        if !state.active {
            return Ok(());
        }
        // Out-of-order delivery.
        if at < state.last_activity_at {
            log::debug!("Ignoring stale activity at {}", at.format(DISPLAY_FORMAT));
            return Ok(());
        }
        state.last_activity_at = at;

        if let IdleState::Idle { opened_at } = state.idle {
            state.idle = IdleState::Active;
            if at > opened_at {
                let episode = IdleEpisode::close(opened_at, at)?;
                log::info!(
                    "Activity resumed at {}, idle duration: {:.2} sec",
                    at.format(DISPLAY_FORMAT),
                    episode.duration_secs
                );
                state.episodes.push(episode);
            } else {
                // The event predates the threshold crossing; activity wins.
                log::debug!("Retracted idle state opened at {}", opened_at.format(DISPLAY_FORMAT));
            }
        }
        Ok(())
    }

    /// Periodic idle check. Returns true when this tick opened an idle episode.
    pub fn tick(&self, now: DateTime<Local>) -> bool {
        let mut state = self.write();
        if !state.active || state.idle != IdleState::Active {
            return false;
        }

        let threshold = Duration::seconds(state.threshold_secs);
        if now.signed_duration_since(state.last_activity_at) <= threshold {
            return false;
        }

        let opened_at = state.last_activity_at + threshold;
        state.idle = IdleState::Idle { opened_at };
        log::info!("Idle detected from {}", opened_at.format(DISPLAY_FORMAT));
        true
    }

    pub fn snapshot(&self, now: DateTime<Local>) -> Snapshot {
        let state = self.read();
        let idle_seconds = if state.active {
            now.signed_duration_since(state.last_activity_at).num_seconds().max(0)
        } else {
            0
        };
        let idle_since = match state.idle {
            IdleState::Idle { opened_at } => Some(opened_at),
            IdleState::Active => None,
        };
        Snapshot {
            active: state.active,
            is_idle: idle_since.is_some(),
            idle_seconds,
            last_activity_at: state.last_activity_at,
            score: state.episodes.score(),
            total_idle_secs: state.episodes.total_idle_secs(),
            episode_count: state.episodes.len(),
            threshold_secs: state.threshold_secs,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
            idle_since,
        }
    }

    pub fn episodes(&self) -> Vec<IdleEpisode> {
        self.read().episodes.episodes().to_vec()
    }

    /// Drops the persistence channel so the writer can drain and exit.
    /// Sessions stopped afterwards are only logged.
    pub fn close_persistence(&self) {
        self.persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn dispatch(&self, record: &SessionRecord) {
        let persistence = self.persistence.lock().unwrap_or_else(PoisonError::into_inner);
        match persistence.as_ref() {
            Some(tx) => {
                if tx.send(record.clone()).is_err() {
                    log::error!(
                        "Session writer has shut down; session {} -> {} was not saved",
                        record.start_time.format(DISPLAY_FORMAT),
                        record.stop_time.format(DISPLAY_FORMAT)
                    );
                }
            }
            None => log::warn!(
                "No database configured; session {} -> {} (score={}) was not saved",
                record.start_time.format(DISPLAY_FORMAT),
                record.stop_time.format(DISPLAY_FORMAT),
                record.procrastination_score
            ),
        }
    }
}
