use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::tracker::engine::IdleTracker;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Drives [`IdleTracker::tick`] for the lifetime of the process. Ticks run
/// whether or not a session is active; the tracker ignores them when stopped.
pub fn spawn_ticker(tracker: Arc<IdleTracker>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        // A stalled runtime should not replay a burst of ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracker.tick(Local::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testing::CountingSource;

    #[tokio::test]
    async fn test_ticker_opens_idle_after_threshold() {
        let tracker = Arc::new(IdleTracker::new(1, Arc::new(CountingSource::default()), None).unwrap());
        tracker.start(None, Local::now()).unwrap();

        let handle = spawn_ticker(Arc::clone(&tracker), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(1600)).await;
        handle.abort();

        assert!(tracker.snapshot(Local::now()).is_idle);
    }

    #[tokio::test]
    async fn test_ticker_is_harmless_without_session() {
        let tracker = Arc::new(IdleTracker::new(1, Arc::new(CountingSource::default()), None).unwrap());

        let handle = spawn_ticker(Arc::clone(&tracker), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        let snapshot = tracker.snapshot(Local::now());
        assert!(!snapshot.active);
        assert!(!snapshot.is_idle);
    }
}
