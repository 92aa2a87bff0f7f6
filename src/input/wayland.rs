use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::input::{ActivitySource, ArmGate};
use crate::tracker::engine::IdleTracker;

const POLL_PERIOD: Duration = Duration::from_secs(1);
const FAILURE_LOG_EVERY: Duration = Duration::from_secs(60);

/// Wayland compositors do not expose global key events, so activity is
/// inferred from the GNOME Mutter idle monitor: an idle time shorter than the
/// poll period means the user did something since the last poll.
pub struct WaylandIdleProbe {
    gate: ArmGate,
    listening: AtomicBool,
}

impl Default for WaylandIdleProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl WaylandIdleProbe {
    pub fn new() -> Self {
        Self {
            gate: ArmGate::default(),
            listening: AtomicBool::new(false),
        }
    }
}

/// Idle time reported by the compositor, if it counts as fresh activity.
pub fn activity_offset(idle_ms: u64, poll_period: Duration) -> Option<ChronoDuration> {
    if u128::from(idle_ms) < poll_period.as_millis() {
        Some(ChronoDuration::milliseconds(idle_ms as i64))
    } else {
        None
    }
}

async fn mutter_idle_ms(connection: &zbus::Connection) -> Result<u64> {
    let response = connection
        .call_method(
            Some("org.gnome.Mutter.IdleMonitor"),
            "/org/gnome/Mutter/IdleMonitor/Core",
            Some("org.gnome.Mutter.IdleMonitor"),
            "GetIdletime",
            &(),
        )
        .await?;
    let idle_ms: u64 = response.body().deserialize()?;
    Ok(idle_ms)
}

impl ActivitySource for WaylandIdleProbe {
    fn listen(&self, tracker: Arc<IdleTracker>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let gate = self.gate.clone();

        tokio::spawn(async move {
            let connection = match zbus::Connection::session().await {
                Ok(connection) => connection,
                Err(e) => {
                    log::error!("Cannot reach the session bus, activity will not be tracked: {}", e);
                    return;
                }
            };

            let mut interval = time::interval(POLL_PERIOD);
            let mut last_failure_log: Option<Instant> = None;
            loop {
                interval.tick().await;
                if !gate.is_armed() {
                    continue;
                }
                match mutter_idle_ms(&connection).await {
                    Ok(idle_ms) => {
                        log::debug!("Wayland idle time: {} ms", idle_ms);
                        if let Some(offset) = activity_offset(idle_ms, POLL_PERIOD) {
                            if let Err(e) = tracker.on_activity(Local::now() - offset) {
                                log::error!("Failed to record activity: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        if last_failure_log.is_none_or(|at| at.elapsed() >= FAILURE_LOG_EVERY) {
                            log::warn!("Failed to query the Mutter idle monitor: {}", e);
                            last_failure_log = Some(Instant::now());
                        }
                    }
                }
            }
        });
    }

    fn arm(&self) {
        self.gate.arm();
    }

    fn disarm(&self) {
        self.gate.disarm();
    }
}
