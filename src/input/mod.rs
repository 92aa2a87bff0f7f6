pub mod keyboard;
pub mod wayland;

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::tracker::engine::IdleTracker;

/// Something that reports user input to an [`IdleTracker`].
///
/// The tracker arms the source when a session starts and disarms it when the
/// session stops; a disarmed source must not call into the tracker.
pub trait ActivitySource: Send + Sync {
    /// Begins delivering events to `tracker`. Called once at startup.
    fn listen(&self, tracker: Arc<IdleTracker>);
    fn arm(&self);
    fn disarm(&self);
}

/// Shared on/off switch between a source and its listener thread or task.
#[derive(Debug, Clone, Default)]
pub struct ArmGate(Arc<AtomicBool>);

impl ArmGate {
    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn is_wayland() -> bool {
    #[cfg(target_os = "linux")]
    {
        env::var("WAYLAND_DISPLAY").is_ok()
            || env::var("XDG_SESSION_TYPE").map(|s| s == "wayland").unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Picks the input source for the current desktop session.
pub fn detect_source(include_pointer: bool) -> Arc<dyn ActivitySource> {
    if is_wayland() {
        log::info!("Wayland detected - using the Mutter idle monitor for activity");
        Arc::new(wayland::WaylandIdleProbe::new())
    } else {
        log::info!("Using global input hook for activity (pointer events: {})", include_pointer);
        Arc::new(keyboard::InputHook::new(include_pointer))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Source that only records how the tracker drives it.
    #[derive(Default)]
    pub struct CountingSource {
        gate: ArmGate,
        arms: AtomicUsize,
        disarms: AtomicUsize,
    }

    impl CountingSource {
        pub fn is_armed(&self) -> bool {
            self.gate.is_armed()
        }

        pub fn arm_calls(&self) -> usize {
            self.arms.load(Ordering::SeqCst)
        }

        pub fn disarm_calls(&self) -> usize {
            self.disarms.load(Ordering::SeqCst)
        }
    }

    impl ActivitySource for CountingSource {
        fn listen(&self, _tracker: Arc<IdleTracker>) {}

        fn arm(&self) {
            self.arms.fetch_add(1, Ordering::SeqCst);
            self.gate.arm();
        }

        fn disarm(&self) {
            self.disarms.fetch_add(1, Ordering::SeqCst);
            self.gate.disarm();
        }
    }
}
