use chrono::{DateTime, Local};
use rdev::{listen, EventType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::input::{ActivitySource, ArmGate};
use crate::tracker::engine::IdleTracker;

/// Global input hook built on `rdev`. Key presses always count as activity;
/// pointer events only when `include_pointer` is set.
pub struct InputHook {
    gate: ArmGate,
    include_pointer: bool,
    listening: AtomicBool,
}

impl InputHook {
    pub fn new(include_pointer: bool) -> Self {
        Self {
            gate: ArmGate::default(),
            include_pointer,
            listening: AtomicBool::new(false),
        }
    }
}

pub fn is_user_input(event: &EventType, include_pointer: bool) -> bool {
    match event {
        EventType::KeyPress(_) => true,
        EventType::ButtonPress(_) | EventType::Wheel { .. } | EventType::MouseMove { .. } => include_pointer,
        _ => false,
    }
}

impl ActivitySource for InputHook {
    fn listen(&self, tracker: Arc<IdleTracker>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let gate = self.gate.clone();
        let include_pointer = self.include_pointer;

        // rdev::listen blocks forever, so it gets its own thread; the gate
        // decides whether events reach the tracker.
        std::thread::spawn(move || {
            let callback = move |event: rdev::Event| {
                if !gate.is_armed() || !is_user_input(&event.event_type, include_pointer) {
                    return;
                }
                let at: DateTime<Local> = event.time.into();
                if let Err(e) = tracker.on_activity(at) {
                    log::error!("Failed to record activity: {}", e);
                }
            };
            if let Err(error) = listen(callback) {
                log::error!("Error listening for input events: {:?}", error);
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
