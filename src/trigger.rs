use crate::pin::PinError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// At-most-once latch for the shutdown sequence.
#[derive(Debug, Default)]
pub struct TriggerGuard {
    fired: AtomicBool,
}

impl TriggerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that moves the latch from unfired to fired.
    pub fn try_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// What a detector reports back to the monitor loop.
#[derive(Debug)]
pub enum DetectorEvent {
    /// A transition was seen and is being confirmed.
    Debouncing,
    /// The transition turned out to be a bounce.
    Rearmed,
    /// A confirmed press won the trigger guard.
    Pressed,
    /// The detector can no longer observe the pin.
    Failed(PinError),
}

/// Handle given to detectors. Cheap to clone; safe to call from any thread.
#[derive(Debug, Clone)]
pub struct PressSignal {
    guard: Arc<TriggerGuard>,
    events: mpsc::UnboundedSender<DetectorEvent>,
}

impl PressSignal {
    pub fn new(guard: Arc<TriggerGuard>, events: mpsc::UnboundedSender<DetectorEvent>) -> Self {
        Self { guard, events }
    }

    /// Report a press. Only the first press across all clones reaches the monitor.
    pub fn press(&self) -> bool {
        if !self.guard.try_fire() {
            tracing::debug!("press ignored, shutdown already triggered");
            return false;
        }
        // The receiver only goes away once the monitor has stopped listening.
        let _ = self.events.send(DetectorEvent::Pressed);
        true
    }

    pub fn debouncing(&self) {
        let _ = self.events.send(DetectorEvent::Debouncing);
    }

    pub fn rearmed(&self) {
        let _ = self.events.send(DetectorEvent::Rearmed);
    }

    pub fn fail(&self, error: PinError) {
        let _ = self.events.send(DetectorEvent::Failed(error));
    }
}
