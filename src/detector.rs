/// Press detection strategies.
///
/// Two implementations of `ButtonDetector`: `EdgeDetector` registers a
/// platform edge notification, `PollingDetector` samples the pin. Both own a
/// worker thread that confirms a candidate press by re-reading the pin after
/// `confirm_delay`. `arm` picks one by probing whether edge registration
/// works on the line.
use crate::config::{DetectionConfig, DetectionMode};
use crate::pin::{ButtonLine, Edge, Level, PinError};
use crate::trigger::PressSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Edge,
    Poll,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Edge => f.write_str("edge"),
            Strategy::Poll => f.write_str("poll"),
        }
    }
}

/// An armed detector. Owns the line until released.
pub trait ButtonDetector: Send {
    fn strategy(&self) -> Strategy;

    /// Stop detecting and hand the line back to the system.
    fn release(self: Box<Self>) -> Result<(), PinError>;
}

/// Edge registration failed; the line is returned so another strategy can use it.
pub struct ArmError<L> {
    pub line: L,
    pub source: PinError,
}

/// Arm a detector on `line` according to `config.mode`.
///
/// In `Auto` mode a failed edge registration is logged and the same line is
/// handed to a polling detector. In `Edge` mode it is fatal, and the line is
/// released before the error is returned.
pub fn arm<L: ButtonLine + 'static>(
    line: L,
    press: Edge,
    config: &DetectionConfig,
    signal: PressSignal,
) -> Result<Box<dyn ButtonDetector>, PinError> {
    if config.mode == DetectionMode::Poll {
        return Ok(Box::new(PollingDetector::arm(line, press, config, signal)?));
    }

    match EdgeDetector::arm(line, press, config, signal.clone()) {
        Ok(detector) => Ok(Box::new(detector)),
        Err(ArmError { line, source }) if config.mode == DetectionMode::Auto => {
            tracing::warn!(
                pin = line.number(),
                error = %source,
                "edge notification unavailable, falling back to polling"
            );
            Ok(Box::new(PollingDetector::arm(line, press, config, signal)?))
        }
        Err(ArmError { line, source }) => {
            if let Err(e) = line.release() {
                tracing::warn!(error = %e, "failed to release pin after edge registration error");
            }
            Err(source)
        }
    }
}

/// Level the button rests at: fixed for directional edges, sampled for `Any`.
fn resting_level<L: ButtonLine>(line: &mut L, press: Edge) -> Result<Level, PinError> {
    match press.idle_level() {
        Some(level) => Ok(level),
        None => line.level(),
    }
}

/// Sleep `delay`, re-read, and report whether the pin is still away from `idle`.
fn confirm<L: ButtonLine>(line: &mut L, idle: Level, delay: Duration) -> Result<bool, PinError> {
    std::thread::sleep(delay);
    Ok(line.level()? != idle)
}

enum Wake {
    Edge,
    Stop,
}

/// Primary path: the backend's notification only wakes the confirm worker,
/// which owns the line while armed.
pub struct EdgeDetector<L> {
    wake: mpsc::Sender<Wake>,
    worker: JoinHandle<L>,
}

impl<L: ButtonLine + 'static> EdgeDetector<L> {
    pub fn arm(
        mut line: L,
        press: Edge,
        config: &DetectionConfig,
        signal: PressSignal,
    ) -> Result<Self, ArmError<L>> {
        if let Err(source) = line.clear_edges() {
            return Err(ArmError { line, source });
        }
        let idle = match resting_level(&mut line, press) {
            Ok(level) => level,
            Err(source) => return Err(ArmError { line, source }),
        };

        let pin = line.number();
        let bounce = config.bounce_time();
        let (wake, notifications) = mpsc::channel();
        let edge_wake = wake.clone();
        let handler = Box::new(move || {
            tracing::debug!(pin, "press edge notification");
            let _ = edge_wake.send(Wake::Edge);
        });
        if let Err(source) = line.on_edge(press, bounce, handler) {
            return Err(ArmError { line, source });
        }

        tracing::info!(
            pin,
            edge = %press,
            bounce_ms = config.bounce_time_ms,
            confirm_ms = config.confirm_delay_ms,
            "edge detector armed"
        );

        let confirm_delay = config.confirm_delay();
        let worker = std::thread::spawn(move || {
            let mut line = line;
            if let Err(e) = confirm_edges(&mut line, idle, confirm_delay, &notifications, &signal) {
                tracing::error!(pin = line.number(), error = %e, "pin read failed, edge detection stopped");
                signal.fail(e);
            }
            line
        });

        Ok(Self { wake, worker })
    }
}

/// Confirm each notification until one holds, `Stop` arrives, or a read fails.
fn confirm_edges<L: ButtonLine>(
    line: &mut L,
    idle: Level,
    confirm_delay: Duration,
    notifications: &mpsc::Receiver<Wake>,
    signal: &PressSignal,
) -> Result<(), PinError> {
    while let Ok(Wake::Edge) = notifications.recv() {
        tracing::debug!(pin = line.number(), "edge seen, debouncing");
        signal.debouncing();
        if confirm(line, idle, confirm_delay)? {
            tracing::info!(pin = line.number(), "press confirmed");
            signal.press();
            return Ok(());
        }
        tracing::debug!(pin = line.number(), "bounce rejected");
        signal.rearmed();

        // Edges queued while confirming belong to the rejected bounce.
        loop {
            match notifications.try_recv() {
                Ok(Wake::Edge) => continue,
                Ok(Wake::Stop) => return Ok(()),
                Err(_) => break,
            }
        }
    }
    Ok(())
}

impl<L: ButtonLine + 'static> ButtonDetector for EdgeDetector<L> {
    fn strategy(&self) -> Strategy {
        Strategy::Edge
    }

    fn release(self: Box<Self>) -> Result<(), PinError> {
        let EdgeDetector { wake, worker } = *self;
        // The worker may already have exited after a press.
        let _ = wake.send(Wake::Stop);
        match worker.join() {
            Ok(mut line) => {
                let cleared = line.clear_edges();
                let released = line.release();
                cleared.and(released)
            }
            Err(_) => Err(PinError::Io(std::io::Error::other("edge worker panicked"))),
        }
    }
}

/// Fallback path: sample, and confirm a press by re-sampling after a delay.
pub struct PollingDetector<L> {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<L>,
}

#[derive(Debug, Clone, Copy)]
struct PollTiming {
    interval: Duration,
    confirm_delay: Duration,
}

impl<L: ButtonLine + 'static> PollingDetector<L> {
    /// Fails only when `press` is `Any` and the resting level cannot be read;
    /// the line is released first.
    pub fn arm(
        mut line: L,
        press: Edge,
        config: &DetectionConfig,
        signal: PressSignal,
    ) -> Result<Self, PinError> {
        let idle = match resting_level(&mut line, press) {
            Ok(level) => level,
            Err(e) => {
                if let Err(release) = line.release() {
                    tracing::warn!(error = %release, "failed to release pin after read error");
                }
                return Err(e);
            }
        };
        let stop = Arc::new(AtomicBool::new(false));
        let timing = PollTiming {
            interval: config.poll_interval(),
            confirm_delay: config.confirm_delay(),
        };
        tracing::info!(
            pin = line.number(),
            edge = %press,
            interval_ms = config.poll_interval_ms,
            confirm_ms = config.confirm_delay_ms,
            "polling detector armed"
        );

        let thread_stop = Arc::clone(&stop);
        let worker = std::thread::spawn(move || {
            let mut line = line;
            if let Err(e) = poll_until_press(&mut line, idle, timing, &thread_stop, &signal) {
                tracing::error!(pin = line.number(), error = %e, "pin read failed, polling stopped");
                signal.fail(e);
            }
            line
        });

        Ok(Self { stop, worker })
    }
}

impl<L: ButtonLine + 'static> ButtonDetector for PollingDetector<L> {
    fn strategy(&self) -> Strategy {
        Strategy::Poll
    }

    fn release(self: Box<Self>) -> Result<(), PinError> {
        let PollingDetector { stop, worker } = *self;
        stop.store(true, Ordering::SeqCst);
        match worker.join() {
            Ok(line) => line.release(),
            // The line was dropped during unwinding, which already frees it.
            Err(_) => Err(PinError::Io(std::io::Error::other("polling thread panicked"))),
        }
    }
}

/// Poll until a confirmed press is signalled, `stop` is set, or a read fails.
///
/// A candidate is a move from `idle` to any other level; it is confirmed when
/// the pin still reads away from `idle` after the confirm delay.
fn poll_until_press<L: ButtonLine>(
    line: &mut L,
    idle: Level,
    timing: PollTiming,
    stop: &AtomicBool,
    signal: &PressSignal,
) -> Result<(), PinError> {
    let mut last: Level = line.level()?;

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(timing.interval);
        let level = line.level()?;
        let left_idle = last == idle && level != idle;
        last = level;
        if !left_idle {
            continue;
        }

        tracing::debug!(pin = line.number(), "transition seen, debouncing");
        signal.debouncing();
        let held = confirm(line, idle, timing.confirm_delay)?;
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if !held {
            tracing::debug!(pin = line.number(), "bounce rejected");
            signal.rearmed();
            last = idle;
            continue;
        }

        tracing::info!(pin = line.number(), "press confirmed");
        signal.press();
        break;
    }
    Ok(())
}
