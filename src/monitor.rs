/// ButtonMonitor: arm a detector, wait for a press or a termination signal,
/// and run the shutdown sequence at most once.
use crate::config::{ButtonConfig, PinConfig};
use crate::detector::{self, ButtonDetector};
use crate::pin::{ButtonLine, PinError};
use crate::privilege::PrivilegeError;
use crate::shutdown::{CommandError, CommandRunner, ShutdownSequence};
use crate::trigger::{DetectorEvent, PressSignal, TriggerGuard};
use nix::sys::signal::Signal;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle of the monitor. `Debouncing` is reported by the detector while it
/// confirms a candidate press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Armed,
    Debouncing,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Armed => "armed",
            State::Debouncing => "debouncing",
            State::ShuttingDown => "shutting-down",
            State::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How monitoring ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The power-off command was issued.
    PoweredOff,
    /// A termination signal arrived while armed.
    Terminated(Signal),
}

/// Fatal monitor errors.
#[derive(Debug)]
pub enum MonitorError {
    Privilege(PrivilegeError),
    /// Opening or arming the pin failed.
    PinInit(PinError),
    /// The pin stopped responding while armed.
    PinRead(PinError),
    PowerOff(CommandError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Privilege(e) => write!(f, "{e}"),
            MonitorError::PinInit(e) => write!(f, "failed to initialize gpio pin: {e}"),
            MonitorError::PinRead(e) => write!(f, "lost access to gpio pin: {e}"),
            MonitorError::PowerOff(e) => write!(f, "power-off command failed: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Privilege(e) => Some(e),
            MonitorError::PinInit(e) => Some(e),
            MonitorError::PinRead(e) => Some(e),
            MonitorError::PowerOff(e) => Some(e),
        }
    }
}

pub struct ButtonMonitor {
    config: ButtonConfig,
    runner: Arc<dyn CommandRunner>,
    guard: Arc<TriggerGuard>,
    state: State,
}

impl ButtonMonitor {
    pub fn new(config: ButtonConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            guard: Arc::new(TriggerGuard::new()),
            state: State::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        tracing::info!(from = %self.state, to = %next, "monitor state");
        self.state = next;
    }

    /// Run the monitor to completion.
    ///
    /// `privilege` is checked before `open` is called, so an unprivileged
    /// process never touches the pin. `termination` should already be
    /// listening when this is called.
    pub async fn run<L, O, T>(
        &mut self,
        privilege: Result<(), PrivilegeError>,
        open: O,
        termination: T,
    ) -> Result<Outcome, MonitorError>
    where
        L: ButtonLine + 'static,
        O: FnOnce(&PinConfig) -> Result<L, PinError>,
        T: Future<Output = Signal>,
    {
        privilege.map_err(MonitorError::Privilege)?;

        let line = open(&self.config.pin).map_err(MonitorError::PinInit)?;
        // `tx` outlives the detector: a detector whose press lost the trigger
        // race exits quietly, and the monitor keeps waiting for a signal.
        let (tx, mut events) = mpsc::unbounded_channel();
        let signal = PressSignal::new(Arc::clone(&self.guard), tx.clone());
        let detector = detector::arm(line, self.config.pin.press, &self.config.detection, signal)
            .map_err(MonitorError::PinInit)?;
        tracing::info!(
            pin = self.config.pin.line,
            strategy = %detector.strategy(),
            "waiting for button press"
        );
        self.transition(State::Armed);

        tokio::pin!(termination);
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                sig = &mut termination => {
                    self.transition(State::Terminated);
                    release(detector).await;
                    return Ok(Outcome::Terminated(sig));
                }
            };

            match event {
                Some(DetectorEvent::Debouncing) => self.transition(State::Debouncing),
                Some(DetectorEvent::Rearmed) => self.transition(State::Armed),
                Some(DetectorEvent::Pressed) => {
                    release(detector).await;
                    return self.shut_down().await;
                }
                Some(DetectorEvent::Failed(e)) => {
                    release(detector).await;
                    return Err(MonitorError::PinRead(e));
                }
                None => unreachable!("monitor holds a sender"),
            }
        }
    }

    /// Runs to completion on a blocking thread; signals are no longer observed.
    async fn shut_down(&mut self) -> Result<Outcome, MonitorError> {
        self.transition(State::ShuttingDown);
        let sequence = ShutdownSequence::from_config(&self.config.shutdown);
        let runner = Arc::clone(&self.runner);
        let result = tokio::task::spawn_blocking(move || sequence.execute(runner.as_ref()))
            .await
            .unwrap_or_else(|e| {
                Err(CommandError::Spawn {
                    program: "shutdown sequence".to_string(),
                    source: std::io::Error::other(e.to_string()),
                })
            });
        result.map_err(MonitorError::PowerOff)?;
        Ok(Outcome::PoweredOff)
    }

    #[cfg(test)]
    fn guard(&self) -> Arc<TriggerGuard> {
        Arc::clone(&self.guard)
    }
}

/// Joining a detector worker can take up to a confirm delay, so it runs off
/// the async thread.
async fn release(detector: Box<dyn ButtonDetector>) {
    match tokio::task::spawn_blocking(move || detector.release()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to release gpio pin"),
        Err(e) => tracing::warn!(error = %e, "gpio release task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionMode;
    use crate::pin::sim::SimLine;
    use crate::pin::Level;
    use crate::shutdown::recording::RecordingRunner;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn monitor(mode: DetectionMode, runner: Arc<RecordingRunner>) -> ButtonMonitor {
        let mut config = ButtonConfig::default();
        config.detection.mode = mode;
        ButtonMonitor::new(config, runner)
    }

    async fn never() -> Signal {
        std::future::pending().await
    }

    async fn after(ms: u64) -> Signal {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Signal::SIGTERM
    }

    #[tokio::test]
    async fn test_sustained_press_runs_sequence_once_in_order() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Poll, Arc::clone(&runner));
        // Idle high, pressed at 20ms and held for 100ms.
        let line = SimLine::new(Level::High, vec![(20, Level::Low), (120, Level::High)]);
        let counters = line.counters();

        let outcome = monitor.run(Ok(()), |_| Ok(line), never()).await.unwrap();

        assert_eq!(outcome, Outcome::PoweredOff);
        assert_eq!(monitor.state(), State::ShuttingDown);
        assert_eq!(runner.programs(), vec!["wall", "sync", "shutdown"]);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounce_never_shuts_down() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Poll, Arc::clone(&runner));
        // High, low, high again within 20ms.
        let line = SimLine::new(Level::High, vec![(30, Level::Low), (45, Level::High)]);

        let outcome = monitor.run(Ok(()), |_| Ok(line), after(300)).await.unwrap();

        assert_eq!(outcome, Outcome::Terminated(Signal::SIGTERM));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_edge_bounce_never_shuts_down() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, Arc::clone(&runner));
        // Edges supported; high, low, high again within 20ms.
        let line = SimLine::new(Level::High, vec![(30, Level::Low), (45, Level::High)]);
        let counters = line.counters();

        let outcome = monitor.run(Ok(()), |_| Ok(line), after(300)).await.unwrap();

        assert_eq!(outcome, Outcome::Terminated(Signal::SIGTERM));
        assert_eq!(counters.notifications.load(Ordering::SeqCst), 1);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_any_edge_detects_normally_closed_press() {
        let runner = Arc::new(RecordingRunner::default());
        let mut config = ButtonConfig::default();
        config.pin.press = crate::pin::Edge::Any;
        let mut monitor = ButtonMonitor::new(config, Arc::clone(&runner) as Arc<dyn CommandRunner>);
        let line = SimLine::new(Level::Low, vec![(20, Level::High)]);

        let outcome = monitor.run(Ok(()), |_| Ok(line), never()).await.unwrap();

        assert_eq!(outcome, Outcome::PoweredOff);
        assert_eq!(runner.programs(), vec!["wall", "sync", "shutdown"]);
    }

    #[tokio::test]
    async fn test_edge_press_runs_sequence() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, Arc::clone(&runner));
        let line = SimLine::new(Level::High, vec![(20, Level::Low)]);
        let counters = line.counters();

        let outcome = monitor.run(Ok(()), |_| Ok(line), never()).await.unwrap();

        assert_eq!(outcome, Outcome::PoweredOff);
        assert_eq!(counters.notifications.load(Ordering::SeqCst), 1);
        assert_eq!(runner.programs(), vec!["wall", "sync", "shutdown"]);
    }

    #[tokio::test]
    async fn test_fallback_to_polling_still_detects_press() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, Arc::clone(&runner));
        let line = SimLine::new(Level::High, vec![(20, Level::Low)]).without_edges();

        let outcome = monitor.run(Ok(()), |_| Ok(line), never()).await.unwrap();

        assert_eq!(outcome, Outcome::PoweredOff);
        assert_eq!(runner.programs().len(), 3);
    }

    #[tokio::test]
    async fn test_termination_while_armed_releases_pin() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, Arc::clone(&runner));
        let line = SimLine::idle();
        let counters = line.counters();

        let outcome = monitor.run(Ok(()), |_| Ok(line), after(50)).await.unwrap();

        assert_eq!(outcome, Outcome::Terminated(Signal::SIGTERM));
        assert_eq!(monitor.state(), State::Terminated);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(runner.calls().is_empty());
        assert!(!monitor.guard().has_fired());
    }

    #[tokio::test]
    async fn test_missing_privilege_skips_pin_io() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, Arc::clone(&runner));
        let opened = AtomicBool::new(false);

        let err = monitor
            .run(
                Err(PrivilegeError { euid: 1000 }),
                |_| {
                    opened.store(true, Ordering::SeqCst);
                    Ok(SimLine::idle())
                },
                never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Privilege(_)));
        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(monitor.state(), State::Idle);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pin_open_failure_is_init_error() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Auto, runner);

        let err = monitor
            .run(
                Ok(()),
                |_| -> Result<SimLine, PinError> {
                    Err(PinError::PermissionDenied("/dev/gpiomem".to_string()))
                },
                never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::PinInit(PinError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_read_failure_releases_pin_and_errors() {
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Poll, Arc::clone(&runner));
        let line = SimLine::idle().failing_reads();
        let counters = line.counters();

        let err = monitor
            .run(Ok(()), |_| Ok(line), never())
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::PinRead(_)));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poweroff_failure_is_fatal() {
        let runner = Arc::new(RecordingRunner::failing(&["shutdown"]));
        let mut monitor = monitor(DetectionMode::Poll, Arc::clone(&runner));
        let line = SimLine::new(Level::High, vec![(20, Level::Low)]);

        let err = monitor
            .run(Ok(()), |_| Ok(line), never())
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::PowerOff(_)));
        assert_eq!(runner.programs(), vec!["wall", "sync", "shutdown"]);
    }

    #[tokio::test]
    async fn test_second_trigger_is_ignored() {
        // Another path already won the guard; a later press must not reach the monitor.
        let runner = Arc::new(RecordingRunner::default());
        let mut monitor = monitor(DetectionMode::Poll, Arc::clone(&runner));
        assert!(monitor.guard().try_fire());
        let line = SimLine::new(Level::High, vec![(20, Level::Low)]);

        let outcome = monitor.run(Ok(()), |_| Ok(line), after(200)).await.unwrap();

        assert_eq!(outcome, Outcome::Terminated(Signal::SIGTERM));
        assert!(runner.calls().is_empty());
    }
}
