/// Pin abstractions shared by the detectors.
///
/// The hardware backend (`gpio::RpiLine`) and the test double (`sim::SimLine`)
/// both implement `InputLine` + `EdgeNotifier`, so detection logic never
/// depends on a concrete GPIO library.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Electrical level of the monitored input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Internal resistor configuration applied when the pin is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bias {
    PullUp,
    PullDown,
    Off,
}

/// Level transition that counts as a press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// High to low: a normally-open button pulling a pull-up pin to ground.
    Falling,
    /// Low to high.
    Rising,
    /// Any change away from the level read when the detector is armed, so
    /// normally-open and normally-closed contacts both work unconfigured.
    Any,
}

impl Edge {
    /// Level the pin sits at while the button is not pressed. `None` for
    /// `Any`, whose idle level is whatever the pin reads at arming.
    pub fn idle_level(self) -> Option<Level> {
        match self {
            Edge::Falling => Some(Level::High),
            Edge::Rising => Some(Level::Low),
            Edge::Any => None,
        }
    }

    /// Whether a change from `from` to `to` is this edge.
    pub fn matches(self, from: Level, to: Level) -> bool {
        from != to
            && match self {
                Edge::Falling => to == Level::Low,
                Edge::Rising => to == Level::High,
                Edge::Any => true,
            }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Falling => f.write_str("falling"),
            Edge::Rising => f.write_str("rising"),
            Edge::Any => f.write_str("any"),
        }
    }
}

/// Errors raised by a pin backend.
#[derive(Debug)]
pub enum PinError {
    /// The GPIO device exists but this process may not use it.
    PermissionDenied(String),
    /// The line is missing or held by another process.
    Unavailable(String),
    /// Edge notifications cannot be provided on this line.
    NotificationUnsupported(String),
    Io(std::io::Error),
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            PinError::Unavailable(msg) => write!(f, "pin unavailable: {msg}"),
            PinError::NotificationUnsupported(msg) => {
                write!(f, "edge notification unsupported: {msg}")
            }
            PinError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for PinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PinError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PinError {
    fn from(e: std::io::Error) -> Self {
        PinError::Io(e)
    }
}

/// Callback invoked from the backend's notification thread.
pub type EdgeHandler = Box<dyn FnMut() + Send + 'static>;

/// A configured digital input.
pub trait InputLine: Send {
    /// BCM line number, for diagnostics.
    fn number(&self) -> u8;

    /// Sample the current level.
    fn level(&mut self) -> Result<Level, PinError>;

    /// Give the line back to the system. Called on every exit path.
    fn release(self) -> Result<(), PinError>
    where
        Self: Sized;
}

/// Capability to deliver edge notifications for a line.
pub trait EdgeNotifier: Send {
    /// Register `handler` for `edge`. Transitions closer together than
    /// `bounce` collapse into a single call.
    fn on_edge(&mut self, edge: Edge, bounce: Duration, handler: EdgeHandler)
        -> Result<(), PinError>;

    /// Drop any registration. Succeeds when nothing is registered.
    fn clear_edges(&mut self) -> Result<(), PinError>;

    fn on_falling_edge(&mut self, bounce: Duration, handler: EdgeHandler) -> Result<(), PinError> {
        self.on_edge(Edge::Falling, bounce, handler)
    }
}

/// A line usable by either detection strategy.
pub trait ButtonLine: InputLine + EdgeNotifier {}

impl<T: InputLine + EdgeNotifier> ButtonLine for T {}
