/// Raspberry Pi GPIO backend built on rppal.
use crate::config::PinConfig;
use crate::pin::{Bias, Edge, EdgeHandler, EdgeNotifier, InputLine, Level, PinError};
use rppal::gpio::{Gpio, InputPin, Trigger};
use std::time::Duration;

pub struct RpiLine {
    pin: InputPin,
}

impl RpiLine {
    /// Acquire the configured line as an input with the configured bias.
    ///
    /// Any interrupt left registered on the line is cleared first, so opening
    /// after an unclean exit behaves like a fresh start.
    pub fn open(config: &PinConfig) -> Result<Self, PinError> {
        let gpio = Gpio::new().map_err(PinError::from)?;
        let pin = gpio.get(config.line).map_err(PinError::from)?;
        let mut pin = match config.bias {
            Bias::PullUp => pin.into_input_pullup(),
            Bias::PullDown => pin.into_input_pulldown(),
            Bias::Off => pin.into_input(),
        };
        // Restore the previous mode and bias when the line is dropped.
        pin.set_reset_on_drop(true);
        pin.clear_async_interrupt().map_err(PinError::from)?;

        tracing::info!(pin = config.line, bias = ?config.bias, "gpio line configured");
        Ok(Self { pin })
    }
}

impl From<rppal::gpio::Error> for PinError {
    fn from(e: rppal::gpio::Error) -> Self {
        use rppal::gpio::Error;
        match e {
            Error::PermissionDenied(path) => PinError::PermissionDenied(path),
            Error::Io(io) => PinError::Io(io),
            Error::PinUsed(n) => PinError::Unavailable(format!("gpio {n} is already in use")),
            Error::PinNotAvailable(n) => {
                PinError::Unavailable(format!("gpio {n} does not exist on this board"))
            }
            other => PinError::Unavailable(other.to_string()),
        }
    }
}

fn trigger_for(edge: Edge) -> Trigger {
    match edge {
        Edge::Falling => Trigger::FallingEdge,
        Edge::Rising => Trigger::RisingEdge,
        Edge::Any => Trigger::Both,
    }
}

impl InputLine for RpiLine {
    fn number(&self) -> u8 {
        self.pin.pin()
    }

    fn level(&mut self) -> Result<Level, PinError> {
        Ok(match self.pin.read() {
            rppal::gpio::Level::Low => Level::Low,
            rppal::gpio::Level::High => Level::High,
        })
    }

    fn release(mut self) -> Result<(), PinError> {
        let cleared = self.pin.clear_async_interrupt();
        let number = self.pin.pin();
        // Dropping the pin resets its mode and frees the line.
        drop(self);
        tracing::debug!(pin = number, "gpio line released");
        cleared.map_err(PinError::from)
    }
}

impl EdgeNotifier for RpiLine {
    fn on_edge(
        &mut self,
        edge: Edge,
        bounce: Duration,
        mut handler: EdgeHandler,
    ) -> Result<(), PinError> {
        self.pin
            .set_async_interrupt(trigger_for(edge), Some(bounce), move |_event| handler())
            .map_err(|e| match PinError::from(e) {
                PinError::Io(io) => PinError::NotificationUnsupported(io.to_string()),
                other => other,
            })
    }

    fn clear_edges(&mut self) -> Result<(), PinError> {
        self.pin.clear_async_interrupt().map_err(PinError::from)
    }
}
