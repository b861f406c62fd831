/// Termination signal handling.
///
/// SIGTERM and SIGINT end monitoring cleanly. Streams are registered at
/// install time, before the pin is armed, so an early signal is not lost.
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};

pub struct Termination {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

impl Termination {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
        })
    }

    /// Resolves with the first termination signal received.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.term.recv() => Signal::SIGTERM,
            _ = self.int.recv() => Signal::SIGINT,
        }
    }
}
