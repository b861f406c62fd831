mod config;
mod detector;
mod gpio;
mod monitor;
mod pin;
mod privilege;
mod shutdown;
mod signals;
mod trigger;

use clap::Parser;
use config::{ButtonConfig, DetectionMode, DEFAULT_CONFIG_PATH};
use monitor::{ButtonMonitor, MonitorError, Outcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Watch a GPIO push-button and power the host off when it is pressed:
/// broadcast a warning, sync filesystems, then halt.
#[derive(Parser, Debug)]
#[command(name = "power-button", version, about)]
pub struct Cli {
    /// Config file path (default: /etc/power-button.toml, optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// BCM pin number (overrides config)
    #[arg(long)]
    pin: Option<u8>,

    /// Detection strategy (overrides config)
    #[arg(long, value_enum)]
    mode: Option<DetectionMode>,

    /// Print resolved settings and exit without touching the pin
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (state transitions, debounce decisions)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

/// Process exit statuses.
mod exit {
    pub const PRIVILEGE: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const PIN: u8 = 3;
    pub const POWER_OFF: u8 = 4;
    pub const SIGNALS: u8 = 5;
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "power_button=debug"
        } else if self.quiet {
            "power_button=warn"
        } else {
            "power_button=info"
        }
    }

    /// Load the config file and merge CLI overrides over it.
    fn resolve_config(&self) -> Result<ButtonConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ButtonConfig::load(path, true)?,
            None => ButtonConfig::load(std::path::Path::new(DEFAULT_CONFIG_PATH), false)?,
        };
        if let Some(pin) = self.pin {
            config.pin.line = pin;
        }
        if let Some(mode) = self.mode {
            config.detection.mode = mode;
        }
        Ok(config)
    }
}

fn exit_code_for(err: &MonitorError) -> u8 {
    match err {
        MonitorError::Privilege(_) => exit::PRIVILEGE,
        MonitorError::PinInit(_) | MonitorError::PinRead(_) => exit::PIN,
        MonitorError::PowerOff(_) => exit::POWER_OFF,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match cli.resolve_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(exit::CONFIG);
        }
    };

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to render config");
                return ExitCode::from(exit::CONFIG);
            }
        }
    }

    let mut termination = match signals::Termination::install() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::from(exit::SIGNALS);
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "power-button starting");
    let mut monitor = ButtonMonitor::new(config, Arc::new(shutdown::SystemRunner));
    let result = monitor
        .run(
            privilege::ensure_effective_root(),
            gpio::RpiLine::open,
            termination.recv(),
        )
        .await;

    match result {
        Ok(Outcome::Terminated(sig)) => {
            tracing::info!(signal = %sig, "terminated, pin released");
            ExitCode::SUCCESS
        }
        Ok(Outcome::PoweredOff) => {
            tracing::info!("power-off requested");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "power-button stopped");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
