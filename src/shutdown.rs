/// The one-shot power-off sequence: broadcast, sync, power off.
use crate::config::ShutdownConfig;
use std::process::{Command, Stdio};

/// Errors from running an external command.
#[derive(Debug)]
pub enum CommandError {
    /// The argv was empty.
    Empty { step: Step },
    /// Failed to spawn the program.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The program ran but exited unsuccessfully.
    Failed {
        program: String,
        exit_code: Option<i32>,
    },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty { step } => write!(f, "{step} command is empty"),
            CommandError::Spawn { program, source } => {
                write!(f, "failed to run {program}: {source}")
            }
            CommandError::Failed { program, exit_code } => match exit_code {
                Some(code) => write!(f, "{program} exited with status {code}"),
                None => write!(f, "{program} was killed by a signal"),
            },
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Steps of the sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Broadcast,
    Sync,
    PowerOff,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Broadcast => f.write_str("broadcast"),
            Step::Sync => f.write_str("sync"),
            Step::PowerOff => f.write_str("poweroff"),
        }
    }
}

/// Runs a program to completion.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String]) -> Result<(), CommandError>;
}

/// Runs commands on the host, inheriting stdout/stderr.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<(), CommandError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(CommandError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
            });
        };
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| CommandError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        if !status.success() {
            return Err(CommandError::Failed {
                program: program.clone(),
                exit_code: status.code(),
            });
        }
        Ok(())
    }
}

/// The resolved argv for each step.
#[derive(Debug, Clone)]
pub struct ShutdownSequence {
    broadcast: Vec<String>,
    sync: Vec<String>,
    poweroff: Vec<String>,
}

impl ShutdownSequence {
    pub fn from_config(config: &ShutdownConfig) -> Self {
        let mut broadcast = config.broadcast.clone();
        broadcast.push(config.message.clone());
        Self {
            broadcast,
            sync: config.sync.clone(),
            poweroff: config.poweroff.clone(),
        }
    }

    fn argv(&self, step: Step) -> &[String] {
        match step {
            Step::Broadcast => &self.broadcast,
            Step::Sync => &self.sync,
            Step::PowerOff => &self.poweroff,
        }
    }

    /// Run every step once, in order.
    ///
    /// Broadcast and sync failures are logged and skipped: the host must still
    /// go down. Only a power-off failure is returned.
    pub fn execute(&self, runner: &dyn CommandRunner) -> Result<(), CommandError> {
        for step in [Step::Broadcast, Step::Sync] {
            if let Err(e) = self.run_step(runner, step) {
                tracing::warn!(step = %step, error = %e, "shutdown step failed, continuing");
            }
        }
        self.run_step(runner, Step::PowerOff)
    }

    fn run_step(&self, runner: &dyn CommandRunner, step: Step) -> Result<(), CommandError> {
        let argv = self.argv(step);
        if argv.is_empty() {
            return Err(CommandError::Empty { step });
        }
        tracing::info!(step = %step, command = ?argv, "running shutdown step");
        runner.run(argv)
    }
}
