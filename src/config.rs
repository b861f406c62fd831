use crate::pin::{Bias, Edge};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when no `--config` is given. Its absence is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/power-button.toml";

/// Top-level configuration loaded from power-button.toml.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ButtonConfig {
    pub pin: PinConfig,
    pub detection: DetectionConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PinConfig {
    /// BCM line number. GPIO3 doubles as the Pi's wake-from-halt pin.
    pub line: u8,
    pub bias: Bias,
    /// Transition that counts as a press.
    pub press: Edge,
}

/// How presses are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Edge notifications, falling back to polling when unsupported.
    Auto,
    /// Edge notifications only; registration failure is fatal.
    Edge,
    /// Polling only.
    Poll,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    pub bounce_time_ms: u64,
    pub poll_interval_ms: u64,
    pub confirm_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub message: String,
    /// Broadcast argv; the message is appended as the last argument.
    pub broadcast: Vec<String>,
    pub sync: Vec<String>,
    pub poweroff: Vec<String>,
}

// --- Default implementations ---

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            line: 3,
            bias: Bias::PullUp,
            press: Edge::Falling,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Auto,
            bounce_time_ms: 200,
            poll_interval_ms: 10,
            confirm_delay_ms: 50,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            message: "Shutdown initiated by button press.".to_string(),
            broadcast: vec!["wall".to_string()],
            sync: vec!["sync".to_string()],
            poweroff: vec!["shutdown".to_string(), "-h".to_string(), "now".to_string()],
        }
    }
}

impl DetectionConfig {
    pub fn bounce_time(&self) -> Duration {
        Duration::from_millis(self.bounce_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl ButtonConfig {
    /// Load config from `path`.
    ///
    /// When `required` is false a missing file yields the defaults, so the
    /// daemon runs unconfigured out of the box. Parse errors are always fatal.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        for (name, argv) in [
            ("broadcast", &self.shutdown.broadcast),
            ("sync", &self.shutdown.sync),
            ("poweroff", &self.shutdown.poweroff),
        ] {
            if argv.first().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "shutdown.{name} must name a program"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_wiring_guide() {
        let config = ButtonConfig::default();
        assert_eq!(config.pin.line, 3);
        assert_eq!(config.pin.bias, Bias::PullUp);
        assert_eq!(config.pin.press, Edge::Falling);
        assert_eq!(config.detection.mode, DetectionMode::Auto);
        assert_eq!(config.detection.bounce_time(), Duration::from_millis(200));
        assert_eq!(config.detection.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.detection.confirm_delay(), Duration::from_millis(50));
        assert_eq!(config.shutdown.poweroff, vec!["shutdown", "-h", "now"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ButtonConfig::load(&dir.path().join("absent.toml"), false).unwrap();
        assert_eq!(config, ButtonConfig::default());
    }

    #[test]
    fn test_missing_required_file_is_error() {
        let dir = tempdir().unwrap();
        let err = ButtonConfig::load(&dir.path().join("absent.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("power-button.toml");
        std::fs::write(
            &path,
            r#"
[pin]
line = 17
press = "rising"

[detection]
mode = "poll"

[shutdown]
poweroff = ["halt"]
"#,
        )
        .unwrap();

        let config = ButtonConfig::load(&path, true).unwrap();
        assert_eq!(config.pin.line, 17);
        assert_eq!(config.pin.press, Edge::Rising);
        assert_eq!(config.pin.bias, Bias::PullUp);
        assert_eq!(config.detection.mode, DetectionMode::Poll);
        assert_eq!(config.detection.confirm_delay_ms, 50);
        assert_eq!(config.shutdown.poweroff, vec!["halt"]);
        assert_eq!(config.shutdown.sync, vec!["sync"]);
    }

    #[test]
    fn test_any_press_parses() {
        let config: ButtonConfig = toml::from_str("[pin]\npress = \"any\"\n").unwrap();
        assert_eq!(config.pin.press, Edge::Any);
    }

    #[test]
    fn test_bias_names() {
        let config: ButtonConfig = toml::from_str("[pin]\nbias = \"pull-down\"\n").unwrap();
        assert_eq!(config.pin.bias, Bias::PullDown);
        let config: ButtonConfig = toml::from_str("[pin]\nbias = \"off\"\n").unwrap();
        assert_eq!(config.pin.bias, Bias::Off);
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[detection]\nmode = \"interrupt\"\n").unwrap();
        let err = ButtonConfig::load(&path, true).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_empty_poweroff_rejected() {
        let mut config = ButtonConfig::default();
        config.shutdown.poweroff = vec![];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shutdown.poweroff"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = ButtonConfig::default();
        config.detection.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config: ButtonConfig = toml::from_str(include_str!("../power-button.toml")).unwrap();
        assert_eq!(config, ButtonConfig::default());
    }

    #[test]
    fn test_resolved_config_serializes_back() {
        let config = ButtonConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ButtonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
