//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/peppermint.toml` (base configuration)
//! 2. Environment variables (prefixed with `PEPPERMINT_`, nested keys split on `__`)
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use peppermint::config::PeppermintConfig;
//!
//! let config = PeppermintConfig::load()?;
//! println!("Database: {}", config.storage.database_path.display());
//! # Ok::<(), peppermint::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::tracing_setup::LogFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeppermintConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument I/O settings
    pub hardware: HardwareConfig,
    /// Sample store settings
    pub storage: StorageConfig,
    /// Background logging settings
    pub logging: LoggingConfig,
    /// Live feed settings
    pub live_feed: LiveFeedConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Peppermint".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

/// Instrument I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Upper bound on every instrument read or write
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(2),
        }
    }
}

/// Sample store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// How long a connection waits on a locked database before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("peppermint.db"),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Background logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Interval used when a caller starts logging without one
    #[serde(with = "humantime_serde")]
    pub default_interval: Duration,
    /// Consecutive transient storage failures tolerated before a task aborts
    pub max_consecutive_storage_failures: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(1),
            max_consecutive_storage_failures: 3,
        }
    }
}

/// Live feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveFeedConfig {
    /// Poll cadence
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Capacity of the channel handing updates to the renderer
    pub channel_capacity: usize,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            channel_capacity: 16,
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl PeppermintConfig {
    /// Load configuration from `config/peppermint.toml` and environment variables
    ///
    /// Environment variables override file values with prefix `PEPPERMINT_`.
    /// Example: `PEPPERMINT_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/peppermint.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(PeppermintConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PEPPERMINT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        if self.hardware.io_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "hardware.io_timeout must be greater than zero".to_string(),
            ));
        }

        if self.logging.default_interval.is_zero() {
            return Err(DaqError::Configuration(
                "logging.default_interval must be greater than zero".to_string(),
            ));
        }

        if self.live_feed.poll_interval.is_zero() || self.live_feed.channel_capacity == 0 {
            return Err(DaqError::Configuration(
                "live_feed.poll_interval and live_feed.channel_capacity must be non-zero"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PeppermintConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hardware.io_timeout, Duration::from_secs(2));
        assert_eq!(config.logging.max_consecutive_storage_failures, 3);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = PeppermintConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = PeppermintConfig::default();
        config.hardware.io_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_partial_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peppermint.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[hardware]
io_timeout = "750ms"

[storage]
database_path = "runs/lab.db"

[live_feed]
poll_interval = "100ms"
"#
        )
        .unwrap();

        let config = PeppermintConfig::load_from(&path).unwrap();
        assert_eq!(config.hardware.io_timeout, Duration::from_millis(750));
        assert_eq!(config.storage.database_path, PathBuf::from("runs/lab.db"));
        assert_eq!(config.live_feed.poll_interval, Duration::from_millis(100));
        // Untouched sections keep their defaults
        assert_eq!(config.logging.default_interval, Duration::from_secs(1));
        assert_eq!(config.application.name, "Peppermint");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PeppermintConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.live_feed.channel_capacity, 16);
    }
}
