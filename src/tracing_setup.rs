//! Subscriber setup for the `tracing` events emitted across the core.
//!
//! Every component logs through `tracing` macros with structured fields
//! (`run_id`, `parameter`, `task`, `index`). This module installs the
//! process-wide `tracing-subscriber` registry that renders them:
//!
//! - level taken from `application.log_level`, overridden by `RUST_LOG`
//! - output format taken from `application.log_format`
//!   (`pretty`, `compact` or `json`)
//!
//! ```no_run
//! use peppermint::{config::PeppermintConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PeppermintConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!(run_id = "demo", "session opened");
//! # Ok(())
//! # }
//! ```

use crate::config::PeppermintConfig;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Rendering of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured output for an interactive terminal
    #[default]
    Pretty,
    /// One line per event, no colours; suited to log files on lab PCs
    Compact,
    /// Newline-delimited JSON for log collectors
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default maximum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Emit span open/close events (sequence runs, log tasks)
    pub span_events: bool,
    /// ANSI colours, honoured by the pretty format only
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            span_events: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Options derived from the `[application]` section.
    pub fn from_config(config: &PeppermintConfig) -> AppResult<Self> {
        let level = Level::from_str(&config.application.log_level).map_err(|_| {
            DaqError::Configuration(format!(
                "Invalid log_level '{}'",
                config.application.log_level
            ))
        })?;
        Ok(Self {
            level,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Override the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span open/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Toggle ANSI colours.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);
        match self.format {
            LogFormat::Pretty => base.pretty().with_ansi(self.ansi).boxed(),
            LogFormat::Compact => base.compact().with_ansi(false).boxed(),
            LogFormat::Json => base.json().boxed(),
        }
    }
}

/// Install the global subscriber described by the `[application]` section.
pub fn init_from_config(config: &PeppermintConfig) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without changes if a subscriber is already installed,
/// so tests and embedding applications can call it freely.
pub fn init(config: TracingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    tracing_subscriber::registry()
        .with(config.layer().with_filter(config.filter()))
        .try_init()
        .map_err(|e| DaqError::Configuration(format!("Failed to initialize tracing: {}", e)))
}
