//! Uniform, timeout-bounded parameter I/O.
//!
//! [`Setter`] is the only path from the measurement core to an instrument.
//! `set` validates the target against its declaration before the single
//! physical write; `read` checks the read capability. Both bound the driver
//! call with the configured I/O timeout and translate driver failures into
//! `DaqError::Hardware`. There is no retry here: callers decide.

use crate::error::{AppResult, DaqError};
use crate::hardware::registry::InstrumentRegistry;
use crate::parameter::{ParameterId, ParameterSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Write/read path to named instrument parameters.
#[derive(Clone)]
pub struct Setter {
    registry: Arc<InstrumentRegistry>,
    io_timeout: Duration,
}

impl Setter {
    /// Setter over `registry`, bounding every call by `io_timeout`.
    pub fn new(registry: Arc<InstrumentRegistry>, io_timeout: Duration) -> Self {
        Self {
            registry,
            io_timeout,
        }
    }

    /// The registry this setter resolves parameters against.
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Configured I/O bound.
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Apply `value` to `parameter`.
    ///
    /// # Errors
    /// - `Parameter` if the parameter is unknown, not writable, or the value
    ///   does not fit the declared type
    /// - `Range` if bounds are declared and violated
    /// - `Hardware` if the write fails or exceeds the I/O timeout
    #[instrument(skip(self), fields(parameter = %parameter), err)]
    pub async fn set(&self, parameter: &ParameterId, value: f64) -> AppResult<()> {
        let (spec, driver) = self.registry.resolve(parameter)?;
        if !spec.writable {
            return Err(DaqError::Parameter(format!("{} is not writable", parameter)));
        }
        spec.validate(value)?;

        match timeout(self.io_timeout, driver.write(parameter.name(), value)).await {
            Ok(Ok(())) => {
                debug!(value, "parameter set");
                Ok(())
            }
            Ok(Err(e)) => Err(DaqError::Hardware {
                parameter: parameter.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(self.timed_out(parameter, "write")),
        }
    }

    /// Read the current value of `parameter`.
    ///
    /// # Errors
    /// - `Parameter` if the parameter is unknown or not readable
    /// - `Hardware` if the read fails, exceeds the I/O timeout or yields a
    ///   non-finite value
    pub async fn read(&self, parameter: &ParameterId) -> AppResult<f64> {
        let (spec, driver) = self.registry.resolve(parameter)?;
        if !spec.readable {
            return Err(DaqError::Parameter(format!("{} is not readable", parameter)));
        }

        match timeout(self.io_timeout, driver.read(parameter.name())).await {
            Ok(Ok(value)) if value.is_finite() => Ok(value),
            Ok(Ok(value)) => Err(DaqError::Hardware {
                parameter: parameter.to_string(),
                message: format!("non-finite reading {}", value),
            }),
            Ok(Err(e)) => Err(DaqError::Hardware {
                parameter: parameter.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(self.timed_out(parameter, "read")),
        }
    }

    /// Declaration of `parameter`, cloned out of the registry.
    pub fn spec(&self, parameter: &ParameterId) -> AppResult<ParameterSpec> {
        self.registry.spec(parameter).cloned()
    }

    fn timed_out(&self, parameter: &ParameterId, op: &str) -> DaqError {
        DaqError::Hardware {
            parameter: parameter.to_string(),
            message: format!("{} timed out after {:?}", op, self.io_timeout),
        }
    }
}
