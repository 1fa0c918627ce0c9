//! Sequence actions and their definition format.
//!
//! Sequences arrive as a JSON list of tagged records:
//!
//! ```json
//! [
//!   {"type": "Set",   "parameter": "ls336.setpoint", "value": 10.0},
//!   {"type": "Wait",  "duration": "30s"},
//!   {"type": "Sweep", "axes": [{"parameter": "k2450.voltage", "start": 0, "stop": 1, "count": 11}],
//!    "settle_delay": "200ms", "track": ["k2450.current"]}
//! ]
//! ```
//!
//! Durations use humantime notation (`"250ms"`, `"1m 30s"`).

use crate::error::{AppResult, DaqError};
use crate::experiment::sweep::Sweep;
use crate::parameter::ParameterId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn record_by_default() -> bool {
    true
}

/// One step of an action sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Write one value
    Set {
        /// Target parameter
        parameter: ParameterId,
        /// Value to write
        value: f64,
        /// Persist the written value as a sample
        #[serde(default = "record_by_default")]
        record: bool,
    },
    /// Run a (possibly nested) sweep, recording every point
    Sweep(Sweep),
    /// Pause the sequence
    Wait {
        /// Pause length
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
}

impl Action {
    /// Recorded `Set`.
    pub fn set(parameter: ParameterId, value: f64) -> Self {
        Action::Set {
            parameter,
            value,
            record: true,
        }
    }

    /// `Wait` for `duration`.
    pub fn wait(duration: Duration) -> Self {
        Action::Wait { duration }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Set { .. } => "Set",
            Action::Sweep(_) => "Sweep",
            Action::Wait { .. } => "Wait",
        }
    }

    /// Structural checks that need no hardware.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Action::Set {
                parameter, value, ..
            } if !value.is_finite() => Err(DaqError::Sequence(format!(
                "Set {} to non-finite value {}",
                parameter, value
            ))),
            Action::Set { .. } | Action::Wait { .. } => Ok(()),
            Action::Sweep(sweep) => sweep.validate(),
        }
    }
}

impl From<Sweep> for Action {
    fn from(sweep: Sweep) -> Self {
        Action::Sweep(sweep)
    }
}

/// Validate every action, reporting the first bad one by position.
pub fn validate_actions(actions: &[Action]) -> AppResult<()> {
    for (index, action) in actions.iter().enumerate() {
        action.validate().map_err(|e| match e {
            DaqError::Sequence(msg) => DaqError::Sequence(format!("action {}: {}", index, msg)),
            DaqError::InvalidRange(msg) => {
                DaqError::InvalidRange(format!("action {}: {}", index, msg))
            }
            other => other,
        })?;
    }
    Ok(())
}

/// Parse and validate a JSON sequence definition.
pub fn parse_sequence(json: &str) -> AppResult<Vec<Action>> {
    let actions: Vec<Action> = serde_json::from_str(json)
        .map_err(|e| DaqError::Sequence(format!("malformed sequence definition: {}", e)))?;
    validate_actions(&actions)?;
    Ok(actions)
}
