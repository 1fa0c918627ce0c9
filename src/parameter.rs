//! Instrument parameter declarations.
//!
//! A parameter is addressed by [`ParameterId`] (`instrument.name`) and described
//! by a [`ParameterSpec`]: its value type, whether it can be read and/or
//! written, and optional bounds. Values travel through the core as `f64`; the
//! declared [`ValueType`] constrains which `f64` values are acceptable.
//!
//! # Example
//!
//! ```
//! use peppermint::parameter::{ParameterId, ParameterSpec, ValueType};
//!
//! let voltage = ParameterSpec::new(ParameterId::new("k2450", "voltage"), ValueType::Float)
//!     .writable()
//!     .readable()
//!     .with_bounds(-20.0, 20.0);
//!
//! assert!(voltage.validate(5.0).is_ok());
//! assert!(voltage.validate(25.0).is_err());
//! ```

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Identification
// =============================================================================

/// Fully-qualified parameter identifier: instrument plus parameter name.
///
/// Serialized as the dotted string `instrument.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParameterId {
    instrument: String,
    name: String,
}

impl ParameterId {
    /// Build an identifier from its two halves.
    pub fn new(instrument: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            name: name.into(),
        }
    }

    /// Owning instrument.
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Parameter name within the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instrument, self.name)
    }
}

impl FromStr for ParameterId {
    type Err = DaqError;

    /// Parses `instrument.name`; the name may itself contain dots
    /// (e.g. `ls336.output_1.setpoint`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((instrument, name)) if !instrument.is_empty() && !name.is_empty() => {
                Ok(Self::new(instrument, name))
            }
            _ => Err(DaqError::Parameter(format!(
                "'{}' is not of the form instrument.parameter",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ParameterId {
    type Error = DaqError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParameterId> for String {
    fn from(value: ParameterId) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Value typing
// =============================================================================

/// Declared value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Any finite real number
    Float,
    /// Whole numbers only
    Integer,
    /// 0.0 or 1.0
    Boolean,
}

impl ValueType {
    /// Stable lowercase name, as stored alongside samples.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Float => "float",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            ValueType::Float => true,
            ValueType::Integer => value.fract() == 0.0,
            ValueType::Boolean => value == 0.0 || value == 1.0,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(ValueType::Float),
            "integer" => Ok(ValueType::Integer),
            "boolean" => Ok(ValueType::Boolean),
            other => Err(DaqError::Parameter(format!("unknown value type '{}'", other))),
        }
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lowest accepted value
    pub min: f64,
    /// Highest accepted value
    pub max: f64,
}

impl Bounds {
    /// Whether `value` lies within `[min, max]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

// =============================================================================
// ParameterSpec
// =============================================================================

/// Declaration of one instrument parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Identifier
    pub id: ParameterId,
    /// Declared value type
    pub value_type: ValueType,
    /// Whether `read` is supported
    pub readable: bool,
    /// Whether `write` is supported
    pub writable: bool,
    /// Optional inclusive bounds, enforced on writes
    pub bounds: Option<Bounds>,
    /// Unit of measurement (e.g. "V", "K", "T")
    pub unit: Option<String>,
}

impl ParameterSpec {
    /// A parameter with no capabilities yet; chain the builder methods.
    pub fn new(id: ParameterId, value_type: ValueType) -> Self {
        Self {
            id,
            value_type,
            readable: false,
            writable: false,
            bounds: None,
            unit: None,
        }
    }

    /// Mark readable.
    pub fn readable(mut self) -> Self {
        self.readable = true;
        self
    }

    /// Mark writable.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Declare inclusive bounds.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(Bounds { min, max });
        self
    }

    /// Attach a unit label.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Check that `value` may be written: type first, then bounds.
    pub fn validate(&self, value: f64) -> AppResult<()> {
        if !self.value_type.accepts(value) {
            return Err(DaqError::Parameter(format!(
                "{} expects a {} value, got {}",
                self.id, self.value_type, value
            )));
        }

        if let Some(bounds) = self.bounds {
            if !bounds.contains(value) {
                return Err(DaqError::Range {
                    parameter: self.id.to_string(),
                    value,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        Ok(())
    }
}
