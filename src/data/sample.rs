//! Run and sample records.

use crate::error::StorageError;
use crate::parameter::{ParameterId, ValueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// An action sequence execution
    Sequence,
    /// A standalone logging session
    Logging,
}

/// Recorded outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Still accumulating samples
    Running,
    /// Sequence reached the end of its actions
    Completed,
    /// Stopped by an abort request
    Aborted,
    /// Halted by an error
    Failed,
    /// Logging stopped explicitly
    Stopped,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Stored text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StorageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(StorageError::Backend(format!(
                        "unrecognised {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(RunKind {
    Sequence => "sequence",
    Logging => "logging",
});

text_enum!(RunStatus {
    Running => "running",
    Completed => "completed",
    Aborted => "aborted",
    Failed => "failed",
    Stopped => "stopped",
});

/// Bookkeeping row for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Identifier
    pub run_id: RunId,
    /// Sequence or logging
    pub kind: RunKind,
    /// Free-form label supplied by the caller
    pub label: String,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Set once the run has finished
    pub ended_at: Option<DateTime<Utc>>,
    /// Current or final status
    pub status: RunStatus,
}

/// One captured value. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Owning run
    pub run_id: RunId,
    /// Wall-clock capture time
    pub timestamp: DateTime<Utc>,
    /// Parameter the value belongs to
    pub parameter: ParameterId,
    /// Captured value
    pub value: f64,
    /// Declared type of the parameter at capture time
    pub value_type: ValueType,
}

impl Sample {
    /// Sample stamped with the current wall-clock time.
    pub fn now(run_id: RunId, parameter: ParameterId, value: f64, value_type: ValueType) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            parameter,
            value,
            value_type,
        }
    }
}

/// A sample as read back, with its store-assigned sequence number.
///
/// `seq` grows with every accepted write across the whole store and is the
/// cursor used for incremental reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Store-assigned, strictly increasing insertion number
    pub seq: i64,
    /// The sample itself
    #[serde(flatten)]
    pub sample: Sample,
}
