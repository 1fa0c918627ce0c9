//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, shared by every
//! component of the measurement core. Using the `thiserror` crate, it gives a
//! single, consistent taxonomy for the ways a run can go wrong, from a bad
//! sequence definition to an instrument that stops answering.
//!
//! ## Error Hierarchy
//!
//! - **`Parameter`**: the parameter is unknown, or lacks the read/write
//!   capability the operation needs.
//! - **`Range`**: a value falls outside the declared bounds of a parameter.
//! - **`Hardware`**: communication with an instrument failed or timed out.
//! - **`Storage`**: wraps [`StorageError`], the persistence failures of the
//!   [`DataStore`](crate::data::DataStore).
//! - **`Sequence`** / **`InvalidRange`**: a malformed action or sweep
//!   definition, detected before any hardware is touched.
//! - **`Configuration`** / **`Config`**: semantic and parse errors in the
//!   configuration.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error
//! types, so the `?` operator works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Range error: {parameter} = {value} outside [{min}, {max}]")]
    Range {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Hardware error on {parameter}: {message}")]
    Hardware { parameter: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sequence error: {0}")]
    Sequence(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DaqError {
    /// Whether a recurring task may skip this failure and keep going.
    ///
    /// Hardware hiccups and transient storage contention are recoverable;
    /// everything else means the task cannot make progress.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Hardware { .. } => true,
            DaqError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

/// Failures raised by the sample store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("unknown run '{0}'")]
    UnknownRun(String),

    /// The database was locked by another connection past the busy timeout.
    #[error("database busy: {0}")]
    Busy(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Transient errors may succeed on retry; the rest will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Busy(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StorageError::Busy(value.to_string())
            }
            _ => StorageError::Backend(value.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(value: tokio::task::JoinError) -> Self {
        StorageError::Task(value.to_string())
    }
}

impl From<rusqlite::Error> for DaqError {
    fn from(value: rusqlite::Error) -> Self {
        DaqError::Storage(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_and_busy_storage_are_recoverable() {
        let hw = DaqError::Hardware {
            parameter: "ls336.temperature_a".into(),
            message: "timed out".into(),
        };
        assert!(hw.is_recoverable());

        let busy = DaqError::Storage(StorageError::Busy("locked".into()));
        assert!(busy.is_recoverable());
    }

    #[test]
    fn persistent_failures_are_not_recoverable() {
        let backend = DaqError::Storage(StorageError::Backend("disk I/O error".into()));
        assert!(!backend.is_recoverable());
        assert!(!DaqError::Sequence("empty sweep".into()).is_recoverable());
        assert!(!DaqError::Parameter("unknown".into()).is_recoverable());
    }

    #[test]
    fn busy_sqlite_error_maps_to_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        let storage: StorageError = err.into();
        assert!(storage.is_transient());
    }

    #[test]
    fn range_error_message_names_bounds() {
        let err = DaqError::Range {
            parameter: "k2450.voltage".into(),
            value: 25.0,
            min: -20.0,
            max: 20.0,
        };
        let text = err.to_string();
        assert!(text.contains("k2450.voltage"));
        assert!(text.contains("[-20, 20]"));
    }
}
