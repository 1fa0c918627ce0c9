//! Sample persistence and export.
pub mod export;
pub mod sample;
pub mod store;

pub use sample::{RunId, RunKind, RunRecord, RunStatus, Sample, StoredSample};
pub use store::DataStore;
