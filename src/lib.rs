//! # Peppermint Core Library
//!
//! This crate is the measurement core for transport-measurement workflows: it
//! drives instruments through ordered Set / Sweep / Wait sequences, samples
//! auxiliary quantities on independent timers, persists every captured value
//! durably, and serves a live, pull-based view of the stored data for
//! plotting. Screens, instrument discovery and concrete drivers live outside;
//! drivers plug in through the [`hardware::Instrument`] trait.
//!
//! ## Crate Structure
//!
//! - **`abort`**: `AbortToken`, the cooperative cancellation flag checked at
//!   every action, sweep point and logging tick.
//! - **`config`**: `PeppermintConfig`, loaded from TOML and `PEPPERMINT_*`
//!   environment variables with `figment`.
//! - **`data`**: the SQLite-backed `DataStore`, run bookkeeping and CSV export.
//! - **`error`**: the `DaqError` / `StorageError` taxonomy.
//! - **`experiment`**: actions, sweeps and the `ActionSequence` state machine.
//! - **`feed`**: `LiveFeed`, which reshapes stored samples into series.
//! - **`hardware`**: the `Instrument` capability, registry, `Setter` and a mock.
//! - **`logging`**: `LogTask` loops and the `LoggingSupervisor` that owns them.
//! - **`parameter`**: parameter identifiers, value types and bounds.
//! - **`session`**: the `Session` context object and control surface.
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//!
//! ## Concurrency
//!
//! ```text
//! ActionSequence ──Setter──▶ instruments
//!        │
//!        ▼
//!   DataStore (WAL) ◀── LogTask × N ──Setter──▶ instruments
//!        ▲
//!        │
//!    LiveFeed ──mpsc──▶ renderer
//! ```
//!
//! Each actor runs on its own tokio task. The store is their only shared
//! resource: appends are serialized on one writer connection while readers
//! work from WAL snapshots.

pub mod abort;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod feed;
pub mod hardware;
pub mod logging;
pub mod parameter;
pub mod session;
pub mod tracing_setup;

pub use abort::{AbortToken, PauseGate};
pub use config::PeppermintConfig;
pub use error::{AppResult, DaqError, StorageError};
pub use session::Session;
