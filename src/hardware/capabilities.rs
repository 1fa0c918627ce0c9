//! Instrument Capability
//!
//! The measurement core talks to hardware through one small trait. Each
//! instrument type (source-meter, temperature controller, magnet supply)
//! implements [`Instrument`] once; the Setter, sweep engine and log tasks depend
//! only on this interface, never on a concrete driver.
//!
//! # Design Philosophy
//!
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for driver errors
//! - Addresses parameters by their instrument-local name
//!
//! # Example
//!
//! ```rust,ignore
//! struct Lakeshore336 { session: VisaSession }
//!
//! #[async_trait]
//! impl Instrument for Lakeshore336 {
//!     fn name(&self) -> &str { "ls336" }
//!
//!     fn parameters(&self) -> Vec<ParameterSpec> {
//!         vec![ParameterSpec::new(ParameterId::new("ls336", "temperature_a"), ValueType::Float)
//!             .readable()
//!             .with_unit("K")]
//!     }
//!
//!     async fn write(&self, parameter: &str, value: f64) -> Result<()> {
//!         self.session.write(&format!("SETP 1,{value}")).await
//!     }
//!
//!     async fn read(&self, parameter: &str) -> Result<f64> {
//!         self.session.query("KRDG? A").await?.trim().parse().map_err(Into::into)
//!     }
//! }
//! ```

use crate::parameter::ParameterSpec;
use anyhow::Result;
use async_trait::async_trait;

/// Capability: parameter read/write
///
/// # Contract
/// - `parameters()` declares every parameter the instrument exposes; the
///   declaration is fixed for the lifetime of the instrument
/// - `write` returns once the instrument has accepted the value
/// - `read` returns the current value in the parameter's declared unit
/// - Neither call needs its own timeout; callers bound them
///
/// # Thread Safety
/// - All methods take `&self`; use interior mutability for session state
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Instrument name, the first half of every [`ParameterId`](crate::parameter::ParameterId)
    fn name(&self) -> &str;

    /// Declared parameters
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Write `value` to the named parameter
    async fn write(&self, parameter: &str, value: f64) -> Result<()>;

    /// Read the named parameter
    async fn read(&self, parameter: &str) -> Result<f64>;
}
