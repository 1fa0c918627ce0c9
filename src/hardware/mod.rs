//! Hardware access layer.
//!
//! - [`capabilities`]: the `Instrument` read/write trait every driver implements
//! - [`registry`]: name -> driver lookup and parameter declarations
//! - [`setter`]: validated, timeout-bounded I/O used by the rest of the core
//! - [`mock`]: simulated instrument for tests and dry runs

pub mod capabilities;
pub mod mock;
pub mod registry;
pub mod setter;

pub use capabilities::Instrument;
pub use registry::InstrumentRegistry;
pub use setter::Setter;
