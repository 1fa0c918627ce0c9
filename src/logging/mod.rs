//! Background parameter logging.
//!
//! - [`task`]: one recurring sampling loop and its handle
//! - [`supervisor`]: owner of all running loops, keyed by run

pub mod supervisor;
pub mod task;

pub use supervisor::LoggingSupervisor;
pub use task::{LogTask, LogTaskHandle, LogTaskId, LogTaskReport, LogTaskStatus};
