//! Sequenced experiment execution.
//!
//! - [`action`]: the Set / Sweep / Wait steps and their JSON form
//! - [`sweep`]: point generation and the sweep engine
//! - [`state`]: the sequence state machine and status snapshots
//! - [`sequence`]: the executor tying actions, setter and store together

pub mod action;
pub mod sequence;
pub mod state;
pub mod sweep;

pub use action::{parse_sequence, Action};
pub use sequence::ActionSequence;
pub use state::{SequenceFailure, SequenceState, SequenceStatus};
pub use sweep::{PointObserver, Spacing, Sweep, SweepAxis, SweepEngine, SweepOutcome, SweepPoint};
