//! Sequence lifecycle state.
//!
//! # State Machine
//!
//! ```text
//! Idle ──run()──> Running ──┬──> Completed
//!                           ├──> Aborted
//!                           └──> Failed
//! ```
//!
//! Transitions only move forward. Once a terminal state is reached the
//! sequence never runs again.

use crate::data::{RunId, RunStatus};
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an action sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    /// Built but not started
    Idle,
    /// Executing actions
    Running,
    /// All actions finished
    Completed,
    /// Stopped at an abort checkpoint
    Aborted,
    /// Halted by an action error
    Failed,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SequenceState::Idle => "Idle",
            SequenceState::Running => "Running",
            SequenceState::Completed => "Completed",
            SequenceState::Aborted => "Aborted",
            SequenceState::Failed => "Failed",
        };
        f.write_str(text)
    }
}

impl SequenceState {
    /// Completed, Aborted or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Completed | SequenceState::Aborted | SequenceState::Failed
        )
    }

    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(&self, next: SequenceState) -> bool {
        match self {
            SequenceState::Idle => next == SequenceState::Running,
            SequenceState::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next`, or fail with `Sequence` if the move goes backwards.
    pub fn transition(&mut self, next: SequenceState) -> AppResult<()> {
        if !self.can_transition_to(next) {
            return Err(DaqError::Sequence(format!(
                "illegal transition {} -> {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    /// Run-table status matching this state.
    pub fn run_status(&self) -> RunStatus {
        match self {
            SequenceState::Idle | SequenceState::Running => RunStatus::Running,
            SequenceState::Completed => RunStatus::Completed,
            SequenceState::Aborted => RunStatus::Aborted,
            SequenceState::Failed => RunStatus::Failed,
        }
    }
}

/// Where and why a sequence failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFailure {
    /// Position of the failing action
    pub index: usize,
    /// Rendered error
    pub error: String,
}

/// Snapshot of a sequence's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStatus {
    /// Run the sequence writes to
    pub run_id: RunId,
    /// Lifecycle state
    pub state: SequenceState,
    /// Action currently (or last) executing
    pub current_index: Option<usize>,
    /// Held at a checkpoint; `state` stays `Running`
    #[serde(default)]
    pub paused: bool,
    /// Number of actions
    pub total: usize,
    /// Samples persisted so far
    pub samples_written: usize,
    /// Set when `state` is `Failed`
    pub failure: Option<SequenceFailure>,
}

impl SequenceStatus {
    /// Idle status for a sequence of `total` actions.
    pub fn idle(run_id: RunId, total: usize) -> Self {
        Self {
            run_id,
            state: SequenceState::Idle,
            current_index: None,
            paused: false,
            total,
            samples_written: 0,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        let mut state = SequenceState::Idle;
        assert!(state.transition(SequenceState::Completed).is_err());
        state.transition(SequenceState::Running).unwrap();
        state.transition(SequenceState::Aborted).unwrap();
        assert!(state.is_terminal());

        for next in [
            SequenceState::Running,
            SequenceState::Completed,
            SequenceState::Idle,
        ] {
            assert!(state.transition(next).is_err());
        }
        assert_eq!(state, SequenceState::Aborted);
    }

    #[test]
    fn terminal_states_map_to_run_status() {
        assert_eq!(SequenceState::Failed.run_status(), RunStatus::Failed);
        assert_eq!(SequenceState::Running.run_status(), RunStatus::Running);
    }
}
