//! Action sequence executor.
//!
//! [`ActionSequence`] runs an ordered list of [`Action`]s against a
//! [`Setter`] and a [`DataStore`]. Progress is published on a `watch`
//! channel so any number of observers can follow it without touching the
//! executor.
//!
//! Checkpoints: the abort token is checked before every action and before
//! every sweep point. A paused sequence holds at the next checkpoint, still
//! `Running`, until it is resumed or aborted. Waits and settle delays end
//! early on abort. Samples written before an abort or failure are kept.

use crate::abort::{AbortToken, PauseGate};
use crate::data::{DataStore, RunId, Sample};
use crate::error::{AppResult, DaqError};
use crate::experiment::action::Action;
use crate::experiment::state::{SequenceFailure, SequenceState, SequenceStatus};
use crate::experiment::sweep::{PointObserver, Sweep, SweepEngine, SweepOutcome, SweepPoint};
use crate::hardware::Setter;
use crate::parameter::ParameterId;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

enum Step {
    Continue,
    Aborted,
}

/// Finite-state executor for one run's actions.
pub struct ActionSequence {
    run_id: RunId,
    actions: Vec<Action>,
    status: watch::Sender<SequenceStatus>,
    pause: PauseGate,
}

impl ActionSequence {
    /// Idle sequence that will write its samples to `run_id`.
    pub fn new(run_id: RunId, actions: Vec<Action>) -> Self {
        let (status, _) = watch::channel(SequenceStatus::idle(run_id, actions.len()));
        Self {
            run_id,
            actions,
            status,
            pause: PauseGate::new(),
        }
    }

    /// Run this sequence writes to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The actions, in execution order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Current status snapshot.
    pub fn status(&self) -> SequenceStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status update.
    pub fn subscribe(&self) -> watch::Receiver<SequenceStatus> {
        self.status.subscribe()
    }

    /// Hold at the next checkpoint. Fails once the sequence is terminal.
    pub fn pause(&self) -> AppResult<()> {
        let state = self.status.borrow().state;
        if state.is_terminal() {
            return Err(DaqError::Sequence(format!(
                "sequence for run {} is {} and cannot be paused",
                self.run_id, state
            )));
        }
        if self.pause.pause() {
            self.status.send_modify(|s| s.paused = true);
            info!(run_id = %self.run_id, "sequence paused");
        }
        Ok(())
    }

    /// Release a paused sequence. Resuming one that is not paused is a no-op.
    pub fn resume(&self) {
        if self.pause.resume() {
            self.status.send_modify(|s| s.paused = false);
            info!(run_id = %self.run_id, "sequence resumed");
        }
    }

    /// Whether the sequence is held (or will hold) at a checkpoint.
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Execute every action in order.
    ///
    /// Action failures do not surface as `Err`: they end the sequence in
    /// `Failed` with the failing index recorded in the returned status. `Err`
    /// is returned only when the sequence has already been run.
    #[instrument(skip_all, fields(run_id = %self.run_id, actions = self.actions.len()))]
    pub async fn run(
        &self,
        setter: &Setter,
        store: &DataStore,
        abort: &AbortToken,
    ) -> AppResult<SequenceStatus> {
        let mut started = false;
        self.status.send_if_modified(|status| {
            started = status.state.transition(SequenceState::Running).is_ok();
            started
        });
        if !started {
            return Err(DaqError::Sequence(format!(
                "sequence for run {} is {} and cannot be started",
                self.run_id,
                self.status.borrow().state
            )));
        }
        info!("sequence started");

        for (index, action) in self.actions.iter().enumerate() {
            if !self.pause.hold(abort).await {
                return Ok(self.finish(store, SequenceState::Aborted, None).await);
            }
            self.status.send_modify(|s| s.current_index = Some(index));
            debug!(index, kind = action.kind(), "executing action");

            match self.execute(action, setter, store, abort).await {
                Ok(Step::Continue) => {}
                Ok(Step::Aborted) => {
                    return Ok(self.finish(store, SequenceState::Aborted, None).await);
                }
                Err(e) => {
                    error!(index, kind = action.kind(), error = %e, "action failed");
                    let failure = SequenceFailure {
                        index,
                        error: e.to_string(),
                    };
                    return Ok(self.finish(store, SequenceState::Failed, Some(failure)).await);
                }
            }
        }

        Ok(self.finish(store, SequenceState::Completed, None).await)
    }

    async fn execute(
        &self,
        action: &Action,
        setter: &Setter,
        store: &DataStore,
        abort: &AbortToken,
    ) -> AppResult<Step> {
        match action {
            Action::Set {
                parameter,
                value,
                record,
            } => {
                setter.set(parameter, *value).await?;
                if *record {
                    let spec = setter.spec(parameter)?;
                    store
                        .append(Sample::now(self.run_id, parameter.clone(), *value, spec.value_type))
                        .await?;
                    self.status.send_modify(|s| s.samples_written += 1);
                }
                Ok(Step::Continue)
            }
            Action::Wait { duration } => {
                tokio::select! {
                    _ = sleep(*duration) => Ok(Step::Continue),
                    _ = abort.cancelled() => Ok(Step::Aborted),
                }
            }
            Action::Sweep(sweep) => {
                let mut recorder = SweepRecorder {
                    run_id: self.run_id,
                    sweep,
                    setter,
                    store,
                    status: &self.status,
                };
                match SweepEngine::new(setter.clone())
                    .with_pause_gate(self.pause.clone())
                    .run(sweep, &mut recorder, abort)
                    .await?
                {
                    SweepOutcome::Completed { .. } => Ok(Step::Continue),
                    SweepOutcome::Aborted { .. } => Ok(Step::Aborted),
                }
            }
        }
    }

    /// Close a sequence whose task died mid-action as `Failed`, blaming the
    /// action it was executing.
    pub(crate) async fn fail_interrupted(&self, store: &DataStore, cause: &str) -> SequenceStatus {
        let failure = SequenceFailure {
            index: self.status.borrow().current_index.unwrap_or(0),
            error: format!("sequence task panicked: {}", cause),
        };
        error!(run_id = %self.run_id, error = %failure.error, "sequence interrupted");
        self.finish(store, SequenceState::Failed, Some(failure)).await
    }

    async fn finish(
        &self,
        store: &DataStore,
        state: SequenceState,
        failure: Option<SequenceFailure>,
    ) -> SequenceStatus {
        self.pause.resume();
        self.status.send_modify(|s| {
            s.paused = false;
            if s.state.transition(state).is_ok() {
                s.failure = failure;
            }
        });
        let status = self.status();
        info!(
            state = %status.state,
            samples = status.samples_written,
            "sequence finished"
        );

        if let Err(e) = store.finish_run(&self.run_id, state.run_status()).await {
            warn!(error = %e, "could not record run outcome");
        }
        status
    }
}

/// Persists the coordinates and tracked values of each settled point.
struct SweepRecorder<'a> {
    run_id: RunId,
    sweep: &'a Sweep,
    setter: &'a Setter,
    store: &'a DataStore,
    status: &'a watch::Sender<SequenceStatus>,
}

impl SweepRecorder<'_> {
    fn sample(&self, parameter: &ParameterId, value: f64) -> AppResult<Sample> {
        let spec = self.setter.spec(parameter)?;
        Ok(Sample::now(self.run_id, parameter.clone(), value, spec.value_type))
    }
}

#[async_trait]
impl PointObserver for SweepRecorder<'_> {
    async fn on_point(&mut self, point: &SweepPoint) -> AppResult<()> {
        let mut samples = Vec::with_capacity(point.coordinates.len() + self.sweep.track.len());
        for (parameter, value) in &point.coordinates {
            samples.push(self.sample(parameter, *value)?);
        }
        for parameter in &self.sweep.track {
            let value = self.setter.read(parameter).await?;
            samples.push(self.sample(parameter, value)?);
        }

        let written = self.store.append_batch(samples).await?;
        self.status.send_modify(|s| s.samples_written += written);
        Ok(())
    }
}
