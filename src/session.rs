//! Session management for the measurement core.
//!
//! A [`Session`] is the one context object an application builds at startup.
//! It owns the instrument registry, the data store, the setter, the logging
//! supervisor and the table of running sequences, and it is where they are
//! torn down ([`Session::shutdown`]).
//!
//! ## Control Surface
//!
//! - **`start`** / **`start_json`**: validate a sequence, open a run and
//!   execute it on its own task, returning the run identifier at once.
//! - **`abort`**, **`pause`**, **`resume`**, **`status`**, **`wait`**: follow
//!   or steer a running sequence. A sequence is released once `wait` or
//!   `status` has returned its terminal status; its run stays in the store.
//! - **`start_logging`** / **`start_logging_for`** / **`stop_logging`**:
//!   standalone logging runs, open-ended or time-limited.
//! - **`log_into`**: add a log task to an existing run, e.g. to record
//!   temperature alongside a sweep.
//! - **`live_feed`** / **`spawn_live_feed`**: plottable view of any run.
//!
//! ```rust,ignore
//! let session = Session::open(PeppermintConfig::load()?, registry)?;
//! let run_id = session.start_json(&definition, "iv at 4K").await?;
//! let (mut feed, _task) = session.spawn_live_feed(run_id, AbortToken::new());
//! while let Some(poll) = feed.recv().await { render(poll) }
//! let status = session.wait(&run_id).await?;
//! ```

use crate::abort::AbortToken;
use crate::config::PeppermintConfig;
use crate::data::{DataStore, RunId, RunKind, RunRecord, RunStatus};
use crate::error::{AppResult, DaqError};
use crate::experiment::action::{parse_sequence, validate_actions, Action};
use crate::experiment::{ActionSequence, SequenceStatus};
use crate::feed::{FeedPoll, LiveFeed};
use crate::hardware::{InstrumentRegistry, Setter};
use crate::logging::{LogTaskId, LogTaskReport, LogTaskStatus, LoggingSupervisor};
use crate::parameter::ParameterId;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

struct SequenceEntry {
    sequence: Arc<ActionSequence>,
    abort: AbortToken,
    join: JoinHandle<AppResult<SequenceStatus>>,
}

/// Context object and control surface for one lab session.
pub struct Session {
    config: PeppermintConfig,
    registry: Arc<InstrumentRegistry>,
    store: DataStore,
    setter: Setter,
    logging: LoggingSupervisor,
    sequences: Mutex<HashMap<RunId, SequenceEntry>>,
}

impl Session {
    /// Validate `config`, open the store and wire the components together.
    pub fn open(config: PeppermintConfig, registry: InstrumentRegistry) -> AppResult<Self> {
        config.validate()?;
        let store = DataStore::from_config(&config.storage)?;
        let registry = Arc::new(registry);
        let setter = Setter::new(Arc::clone(&registry), config.hardware.io_timeout);
        let logging = LoggingSupervisor::new(setter.clone(), store.clone(), &config.logging);

        info!(
            name = %config.application.name,
            instruments = ?registry.instrument_names(),
            "session opened"
        );
        Ok(Self {
            config,
            registry,
            store,
            setter,
            logging,
            sequences: Mutex::new(HashMap::new()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PeppermintConfig {
        &self.config
    }

    /// Registered instruments.
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Shared sample store.
    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Parameter write/read path.
    pub fn setter(&self) -> &Setter {
        &self.setter
    }

    /// Logging supervisor.
    pub fn logging(&self) -> &LoggingSupervisor {
        &self.logging
    }

    // ---------------- Sequences ----------------

    /// Validate `actions`, open a run and execute them in the background.
    #[instrument(skip(self, actions), fields(actions = actions.len()))]
    pub async fn start(&self, actions: Vec<Action>, label: &str) -> AppResult<RunId> {
        validate_actions(&actions)?;
        let run = self.store.create_run(RunKind::Sequence, label).await?;
        let run_id = run.run_id;

        let sequence = Arc::new(ActionSequence::new(run_id, actions));
        let abort = AbortToken::new();

        let join = {
            let sequence = Arc::clone(&sequence);
            let (setter, store, abort) = (self.setter.clone(), self.store.clone(), abort.clone());
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(sequence.run(&setter, &store, &abort))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(result) => result,
                    Err(payload) => Ok(sequence
                        .fail_interrupted(&store, &panic_message(payload.as_ref()))
                        .await),
                }
            })
        };

        self.sequences.lock().await.insert(
            run_id,
            SequenceEntry {
                sequence,
                abort,
                join,
            },
        );
        info!(run_id = %run_id, "sequence launched");
        Ok(run_id)
    }

    /// Parse a JSON sequence definition and [`start`](Self::start) it.
    pub async fn start_json(&self, definition: &str, label: &str) -> AppResult<RunId> {
        let actions = parse_sequence(definition)?;
        self.start(actions, label).await
    }

    /// Request abort of a running sequence. Takes effect at its next
    /// checkpoint; a write in flight completes first.
    pub async fn abort(&self, run_id: &RunId) -> AppResult<()> {
        let sequences = self.sequences.lock().await;
        let entry = sequences.get(run_id).ok_or_else(|| unknown_sequence(run_id))?;
        entry.abort.abort();
        info!(run_id = %run_id, "abort requested");
        Ok(())
    }

    /// Hold a sequence at its next checkpoint. It stays `Running` with
    /// `paused` set until resumed or aborted.
    pub async fn pause(&self, run_id: &RunId) -> AppResult<()> {
        let sequences = self.sequences.lock().await;
        let entry = sequences.get(run_id).ok_or_else(|| unknown_sequence(run_id))?;
        entry.sequence.pause()
    }

    /// Release a paused sequence.
    pub async fn resume(&self, run_id: &RunId) -> AppResult<()> {
        let sequences = self.sequences.lock().await;
        let entry = sequences.get(run_id).ok_or_else(|| unknown_sequence(run_id))?;
        entry.sequence.resume();
        Ok(())
    }

    /// Current status of a sequence. A terminal status whose task has
    /// exited is returned once, then the sequence is released.
    pub async fn status(&self, run_id: &RunId) -> AppResult<SequenceStatus> {
        let mut sequences = self.sequences.lock().await;
        let entry = sequences.get(run_id).ok_or_else(|| unknown_sequence(run_id))?;
        let status = entry.sequence.status();
        if status.state.is_terminal() && entry.join.is_finished() {
            sequences.remove(run_id);
            debug!(run_id = %run_id, "sequence released");
        }
        Ok(status)
    }

    /// Wait until a sequence reaches a terminal state and its task exits,
    /// then release it.
    pub async fn wait(&self, run_id: &RunId) -> AppResult<SequenceStatus> {
        let mut updates = {
            let sequences = self.sequences.lock().await;
            sequences
                .get(run_id)
                .ok_or_else(|| unknown_sequence(run_id))?
                .sequence
                .subscribe()
        };
        let final_status = updates
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|s| s.clone())
            .map_err(|_| {
                DaqError::Sequence(format!("sequence for run {} ended without a final state", run_id))
            })?;

        let entry = self.sequences.lock().await.remove(run_id);
        if let Some(entry) = entry {
            if let Err(e) = entry.join.await {
                warn!(run_id = %run_id, error = %e, "sequence task failed");
                self.store.finish_run(run_id, RunStatus::Failed).await?;
            }
        }
        Ok(final_status)
    }

    // ---------------- Logging ----------------

    /// Open a logging run sampling `parameters` every `interval` (or the
    /// configured default).
    #[instrument(skip(self, parameters), fields(parameters = parameters.len()))]
    pub async fn start_logging(
        &self,
        parameters: Vec<ParameterId>,
        interval: Option<Duration>,
    ) -> AppResult<RunId> {
        let label = parameters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let run = self.store.create_run(RunKind::Logging, label).await?;
        let interval = interval.unwrap_or(self.config.logging.default_interval);

        if let Err(e) = self.logging.start(parameters, interval, run.run_id).await {
            self.store.finish_run(&run.run_id, RunStatus::Failed).await?;
            return Err(e);
        }
        Ok(run.run_id)
    }

    /// Open a logging run whose task ends itself after `duration`. The run
    /// is closed as `Completed` by [`stop_logging`](Self::stop_logging) or
    /// shutdown.
    #[instrument(skip(self, parameters), fields(parameters = parameters.len()))]
    pub async fn start_logging_for(
        &self,
        parameters: Vec<ParameterId>,
        interval: Option<Duration>,
        duration: Duration,
    ) -> AppResult<RunId> {
        let label = parameters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let run = self.store.create_run(RunKind::Logging, label).await?;
        let interval = interval.unwrap_or(self.config.logging.default_interval);

        if let Err(e) = self
            .logging
            .start_for(parameters, interval, run.run_id, duration)
            .await
        {
            self.store.finish_run(&run.run_id, RunStatus::Failed).await?;
            return Err(e);
        }
        Ok(run.run_id)
    }

    /// Add a log task to an existing run (for instance a sequence run).
    pub async fn log_into(
        &self,
        run_id: &RunId,
        parameters: Vec<ParameterId>,
        interval: Option<Duration>,
    ) -> AppResult<LogTaskId> {
        let interval = interval.unwrap_or(self.config.logging.default_interval);
        self.logging.start(parameters, interval, *run_id).await
    }

    /// Stop every log task of `run_id` and, for a logging run, close the run.
    ///
    /// Stopping a run with no active tasks returns an empty list.
    pub async fn stop_logging(&self, run_id: &RunId) -> AppResult<Vec<LogTaskReport>> {
        let reports = self.logging.stop(run_id).await;
        if !reports.is_empty() && self.store.run(run_id).await?.kind == RunKind::Logging {
            self.store.finish_run(run_id, logging_outcome(&reports)).await?;
        }
        Ok(reports)
    }

    // ---------------- Data ----------------

    /// Every recorded run, oldest first.
    pub async fn runs(&self) -> AppResult<Vec<RunRecord>> {
        self.store.runs().await
    }

    /// Incremental, elapsed-time feed of a run.
    pub fn live_feed(&self, run_id: RunId) -> LiveFeed {
        LiveFeed::new(self.store.clone(), run_id)
    }

    /// Poll a run on the configured cadence, delivering to a bounded channel.
    pub fn spawn_live_feed(
        &self,
        run_id: RunId,
        abort: AbortToken,
    ) -> (mpsc::Receiver<FeedPoll>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.live_feed.channel_capacity);
        let task = self
            .live_feed(run_id)
            .spawn(self.config.live_feed.poll_interval, tx, abort);
        (rx, task)
    }

    // ---------------- Teardown ----------------

    /// Abort every sequence, stop every log task and wait for all of them.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> AppResult<()> {
        let entries: Vec<(RunId, SequenceEntry)> = self.sequences.lock().await.drain().collect();
        for (_, entry) in &entries {
            entry.abort.abort();
        }
        for (run_id, entry) in entries {
            match entry.join.await {
                Ok(Ok(status)) => info!(run_id = %run_id, state = %status.state, "sequence closed"),
                Ok(Err(e)) => warn!(run_id = %run_id, error = %e, "sequence ended with error"),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "sequence task failed");
                    self.store.finish_run(&run_id, RunStatus::Failed).await?;
                }
            }
        }

        let mut by_run: HashMap<RunId, Vec<LogTaskReport>> = HashMap::new();
        for report in self.logging.stop_all().await {
            by_run.entry(report.run_id).or_default().push(report);
        }
        for (run_id, reports) in by_run {
            if self.store.run(&run_id).await?.kind == RunKind::Logging {
                self.store.finish_run(&run_id, logging_outcome(&reports)).await?;
            }
        }

        info!("session shut down");
        Ok(())
    }
}

fn unknown_sequence(run_id: &RunId) -> DaqError {
    DaqError::Sequence(format!("no sequence for run {}", run_id))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `Failed` if every task aborted on storage, `Completed` if every task ran
/// out its duration, otherwise `Stopped`.
fn logging_outcome(reports: &[LogTaskReport]) -> RunStatus {
    if reports
        .iter()
        .all(|r| matches!(r.status, LogTaskStatus::Aborted { .. }))
    {
        RunStatus::Failed
    } else if reports.iter().all(|r| r.status == LogTaskStatus::Completed) {
        RunStatus::Completed
    } else {
        RunStatus::Stopped
    }
}
