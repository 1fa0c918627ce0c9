//! Recurring background sampling.
//!
//! A [`LogTask`] reads a fixed set of parameters every `interval` and appends
//! one sample per successful read to the store, tagged with its run. It runs
//! on its own tokio task, so its timer is independent of any sequence.
//!
//! Failure policy:
//! - a failed read skips that parameter for this tick and is logged at `warn`
//! - a transient storage failure drops the tick's batch; after more than
//!   `max_storage_failures` in a row the task aborts
//! - any other storage failure aborts the task at once, logged at `error`
//!
//! Cancellation is checked before every tick. A tick that has started always
//! finishes its reads and its write before the loop exits. A task given a
//! duration ends itself as `Completed` once that much time has passed.

use crate::abort::AbortToken;
use crate::data::{DataStore, RunId, Sample};
use crate::hardware::Setter;
use crate::parameter::ParameterId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Supervisor-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogTaskId(pub u64);

impl fmt::Display for LogTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log-{}", self.0)
    }
}

/// Lifecycle of a log task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogTaskStatus {
    /// Sampling
    Running,
    /// Cancelled by its owner
    Stopped,
    /// Ran for its configured duration
    Completed,
    /// Terminated by a storage failure
    Aborted {
        /// Rendered storage error
        cause: String,
    },
}

/// Progress counters and status of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogTaskReport {
    /// Task identifier
    pub id: LogTaskId,
    /// Run the samples belong to
    pub run_id: RunId,
    /// Sampled parameters
    pub parameters: Vec<ParameterId>,
    /// Current or final status
    pub status: LogTaskStatus,
    /// Ticks executed
    pub ticks: u64,
    /// Samples durably written
    pub samples_written: u64,
    /// Reads that failed and were skipped
    pub skipped_reads: u64,
}

/// A recurring sampling job, not yet started.
pub struct LogTask {
    id: LogTaskId,
    run_id: RunId,
    parameters: Vec<ParameterId>,
    interval: Duration,
    duration: Option<Duration>,
    max_storage_failures: u32,
    setter: Setter,
    store: DataStore,
}

impl LogTask {
    /// Describe a task. `interval` must be nonzero; the supervisor checks.
    pub fn new(
        id: LogTaskId,
        run_id: RunId,
        parameters: Vec<ParameterId>,
        interval: Duration,
        setter: Setter,
        store: DataStore,
    ) -> Self {
        Self {
            id,
            run_id,
            parameters,
            interval,
            duration: None,
            max_storage_failures: 3,
            setter,
            store,
        }
    }

    /// Transient storage failures tolerated in a row before aborting.
    pub fn with_max_storage_failures(mut self, max: u32) -> Self {
        self.max_storage_failures = max;
        self
    }

    /// Stop sampling on its own after `duration`.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Start sampling on a new tokio task.
    pub fn spawn(self) -> LogTaskHandle {
        let abort = AbortToken::new();
        let (progress, rx) = watch::channel(self.initial_report());
        let id = self.id;
        let run_id = self.run_id;

        let token = abort.clone();
        let join = tokio::spawn(async move { self.run(token, progress).await });

        LogTaskHandle {
            id,
            run_id,
            abort,
            progress: rx,
            join,
        }
    }

    fn initial_report(&self) -> LogTaskReport {
        LogTaskReport {
            id: self.id,
            run_id: self.run_id,
            parameters: self.parameters.clone(),
            status: LogTaskStatus::Running,
            ticks: 0,
            samples_written: 0,
            skipped_reads: 0,
        }
    }

    async fn run(self, abort: AbortToken, progress: watch::Sender<LogTaskReport>) -> LogTaskReport {
        let mut report = self.initial_report();
        let mut consecutive_failures = 0u32;
        let deadline = self.duration.map(|d| Instant::now() + d);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(task = %self.id, run_id = %self.run_id, interval = ?self.interval, "log task started");

        let final_status = loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => break LogTaskStatus::Stopped,
                _ = expiry(deadline) => {
                    info!(task = %self.id, "logging duration elapsed");
                    break LogTaskStatus::Completed;
                }
                _ = ticker.tick() => {}
            }
            if abort.is_aborted() {
                break LogTaskStatus::Stopped;
            }

            report.ticks += 1;
            let mut batch = Vec::with_capacity(self.parameters.len());
            for parameter in &self.parameters {
                match self.read_sample(parameter).await {
                    Ok(sample) => batch.push(sample),
                    Err(e) => {
                        report.skipped_reads += 1;
                        warn!(task = %self.id, parameter = %parameter, error = %e, "read failed, skipping sample");
                    }
                }
            }

            match self.store.append_batch(batch).await {
                Ok(written) => {
                    consecutive_failures = 0;
                    report.samples_written += written as u64;
                }
                Err(e) if e.is_recoverable() && consecutive_failures < self.max_storage_failures => {
                    consecutive_failures += 1;
                    warn!(
                        task = %self.id,
                        error = %e,
                        attempt = consecutive_failures,
                        "transient storage failure, tick dropped"
                    );
                }
                Err(e) => {
                    error!(task = %self.id, run_id = %self.run_id, error = %e, "storage failure, aborting log task");
                    break LogTaskStatus::Aborted { cause: e.to_string() };
                }
            }

            progress.send_replace(report.clone());
            debug!(task = %self.id, tick = report.ticks, "tick complete");
        };

        report.status = final_status;
        progress.send_replace(report.clone());
        info!(
            task = %self.id,
            status = ?report.status,
            samples = report.samples_written,
            "log task finished"
        );
        report
    }

    async fn read_sample(&self, parameter: &ParameterId) -> crate::error::AppResult<Sample> {
        let value = self.setter.read(parameter).await?;
        let spec = self.setter.spec(parameter)?;
        Ok(Sample::now(self.run_id, parameter.clone(), value, spec.value_type))
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owner's handle on a running [`LogTask`].
pub struct LogTaskHandle {
    id: LogTaskId,
    run_id: RunId,
    abort: AbortToken,
    progress: watch::Receiver<LogTaskReport>,
    join: JoinHandle<LogTaskReport>,
}

impl LogTaskHandle {
    /// Task identifier.
    pub fn id(&self) -> LogTaskId {
        self.id
    }

    /// Run the task writes to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Latest progress snapshot.
    pub fn report(&self) -> LogTaskReport {
        self.progress.borrow().clone()
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the task to stop after its current tick.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Wait for the task to end and return its final report.
    pub async fn join(self) -> LogTaskReport {
        let last = self.report();
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                error!(task = %self.id, error = %e, "log task did not finish cleanly");
                LogTaskReport {
                    status: LogTaskStatus::Aborted {
                        cause: e.to_string(),
                    },
                    ..last
                }
            }
        }
    }

    /// Cancel, then wait.
    pub async fn stop(self) -> LogTaskReport {
        self.cancel();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RunKind;
    use crate::hardware::mock::MockInstrument;
    use crate::hardware::InstrumentRegistry;
    use crate::parameter::{ParameterSpec, ValueType};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn temp_a() -> ParameterId {
        ParameterId::new("ls336", "temperature_a")
    }

    fn temp_b() -> ParameterId {
        ParameterId::new("ls336", "temperature_b")
    }

    async fn rig() -> (Setter, DataStore, Arc<MockInstrument>, RunId, TempDir) {
        let ls336 = Arc::new(
            MockInstrument::new("ls336")
                .with_parameter(ParameterSpec::new(temp_a(), ValueType::Float).readable(), 4.2)
                .with_parameter(ParameterSpec::new(temp_b(), ValueType::Float).readable(), 4.5),
        );
        let registry = InstrumentRegistry::new().with_instrument(ls336.clone()).unwrap();
        let setter = Setter::new(Arc::new(registry), Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path().join("samples.db"), Duration::from_secs(5)).unwrap();
        let run = store.create_run(RunKind::Logging, "cooldown").await.unwrap();
        (setter, store, ls336, run.run_id, dir)
    }

    #[tokio::test]
    async fn stopped_after_five_and_a_half_intervals() {
        let (setter, store, _ls336, run_id, _dir) = rig().await;
        let handle = LogTask::new(
            LogTaskId(1),
            run_id,
            vec![temp_a(), temp_b()],
            Duration::from_millis(100),
            setter,
            store.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(550)).await;
        let report = handle.stop().await;

        assert_eq!(report.status, LogTaskStatus::Stopped);
        let rows = store.query(&run_id).await.unwrap();
        for parameter in [temp_a(), temp_b()] {
            let n = rows.iter().filter(|r| r.sample.parameter == parameter).count();
            assert!((5..=6).contains(&n), "{} samples for {}", n, parameter);
        }
        assert_eq!(report.samples_written as usize, rows.len());
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_read_is_skipped_and_logged() {
        let (setter, store, ls336, run_id, _dir) = rig().await;
        ls336.fail_reads("temperature_b", true);
        let task = LogTask::new(
            LogTaskId(2),
            run_id,
            vec![temp_a(), temp_b()],
            Duration::from_millis(20),
            setter,
            store.clone(),
        );
        let (progress, _rx) = watch::channel(task.initial_report());
        let abort = AbortToken::new();
        let stopper = {
            let abort = abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(90)).await;
                abort.abort();
            })
        };

        let report = task.run(abort, progress).await;
        stopper.await.unwrap();

        assert_eq!(report.status, LogTaskStatus::Stopped);
        assert!(report.skipped_reads >= 1);
        assert_eq!(report.skipped_reads, report.ticks);
        assert_eq!(store.columns(&run_id).await.unwrap(), vec![temp_a()]);
        assert!(logs_contain("read failed, skipping sample"));
    }

    #[tokio::test]
    async fn persistent_storage_failure_aborts_only_that_task() {
        let (setter, store, _ls336, run_id, _dir) = rig().await;
        let orphan = LogTask::new(
            LogTaskId(3),
            RunId::new(),
            vec![temp_a()],
            Duration::from_millis(20),
            setter.clone(),
            store.clone(),
        )
        .spawn();
        let healthy = LogTask::new(
            LogTaskId(4),
            run_id,
            vec![temp_b()],
            Duration::from_millis(20),
            setter,
            store.clone(),
        )
        .spawn();

        let orphan_report = orphan.join().await;
        match orphan_report.status {
            LogTaskStatus::Aborted { cause } => assert!(cause.contains("unknown run")),
            other => panic!("unexpected status {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(healthy.report().status, LogTaskStatus::Running);
        assert!(!healthy.is_finished());
        let report = healthy.stop().await;
        assert_eq!(report.status, LogTaskStatus::Stopped);
        assert!(report.samples_written >= 1);
    }

    #[tokio::test]
    async fn nan_reading_is_skipped_without_losing_the_tick() {
        let (setter, store, ls336, run_id, _dir) = rig().await;
        ls336.set_value("temperature_a", f64::NAN);
        let handle = LogTask::new(
            LogTaskId(5),
            run_id,
            vec![temp_a(), temp_b()],
            Duration::from_millis(20),
            setter,
            store.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(handle.report().status, LogTaskStatus::Running);
        let report = handle.stop().await;

        assert_eq!(report.status, LogTaskStatus::Stopped);
        assert_eq!(report.skipped_reads, report.ticks);
        assert_eq!(report.samples_written, report.ticks);
        assert_eq!(store.columns(&run_id).await.unwrap(), vec![temp_b()]);
    }

    /// Hold the write lock on the task's database from a second connection.
    fn lock_database(dir: &TempDir) -> rusqlite::Connection {
        let locker = rusqlite::Connection::open(dir.path().join("samples.db")).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();
        locker
    }

    #[tokio::test]
    async fn locked_database_drops_ticks_and_recovers() {
        let (setter, _store, _ls336, run_id, dir) = rig().await;
        let store = DataStore::open(dir.path().join("samples.db"), Duration::from_millis(20)).unwrap();
        let locker = lock_database(&dir);
        let handle = LogTask::new(
            LogTaskId(6),
            run_id,
            vec![temp_a()],
            Duration::from_millis(10),
            setter,
            store.clone(),
        )
        .with_max_storage_failures(5)
        .spawn();

        tokio::time::sleep(Duration::from_millis(45)).await;
        let held = handle.report();
        assert_eq!(held.status, LogTaskStatus::Running);
        assert!(held.ticks >= 1);
        assert_eq!(held.samples_written, 0);

        locker.execute_batch("ROLLBACK").unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(handle.report().status, LogTaskStatus::Running);

        let report = handle.stop().await;
        assert_eq!(report.status, LogTaskStatus::Stopped);
        assert!(report.samples_written >= 1);
        assert_eq!(store.sample_count(&run_id).await.unwrap() as u64, report.samples_written);
    }

    #[tokio::test]
    async fn locked_database_aborts_after_max_failures() {
        let (setter, _store, _ls336, run_id, dir) = rig().await;
        let store = DataStore::open(dir.path().join("samples.db"), Duration::from_millis(20)).unwrap();
        let _locker = lock_database(&dir);
        let handle = LogTask::new(
            LogTaskId(7),
            run_id,
            vec![temp_a()],
            Duration::from_millis(10),
            setter,
            store,
        )
        .with_max_storage_failures(2)
        .spawn();

        let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("task should abort on its own");

        match report.status {
            LogTaskStatus::Aborted { cause } => assert!(cause.contains("database busy")),
            other => panic!("unexpected status {:?}", other),
        }
        // Two dropped ticks are tolerated; the third failure aborts
        assert_eq!(report.ticks, 3);
        assert_eq!(report.samples_written, 0);
    }

    #[tokio::test]
    async fn time_limited_task_completes_on_its_own() {
        let (setter, store, _ls336, run_id, _dir) = rig().await;
        let handle = LogTask::new(
            LogTaskId(8),
            run_id,
            vec![temp_a()],
            Duration::from_millis(10),
            setter,
            store.clone(),
        )
        .with_duration(Duration::from_millis(55))
        .spawn();

        let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("task should end after its duration");

        assert_eq!(report.status, LogTaskStatus::Completed);
        assert!((3..=7).contains(&report.ticks), "{} ticks", report.ticks);
        assert_eq!(store.sample_count(&run_id).await.unwrap() as u64, report.samples_written);
    }
}
