//! Logging Supervisor
//!
//! Owns every running [`LogTask`], keyed by the run it writes to. Tasks are
//! independent of each other and of any action sequence; the data store is
//! their only shared resource.

use crate::config::LoggingConfig;
use crate::data::{DataStore, RunId};
use crate::error::{AppResult, DaqError};
use crate::hardware::Setter;
use crate::logging::task::{LogTask, LogTaskHandle, LogTaskId, LogTaskReport};
use crate::parameter::ParameterId;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Registry of running log tasks.
pub struct LoggingSupervisor {
    setter: Setter,
    store: DataStore,
    max_storage_failures: u32,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<RunId, Vec<LogTaskHandle>>>,
}

impl LoggingSupervisor {
    /// Supervisor reading through `setter` and writing to `store`.
    pub fn new(setter: Setter, store: DataStore, config: &LoggingConfig) -> Self {
        Self {
            setter,
            store,
            max_storage_failures: config.max_consecutive_storage_failures,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a task sampling `parameters` every `interval` into `run_id`.
    ///
    /// # Errors
    /// - `InvalidRange` if `interval` is zero
    /// - `Parameter` if the list is empty or a parameter is unknown or not
    ///   readable
    /// - `Storage` if the run does not exist
    pub async fn start(
        &self,
        parameters: Vec<ParameterId>,
        interval: Duration,
        run_id: RunId,
    ) -> AppResult<LogTaskId> {
        self.launch(parameters, interval, run_id, None).await
    }

    /// Like [`start`](Self::start), but the task ends itself as `Completed`
    /// after `duration`. Fails with `InvalidRange` if `duration` is zero.
    pub async fn start_for(
        &self,
        parameters: Vec<ParameterId>,
        interval: Duration,
        run_id: RunId,
        duration: Duration,
    ) -> AppResult<LogTaskId> {
        if duration.is_zero() {
            return Err(DaqError::InvalidRange("logging duration must be positive".into()));
        }
        self.launch(parameters, interval, run_id, Some(duration)).await
    }

    #[instrument(skip(self, parameters), fields(run_id = %run_id, parameters = parameters.len()))]
    async fn launch(
        &self,
        parameters: Vec<ParameterId>,
        interval: Duration,
        run_id: RunId,
        duration: Option<Duration>,
    ) -> AppResult<LogTaskId> {
        if interval.is_zero() {
            return Err(DaqError::InvalidRange("logging interval must be positive".into()));
        }
        if parameters.is_empty() {
            return Err(DaqError::Parameter("no parameters to log".into()));
        }
        for parameter in &parameters {
            if !self.setter.spec(parameter)?.readable {
                return Err(DaqError::Parameter(format!("{} is not readable", parameter)));
            }
        }
        self.store.run(&run_id).await?;

        let id = LogTaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut task = LogTask::new(
            id,
            run_id,
            parameters,
            interval,
            self.setter.clone(),
            self.store.clone(),
        )
        .with_max_storage_failures(self.max_storage_failures);
        if let Some(duration) = duration {
            task = task.with_duration(duration);
        }
        let handle = task.spawn();

        self.tasks.lock().await.entry(run_id).or_default().push(handle);
        info!(task = %id, duration = ?duration, "log task launched");
        Ok(id)
    }

    /// Stop every task of `run_id` and wait for each to finish its tick.
    ///
    /// Returns the final reports; empty if nothing was logging to the run.
    pub async fn stop(&self, run_id: &RunId) -> Vec<LogTaskReport> {
        let handles = self.tasks.lock().await.remove(run_id).unwrap_or_default();
        for handle in &handles {
            handle.cancel();
        }

        let reports = join_all(handles.into_iter().map(LogTaskHandle::join)).await;
        if !reports.is_empty() {
            info!(run_id = %run_id, tasks = reports.len(), "logging stopped");
        }
        reports
    }

    /// Stop every task of every run.
    pub async fn stop_all(&self) -> Vec<LogTaskReport> {
        let runs: Vec<RunId> = self.tasks.lock().await.keys().copied().collect();
        let mut reports = Vec::new();
        for run_id in runs {
            reports.extend(self.stop(&run_id).await);
        }
        reports
    }

    /// Progress of each task logging to `run_id`, including ones that have
    /// aborted but not yet been stopped.
    pub async fn status(&self, run_id: &RunId) -> Vec<LogTaskReport> {
        self.tasks
            .lock()
            .await
            .get(run_id)
            .map(|handles| handles.iter().map(LogTaskHandle::report).collect())
            .unwrap_or_default()
    }

    /// Whether any task is registered for `run_id`.
    pub async fn is_logging(&self, run_id: &RunId) -> bool {
        self.tasks.lock().await.contains_key(run_id)
    }

    /// Runs with registered tasks.
    pub async fn active_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self.tasks.lock().await.keys().copied().collect();
        runs.sort();
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RunKind;
    use crate::hardware::mock::MockInstrument;
    use crate::hardware::InstrumentRegistry;
    use crate::logging::task::LogTaskStatus;
    use crate::parameter::{ParameterSpec, ValueType};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn supervisor() -> (LoggingSupervisor, DataStore, TempDir) {
        let ls336 = Arc::new(
            MockInstrument::new("ls336")
                .with_parameter(
                    ParameterSpec::new(ParameterId::new("ls336", "temperature_a"), ValueType::Float)
                        .readable(),
                    4.2,
                )
                .with_parameter(
                    ParameterSpec::new(ParameterId::new("ls336", "setpoint"), ValueType::Float)
                        .writable(),
                    4.2,
                ),
        );
        let registry = InstrumentRegistry::new().with_instrument(ls336).unwrap();
        let setter = Setter::new(Arc::new(registry), Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path().join("samples.db"), Duration::from_secs(5)).unwrap();
        let sup = LoggingSupervisor::new(setter, store.clone(), &LoggingConfig::default());
        (sup, store, dir)
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let (sup, store, _dir) = supervisor().await;
        let run = store.create_run(RunKind::Logging, "bad").await.unwrap();
        let temp = ParameterId::new("ls336", "temperature_a");

        assert!(matches!(
            sup.start(vec![temp.clone()], Duration::ZERO, run.run_id).await,
            Err(DaqError::InvalidRange(_))
        ));
        assert!(matches!(
            sup.start(vec![ParameterId::new("ls336", "setpoint")], Duration::from_millis(10), run.run_id)
                .await,
            Err(DaqError::Parameter(_))
        ));
        assert!(matches!(
            sup.start(vec![temp], Duration::from_millis(10), RunId::new()).await,
            Err(DaqError::Storage(_))
        ));
        assert!(sup.active_runs().await.is_empty());
    }

    #[tokio::test]
    async fn stop_joins_every_task_of_the_run() {
        let (sup, store, _dir) = supervisor().await;
        let run = store.create_run(RunKind::Logging, "two tasks").await.unwrap();
        let other = store.create_run(RunKind::Logging, "untouched").await.unwrap();
        let temp = ParameterId::new("ls336", "temperature_a");

        let a = sup.start(vec![temp.clone()], Duration::from_millis(10), run.run_id).await.unwrap();
        let b = sup.start(vec![temp.clone()], Duration::from_millis(15), run.run_id).await.unwrap();
        sup.start(vec![temp], Duration::from_millis(10), other.run_id).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(sup.status(&run.run_id).await.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let reports = sup.stop(&run.run_id).await;

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == LogTaskStatus::Stopped));
        assert!(!sup.is_logging(&run.run_id).await);
        assert!(sup.is_logging(&other.run_id).await);
        assert!(sup.stop(&run.run_id).await.is_empty());

        assert_eq!(sup.stop_all().await.len(), 1);
        assert!(sup.active_runs().await.is_empty());
    }

    #[tokio::test]
    async fn time_limited_task_reports_completed() {
        let (sup, store, _dir) = supervisor().await;
        let run = store.create_run(RunKind::Logging, "timed").await.unwrap();
        let temp = ParameterId::new("ls336", "temperature_a");

        assert!(matches!(
            sup.start_for(vec![temp.clone()], Duration::from_millis(10), run.run_id, Duration::ZERO)
                .await,
            Err(DaqError::InvalidRange(_))
        ));

        sup.start_for(vec![temp], Duration::from_millis(10), run.run_id, Duration::from_millis(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let status = sup.status(&run.run_id).await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].status, LogTaskStatus::Completed);

        let reports = sup.stop(&run.run_id).await;
        assert_eq!(reports[0].status, LogTaskStatus::Completed);
        assert!(reports[0].samples_written >= 1);
    }
}
