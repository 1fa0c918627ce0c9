//! Durable sample store.
//!
//! [`DataStore`] keeps every run's samples in one SQLite database opened in WAL
//! mode with `synchronous = FULL`, so a committed append survives a crash and
//! readers work from a consistent snapshot while a write is in progress.
//!
//! Two connections are held:
//! - a **writer**, behind a mutex; every append (single or batch) is one
//!   transaction on this connection, which serializes all writers
//! - a **reader**, used for queries; under WAL it never waits on the writer
//!
//! Blocking SQLite calls run on the blocking pool via
//! `tokio::task::spawn_blocking`, so sequence executors, log tasks and feed
//! pollers never stall the async runtime.
//!
//! ```text
//! ActionSequence ──┐
//! LogTask (×N) ────┼──▶ writer ──▶ samples.db (WAL) ◀── reader ◀── LiveFeed
//! ```
//!
//! The sample table is shared by all runs and keyed by `run_id`; the set of
//! parameters in a run is whatever has been written to it, reported by
//! [`DataStore::columns`].

use crate::config::StorageConfig;
use crate::data::sample::{RunId, RunKind, RunRecord, RunStatus, Sample, StoredSample};
use crate::error::{AppResult, StorageError};
use crate::parameter::{ParameterId, ValueType};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id     TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    label      TEXT NOT NULL,
    started_ns INTEGER NOT NULL,
    ended_ns   INTEGER,
    status     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS samples (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id       TEXT NOT NULL REFERENCES runs(run_id),
    timestamp_ns INTEGER NOT NULL,
    parameter    TEXT NOT NULL,
    value        REAL NOT NULL,
    value_type   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_run_time ON samples(run_id, timestamp_ns, id);
";

const SAMPLE_COLUMNS: &str = "id, timestamp_ns, parameter, value, value_type";

struct StoreInner {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

/// Shared handle to the sample database. Cheap to clone.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<StoreInner>,
}

impl DataStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&path)?;
        let mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "writer connection ready");
        writer.pragma_update(None, "synchronous", "FULL")?;
        writer.busy_timeout(busy_timeout)?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(&path)?;
        reader.busy_timeout(busy_timeout)?;
        reader.pragma_update(None, "query_only", true)?;

        info!(path = %path.display(), "opened sample store");
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                writer: Mutex::new(writer),
                reader: Mutex::new(reader),
            }),
        })
    }

    /// Open the database described by the storage configuration.
    pub fn from_config(config: &StorageConfig) -> AppResult<Self> {
        Self::open(&config.database_path, config.busy_timeout)
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    // ---------------- Runs ----------------

    /// Record a new run in the `Running` state.
    pub async fn create_run(&self, kind: RunKind, label: impl Into<String>) -> AppResult<RunRecord> {
        let record = RunRecord {
            run_id: RunId::new(),
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Running,
        };
        let row = record.clone();
        self.blocking(move |inner| {
            let conn = inner.writer()?;
            conn.execute(
                "INSERT INTO runs (run_id, kind, label, started_ns, ended_ns, status)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    row.run_id.to_string(),
                    row.kind.as_str(),
                    row.label,
                    to_nanos(row.started_at)?,
                    row.status.as_str()
                ],
            )?;
            Ok(())
        })
        .await?;
        debug!(run_id = %record.run_id, kind = %record.kind, "run created");
        Ok(record)
    }

    /// Mark a run finished. The first call wins; later calls leave the
    /// recorded outcome untouched.
    pub async fn finish_run(&self, run_id: &RunId, status: RunStatus) -> AppResult<()> {
        let id = run_id.to_string();
        let ended = to_nanos(Utc::now())?;
        self.blocking(move |inner| {
            let conn = inner.writer()?;
            let changed = conn.execute(
                "UPDATE runs SET ended_ns = ?1, status = ?2 WHERE run_id = ?3 AND ended_ns IS NULL",
                params![ended, status.as_str(), id],
            )?;
            if changed == 0 {
                ensure_run(&conn, &id)?;
            }
            Ok(())
        })
        .await
    }

    /// Fetch one run's record.
    pub async fn run(&self, run_id: &RunId) -> AppResult<RunRecord> {
        let id = run_id.to_string();
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            conn.query_row(
                "SELECT run_id, kind, label, started_ns, ended_ns, status FROM runs WHERE run_id = ?1",
                params![id],
                row_to_run,
            )
            .optional()?
            .ok_or(StorageError::UnknownRun(id))
        })
        .await
    }

    /// Every recorded run, oldest first.
    pub async fn runs(&self) -> AppResult<Vec<RunRecord>> {
        self.blocking(|inner| {
            let conn = inner.reader()?;
            let mut stmt = conn.prepare(
                "SELECT run_id, kind, label, started_ns, ended_ns, status FROM runs
                 ORDER BY started_ns, rowid",
            )?;
            let runs = stmt.query_map([], row_to_run)?.collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
        .await
    }

    // ---------------- Writes ----------------

    /// Durably append one sample, returning its sequence number.
    ///
    /// Returns only after the transaction has committed.
    pub async fn append(&self, sample: Sample) -> AppResult<i64> {
        self.blocking(move |inner| {
            let mut conn = inner.writer()?;
            let tx = conn.transaction()?;
            ensure_run(&tx, &sample.run_id.to_string())?;
            let seq = insert_sample(&tx, &sample)?;
            tx.commit()?;
            Ok(seq)
        })
        .await
    }

    /// Durably append several samples in one transaction: either all are
    /// stored or none are.
    pub async fn append_batch(&self, samples: Vec<Sample>) -> AppResult<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        self.blocking(move |inner| {
            let mut conn = inner.writer()?;
            let tx = conn.transaction()?;
            let mut checked: Vec<RunId> = Vec::new();
            for sample in &samples {
                if !checked.contains(&sample.run_id) {
                    ensure_run(&tx, &sample.run_id.to_string())?;
                    checked.push(sample.run_id);
                }
                insert_sample(&tx, sample)?;
            }
            tx.commit()?;
            Ok(samples.len())
        })
        .await
    }

    // ---------------- Reads ----------------

    /// All samples of a run, ordered by timestamp (ties by insertion order).
    pub async fn query(&self, run_id: &RunId) -> AppResult<Vec<StoredSample>> {
        let run_id = *run_id;
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            let id = run_id.to_string();
            ensure_run(&conn, &id)?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE run_id = ?1 ORDER BY timestamp_ns, id"
            ))?;
            let rows = stmt
                .query_map(params![id], |row| row_to_sample(row, run_id))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Samples of a run written after sequence number `after`, ordered by
    /// timestamp. Pass 0 to read from the beginning.
    pub async fn query_since(&self, run_id: &RunId, after: i64) -> AppResult<Vec<StoredSample>> {
        let run_id = *run_id;
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            let id = run_id.to_string();
            ensure_run(&conn, &id)?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE run_id = ?1 AND id > ?2
                 ORDER BY timestamp_ns, id"
            ))?;
            let rows = stmt
                .query_map(params![id, after], |row| row_to_sample(row, run_id))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// The last `n` samples of a run, in timestamp order.
    pub async fn tail(&self, run_id: &RunId, n: usize) -> AppResult<Vec<StoredSample>> {
        let run_id = *run_id;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            let id = run_id.to_string();
            ensure_run(&conn, &id)?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM (
                     SELECT {SAMPLE_COLUMNS} FROM samples WHERE run_id = ?1
                     ORDER BY timestamp_ns DESC, id DESC LIMIT ?2
                 ) ORDER BY timestamp_ns, id"
            ))?;
            let rows = stmt
                .query_map(params![id, limit], |row| row_to_sample(row, run_id))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Distinct parameters written to a run so far, in order of first
    /// appearance.
    pub async fn columns(&self, run_id: &RunId) -> AppResult<Vec<ParameterId>> {
        let id = run_id.to_string();
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            ensure_run(&conn, &id)?;
            let mut stmt = conn.prepare_cached(
                "SELECT parameter FROM samples WHERE run_id = ?1
                 GROUP BY parameter ORDER BY MIN(id)",
            )?;
            let columns = stmt
                .query_map(params![id], |row| {
                    let text: String = row.get(0)?;
                    parse_column(0, &text)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    /// Number of samples stored for a run.
    pub async fn sample_count(&self, run_id: &RunId) -> AppResult<usize> {
        let id = run_id.to_string();
        self.blocking(move |inner| {
            let conn = inner.reader()?;
            ensure_run(&conn, &id)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM samples WHERE run_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(StorageError::from)?;
        Ok(result?)
    }
}

impl StoreInner {
    fn writer(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Backend("writer connection poisoned".into()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Backend("reader connection poisoned".into()))
    }
}

fn ensure_run(conn: &Connection, run_id: &str) -> Result<(), StorageError> {
    let exists = conn
        .query_row("SELECT 1 FROM runs WHERE run_id = ?1", params![run_id], |_| Ok(()))
        .optional()?;
    match exists {
        Some(()) => Ok(()),
        None => Err(StorageError::UnknownRun(run_id.to_string())),
    }
}

fn insert_sample(conn: &Connection, sample: &Sample) -> Result<i64, StorageError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO samples (run_id, timestamp_ns, parameter, value, value_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    stmt.execute(params![
        sample.run_id.to_string(),
        to_nanos(sample.timestamp)?,
        sample.parameter.to_string(),
        sample.value,
        sample.value_type.as_str()
    ])?;
    Ok(conn.last_insert_rowid())
}

fn to_nanos(ts: DateTime<Utc>) -> Result<i64, StorageError> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| StorageError::Backend(format!("timestamp {} out of range", ts)))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_column(idx: usize, text: &str) -> rusqlite::Result<ParameterId> {
    ParameterId::from_str(text).map_err(|e| conversion_error(idx, e))
}

fn row_to_sample(row: &Row<'_>, run_id: RunId) -> rusqlite::Result<StoredSample> {
    let parameter: String = row.get(2)?;
    let value_type: String = row.get(4)?;
    Ok(StoredSample {
        seq: row.get(0)?,
        sample: Sample {
            run_id,
            timestamp: Utc.timestamp_nanos(row.get(1)?),
            parameter: parse_column(2, &parameter)?,
            value: row.get(3)?,
            value_type: ValueType::from_str(&value_type).map_err(|e| conversion_error(4, e))?,
        },
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let run_id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let status: String = row.get(5)?;
    let ended: Option<i64> = row.get(4)?;
    Ok(RunRecord {
        run_id: RunId::from_str(&run_id).map_err(|e| conversion_error(0, e))?,
        kind: RunKind::from_str(&kind).map_err(|e| conversion_error(1, e))?,
        label: row.get(2)?,
        started_at: Utc.timestamp_nanos(row.get(3)?),
        ended_at: ended.map(|ns| Utc.timestamp_nanos(ns)),
        status: RunStatus::from_str(&status).map_err(|e| conversion_error(5, e))?,
    })
}
