//! Live Feed
//!
//! Read-only view of a run for plotting. A [`LiveFeed`] pulls from the
//! [`DataStore`] on its own cadence and reshapes the rows into one series of
//! `(axis, value)` pairs per parameter. Writers never wait on it.
//!
//! # Modes
//!
//! - [`FeedMode::Incremental`]: each poll returns only rows stored since the
//!   previous poll; the renderer appends them.
//! - [`FeedMode::FullReload`]: each poll returns the whole run (or its last
//!   `max_points` rows); the renderer replaces what it has.
//!
//! # Axis
//!
//! By default values are plotted against seconds elapsed since the run
//! started. With [`FeedAxis::Parameter`] each value is paired with the most
//! recent value of the axis parameter; rows seen before the first axis value
//! are dropped, and the axis parameter gets no series of its own.
//!
//! A failed query (unknown run, busy database) yields [`FeedPoll::NoData`]
//! and leaves the feed's cursor untouched, so the next poll simply retries.

use crate::abort::AbortToken;
use crate::data::{DataStore, RunId, StoredSample};
use crate::error::AppResult;
use crate::parameter::ParameterId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// What the x-axis of every series is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedAxis {
    /// Seconds since the run started
    #[default]
    ElapsedTime,
    /// Latest value of another parameter
    Parameter(ParameterId),
}

/// How each poll reads the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Only rows new since the last poll
    #[default]
    Incremental,
    /// Every row (or the tail) on every poll
    FullReload,
}

/// Series produced by one poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FeedUpdate {
    /// Per-parameter `(axis, value)` pairs in timestamp order
    pub series: BTreeMap<ParameterId, Vec<(f64, f64)>>,
    /// Parameters seen for the first time in this poll
    pub new_columns: Vec<ParameterId>,
    /// Whether `series` replaces (true) or extends (false) earlier data
    pub replace: bool,
}

impl FeedUpdate {
    /// No points and no new columns.
    pub fn is_empty(&self) -> bool {
        self.new_columns.is_empty() && self.series.values().all(Vec::is_empty)
    }

    /// Total points across all series.
    pub fn point_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FeedPoll {
    /// Nothing readable yet; retry on the next poll
    NoData {
        /// Why the query failed
        reason: String,
    },
    /// Fresh series
    Update(FeedUpdate),
}

/// Pull-based reader turning one run's samples into plottable series.
pub struct LiveFeed {
    store: DataStore,
    run_id: RunId,
    axis: FeedAxis,
    mode: FeedMode,
    max_points: Option<usize>,
    cursor: i64,
    columns: Vec<ParameterId>,
    origin: Option<DateTime<Utc>>,
    last_axis_value: Option<f64>,
}

impl LiveFeed {
    /// Incremental, elapsed-time feed of `run_id`.
    pub fn new(store: DataStore, run_id: RunId) -> Self {
        Self {
            store,
            run_id,
            axis: FeedAxis::default(),
            mode: FeedMode::default(),
            max_points: None,
            cursor: 0,
            columns: Vec::new(),
            origin: None,
            last_axis_value: None,
        }
    }

    /// Plot against `axis` instead of elapsed time.
    pub fn with_axis(mut self, axis: FeedAxis) -> Self {
        self.axis = axis;
        self
    }

    /// Choose incremental or full-reload polling.
    pub fn with_mode(mut self, mode: FeedMode) -> Self {
        self.mode = mode;
        self
    }

    /// In full-reload mode, read only the last `n` rows.
    pub fn with_max_points(mut self, n: usize) -> Self {
        self.max_points = Some(n);
        self
    }

    /// Run being followed.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Columns delivered so far, in order of discovery.
    pub fn columns(&self) -> &[ParameterId] {
        &self.columns
    }

    /// Query the store once. Never fails.
    pub async fn poll(&mut self) -> FeedPoll {
        match self.try_poll().await {
            Ok(update) => FeedPoll::Update(update),
            Err(e) => {
                debug!(run_id = %self.run_id, error = %e, "live feed has no data yet");
                FeedPoll::NoData {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_poll(&mut self) -> AppResult<FeedUpdate> {
        let origin = match self.origin {
            Some(origin) => origin,
            None => self.store.run(&self.run_id).await?.started_at,
        };

        let (rows, replace) = match self.mode {
            FeedMode::Incremental => (self.store.query_since(&self.run_id, self.cursor).await?, false),
            FeedMode::FullReload => {
                let rows = match self.max_points {
                    Some(n) => self.store.tail(&self.run_id, n).await?,
                    None => self.store.query(&self.run_id).await?,
                };
                (rows, true)
            }
        };
        // Read after the rows so every row's parameter is already listed
        let columns = self.store.columns(&self.run_id).await?;

        // Every query succeeded; only now advance the feed's state
        self.origin = Some(origin);
        if let Some(last) = rows.iter().map(|r| r.seq).max() {
            self.cursor = self.cursor.max(last);
        }
        if replace {
            self.last_axis_value = None;
        }

        let mut update = FeedUpdate {
            replace,
            ..FeedUpdate::default()
        };
        for column in columns {
            if !self.columns.contains(&column) {
                self.columns.push(column.clone());
                update.new_columns.push(column);
            }
        }
        for column in &self.columns {
            if !self.is_axis(column) && (replace || update.new_columns.contains(column)) {
                update.series.entry(column.clone()).or_default();
            }
        }

        self.reshape(&rows, origin, &mut update);
        trace!(
            run_id = %self.run_id,
            rows = rows.len(),
            points = update.point_count(),
            "live feed polled"
        );
        Ok(update)
    }

    fn is_axis(&self, parameter: &ParameterId) -> bool {
        matches!(&self.axis, FeedAxis::Parameter(axis) if axis == parameter)
    }

    fn reshape(&mut self, rows: &[StoredSample], origin: DateTime<Utc>, update: &mut FeedUpdate) {
        for row in rows {
            let sample = &row.sample;
            let x = match &self.axis {
                FeedAxis::ElapsedTime => {
                    let micros = (sample.timestamp - origin).num_microseconds().unwrap_or(0);
                    micros as f64 / 1e6
                }
                FeedAxis::Parameter(axis) if *axis == sample.parameter => {
                    self.last_axis_value = Some(sample.value);
                    continue;
                }
                FeedAxis::Parameter(_) => match self.last_axis_value {
                    Some(x) => x,
                    None => continue,
                },
            };
            update
                .series
                .entry(sample.parameter.clone())
                .or_default()
                .push((x, sample.value));
        }
    }

    /// Poll every `period` on a new task, sending results to `tx`.
    ///
    /// The channel is bounded, so a slow renderer slows the poller instead of
    /// queueing data. Empty incremental updates are not sent. The task ends
    /// when `abort` fires or the receiver is dropped.
    pub fn spawn(
        mut self,
        period: Duration,
        tx: mpsc::Sender<FeedPoll>,
        abort: AbortToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let poll = self.poll().await;
                if matches!(&poll, FeedPoll::Update(u) if !u.replace && u.is_empty()) {
                    continue;
                }
                if tx.send(poll).await.is_err() {
                    debug!(run_id = %self.run_id, "live feed receiver dropped");
                    break;
                }
            }
        })
    }
}
