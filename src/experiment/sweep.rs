//! Sweep generation and execution.
//!
//! A [`Sweep`] is one or more [`SweepAxis`] definitions, outermost first. Its
//! points are produced lazily by [`SweepPoints`] in outer-major order: the
//! innermost axis varies fastest, the outermost slowest.
//!
//! ```text
//! outer: field  [0, 1]      (2 points)
//! inner: volt   [0, 1, 2]   (3 points)
//!
//! (0,0) (0,1) (0,2) (1,0) (1,1) (1,2)
//! ```
//!
//! [`SweepEngine`] walks the points: it checks the abort token (holding while
//! its [`PauseGate`] is closed), writes every
//! coordinate that changed since the previous point through the
//! [`Setter`](crate::hardware::Setter), waits the settle delay and then hands
//! the point to a [`PointObserver`] (the sample-capture hook).

use crate::abort::{AbortToken, PauseGate};
use crate::error::{AppResult, DaqError};
use crate::hardware::Setter;
use crate::parameter::ParameterId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

/// Point spacing along one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    /// Evenly spaced values
    #[default]
    Linear,
    /// Evenly spaced in log10; both endpoints nonzero with the same sign
    Log,
}

/// One swept parameter: `count` points from `start` to `stop` inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    /// Parameter to drive
    pub parameter: ParameterId,
    /// First setpoint
    pub start: f64,
    /// Last setpoint
    pub stop: f64,
    /// Number of setpoints, at least 1
    pub count: usize,
    /// Spacing between setpoints
    #[serde(default)]
    pub spacing: Spacing,
}

impl SweepAxis {
    /// Linearly spaced axis.
    pub fn linear(parameter: ParameterId, start: f64, stop: f64, count: usize) -> Self {
        Self {
            parameter,
            start,
            stop,
            count,
            spacing: Spacing::Linear,
        }
    }

    /// Logarithmically spaced axis.
    pub fn log(parameter: ParameterId, start: f64, stop: f64, count: usize) -> Self {
        Self {
            spacing: Spacing::Log,
            ..Self::linear(parameter, start, stop, count)
        }
    }

    /// Reject axes whose points are undefined or ambiguous.
    pub fn validate(&self) -> AppResult<()> {
        let name = &self.parameter;
        if self.count < 1 {
            return Err(DaqError::InvalidRange(format!("{}: count must be at least 1", name)));
        }
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(DaqError::InvalidRange(format!("{}: endpoints must be finite", name)));
        }
        if self.count > 1 && self.start == self.stop {
            return Err(DaqError::InvalidRange(format!(
                "{}: start == stop ({}) with {} points",
                name, self.start, self.count
            )));
        }
        if self.spacing == Spacing::Log
            && (self.start == 0.0 || self.stop == 0.0 || self.start.signum() != self.stop.signum())
        {
            return Err(DaqError::InvalidRange(format!(
                "{}: log spacing needs nonzero endpoints of the same sign, got {} and {}",
                name, self.start, self.stop
            )));
        }
        Ok(())
    }

    /// Setpoint `i` of the axis. The last index returns `stop` exactly.
    pub fn value_at(&self, i: usize) -> f64 {
        if self.count <= 1 || i == 0 {
            return self.start;
        }
        if i >= self.count - 1 {
            return self.stop;
        }
        let fraction = i as f64 / (self.count - 1) as f64;
        match self.spacing {
            Spacing::Linear => self.start + (self.stop - self.start) * fraction,
            Spacing::Log => self.start * (self.stop / self.start).powf(fraction),
        }
    }
}

/// Ordered axes (outermost first) with the per-point settle delay and the
/// extra parameters read at every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    /// Axes, outermost first
    pub axes: Vec<SweepAxis>,
    /// Pause after applying each point
    #[serde(default, with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Parameters read and recorded alongside each point
    #[serde(default)]
    pub track: Vec<ParameterId>,
}

impl Sweep {
    /// Sweep over `axes`, outermost first, with no settle delay.
    pub fn new(axes: Vec<SweepAxis>) -> Self {
        Self {
            axes,
            settle_delay: Duration::ZERO,
            track: Vec::new(),
        }
    }

    /// Single-axis sweep.
    pub fn single(axis: SweepAxis) -> Self {
        Self::new(vec![axis])
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Add a tracked parameter.
    pub fn with_tracked(mut self, parameter: ParameterId) -> Self {
        self.track.push(parameter);
        self
    }

    /// Check every axis, that no parameter is swept twice and that the
    /// point count fits in a `usize`.
    pub fn validate(&self) -> AppResult<()> {
        if self.axes.is_empty() {
            return Err(DaqError::InvalidRange("sweep has no axes".into()));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            axis.validate()?;
            if self.axes[..i].iter().any(|a| a.parameter == axis.parameter) {
                return Err(DaqError::InvalidRange(format!(
                    "{} is swept by more than one axis",
                    axis.parameter
                )));
            }
        }
        if self.total_points().is_none() {
            return Err(DaqError::InvalidRange(format!(
                "sweep point count overflows ({} axes)",
                self.axes.len()
            )));
        }
        Ok(())
    }

    /// Total number of points, or `None` if the product of the axis counts
    /// overflows.
    pub fn total_points(&self) -> Option<usize> {
        self.axes
            .iter()
            .try_fold(1usize, |total, axis| total.checked_mul(axis.count))
    }

    /// Validate and return the lazy point iterator.
    pub fn points(&self) -> AppResult<SweepPoints> {
        self.validate()?;
        Ok(SweepPoints {
            axes: self.axes.clone(),
            indices: vec![0; self.axes.len()],
            first_changed: 0,
            remaining: self.total_points().unwrap_or(0),
            index: 0,
        })
    }
}

/// One emitted point of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    /// Position in the sweep, from 0
    pub index: usize,
    /// Setpoint of every axis, outermost first
    pub coordinates: Vec<(ParameterId, f64)>,
    first_changed: usize,
}

impl SweepPoint {
    /// Coordinates that differ from the previous point (all of them for the
    /// first point).
    pub fn changed(&self) -> &[(ParameterId, f64)] {
        &self.coordinates[self.first_changed..]
    }
}

/// Lazy, single-pass iterator over a sweep's points.
#[derive(Debug)]
pub struct SweepPoints {
    axes: Vec<SweepAxis>,
    indices: Vec<usize>,
    first_changed: usize,
    remaining: usize,
    index: usize,
}

impl Iterator for SweepPoints {
    type Item = SweepPoint;

    fn next(&mut self) -> Option<SweepPoint> {
        if self.remaining == 0 {
            return None;
        }

        let point = SweepPoint {
            index: self.index,
            coordinates: self
                .axes
                .iter()
                .zip(&self.indices)
                .map(|(axis, &i)| (axis.parameter.clone(), axis.value_at(i)))
                .collect(),
            first_changed: self.first_changed,
        };

        self.remaining -= 1;
        self.index += 1;

        // Odometer step: bump the innermost axis that has room, reset the rest
        for axis in (0..self.axes.len()).rev() {
            if self.indices[axis] + 1 < self.axes[axis].count {
                self.indices[axis] += 1;
                for inner in &mut self.indices[axis + 1..] {
                    *inner = 0;
                }
                self.first_changed = axis;
                break;
            }
        }

        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for SweepPoints {}

/// Sample-capture hook invoked once per settled point.
#[async_trait]
pub trait PointObserver: Send {
    /// Called after the point has been applied and has settled.
    async fn on_point(&mut self, point: &SweepPoint) -> AppResult<()>;
}

/// How a sweep ended when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every point was applied and observed
    Completed {
        /// Points applied
        points: usize,
    },
    /// The abort token was seen at a checkpoint
    Aborted {
        /// Points applied before the abort
        points: usize,
    },
}

/// Drives sweeps through a [`Setter`].
#[derive(Clone)]
pub struct SweepEngine {
    setter: Setter,
    pause: PauseGate,
}

impl SweepEngine {
    /// Engine writing through `setter`.
    pub fn new(setter: Setter) -> Self {
        Self {
            setter,
            pause: PauseGate::new(),
        }
    }

    /// Hold before each point while `gate` is paused.
    pub fn with_pause_gate(mut self, gate: PauseGate) -> Self {
        self.pause = gate;
        self
    }

    /// Run `sweep` to completion or abort.
    ///
    /// Setter and observer errors are returned unchanged; points already
    /// applied stay applied.
    #[instrument(skip_all, fields(axes = sweep.axes.len(), points = ?sweep.total_points()))]
    pub async fn run(
        &self,
        sweep: &Sweep,
        observer: &mut dyn PointObserver,
        abort: &AbortToken,
    ) -> AppResult<SweepOutcome> {
        let mut applied = 0;

        for point in sweep.points()? {
            if !self.pause.hold(abort).await {
                info!(applied, "sweep aborted");
                return Ok(SweepOutcome::Aborted { points: applied });
            }

            for (parameter, value) in point.changed() {
                self.setter.set(parameter, *value).await?;
            }
            applied += 1;

            if !sweep.settle_delay.is_zero() {
                tokio::select! {
                    _ = sleep(sweep.settle_delay) => {}
                    _ = abort.cancelled() => {
                        info!(applied, "sweep aborted while settling");
                        return Ok(SweepOutcome::Aborted { points: applied });
                    }
                }
            }

            debug!(index = point.index, "point settled");
            observer.on_point(&point).await?;
        }

        Ok(SweepOutcome::Completed { points: applied })
    }
}
