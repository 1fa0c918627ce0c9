//! Mock Hardware Implementations
//!
//! Provides a simulated instrument for testing without physical hardware.
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! `MockInstrument` keeps one stored value per declared parameter. Writes store
//! the value (after an optional latency) and append to a write log; reads
//! return the stored value plus optional uniform noise. Faults can be injected
//! per parameter at any time, which is how tests exercise the Hardware and
//! timeout paths.
//!
//! # Example
//!
//! ```rust,ignore
//! let k2450 = MockInstrument::new("k2450")
//!     .with_parameter(ParameterSpec::new(ParameterId::new("k2450", "voltage"), ValueType::Float)
//!         .readable()
//!         .writable(), 0.0)
//!     .with_write_delay(Duration::from_millis(5));
//!
//! k2450.write("voltage", 1.5).await?;
//! assert_eq!(k2450.write_log(), vec![("voltage".to_string(), 1.5)]);
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::hardware::capabilities::Instrument;
use crate::parameter::ParameterSpec;

#[derive(Default)]
struct MockState {
    values: HashMap<String, f64>,
    write_log: Vec<(String, f64)>,
    reads: usize,
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
}

/// Simulated instrument with latency and fault injection.
pub struct MockInstrument {
    name: String,
    specs: Vec<ParameterSpec>,
    write_delay: Duration,
    read_delay: Duration,
    noise: f64,
    state: Mutex<MockState>,
}

impl MockInstrument {
    /// Instrument with no parameters and no latency.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
            write_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
            noise: 0.0,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Declare a parameter with its starting value.
    pub fn with_parameter(mut self, spec: ParameterSpec, initial: f64) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.values.insert(spec.id.name().to_string(), initial);
        }
        self.specs.push(spec);
        self
    }

    /// Latency applied to every write.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Latency applied to every read.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Uniform read noise of +/- `amplitude`.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Make writes to `parameter` fail (or succeed again).
    pub fn fail_writes(&self, parameter: &str, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_writes.insert(parameter.to_string());
        } else {
            state.failing_writes.remove(parameter);
        }
    }

    /// Make reads of `parameter` fail (or succeed again).
    pub fn fail_reads(&self, parameter: &str, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_reads.insert(parameter.to_string());
        } else {
            state.failing_reads.remove(parameter);
        }
    }

    /// Every accepted write, in order.
    pub fn write_log(&self) -> Vec<(String, f64)> {
        self.lock().write_log.clone()
    }

    /// Values written to one parameter, in order.
    pub fn writes_to(&self, parameter: &str) -> Vec<f64> {
        self.lock()
            .write_log
            .iter()
            .filter(|(name, _)| name == parameter)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Number of successful reads served.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Current stored value, without noise.
    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.lock().values.get(parameter).copied()
    }

    /// Overwrite a stored value directly, bypassing the write log.
    pub fn set_value(&self, parameter: &str, value: f64) {
        self.lock().values.insert(parameter.to_string(), value);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Poisoned state is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Instrument for MockInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        self.specs.clone()
    }

    async fn write(&self, parameter: &str, value: f64) -> Result<()> {
        if !self.write_delay.is_zero() {
            sleep(self.write_delay).await;
        }

        let mut state = self.lock();
        if state.failing_writes.contains(parameter) {
            return Err(anyhow!("{}: write to '{}' rejected", self.name, parameter));
        }
        if !state.values.contains_key(parameter) {
            return Err(anyhow!("{}: no such parameter '{}'", self.name, parameter));
        }
        state.values.insert(parameter.to_string(), value);
        state.write_log.push((parameter.to_string(), value));
        Ok(())
    }

    async fn read(&self, parameter: &str) -> Result<f64> {
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }

        let mut state = self.lock();
        if state.failing_reads.contains(parameter) {
            return Err(anyhow!("{}: read of '{}' failed", self.name, parameter));
        }
        let value = *state
            .values
            .get(parameter)
            .ok_or_else(|| anyhow!("{}: no such parameter '{}'", self.name, parameter))?;
        state.reads += 1;
        drop(state);

        if self.noise > 0.0 {
            Ok(value + rand::thread_rng().gen_range(-self.noise..=self.noise))
        } else {
            Ok(value)
        }
    }
}
