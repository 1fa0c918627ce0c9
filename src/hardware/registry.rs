//! Instrument Registry
//!
//! Central lookup from instrument name to its [`Instrument`] implementation and
//! from [`ParameterId`] to the declared [`ParameterSpec`]. The registry is built
//! once when a session opens and shared read-only (`Arc<InstrumentRegistry>`)
//! by every component that touches hardware.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │             InstrumentRegistry             │
//! │  k2450 ──▶ Arc<dyn Instrument>  [specs…]   │
//! │  ls336 ──▶ Arc<dyn Instrument>  [specs…]   │
//! ├────────────────────────────────────────────┤
//! │         Setter / LogTask / Sweep           │
//! └────────────────────────────────────────────┘
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Instrument;
use crate::parameter::{ParameterId, ParameterSpec};
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    driver: Arc<dyn Instrument>,
    specs: HashMap<String, ParameterSpec>,
}

/// Registered instruments and their parameter declarations.
#[derive(Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, Entry>,
}

impl InstrumentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument under its own name.
    ///
    /// Fails with `Parameter` if the name is taken or a declared parameter
    /// belongs to a different instrument.
    pub fn register(&mut self, driver: Arc<dyn Instrument>) -> AppResult<()> {
        let name = driver.name().to_string();
        if self.instruments.contains_key(&name) {
            return Err(DaqError::Parameter(format!(
                "instrument '{}' is already registered",
                name
            )));
        }

        let mut specs = HashMap::new();
        for spec in driver.parameters() {
            if spec.id.instrument() != name {
                return Err(DaqError::Parameter(format!(
                    "instrument '{}' declares foreign parameter {}",
                    name, spec.id
                )));
            }
            specs.insert(spec.id.name().to_string(), spec);
        }

        tracing::debug!(instrument = %name, parameters = specs.len(), "registered instrument");
        self.instruments.insert(name, Entry { driver, specs });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_instrument(mut self, driver: Arc<dyn Instrument>) -> AppResult<Self> {
        self.register(driver)?;
        Ok(self)
    }

    /// Resolve a parameter to its declaration and driver.
    pub fn resolve(&self, id: &ParameterId) -> AppResult<(&ParameterSpec, Arc<dyn Instrument>)> {
        let entry = self
            .instruments
            .get(id.instrument())
            .ok_or_else(|| DaqError::Parameter(format!("unknown instrument in {}", id)))?;
        let spec = entry
            .specs
            .get(id.name())
            .ok_or_else(|| DaqError::Parameter(format!("unknown parameter {}", id)))?;
        Ok((spec, entry.driver.clone()))
    }

    /// Declaration of a parameter.
    pub fn spec(&self, id: &ParameterId) -> AppResult<&ParameterSpec> {
        self.resolve(id).map(|(spec, _)| spec)
    }

    /// Names of registered instruments, sorted.
    pub fn instrument_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instruments.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every declared parameter, sorted by identifier.
    pub fn parameters(&self) -> Vec<ParameterSpec> {
        let mut specs: Vec<ParameterSpec> = self
            .instruments
            .values()
            .flat_map(|entry| entry.specs.values().cloned())
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }
}
