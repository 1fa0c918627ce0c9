//! Shared fixtures: a small cryostat rig built from mock instruments.

#![allow(dead_code)]

use peppermint::config::PeppermintConfig;
use peppermint::hardware::mock::MockInstrument;
use peppermint::hardware::InstrumentRegistry;
use peppermint::parameter::{ParameterId, ParameterSpec, ValueType};
use peppermint::Session;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Rig {
    pub session: Session,
    pub k2450: Arc<MockInstrument>,
    pub ls336: Arc<MockInstrument>,
    pub m4g: Arc<MockInstrument>,
    _dir: TempDir,
}

pub fn pid(s: &str) -> ParameterId {
    s.parse().unwrap()
}

/// Source-meter, temperature controller and magnet supply behind one session.
pub fn rig() -> Rig {
    let k2450 = Arc::new(
        MockInstrument::new("k2450")
            .with_parameter(
                ParameterSpec::new(pid("k2450.voltage"), ValueType::Float)
                    .readable()
                    .writable()
                    .with_bounds(-20.0, 20.0)
                    .with_unit("V"),
                0.0,
            )
            .with_parameter(
                ParameterSpec::new(pid("k2450.current"), ValueType::Float)
                    .readable()
                    .with_unit("A"),
                1e-6,
            )
            .with_write_delay(Duration::from_millis(2)),
    );
    let ls336 = Arc::new(
        MockInstrument::new("ls336")
            .with_parameter(
                ParameterSpec::new(pid("ls336.temperature_a"), ValueType::Float)
                    .readable()
                    .with_unit("K"),
                4.2,
            )
            .with_parameter(
                ParameterSpec::new(pid("ls336.temperature_b"), ValueType::Float)
                    .readable()
                    .with_unit("K"),
                4.5,
            )
            .with_parameter(
                ParameterSpec::new(pid("ls336.heater_range"), ValueType::Integer)
                    .readable()
                    .writable()
                    .with_bounds(0.0, 3.0),
                0.0,
            )
            .with_noise(0.01),
    );
    let m4g = Arc::new(
        MockInstrument::new("m4g").with_parameter(
            ParameterSpec::new(pid("m4g.field"), ValueType::Float)
                .readable()
                .writable()
                .with_bounds(-9.0, 9.0)
                .with_unit("T"),
            0.0,
        ),
    );

    let registry = InstrumentRegistry::new()
        .with_instrument(k2450.clone())
        .unwrap()
        .with_instrument(ls336.clone())
        .unwrap()
        .with_instrument(m4g.clone())
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = PeppermintConfig::default();
    config.storage.database_path = dir.path().join("rig.db");
    config.live_feed.poll_interval = Duration::from_millis(20);

    Rig {
        session: Session::open(config, registry).unwrap(),
        k2450,
        ls336,
        m4g,
        _dir: dir,
    }
}
