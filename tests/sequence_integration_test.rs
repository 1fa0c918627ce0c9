//! Integration tests for sequence execution through the session surface.

mod common;

use common::{pid, rig};
use peppermint::data::RunStatus;
use peppermint::experiment::{Action, SequenceState, Sweep, SweepAxis};
use peppermint::DaqError;
use std::time::Duration;

// =============================================================================
// Definitions
// =============================================================================

#[tokio::test]
async fn test_json_sequence_runs_to_completion() {
    let rig = rig();
    let definition = r#"[
        {"type": "Set", "parameter": "ls336.heater_range", "value": 2},
        {"type": "Wait", "duration": "20ms"},
        {"type": "Sweep",
         "axes": [{"parameter": "k2450.voltage", "start": 0, "stop": 10, "count": 11}],
         "settle_delay": "1ms",
         "track": ["k2450.current", "ls336.temperature_a"]}
    ]"#;

    let run_id = rig.session.start_json(definition, "iv at base").await.unwrap();
    let status = rig.session.wait(&run_id).await.unwrap();

    assert_eq!(status.state, SequenceState::Completed);
    assert_eq!(status.total, 3);
    assert_eq!(status.current_index, Some(2));
    // heater range + (voltage, current, temperature) at 11 points
    assert_eq!(status.samples_written, 1 + 11 * 3);

    assert_eq!(
        rig.k2450.writes_to("voltage"),
        (0..=10).map(f64::from).collect::<Vec<_>>()
    );

    let store = rig.session.store();
    let rows = store.query(&run_id).await.unwrap();
    assert_eq!(rows.len(), 34);
    assert!(rows
        .windows(2)
        .all(|w| w[0].sample.timestamp <= w[1].sample.timestamp));

    let columns: Vec<String> = store
        .columns(&run_id)
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        columns,
        vec![
            "ls336.heater_range",
            "k2450.voltage",
            "k2450.current",
            "ls336.temperature_a"
        ]
    );

    let record = store.run(&run_id).await.unwrap();
    assert_eq!(record.label, "iv at base");
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_empty_sequence_completes_with_no_samples() {
    let rig = rig();
    let run_id = rig.session.start(vec![], "nothing").await.unwrap();

    let status = rig.session.wait(&run_id).await.unwrap();

    assert_eq!(status.state, SequenceState::Completed);
    assert_eq!(rig.session.store().sample_count(&run_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_sweep_is_rejected_up_front() {
    let rig = rig();
    let flat = Sweep::single(SweepAxis::linear(pid("m4g.field"), 1.0, 1.0, 3));

    let err = rig.session.start(vec![flat.into()], "flat").await.unwrap_err();

    assert!(matches!(err, DaqError::InvalidRange(_)));
    assert!(rig.m4g.write_log().is_empty());
}

// =============================================================================
// Failure and abort
// =============================================================================

#[tokio::test]
async fn test_out_of_bounds_set_fails_with_index() {
    let rig = rig();
    let run_id = rig
        .session
        .start(
            vec![
                Action::set(pid("m4g.field"), 1.0),
                Action::set(pid("m4g.field"), 12.0),
                Action::set(pid("m4g.field"), 2.0),
            ],
            "over range",
        )
        .await
        .unwrap();

    let status = rig.session.wait(&run_id).await.unwrap();

    assert_eq!(status.state, SequenceState::Failed);
    assert_eq!(status.failure.as_ref().map(|f| f.index), Some(1));
    assert_eq!(rig.m4g.writes_to("field"), vec![1.0]);
    assert_eq!(
        rig.session.store().run(&run_id).await.unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn test_abort_mid_sweep_keeps_written_samples() {
    let rig = rig();
    let sweep = Sweep::single(SweepAxis::linear(pid("k2450.voltage"), 0.0, 10.0, 101))
        .with_settle_delay(Duration::from_millis(10));
    let run_id = rig.session.start(vec![sweep.into()], "aborted").await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    rig.session.abort(&run_id).await.unwrap();
    let writes_at_abort = rig.k2450.writes_to("voltage").len();

    let status = rig.session.wait(&run_id).await.unwrap();

    assert_eq!(status.state, SequenceState::Aborted);
    let writes = rig.k2450.writes_to("voltage").len();
    assert!(writes >= 1 && writes < 101);
    // At most the write already in flight lands after the abort request
    assert!(writes <= writes_at_abort + 1);

    let stored = rig.session.store().sample_count(&run_id).await.unwrap();
    assert_eq!(stored, status.samples_written);
    assert!(stored <= writes);
    assert_eq!(
        rig.session.store().run(&run_id).await.unwrap().status,
        RunStatus::Aborted
    );
}

#[tokio::test]
async fn test_instrument_fault_fails_sequence() {
    let rig = rig();
    rig.m4g.fail_writes("field", true);
    let run_id = rig
        .session
        .start(
            vec![Action::wait(Duration::from_millis(1)), Action::set(pid("m4g.field"), 0.5)],
            "quench",
        )
        .await
        .unwrap();

    let status = rig.session.wait(&run_id).await.unwrap();

    assert_eq!(status.state, SequenceState::Failed);
    let failure = status.failure.unwrap();
    assert_eq!(failure.index, 1);
    assert!(failure.error.contains("Hardware"));
}
