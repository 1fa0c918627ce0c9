//! Background logging driven through the session.

mod common;

use common::{pid, rig};
use peppermint::data::RunStatus;
use peppermint::logging::LogTaskStatus;
use std::time::Duration;

#[tokio::test]
async fn test_logging_stopped_after_five_and_a_half_intervals() {
    let rig = rig();
    let parameters = vec![pid("ls336.temperature_a"), pid("ls336.temperature_b")];
    let run_id = rig
        .session
        .start_logging(parameters.clone(), Some(Duration::from_millis(100)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(550)).await;
    let reports = rig.session.stop_logging(&run_id).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, LogTaskStatus::Stopped);

    let rows = rig.session.store().query(&run_id).await.unwrap();
    for parameter in &parameters {
        let n = rows.iter().filter(|r| &r.sample.parameter == parameter).count();
        assert!((5..=6).contains(&n), "{} has {} samples", parameter, n);
    }

    let record = rig.session.store().run(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Stopped);
    assert!(record.ended_at.is_some());
}

#[tokio::test]
async fn test_failing_sensor_does_not_stop_the_others() {
    let rig = rig();
    rig.ls336.fail_reads("temperature_b", true);
    let run_id = rig
        .session
        .start_logging(
            vec![pid("ls336.temperature_a"), pid("ls336.temperature_b")],
            Some(Duration::from_millis(10)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let status = rig.session.logging().status(&run_id).await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].status, LogTaskStatus::Running);

    rig.ls336.fail_reads("temperature_b", false);
    tokio::time::sleep(Duration::from_millis(40)).await;
    let report = rig.session.stop_logging(&run_id).await.unwrap().remove(0);

    assert!(report.skipped_reads >= 1);
    let columns = rig.session.store().columns(&run_id).await.unwrap();
    assert_eq!(columns, vec![pid("ls336.temperature_a"), pid("ls336.temperature_b")]);
}

#[tokio::test]
async fn test_start_logging_uses_configured_default_interval() {
    let rig = rig();
    let run_id = rig
        .session
        .start_logging(vec![pid("m4g.field")], None)
        .await
        .unwrap();

    // Default interval is 1s: only the immediate first tick lands in 200ms
    tokio::time::sleep(Duration::from_millis(200)).await;
    let report = rig.session.stop_logging(&run_id).await.unwrap().remove(0);
    assert_eq!(report.ticks, 1);
    assert_eq!(report.samples_written, 1);
}
