//! CSV export of a stored run.

use crate::data::sample::RunId;
use crate::data::store::DataStore;
use crate::error::{AppResult, StorageError};
use std::path::Path;
use tracing::info;

/// Write every sample of `run_id` to `path` as
/// `timestamp,parameter,value,value_type` rows, in timestamp order.
///
/// Returns the number of rows written (excluding the header).
#[cfg(feature = "storage_csv")]
pub async fn export_run_csv(store: &DataStore, run_id: &RunId, path: impl AsRef<Path>) -> AppResult<usize> {
    let rows = store.query(run_id).await?;
    let path = path.as_ref().to_path_buf();
    let target = path.clone();

    let written = tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
        let mut writer = csv::Writer::from_path(&target).map_err(csv_error)?;
        writer
            .write_record(["timestamp", "parameter", "value", "value_type"])
            .map_err(csv_error)?;
        for row in &rows {
            let sample = &row.sample;
            writer
                .write_record(&[
                    sample.timestamp.to_rfc3339(),
                    sample.parameter.to_string(),
                    sample.value.to_string(),
                    sample.value_type.to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.len())
    })
    .await
    .map_err(StorageError::from)??;

    info!(run_id = %run_id, rows = written, path = %path.display(), "exported run to CSV");
    Ok(written)
}

/// CSV export is unavailable without the `storage_csv` feature.
#[cfg(not(feature = "storage_csv"))]
pub async fn export_run_csv(_store: &DataStore, _run_id: &RunId, _path: impl AsRef<Path>) -> AppResult<usize> {
    Err(StorageError::Backend("CSV export requires the storage_csv feature".into()).into())
}

#[cfg(feature = "storage_csv")]
fn csv_error(err: csv::Error) -> StorageError {
    StorageError::Backend(format!("CSV export failed: {}", err))
}
