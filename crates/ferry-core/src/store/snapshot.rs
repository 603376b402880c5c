//! On-disk snapshot document: `{ "queue": [ ...records ] }`.

use super::TaskRecord;
use crate::task::TaskStatus;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct SnapshotOut<T> {
    queue: Vec<T>,
}

#[derive(Deserialize)]
struct SnapshotIn<T> {
    queue: Vec<T>,
}

/// Serialize records, writing transient statuses as `paused`.
pub fn to_snapshot_json<T: TaskRecord>(records: &[T]) -> serde_json::Result<String> {
    let queue = records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            if T::TRANSIENT.contains(&record.status()) {
                record.header_mut().set_status(TaskStatus::Paused);
            }
            record
        })
        .collect();
    serde_json::to_string_pretty(&SnapshotOut { queue })
}

/// Deserialize records verbatim (no status changes).
pub fn from_snapshot_json<T: TaskRecord>(bytes: &[u8]) -> serde_json::Result<Vec<T>> {
    let snapshot: SnapshotIn<T> = serde_json::from_slice(bytes)?;
    Ok(snapshot.queue)
}
