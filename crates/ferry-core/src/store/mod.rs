//! Ordered in-memory task collection with JSON snapshot persistence.
//!
//! Each engine owns one `TaskStore`. Records keep insertion order, which is
//! also the admission (FIFO) order. The snapshot is written after every state
//! change; failures are logged and swallowed so a bad disk never stops a
//! transfer.

mod snapshot;

pub use snapshot::{from_snapshot_json, to_snapshot_json};

use crate::task::{HttpTask, TaskHeader, TaskId, TaskKind, TaskStatus, TorrentTask};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A record type that can live in a [`TaskStore`].
pub trait TaskRecord: Clone + Serialize + DeserializeOwned {
    const KIND: TaskKind;
    /// Statuses that only make sense while a transfer is attached; saved as `paused`.
    const TRANSIENT: &'static [TaskStatus];

    fn header(&self) -> &TaskHeader;
    fn header_mut(&mut self) -> &mut TaskHeader;

    fn id(&self) -> &TaskId {
        &self.header().id
    }

    fn status(&self) -> TaskStatus {
        self.header().status
    }
}

impl TaskRecord for HttpTask {
    const KIND: TaskKind = TaskKind::Http;
    const TRANSIENT: &'static [TaskStatus] = &[TaskStatus::Downloading];

    fn header(&self) -> &TaskHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TaskHeader {
        &mut self.header
    }
}

impl TaskRecord for TorrentTask {
    const KIND: TaskKind = TaskKind::Torrent;
    const TRANSIENT: &'static [TaskStatus] = &[
        TaskStatus::Downloading,
        TaskStatus::Seeding,
        TaskStatus::Checking,
    ];

    fn header(&self) -> &TaskHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TaskHeader {
        &mut self.header
    }
}

/// Snapshot file names under the data directory.
pub fn snapshot_file_name(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Http => "downloads.json",
        TaskKind::Torrent => "torrents.json",
    }
}

pub struct TaskStore<T> {
    records: Vec<T>,
    path: Option<PathBuf>,
}

impl<T: TaskRecord> TaskStore<T> {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            records: Vec::new(),
            path: None,
        }
    }

    /// Store backed by `path`, loading its current snapshot.
    /// A missing file yields an empty store; unreadable snapshots are logged and ignored.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::load_from_path(&path) {
            Ok(Some(records)) => {
                tracing::debug!(
                    "loaded {} {} task(s) from {}",
                    records.len(),
                    T::KIND,
                    path.display()
                );
                records
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("failed to load {} tasks: {:#}", T::KIND, e);
                Vec::new()
            }
        };
        Self {
            records,
            path: Some(path),
        }
    }

    /// Store under `data_dir` using the standard snapshot name for `T`.
    pub fn open_in(data_dir: &Path) -> Self {
        Self::open(data_dir.join(snapshot_file_name(T::KIND)))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut T> {
        self.records.iter_mut().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.get(id).is_some()
    }

    /// Append a new record. Ids are random UUIDs; a duplicate replaces nothing and is dropped.
    pub fn push(&mut self, record: T) -> bool {
        if self.contains(record.id()) {
            tracing::warn!("refusing duplicate {} task id {}", T::KIND, record.id());
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<T> {
        let idx = self.records.iter().position(|r| r.id() == id)?;
        Some(self.records.remove(idx))
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.records.iter().filter(|r| r.status() == status).count()
    }

    /// Ids with `status`, in store (insertion) order.
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.records
            .iter()
            .filter(|r| r.status() == status)
            .map(|r| r.id().clone())
            .collect()
    }

    /// Persist the snapshot if the store is file-backed. Failures are logged.
    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.save_to_path(path) {
            tracing::warn!("failed to save {} tasks: {:#}", T::KIND, e);
        }
    }

    /// Write `{ "queue": [...] }` to `path` via a sibling temp file and rename.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let json = to_snapshot_json(&self.records).context("serialize task snapshot")?;
        let tmp = crate::storage::temp_path(path);
        std::fs::write(&tmp, json).with_context(|| format!("write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replace snapshot: {}", path.display()))?;
        Ok(())
    }

    /// Read a snapshot. `Ok(None)` when the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Option<Vec<T>>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read snapshot: {}", path.display())),
        };
        let records = from_snapshot_json(&bytes)
            .with_context(|| format!("parse snapshot: {}", path.display()))?;
        Ok(Some(records))
    }
}
