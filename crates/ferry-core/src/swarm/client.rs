//! Boundary to the external swarm client.
//!
//! The engine never speaks the torrent wire protocol itself. A [`SwarmClient`]
//! accepts sources, reports lifecycle events through the [`SwarmSink`] it was
//! given, and answers metric queries by info-hash. Calls must not block: the
//! engine invokes them from the control loop.

use crate::task::{TaskId, TorrentTask};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque failure reported by a swarm client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SwarmError(pub String);

impl SwarmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Where a torrent comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmSource {
    Magnet(String),
    File(PathBuf),
}

impl SwarmSource {
    /// Magnet wins when a record somehow carries both.
    pub fn of(task: &TorrentTask) -> Option<Self> {
        if let Some(uri) = &task.magnet_uri {
            return Some(SwarmSource::Magnet(uri.clone()));
        }
        task.file_path.clone().map(SwarmSource::File)
    }
}

/// Live metrics for one torrent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwarmStats {
    pub download_speed: u64,
    pub upload_speed: u64,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub peers: u32,
    /// Total size; 0 until metadata is known.
    pub length: u64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    /// The client accepted the source and tracks it under `info_hash`.
    Added { info_hash: String },
    /// Metadata resolved; the torrent is tracked under `info_hash`.
    Ready { info_hash: String, name: String },
    /// All wanted pieces are verified.
    Done,
    Error(String),
}

/// Event as delivered to the control loop.
#[derive(Debug)]
pub struct SwarmNotice {
    pub task_id: TaskId,
    pub attempt: u64,
    pub event: SwarmEvent,
}

/// Reports events for one `add` call back to the engine.
#[derive(Debug, Clone)]
pub struct SwarmSink {
    task_id: TaskId,
    attempt: u64,
    tx: mpsc::UnboundedSender<SwarmNotice>,
}

impl SwarmSink {
    pub fn new(task_id: TaskId, attempt: u64, tx: mpsc::UnboundedSender<SwarmNotice>) -> Self {
        Self {
            task_id,
            attempt,
            tx,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn send(&self, event: SwarmEvent) -> bool {
        self.tx
            .send(SwarmNotice {
                task_id: self.task_id.clone(),
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }

    pub fn added(&self, info_hash: impl Into<String>) -> bool {
        self.send(SwarmEvent::Added {
            info_hash: info_hash.into(),
        })
    }

    pub fn ready(&self, info_hash: impl Into<String>, name: impl Into<String>) -> bool {
        self.send(SwarmEvent::Ready {
            info_hash: info_hash.into(),
            name: name.into(),
        })
    }

    pub fn done(&self) -> bool {
        self.send(SwarmEvent::Done)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(SwarmEvent::Error(message.into()))
    }
}

pub trait SwarmClient: Send + Sync {
    /// Start fetching `source` into `directory`. The info-hash (as soon as the
    /// client knows it), metadata, completion, and failures arrive later
    /// through `sink`.
    fn add(&self, source: &SwarmSource, directory: &Path, sink: SwarmSink)
        -> Result<(), SwarmError>;

    /// Current metrics, `None` when the client does not track `info_hash`.
    fn get(&self, info_hash: &str) -> Option<SwarmStats>;

    /// Stop tracking `info_hash`; with `destroy_store` the downloaded data is deleted too.
    fn remove(&self, info_hash: &str, destroy_store: bool) -> Result<(), SwarmError>;
}

/// Client used when no swarm backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineClient;

impl SwarmClient for OfflineClient {
    fn add(&self, _: &SwarmSource, _: &Path, _: SwarmSink) -> Result<(), SwarmError> {
        Err(SwarmError::new("no swarm backend configured"))
    }

    fn get(&self, _: &str) -> Option<SwarmStats> {
        None
    }

    fn remove(&self, _: &str, _: bool) -> Result<(), SwarmError> {
        Ok(())
    }
}
