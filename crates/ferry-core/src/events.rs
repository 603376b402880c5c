//! Event bus: `updated` (full task list) and `progress` (per-task delta) topics.

use crate::task::{HttpTask, Task, TaskId, TaskKind, TorrentTask};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Live progress of one task. Swarm-only fields are `None` for HTTP tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: TaskId,
    pub kind: TaskKind,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_speed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_speed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<u32>,
}

impl From<&HttpTask> for ProgressEvent {
    fn from(task: &HttpTask) -> Self {
        Self {
            id: task.header.id.clone(),
            kind: TaskKind::Http,
            downloaded_bytes: task.header.downloaded_bytes,
            total_bytes: task.header.total_bytes,
            download_speed: None,
            upload_speed: None,
            progress: None,
            peers: None,
        }
    }
}

impl From<&TorrentTask> for ProgressEvent {
    fn from(task: &TorrentTask) -> Self {
        Self {
            id: task.header.id.clone(),
            kind: TaskKind::Torrent,
            downloaded_bytes: task.header.downloaded_bytes,
            total_bytes: task.header.total_bytes,
            download_speed: Some(task.download_speed),
            upload_speed: Some(task.upload_speed),
            progress: Some(task.progress),
            peers: Some(task.peers),
        }
    }
}

/// Broadcast channels shared by the service and its observers.
///
/// Publishing never blocks; with no subscribers events are dropped, and a
/// subscriber that falls behind sees `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    updated: broadcast::Sender<Vec<Task>>,
    progress: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (updated, _) = broadcast::channel(capacity.max(1));
        let (progress, _) = broadcast::channel(capacity.max(1));
        Self { updated, progress }
    }

    pub fn subscribe_updated(&self) -> broadcast::Receiver<Vec<Task>> {
        self.updated.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn publish_updated(&self, tasks: Vec<Task>) {
        let _ = self.updated.send(tasks);
    }

    pub fn publish_progress(&self, event: ProgressEvent) {
        let _ = self.progress.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn http_progress_omits_swarm_fields() {
        let mut task = HttpTask::new("https://e.com/f", "f", PathBuf::from("/d"));
        task.header.downloaded_bytes = 10;
        task.header.total_bytes = 20;
        let value = serde_json::to_value(ProgressEvent::from(&task)).unwrap();
        assert_eq!(value["kind"], "http");
        assert_eq!(value["downloadedBytes"], 10);
        assert!(value.get("peers").is_none());
    }

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_progress();
        let task = TorrentTask::from_magnet("magnet:?xt=urn:btih:aa", PathBuf::from("/t"));
        bus.publish_progress(ProgressEvent::from(&task));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, TaskKind::Torrent);
        assert_eq!(event.peers, Some(0));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.publish_updated(Vec::new());
        let mut rx = bus.subscribe_updated();
        bus.publish_updated(Vec::new());
        assert!(rx.try_recv().unwrap().is_empty());
    }
}
