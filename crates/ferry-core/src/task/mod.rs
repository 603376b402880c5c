//! Task records shared by both engines.
//!
//! A record is either an HTTP download or a torrent. Both carry a common
//! [`TaskHeader`]; the JSON form flattens the header into the record and tags
//! the union with `kind` (`"http"` / `"torrent"`), field names in camelCase.

mod http;
mod torrent;

pub use http::HttpTask;
pub use torrent::{TorrentTask, MAGNET_PLACEHOLDER_NAME};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque task identifier (a random UUID string), unique across both engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which engine owns a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Http,
    Torrent,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Http => "http",
            TaskKind::Torrent => "torrent",
        })
    }
}

/// Lifecycle state of a task.
///
/// `Completed` and `Cancelled` are terminal. `Checking` and `Seeding` only
/// occur on torrents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Checking,
    Downloading,
    Seeding,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Checking => "checking",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Seeding => "seeding",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields common to every task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHeader {
    pub id: TaskId,
    pub directory: PathBuf,
    pub status: TaskStatus,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// Present exactly when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_date: u64,
}

impl TaskHeader {
    pub fn new(directory: PathBuf, status: TaskStatus) -> Self {
        Self {
            id: TaskId::generate(),
            directory,
            status,
            total_bytes: 0,
            downloaded_bytes: 0,
            error: None,
            created_date: unix_millis(),
        }
    }

    /// Move to a non-error status and drop any stale error message.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status != TaskStatus::Error {
            self.error = None;
        }
    }

    /// Move to `error` with a user-facing message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.error = Some(message.into());
    }
}

/// Unified view over both record kinds, as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Task {
    Http(HttpTask),
    Torrent(TorrentTask),
}

impl Task {
    pub fn header(&self) -> &TaskHeader {
        match self {
            Task::Http(t) => &t.header,
            Task::Torrent(t) => &t.header,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.header().id
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Http(_) => TaskKind::Http,
            Task::Torrent(_) => TaskKind::Torrent,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.header().status
    }

    pub fn created_date(&self) -> u64 {
        self.header().created_date
    }

    /// File name for HTTP tasks, torrent name otherwise.
    pub fn display_name(&self) -> &str {
        match self {
            Task::Http(t) => &t.filename,
            Task::Torrent(t) => &t.name,
        }
    }
}

impl From<HttpTask> for Task {
    fn from(t: HttpTask) -> Self {
        Task::Http(t)
    }
}

impl From<TorrentTask> for Task {
    fn from(t: TorrentTask) -> Self {
        Task::Torrent(t)
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_distinct() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(TaskStatus::Downloading.to_string(), "downloading");
        assert_eq!(
            serde_json::to_value(TaskStatus::Cancelled).unwrap(),
            json!("cancelled")
        );
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Error.is_terminal());
    }

    #[test]
    fn leaving_error_clears_message() {
        let mut header = TaskHeader::new(PathBuf::from("/tmp"), TaskStatus::Pending);
        header.fail("HTTP error: 404");
        assert_eq!(header.status, TaskStatus::Error);
        assert_eq!(header.error.as_deref(), Some("HTTP error: 404"));
        header.set_status(TaskStatus::Pending);
        assert!(header.error.is_none());
    }

    #[test]
    fn unified_task_is_tagged_by_kind() {
        let http = HttpTask::new("https://example.com/a.iso", "a.iso", PathBuf::from("/d"));
        let value = serde_json::to_value(Task::from(http.clone())).unwrap();
        assert_eq!(value["kind"], "http");
        assert_eq!(value["filename"], "a.iso");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["downloadedBytes"], 0);
        assert!(value.get("error").is_none());

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, Task::Http(http));
    }

    #[test]
    fn torrent_uses_magnet_uri_field_name() {
        let torrent = TorrentTask::from_magnet("magnet:?xt=urn:btih:abc", PathBuf::from("/t"));
        let value = serde_json::to_value(Task::from(torrent)).unwrap();
        assert_eq!(value["kind"], "torrent");
        assert_eq!(value["magnetURI"], "magnet:?xt=urn:btih:abc");
        assert_eq!(value["name"], "Magnet Download");
        assert_eq!(value["isSeeding"], false);
        assert!(value.get("filePath").is_none());
    }
}
