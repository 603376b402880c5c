//! Cloneable async front door to the control loop.

use crate::error::ServiceError;
use crate::events::{EventBus, ProgressEvent};
use crate::task::{HttpTask, Task, TaskId, TaskKind, TorrentTask};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Which engines a pause/resume/cancel request is offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Http,
    Torrent,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Pause,
    Resume,
    Cancel,
}

pub(crate) enum Command {
    Enqueue {
        url: String,
        reply: oneshot::Sender<Result<HttpTask, ServiceError>>,
    },
    AddMagnet {
        uri: String,
        reply: oneshot::Sender<Result<TorrentTask, ServiceError>>,
    },
    AddFile {
        path: PathBuf,
        reply: oneshot::Sender<Result<TorrentTask, ServiceError>>,
    },
    Control {
        action: Action,
        id: TaskId,
        scope: Scope,
        reply: oneshot::Sender<bool>,
    },
    Downloads {
        reply: oneshot::Sender<Vec<HttpTask>>,
    },
    Torrents {
        reply: oneshot::Sender<Vec<TorrentTask>>,
    },
    AllTasks {
        reply: oneshot::Sender<Vec<Task>>,
    },
    SetMaxConcurrent {
        max: usize,
        reply: oneshot::Sender<usize>,
    },
    SetSeedingEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    SetDefaultDirectory {
        kind: TaskKind,
        path: PathBuf,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running [`TaskService`](super::TaskService).
///
/// Every request is answered by the control loop; once the loop has stopped
/// all calls fail with [`ServiceError::Stopped`].
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl ServiceHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, bus: EventBus) -> Self {
        Self { commands, bus }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    async fn control(&self, action: Action, id: &TaskId, scope: Scope) -> Result<bool, ServiceError> {
        self.request(|reply| Command::Control {
            action,
            id: id.clone(),
            scope,
            reply,
        })
        .await
    }

    // HTTP surface

    /// Queue `url` for download. Fails for unparseable URLs and schemes other
    /// than http, https, and ftp.
    pub async fn enqueue(&self, url: &str) -> Result<HttpTask, ServiceError> {
        self.request(|reply| Command::Enqueue {
            url: url.to_string(),
            reply,
        })
        .await?
    }

    pub async fn pause_download(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Pause, id, Scope::Http).await
    }

    pub async fn resume_download(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Resume, id, Scope::Http).await
    }

    pub async fn cancel_download(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Cancel, id, Scope::Http).await
    }

    pub async fn downloads(&self) -> Result<Vec<HttpTask>, ServiceError> {
        self.request(|reply| Command::Downloads { reply }).await
    }

    /// Returns the limit actually applied (clamped to 1..=10).
    pub async fn set_max_concurrent(&self, max: usize) -> Result<usize, ServiceError> {
        self.request(|reply| Command::SetMaxConcurrent { max, reply })
            .await
    }

    // Swarm surface

    pub async fn add_magnet(&self, uri: &str) -> Result<TorrentTask, ServiceError> {
        self.request(|reply| Command::AddMagnet {
            uri: uri.to_string(),
            reply,
        })
        .await?
    }

    pub async fn add_torrent_file(&self, path: impl Into<PathBuf>) -> Result<TorrentTask, ServiceError> {
        let path = path.into();
        self.request(|reply| Command::AddFile { path, reply })
            .await?
    }

    pub async fn torrents(&self) -> Result<Vec<TorrentTask>, ServiceError> {
        self.request(|reply| Command::Torrents { reply }).await
    }

    pub async fn set_seeding_enabled(&self, enabled: bool) -> Result<(), ServiceError> {
        self.request(|reply| Command::SetSeedingEnabled { enabled, reply })
            .await
    }

    // Unified surface

    /// Both engines' records, newest first.
    pub async fn all_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        self.request(|reply| Command::AllTasks { reply }).await
    }

    pub async fn pause_task(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Pause, id, Scope::All).await
    }

    pub async fn resume_task(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Resume, id, Scope::All).await
    }

    pub async fn cancel_task(&self, id: &TaskId) -> Result<bool, ServiceError> {
        self.control(Action::Cancel, id, Scope::All).await
    }

    /// Directory for tasks of `kind` created from now on. Existing records keep theirs.
    pub async fn set_default_directory(
        &self,
        kind: TaskKind,
        path: impl Into<PathBuf>,
    ) -> Result<(), ServiceError> {
        let path = path.into();
        self.request(|reply| Command::SetDefaultDirectory { kind, path, reply })
            .await
    }

    /// Abort every transfer, save both snapshots, and stop the loop.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    // Events

    pub fn subscribe_updated(&self) -> broadcast::Receiver<Vec<Task>> {
        self.bus.subscribe_updated()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe_progress()
    }
}
