//! Swarm (torrent) transfer engine.
//!
//! Owns the torrent task store and delegates the actual transfers to a
//! [`SwarmClient`]. Lifecycle:
//! `pending → checking → downloading → {seeding | completed | error}`,
//! `{checking, downloading, seeding} → paused`, `paused | error → pending`.
//! Cancel removes the record from the store. There is no concurrency cap.

mod client;
mod transmission;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{
    OfflineClient, SwarmClient, SwarmError, SwarmEvent, SwarmNotice, SwarmSink, SwarmSource,
    SwarmStats,
};
pub use transmission::TransmissionClient;

use crate::control::HandleRegistry;
use crate::error::{ServiceError, TransferError};
use crate::events::{EventBus, ProgressEvent};
use crate::scheduler::{self, AdmissionTarget};
use crate::storage;
use crate::store::TaskStore;
use crate::task::{TaskId, TaskStatus, TorrentTask};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

const ACTIVE: [TaskStatus; 3] = [
    TaskStatus::Checking,
    TaskStatus::Downloading,
    TaskStatus::Seeding,
];

pub struct SwarmEngine {
    store: TaskStore<TorrentTask>,
    client: Arc<dyn SwarmClient>,
    directory: PathBuf,
    seeding_enabled: bool,
    /// One registration per task attached to the client.
    handles: HandleRegistry<()>,
    events: mpsc::UnboundedSender<SwarmNotice>,
    bus: EventBus,
    dirty: bool,
}

impl SwarmEngine {
    pub fn new(
        store: TaskStore<TorrentTask>,
        client: Arc<dyn SwarmClient>,
        directory: PathBuf,
        seeding_enabled: bool,
        events: mpsc::UnboundedSender<SwarmNotice>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            client,
            directory,
            seeding_enabled,
            handles: HandleRegistry::new(),
            events,
            bus,
            dirty: false,
        }
    }

    pub fn tasks(&self) -> &[TorrentTask] {
        self.store.records()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TorrentTask> {
        self.store.get(id)
    }

    pub fn seeding_enabled(&self) -> bool {
        self.seeding_enabled
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn set_directory(&mut self, directory: PathBuf) {
        tracing::info!("torrent download directory set to {}", directory.display());
        self.directory = directory;
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn admit(&mut self) {
        scheduler::admit(self);
    }

    pub fn add_magnet(&mut self, uri: &str) -> Result<TorrentTask, ServiceError> {
        let uri = uri.trim();
        if !uri.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("magnet:")) {
            return Err(ServiceError::InvalidSource(format!(
                "not a magnet URI: {uri}"
            )));
        }
        Ok(self.add(TorrentTask::from_magnet(uri, self.directory.clone())))
    }

    pub fn add_file(&mut self, path: &Path) -> Result<TorrentTask, ServiceError> {
        if path.as_os_str().is_empty() {
            return Err(ServiceError::InvalidSource(
                "empty torrent file path".to_string(),
            ));
        }
        Ok(self.add(TorrentTask::from_file(
            path.to_path_buf(),
            self.directory.clone(),
        )))
    }

    fn add(&mut self, mut task: TorrentTask) -> TorrentTask {
        task.is_seeding = self.seeding_enabled;
        tracing::info!("added torrent {} ({})", task.header.id, task.name);
        let id = task.header.id.clone();
        let fallback = task.clone();
        self.store.push(task);
        self.changed();
        self.store.get(&id).cloned().unwrap_or(fallback)
    }

    /// Detach from the client keeping data. Valid from `checking`, `downloading`, `seeding`.
    pub fn pause(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.get_mut(id) else {
            return false;
        };
        if !ACTIVE.contains(&task.header.status) {
            return false;
        }
        self.handles.take(id);
        if let Some(hash) = &task.info_hash {
            if let Err(e) = self.client.remove(hash, false) {
                tracing::warn!("torrent {}: failed to detach {}: {}", id, hash, e);
            }
        }
        task.header.set_status(TaskStatus::Paused);
        task.clear_rates();
        tracing::info!("torrent {} paused", id);
        self.changed();
        true
    }

    /// Requeue a `paused` or `error` torrent; the client resumes from data on disk.
    pub fn resume(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.get_mut(id) else {
            return false;
        };
        match task.header.status {
            TaskStatus::Paused => {}
            TaskStatus::Error => {
                self.handles.take(id);
                if let Some(hash) = &task.info_hash {
                    if self.client.get(hash).is_some() {
                        if let Err(e) = self.client.remove(hash, false) {
                            tracing::warn!("torrent {}: failed to detach {}: {}", id, hash, e);
                        }
                    }
                }
            }
            _ => return false,
        }
        task.header.set_status(TaskStatus::Pending);
        tracing::info!("torrent {} resumed", id);
        self.changed();
        true
    }

    /// Remove the torrent from the store. Unfinished data is deleted; a
    /// completed torrent keeps its files.
    pub fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.remove(id) else {
            return false;
        };
        self.handles.take(id);
        if let Some(hash) = task.info_hash.as_deref().filter(|h| self.attached_elsewhere(h)) {
            tracing::info!("torrent {} cancelled; {} stays with another task", id, hash);
            self.changed();
            return true;
        }
        let completed = task.header.status == TaskStatus::Completed;
        let tracked = task
            .info_hash
            .as_deref()
            .filter(|hash| self.client.get(hash).is_some());

        match tracked {
            Some(hash) => {
                if let Err(e) = self.client.remove(hash, !completed) {
                    tracing::warn!("torrent {}: failed to remove {}: {}", id, hash, e);
                }
            }
            None if !completed && task.info_hash.is_some() => {
                remove_leftover_content(&task);
            }
            None => {}
        }
        tracing::info!("torrent {} cancelled", id);
        self.changed();
        true
    }

    /// Change the seeding default for new torrents and the flag on every record.
    pub fn set_seeding_enabled(&mut self, enabled: bool) {
        self.seeding_enabled = enabled;
        for task in self.store.iter_mut() {
            task.is_seeding = enabled;
        }
        tracing::info!("torrent seeding {}", if enabled { "enabled" } else { "disabled" });
        self.store.save();
        self.dirty = true;
    }

    /// Apply one lifecycle event from the client.
    pub fn on_swarm_event(&mut self, notice: SwarmNotice) {
        let SwarmNotice {
            task_id,
            attempt,
            event,
        } = notice;

        if !self.handles.is_current(&task_id, attempt) {
            match event {
                SwarmEvent::Added { info_hash } | SwarmEvent::Ready { info_hash, .. } => {
                    self.drop_orphan(&task_id, &info_hash);
                }
                _ => tracing::trace!("dropping stale swarm event for {}", task_id),
            }
            return;
        }
        let Some(task) = self.store.get_mut(&task_id) else {
            self.handles.take(&task_id);
            return;
        };

        match event {
            SwarmEvent::Added { info_hash } => {
                tracing::debug!("torrent {}: client tracks {}", task_id, info_hash);
                task.info_hash = Some(info_hash);
            }
            SwarmEvent::Ready { info_hash, name } => {
                tracing::info!("torrent {}: metadata for {} ({})", task_id, name, info_hash);
                task.info_hash = Some(info_hash);
                task.name = name;
                if task.header.status == TaskStatus::Checking {
                    task.header.set_status(TaskStatus::Downloading);
                }
            }
            SwarmEvent::Done => {
                if !ACTIVE.contains(&task.header.status) {
                    return;
                }
                task.progress = 1.0;
                task.header.downloaded_bytes = task.header.total_bytes;
                if task.is_seeding {
                    task.header.set_status(TaskStatus::Seeding);
                    tracing::info!("torrent {} finished, seeding", task_id);
                } else {
                    self.handles.take(&task_id);
                    if let Some(hash) = &task.info_hash {
                        if let Err(e) = self.client.remove(hash, false) {
                            tracing::warn!("torrent {}: failed to detach {}: {}", task_id, hash, e);
                        }
                    }
                    task.header.set_status(TaskStatus::Completed);
                    task.clear_rates();
                    tracing::info!("torrent {} completed", task_id);
                }
            }
            SwarmEvent::Error(message) => {
                let error = TransferError::Swarm(message);
                tracing::warn!("torrent {} failed: {}", task_id, error);
                task.header.fail(error.to_string());
                task.clear_rates();
            }
        }
        self.store.save();
        self.dirty = true;
    }

    /// Copy live metrics for every attached torrent and emit one progress event each.
    pub fn sample(&mut self) {
        for task in self.store.iter_mut() {
            if !ACTIVE.contains(&task.header.status) {
                continue;
            }
            let Some(stats) = task.info_hash.as_deref().and_then(|h| self.client.get(h)) else {
                continue;
            };
            apply_stats(task, &stats);
            self.bus.publish_progress(ProgressEvent::from(&*task));
        }
    }

    /// Detach everything (keeping data) and persist.
    pub fn shutdown(&mut self) {
        for (id, ()) in self.handles.drain() {
            let hash = self.store.get(&id).and_then(|t| t.info_hash.clone());
            if let Some(hash) = hash {
                if let Err(e) = self.client.remove(&hash, false) {
                    tracing::warn!("torrent {}: failed to detach {}: {}", id, hash, e);
                }
            }
        }
        self.store.save();
    }

    /// True if an active record still uses the client's copy of `info_hash`.
    fn attached_elsewhere(&self, info_hash: &str) -> bool {
        self.store.records().iter().any(|t| {
            ACTIVE.contains(&t.header.status) && t.info_hash.as_deref() == Some(info_hash)
        })
    }

    fn changed(&mut self) {
        self.store.save();
        self.dirty = true;
        self.admit();
    }

    /// Metadata arrived for an attempt that is no longer registered.
    fn drop_orphan(&mut self, task_id: &TaskId, info_hash: &str) {
        if self.handles.contains(task_id) {
            // A newer attempt owns the client's copy.
            return;
        }
        let exists = self.store.contains(task_id);
        tracing::debug!(
            "torrent {}: detaching orphaned {} (record {})",
            task_id,
            info_hash,
            if exists { "kept" } else { "gone" }
        );
        if let Err(e) = self.client.remove(info_hash, !exists) {
            tracing::warn!("torrent {}: failed to remove {}: {}", task_id, info_hash, e);
        }
    }

    fn start_task(&mut self, id: &TaskId) {
        let Some(task) = self.store.get_mut(id) else {
            return;
        };
        if task.header.status != TaskStatus::Pending {
            return;
        }

        let tracked = task
            .info_hash
            .as_deref()
            .is_some_and(|hash| self.client.get(hash).is_some());
        if tracked && self.handles.contains(id) {
            task.header.set_status(TaskStatus::Downloading);
            self.store.save();
            self.dirty = true;
            return;
        }
        if tracked {
            if let Some(hash) = &task.info_hash {
                tracing::debug!("torrent {}: detaching stale client copy {}", id, hash);
                if let Err(e) = self.client.remove(hash, false) {
                    tracing::warn!("torrent {}: failed to detach {}: {}", id, hash, e);
                }
            }
        }

        match SwarmSource::of(task) {
            None => {
                let error = TransferError::Swarm("no magnet or file provided".to_string());
                task.header.fail(error.to_string());
            }
            Some(source) => {
                task.header.set_status(TaskStatus::Checking);
                let (attempt, _) = self.handles.register(id, ());
                let sink = SwarmSink::new(id.clone(), attempt, self.events.clone());
                match self.client.add(&source, &task.header.directory, sink) {
                    Ok(()) => tracing::debug!("torrent {} attempt {} added", id, attempt),
                    Err(e) => {
                        tracing::warn!("torrent {}: client rejected source: {}", id, e);
                        self.handles.take(id);
                        task.header.fail(TransferError::from(e).to_string());
                    }
                }
            }
        }
        self.store.save();
        self.dirty = true;
    }
}

impl AdmissionTarget for SwarmEngine {
    fn active_count(&self) -> usize {
        self.store
            .records()
            .iter()
            .filter(|t| ACTIVE.contains(&t.header.status))
            .count()
    }

    fn concurrency_limit(&self) -> Option<usize> {
        None
    }

    fn pending_ids(&self) -> Vec<TaskId> {
        self.store.ids_with_status(TaskStatus::Pending)
    }

    fn start(&mut self, id: &TaskId) {
        self.start_task(id);
    }
}

fn apply_stats(task: &mut TorrentTask, stats: &SwarmStats) {
    task.download_speed = stats.download_speed;
    task.upload_speed = stats.upload_speed;
    task.progress = stats.progress.clamp(0.0, 1.0);
    task.uploaded_bytes = stats.uploaded;
    task.peers = stats.peers;
    if stats.length > 0 {
        task.header.total_bytes = stats.length;
    }
    let mut downloaded = task.header.downloaded_bytes.max(stats.downloaded);
    if task.header.total_bytes > 0 {
        downloaded = downloaded.min(task.header.total_bytes);
    }
    task.header.downloaded_bytes = downloaded;
    if let Some(name) = stats.name.as_deref().filter(|n| !n.is_empty()) {
        if task.has_placeholder_name() {
            task.name = name.to_string();
        }
    }
}

/// Delete `<directory>/<name>` for a torrent the client no longer tracks.
fn remove_leftover_content(task: &TorrentTask) {
    let mut components = Path::new(&task.name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single {
        tracing::warn!(
            "torrent {}: not deleting content with unsafe name {:?}",
            task.header.id,
            task.name
        );
        return;
    }
    let path = task.header.directory.join(&task.name);
    match storage::remove_content(&path) {
        Ok(true) => tracing::debug!("removed {}", path.display()),
        Ok(false) => {}
        Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
    }
}
