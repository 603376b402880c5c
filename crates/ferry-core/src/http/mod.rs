//! HTTP transfer engine.
//!
//! Owns the HTTP task store and drives one resumable byte-stream transfer per
//! `downloading` task, at most `max_concurrent` at a time. All methods run on
//! the service's control loop; transfer threads only report back through
//! [`TransferEvent`]s, which are applied here.
//!
//! Lifecycle: `pending → downloading → {completed | error | paused | cancelled}`,
//! `paused | error → pending` on resume, `pending → cancelled`.

mod response;
mod transfer;

#[cfg(test)]
pub(crate) mod fake;

pub use response::{parse_content_range, ContentRange, ResponseKind};
pub use transfer::{
    run_transfer, CurlLauncher, CurlOptions, Launcher, TransferEvent, TransferEventKind,
    TransferRequest, TransferSender,
};

use crate::control::{AbortToken, ArtifactLock, HandleRegistry};
use crate::error::{ServiceError, TransferError};
use crate::events::{EventBus, ProgressEvent};
use crate::scheduler::{self, AdmissionTarget, ConcurrencyLimit};
use crate::storage;
use crate::store::TaskStore;
use crate::task::{HttpTask, TaskId, TaskStatus};
use crate::url_model;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct HttpEngine {
    store: TaskStore<HttpTask>,
    limit: ConcurrencyLimit,
    directory: PathBuf,
    transfers: HandleRegistry<AbortToken>,
    /// One per task that has been started; shared by all its attempts.
    artifacts: HashMap<TaskId, ArtifactLock>,
    launcher: Arc<dyn Launcher>,
    events: mpsc::UnboundedSender<TransferEvent>,
    bus: EventBus,
    dirty: bool,
}

impl HttpEngine {
    /// Build the engine over a loaded store. Nothing is started until the first
    /// state change; records restored as `pending` are picked up by [`HttpEngine::admit`].
    pub fn new(
        store: TaskStore<HttpTask>,
        max_concurrent: usize,
        directory: PathBuf,
        launcher: Arc<dyn Launcher>,
        events: mpsc::UnboundedSender<TransferEvent>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            limit: ConcurrencyLimit::new(max_concurrent),
            directory,
            transfers: HandleRegistry::new(),
            artifacts: HashMap::new(),
            launcher,
            events,
            bus,
            dirty: false,
        }
    }

    pub fn tasks(&self) -> &[HttpTask] {
        self.store.records()
    }

    pub fn get(&self, id: &TaskId) -> Option<&HttpTask> {
        self.store.get(id)
    }

    pub fn max_concurrent(&self) -> usize {
        self.limit.max()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Directory for tasks enqueued from now on.
    pub fn set_directory(&mut self, directory: PathBuf) {
        tracing::info!("http download directory set to {}", directory.display());
        self.directory = directory;
    }

    /// True if the task list changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn admit(&mut self) {
        scheduler::admit(self);
    }

    /// Create a `pending` task for `url`, persist it, and run admission.
    /// The returned record reflects admission (usually already `downloading`).
    pub fn enqueue(&mut self, url: &str) -> Result<HttpTask, ServiceError> {
        let parsed = url_model::parse_download_url(url).map_err(ServiceError::InvalidSource)?;
        let mut task = HttpTask::new(url.trim(), String::new(), self.directory.clone());
        let candidate = url_model::filename_for_url(&parsed, task.header.created_date);
        task.filename = url_model::unique_filename(&candidate, |name| {
            self.name_in_use(&task.header.directory, name)
        });

        tracing::info!(
            "enqueued download {}: {} -> {}",
            task.header.id,
            task.url,
            task.target_path().display()
        );
        let id = task.header.id.clone();
        let fallback = task.clone();
        self.store.push(task);
        self.changed();
        Ok(self.store.get(&id).cloned().unwrap_or(fallback))
    }

    /// Stop a running transfer, keeping its temp file. Only valid from `downloading`.
    pub fn pause(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.get_mut(id) else {
            return false;
        };
        if task.header.status != TaskStatus::Downloading {
            return false;
        }
        self.transfers.abort(id);
        task.header.set_status(TaskStatus::Paused);
        tracing::info!(
            "download {} paused at {} bytes",
            id,
            task.header.downloaded_bytes
        );
        self.changed();
        true
    }

    /// Requeue a `paused` or `error` task.
    pub fn resume(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.get_mut(id) else {
            return false;
        };
        if !matches!(task.header.status, TaskStatus::Paused | TaskStatus::Error) {
            return false;
        }
        task.header.set_status(TaskStatus::Pending);
        tracing::info!("download {} resumed", id);
        self.changed();
        true
    }

    /// Stop the task for good and delete its temp file. The record stays as `cancelled`.
    pub fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(task) = self.store.get_mut(id) else {
            return false;
        };
        if task.header.status.is_terminal() {
            return false;
        }
        self.transfers.cancel(id);
        self.artifacts.remove(id);
        task.header.set_status(TaskStatus::Cancelled);
        let temp = task.temp_path();
        match storage::remove_artifact(&temp) {
            Ok(true) => tracing::debug!("removed {}", temp.display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("failed to remove {}: {}", temp.display(), e),
        }
        tracing::info!("download {} cancelled", id);
        self.changed();
        true
    }

    /// Change the concurrency limit (clamped to 1..=10). Surplus transfers,
    /// newest first, are paused so the limit holds immediately.
    pub fn set_max_concurrent(&mut self, max: usize) -> usize {
        let applied = self.limit.set(max);
        let surplus = self
            .limit
            .surplus(self.store.count_status(TaskStatus::Downloading));
        if surplus > 0 {
            let mut running: Vec<(u64, TaskId)> = self
                .store
                .ids_with_status(TaskStatus::Downloading)
                .into_iter()
                .map(|id| (self.transfers.attempt(&id).unwrap_or(0), id))
                .collect();
            running.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, id) in running.into_iter().take(surplus) {
                tracing::info!("pausing {} to honor concurrency limit {}", id, applied);
                self.pause(&id);
            }
        }
        tracing::info!("max concurrent downloads set to {}", applied);
        self.admit();
        applied
    }

    /// Apply one event from a transfer thread. Events from stale attempts are dropped.
    pub fn on_transfer_event(&mut self, event: TransferEvent) {
        let TransferEvent {
            task_id,
            attempt,
            kind,
        } = event;
        if !self.transfers.is_current(&task_id, attempt) {
            tracing::trace!("dropping stale event for {} attempt {}", task_id, attempt);
            return;
        }
        let Some(task) = self.store.get_mut(&task_id) else {
            self.transfers.take(&task_id);
            return;
        };
        if task.header.status != TaskStatus::Downloading {
            self.transfers.take(&task_id);
            return;
        }

        match kind {
            TransferEventKind::Response(ResponseKind::Full {
                content_length,
                accept_ranges,
            }) => {
                if task.header.downloaded_bytes > 0 {
                    tracing::info!(
                        "download {}: server sent the full entity, restarting from byte 0",
                        task_id
                    );
                    task.header.downloaded_bytes = 0;
                }
                task.header.total_bytes = content_length.unwrap_or(0);
                task.resumable = accept_ranges;
                self.dirty = true;
            }
            TransferEventKind::Response(ResponseKind::Partial { total }) => {
                if let Some(total) = total {
                    task.header.total_bytes = total;
                }
                task.resumable = true;
                tracing::debug!(
                    "download {} resuming at byte {}",
                    task_id,
                    task.header.downloaded_bytes
                );
                self.dirty = true;
            }
            TransferEventKind::Chunk(n) => {
                task.header.downloaded_bytes += n;
                self.bus.publish_progress(ProgressEvent::from(&*task));
            }
            TransferEventKind::Finished => {
                self.transfers.release(&task_id, attempt);
                self.finish(&task_id);
            }
            TransferEventKind::Failed(e) => {
                self.transfers.release(&task_id, attempt);
                self.fail(&task_id, e);
            }
        }
    }

    /// Abort every transfer and persist. Records keep their in-memory status;
    /// the snapshot stores them as `paused`.
    pub fn shutdown(&mut self) {
        self.transfers.abort_all();
        self.store.save();
    }

    fn name_in_use(&self, directory: &Path, name: &str) -> bool {
        self.store.records().iter().any(|t| {
            t.header.status != TaskStatus::Cancelled
                && t.header.directory == directory
                && t.filename == name
        })
    }

    /// Persist, mark the list updated, and refill free slots.
    fn changed(&mut self) {
        self.store.save();
        self.dirty = true;
        self.admit();
    }

    fn finish(&mut self, id: &TaskId) {
        let Some(task) = self.store.get_mut(id) else {
            return;
        };
        let total = task.header.total_bytes;
        let received = task.header.downloaded_bytes;
        if total > 0 && received < total {
            self.fail(
                id,
                TransferError::Incomplete {
                    expected: total,
                    received,
                },
            );
            return;
        }
        let target = task.target_path();
        match storage::finalize(&task.temp_path(), &target) {
            Ok(()) => {
                if total == 0 {
                    task.header.total_bytes = received;
                }
                task.header.set_status(TaskStatus::Completed);
                self.artifacts.remove(id);
                tracing::info!("download {} completed: {}", id, target.display());
            }
            Err(e) => {
                let e = TransferError::from(e);
                tracing::warn!("download {}: rename to {} failed: {}", id, target.display(), e);
                task.header.fail(e.to_string());
            }
        }
        self.changed();
    }

    fn fail(&mut self, id: &TaskId, error: TransferError) {
        if let Some(task) = self.store.get_mut(id) {
            tracing::warn!("download {} failed: {}", id, error);
            task.header.fail(error.to_string());
        }
        self.changed();
    }

    fn start_transfer(&mut self, id: &TaskId) {
        let Some(task) = self.store.get_mut(id) else {
            return;
        };
        if task.header.status != TaskStatus::Pending {
            return;
        }
        let temp_path = task.temp_path();
        if task.header.downloaded_bytes > 0 {
            let on_disk = storage::artifact_len(&temp_path).unwrap_or(0);
            if on_disk < task.header.downloaded_bytes {
                tracing::warn!(
                    "download {}: temp file holds {} of {} recorded bytes, starting over",
                    id,
                    on_disk,
                    task.header.downloaded_bytes
                );
                task.header.downloaded_bytes = 0;
            }
        }
        task.header.set_status(TaskStatus::Downloading);

        let token = AbortToken::new();
        let (attempt, previous) = self.transfers.register(id, token.clone());
        if let Some(previous) = previous {
            previous.abort();
        }
        let request = TransferRequest {
            url: task.url.clone(),
            temp_path,
            offset: task.header.downloaded_bytes,
            token,
            lock: self.artifacts.entry(id.clone()).or_default().clone(),
            events: TransferSender::new(id.clone(), attempt, self.events.clone()),
        };
        tracing::debug!(
            "starting download {} attempt {} at offset {}",
            id,
            attempt,
            request.offset
        );
        self.launcher.launch(request);
        self.store.save();
        self.dirty = true;
    }
}

impl AdmissionTarget for HttpEngine {
    fn active_count(&self) -> usize {
        self.store.count_status(TaskStatus::Downloading)
    }

    fn concurrency_limit(&self) -> Option<usize> {
        Some(self.limit.max())
    }

    fn pending_ids(&self) -> Vec<TaskId> {
        self.store.ids_with_status(TaskStatus::Pending)
    }

    fn start(&mut self, id: &TaskId) {
        self.start_transfer(id);
    }
}
