//! Task service: the single control loop that owns both engines.
//!
//! [`TaskService::run`] selects over handle commands, HTTP transfer events,
//! swarm notices, and a one-second sampler tick. Each message is applied to
//! completion before the next one, so task records are never shared across
//! threads. After every message an `updated` snapshot is published if either
//! engine's task list changed.

mod handle;


pub use handle::ServiceHandle;

use crate::config::{self, FerryConfig};
use crate::events::EventBus;
use crate::http::{CurlLauncher, CurlOptions, HttpEngine, Launcher, TransferEvent};
use crate::store::TaskStore;
use crate::swarm::{OfflineClient, SwarmClient, SwarmEngine, SwarmNotice, TransmissionClient};
use crate::task::{HttpTask, Task, TaskKind, TorrentTask};
use anyhow::Result;
use handle::{Action, Command, Scope};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const COMMAND_QUEUE: usize = 64;

/// Everything needed to build a [`TaskService`].
pub struct ServiceOptions {
    pub config: FerryConfig,
    /// Directory holding `downloads.json` and `torrents.json`; `None` keeps
    /// both stores in memory only.
    pub data_dir: Option<PathBuf>,
    pub swarm_client: Arc<dyn SwarmClient>,
    /// Transfer launcher; defaults to libcurl with the configured stall timeout.
    pub launcher: Option<Arc<dyn Launcher>>,
}

impl ServiceOptions {
    /// In-memory stores, no swarm backend, libcurl transfers.
    pub fn new(config: FerryConfig) -> Self {
        Self {
            config,
            data_dir: None,
            swarm_client: Arc::new(OfflineClient),
            launcher: None,
        }
    }

    /// Options for the daemon: XDG data directory, plus the Transmission
    /// backend when `[swarm]` is configured.
    pub fn from_config(config: FerryConfig) -> Result<Self> {
        let data_dir = config::data_dir()?;
        let swarm_client: Arc<dyn SwarmClient> = match &config.swarm {
            Some(swarm) => Arc::new(TransmissionClient::spawn(swarm)?),
            None => {
                tracing::info!("no swarm backend configured; torrents will fail to start");
                Arc::new(OfflineClient)
            }
        };
        Ok(Self {
            config,
            data_dir: Some(data_dir),
            swarm_client,
            launcher: None,
        })
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_swarm_client(mut self, client: Arc<dyn SwarmClient>) -> Self {
        self.swarm_client = client;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }
}

pub struct TaskService {
    http: HttpEngine,
    swarm: SwarmEngine,
    bus: EventBus,
    commands: mpsc::Receiver<Command>,
    transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    swarm_events: mpsc::UnboundedReceiver<SwarmNotice>,
}

impl TaskService {
    /// Load both stores and wire the engines. Restored records are not
    /// started; `pending` ones are admitted on the next state change.
    pub fn new(options: ServiceOptions) -> (Self, ServiceHandle) {
        let ServiceOptions {
            config,
            data_dir,
            swarm_client,
            launcher,
        } = options;
        let bus = EventBus::default();
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (transfer_tx, transfer_events) = mpsc::unbounded_channel();
        let (swarm_tx, swarm_events) = mpsc::unbounded_channel();

        let (http_store, swarm_store) = match &data_dir {
            Some(dir) => (
                TaskStore::<HttpTask>::open_in(dir),
                TaskStore::<TorrentTask>::open_in(dir),
            ),
            None => (TaskStore::in_memory(), TaskStore::in_memory()),
        };
        let launcher = launcher.unwrap_or_else(|| {
            Arc::new(CurlLauncher::new(CurlOptions {
                stall_timeout: config.stall_timeout(),
                ..CurlOptions::default()
            }))
        });

        let http = HttpEngine::new(
            http_store,
            config.max_concurrent(),
            config.default_download_directory.clone(),
            launcher,
            transfer_tx,
            bus.clone(),
        );
        let swarm = SwarmEngine::new(
            swarm_store,
            swarm_client,
            config.torrent_download_directory.clone(),
            config.torrent_seeding_enabled,
            swarm_tx,
            bus.clone(),
        );
        tracing::info!(
            "task service ready: {} downloads, {} torrents restored",
            http.tasks().len(),
            swarm.tasks().len()
        );

        let handle = ServiceHandle::new(command_tx, bus.clone());
        let service = Self {
            http,
            swarm,
            bus,
            commands,
            transfer_events,
            swarm_events,
        };
        (service, handle)
    }

    /// Build the service and run it on the current tokio runtime.
    pub fn spawn(options: ServiceOptions) -> (ServiceHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(options);
        (handle, tokio::spawn(service.run()))
    }

    /// Run until [`ServiceHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(event) = self.transfer_events.recv() => self.http.on_transfer_event(event),
                Some(notice) = self.swarm_events.recv() => self.swarm.on_swarm_event(notice),
                _ = sampler.tick() => self.swarm.sample(),
            }
            self.publish_if_changed();
        }
        self.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { url, reply } => {
                let _ = reply.send(self.http.enqueue(&url));
            }
            Command::AddMagnet { uri, reply } => {
                let _ = reply.send(self.swarm.add_magnet(&uri));
            }
            Command::AddFile { path, reply } => {
                let _ = reply.send(self.swarm.add_file(&path));
            }
            Command::Control {
                action,
                id,
                scope,
                reply,
            } => {
                let http = matches!(scope, Scope::Http | Scope::All);
                let swarm = matches!(scope, Scope::Torrent | Scope::All);
                let by_http = http
                    && match action {
                        Action::Pause => self.http.pause(&id),
                        Action::Resume => self.http.resume(&id),
                        Action::Cancel => self.http.cancel(&id),
                    };
                let by_swarm = swarm
                    && match action {
                        Action::Pause => self.swarm.pause(&id),
                        Action::Resume => self.swarm.resume(&id),
                        Action::Cancel => self.swarm.cancel(&id),
                    };
                let _ = reply.send(by_http || by_swarm);
            }
            Command::Downloads { reply } => {
                let _ = reply.send(self.http.tasks().to_vec());
            }
            Command::Torrents { reply } => {
                let _ = reply.send(self.swarm.tasks().to_vec());
            }
            Command::AllTasks { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::SetMaxConcurrent { max, reply } => {
                let _ = reply.send(self.http.set_max_concurrent(max));
            }
            Command::SetSeedingEnabled { enabled, reply } => {
                self.swarm.set_seeding_enabled(enabled);
                let _ = reply.send(());
            }
            Command::SetDefaultDirectory { kind, path, reply } => {
                match kind {
                    TaskKind::Http => self.http.set_directory(path),
                    TaskKind::Torrent => self.swarm.set_directory(path),
                }
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> Vec<Task> {
        merge_tasks(self.http.tasks(), self.swarm.tasks())
    }

    fn publish_if_changed(&mut self) {
        let http = self.http.take_dirty();
        let swarm = self.swarm.take_dirty();
        if http || swarm {
            self.bus.publish_updated(self.snapshot());
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("task service shutting down");
        self.http.shutdown();
        self.swarm.shutdown();
    }
}

/// Tag and merge both record lists, newest `createdDate` first. Ties keep
/// newer-inserted records ahead, HTTP before torrent.
pub fn merge_tasks(downloads: &[HttpTask], torrents: &[TorrentTask]) -> Vec<Task> {
    let mut tasks: Vec<Task> = downloads
        .iter()
        .rev()
        .cloned()
        .map(Task::from)
        .chain(torrents.iter().rev().cloned().map(Task::from))
        .collect();
    tasks.sort_by(|a, b| b.created_date().cmp(&a.created_date()));
    tasks
}
