pub mod config;
pub mod logging;

pub mod control;
pub mod error;
pub mod events;
pub mod http;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod swarm;
pub mod task;
pub mod url_model;

pub use error::{ServiceError, TransferError};
pub use events::{EventBus, ProgressEvent};
pub use service::{ServiceHandle, ServiceOptions, TaskService};
pub use task::{HttpTask, Task, TaskId, TaskKind, TaskStatus, TorrentTask};
