//! `ferry run` – run the task service and its control socket until Ctrl-C.

use anyhow::{Context, Result};
use ferry_core::config::FerryConfig;
use ferry_core::{ServiceOptions, Task, TaskId, TaskService, TaskStatus};
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::cli::control_socket;

pub async fn run_daemon(cfg: FerryConfig) -> Result<()> {
    let options = ServiceOptions::from_config(cfg)?;
    let (handle, service) = TaskService::spawn(options);

    let socket_path = control_socket::default_control_socket_path()?;
    let listener = control_socket::spawn_control_listener(handle.clone(), &socket_path)?;
    tracing::debug!(path = %socket_path.display(), "control socket listening");
    println!("ferry running; control socket at {}", socket_path.display());

    let reporter = tokio::spawn(report_transitions(handle.subscribe_updated()));

    tokio::signal::ctrl_c()
        .await
        .context("wait for Ctrl-C")?;
    println!("shutting down");

    listener.abort();
    handle.shutdown().await?;
    let _ = service.await;
    reporter.abort();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("remove {}: {}", socket_path.display(), e);
    }
    Ok(())
}

async fn report_transitions(mut updates: broadcast::Receiver<Vec<Task>>) {
    let mut last = HashMap::new();
    loop {
        match updates.recv().await {
            Ok(tasks) => {
                for line in transitions(&mut last, &tasks) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(n)) => tracing::debug!("status reporter skipped {} updates", n),
            Err(RecvError::Closed) => break,
        }
    }
}

/// One line per task whose status changed since the previous snapshot.
/// Tasks missing from `tasks` are forgotten.
pub fn transitions(last: &mut HashMap<TaskId, TaskStatus>, tasks: &[Task]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashMap::with_capacity(tasks.len());
    // Oldest first, so lines read in creation order.
    for task in tasks.iter().rev() {
        let status = task.status();
        if last.get(task.id()) != Some(&status) {
            let mut line = format!("[{}] {}: {}", task.kind(), task.display_name(), status.as_str());
            if let Some(error) = &task.header().error {
                line.push_str(&format!(" ({error})"));
            }
            lines.push(line);
        }
        seen.insert(task.id().clone(), status);
    }
    *last = seen;
    lines
}
