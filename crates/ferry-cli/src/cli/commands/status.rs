//! `ferry status` – list all tasks. Asks the daemon when it runs, otherwise
//! reads the saved snapshots.

use anyhow::Result;
use ferry_core::config;
use ferry_core::service::merge_tasks;
use ferry_core::store::TaskStore;
use ferry_core::{HttpTask, Task, TorrentTask};

use crate::cli::control_socket::{self, Request};

pub async fn run_status() -> Result<()> {
    let socket_path = control_socket::default_control_socket_path()?;
    let tasks: Vec<Task> = match control_socket::send_request(&socket_path, &Request::List).await {
        Ok(reply) => serde_json::from_value(reply.into_data()?)?,
        Err(e) => {
            tracing::debug!("daemon unreachable, reading snapshots: {:#}", e);
            let data_dir = config::data_dir()?;
            merge_tasks(
                TaskStore::<HttpTask>::open_in(&data_dir).records(),
                TaskStore::<TorrentTask>::open_in(&data_dir).records(),
            )
        }
    };

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    println!(
        "{:<36} {:<7} {:<11} {:>7}  {}",
        "ID", "KIND", "STATUS", "DONE", "NAME"
    );
    for task in &tasks {
        println!("{}", format_row(task));
    }
    Ok(())
}

pub fn format_row(task: &Task) -> String {
    let header = task.header();
    let done = if header.total_bytes > 0 {
        let pct = header.downloaded_bytes as f64 * 100.0 / header.total_bytes as f64;
        format!("{pct:.1}%")
    } else {
        "-".to_string()
    };
    let mut row = format!(
        "{:<36} {:<7} {:<11} {:>7}  {}",
        task.id().as_str(),
        task.kind().to_string(),
        task.status().as_str(),
        done,
        task.display_name()
    );
    if let Some(error) = &header.error {
        row.push_str(&format!("  [{error}]"));
    }
    row
}
