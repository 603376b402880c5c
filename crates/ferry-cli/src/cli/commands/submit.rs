//! Client commands: forward one request to the running daemon and print its answer.

use anyhow::{bail, Result};
use ferry_core::{Task, TaskStatus};
use serde_json::Value;

use crate::cli::control_socket::{self, Request};

pub async fn submit(request: Request) -> Result<()> {
    let socket_path = control_socket::default_control_socket_path()?;
    let reply = control_socket::send_request(&socket_path, &request).await?;
    let message = describe_reply(&request, reply.into_data()?)?;
    println!("{message}");
    Ok(())
}

/// Human-readable outcome of a successful request. A refused pause, resume,
/// or cancel is an error.
pub fn describe_reply(request: &Request, data: Value) -> Result<String> {
    let message = match request {
        Request::Enqueue(_) | Request::Magnet(_) | Request::File(_) => {
            let task: Task = serde_json::from_value(data)?;
            let mut line = format!(
                "Added {} task {}: {}",
                task.kind(),
                task.id(),
                task.display_name()
            );
            if task.status() == TaskStatus::Error {
                if let Some(error) = &task.header().error {
                    line.push_str(&format!(" (failed: {error})"));
                }
            }
            line
        }
        Request::Pause(id) | Request::Resume(id) | Request::Cancel(id) => {
            let (done, verb) = match request {
                Request::Pause(_) => ("Paused", "paused"),
                Request::Resume(_) => ("Resumed", "resumed"),
                _ => ("Cancelled", "cancelled"),
            };
            if data.as_bool() != Some(true) {
                bail!("task {id} cannot be {verb} (unknown id or wrong state)");
            }
            format!("{done} task {id}")
        }
        Request::Max(_) => format!(
            "Max concurrent downloads set to {}",
            data.as_u64().unwrap_or_default()
        ),
        Request::Seeding(on) => {
            if *on {
                "Torrent seeding enabled".to_string()
            } else {
                "Torrent seeding disabled".to_string()
            }
        }
        Request::List => {
            let tasks: Vec<Task> = serde_json::from_value(data)?;
            format!("{} task(s)", tasks.len())
        }
    };
    Ok(message)
}
