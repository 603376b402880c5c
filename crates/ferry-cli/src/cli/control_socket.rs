//! Control socket: server (during `ferry run`) and client (for every other command).
//!
//! Protocol: one request per line, one JSON reply line per request.
//!
//! ```text
//! enqueue <url> | magnet <uri> | file <path> | pause <id> | resume <id>
//! cancel <id>   | list         | max <n>     | seeding <on|off>
//! ```
//!
//! Replies are `{"ok":true,"data":...}` or `{"ok":false,"error":"..."}`.

use anyhow::{anyhow, Context, Result};
use ferry_core::{ServiceHandle, Task, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub fn default_control_socket_path() -> Result<PathBuf> {
    Ok(ferry_core::config::state_dir()?.join("control.sock"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Enqueue(String),
    Magnet(String),
    File(PathBuf),
    Pause(TaskId),
    Resume(TaskId),
    Cancel(TaskId),
    List,
    Max(usize),
    Seeding(bool),
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };
        let need = |what: &str| -> Result<String, String> {
            if arg.is_empty() {
                Err(format!("{verb}: missing {what}"))
            } else {
                Ok(arg.to_string())
            }
        };
        match verb {
            "enqueue" => Ok(Request::Enqueue(need("url")?)),
            "magnet" => Ok(Request::Magnet(need("uri")?)),
            "file" => Ok(Request::File(PathBuf::from(need("path")?))),
            "pause" => Ok(Request::Pause(TaskId::from(need("id")?))),
            "resume" => Ok(Request::Resume(TaskId::from(need("id")?))),
            "cancel" => Ok(Request::Cancel(TaskId::from(need("id")?))),
            "list" => Ok(Request::List),
            "max" => need("count")?
                .parse()
                .map(Request::Max)
                .map_err(|_| format!("max: not a number: {arg}")),
            "seeding" => match arg {
                "on" => Ok(Request::Seeding(true)),
                "off" => Ok(Request::Seeding(false)),
                _ => Err(format!("seeding: expected on or off, got {arg:?}")),
            },
            "" => Err("empty request".to_string()),
            other => Err(format!("unknown command: {other}")),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Request::Enqueue(url) => format!("enqueue {url}"),
            Request::Magnet(uri) => format!("magnet {uri}"),
            Request::File(path) => format!("file {}", path.display()),
            Request::Pause(id) => format!("pause {id}"),
            Request::Resume(id) => format!("resume {id}"),
            Request::Cancel(id) => format!("cancel {id}"),
            Request::List => "list".to_string(),
            Request::Max(n) => format!("max {n}"),
            Request::Seeding(on) => format!("seeding {}", if *on { "on" } else { "off" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::error(format!("failed to encode reply: {e}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful reply, or the daemon's error.
    pub fn into_data(self) -> Result<Value> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(anyhow!(self
                .error
                .unwrap_or_else(|| "request failed".to_string())))
        }
    }
}

/// Run one request against the service.
pub async fn dispatch(handle: &ServiceHandle, request: Request) -> Reply {
    let result = match request {
        Request::Enqueue(url) => handle.enqueue(&url).await.map(|t| Reply::ok(Task::from(t))),
        Request::Magnet(uri) => handle.add_magnet(&uri).await.map(|t| Reply::ok(Task::from(t))),
        Request::File(path) => handle
            .add_torrent_file(path)
            .await
            .map(|t| Reply::ok(Task::from(t))),
        Request::Pause(id) => handle.pause_task(&id).await.map(Reply::ok),
        Request::Resume(id) => handle.resume_task(&id).await.map(Reply::ok),
        Request::Cancel(id) => handle.cancel_task(&id).await.map(Reply::ok),
        Request::List => handle.all_tasks().await.map(Reply::ok),
        Request::Max(n) => handle.set_max_concurrent(n).await.map(Reply::ok),
        Request::Seeding(on) => handle.set_seeding_enabled(on).await.map(|()| Reply::ok(on)),
    };
    result.unwrap_or_else(|e| Reply::error(e.to_string()))
}

async fn serve_connection(handle: ServiceHandle, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match Request::parse(&line) {
            Ok(request) => {
                tracing::debug!("control: {}", request.to_line());
                dispatch(&handle, request).await
            }
            Err(e) => Reply::error(e),
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }
    Ok(())
}

/// Bind `path` (replacing a stale socket) and serve requests on a background task.
pub fn spawn_control_listener(
    handle: ServiceHandle,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handle, stream).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(task)
}

/// Send one request to the daemon listening on `socket_path` and wait for its reply.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Reply> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "ferry daemon is not running (no control socket at {}); start it with `ferry run`",
            socket_path.display()
        )
    })?;
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{}\n", request.to_line()).as_bytes())
        .await?;
    let line = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .context("daemon closed the connection without replying")?;
    serde_json::from_str(&line).context("malformed reply from daemon")
}
