//! [`SwarmClient`] backed by a Transmission daemon's JSON-RPC interface.
//!
//! RPCs run on a dedicated worker thread so trait calls never block the
//! control loop: `add` and `remove` enqueue a command, `get` reads a metrics
//! cache the worker refreshes with `torrent-get` on every poll. Lifecycle
//! events are derived from the `torrent-add` reply and the polled fields:
//! - `Added` as soon as the daemon hands back the info-hash,
//! - `Ready` once `metadataPercentComplete` reaches 1,
//! - `Done` once nothing wanted is left,
//! - `Error` when the daemon reports a torrent error.

use super::client::{SwarmClient, SwarmError, SwarmSink, SwarmSource, SwarmStats};
use crate::config::SwarmConfig;
use anyhow::{Context, Result};
use curl::easy::{Easy, List};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SESSION_HEADER: &str = "X-Transmission-Session-Id";

const GET_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "rateDownload",
    "rateUpload",
    "percentDone",
    "uploadedEver",
    "peersConnected",
    "totalSize",
    "sizeWhenDone",
    "leftUntilDone",
    "error",
    "errorString",
    "metadataPercentComplete",
];

enum Command {
    Add {
        source: SwarmSource,
        directory: PathBuf,
        sink: SwarmSink,
    },
    Remove {
        info_hash: String,
        destroy_store: bool,
    },
}

type StatsCache = Arc<Mutex<HashMap<String, SwarmStats>>>;

pub struct TransmissionClient {
    commands: mpsc::Sender<Command>,
    cache: StatsCache,
}

impl TransmissionClient {
    /// Start the RPC worker for the daemon at `config.rpc_url`.
    pub fn spawn(config: &SwarmConfig) -> Result<Self> {
        let (commands, rx) = mpsc::channel();
        let cache = StatsCache::default();
        let worker = Worker {
            rpc: RpcSession::new(&config.rpc_url),
            commands: rx,
            cache: Arc::clone(&cache),
            tracked: HashMap::new(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(100)),
        };
        std::thread::Builder::new()
            .name("ferry-transmission".to_string())
            .spawn(move || worker.run())
            .context("spawn transmission worker")?;
        tracing::info!("swarm backend: transmission at {}", config.rpc_url);
        Ok(Self { commands, cache })
    }

    fn submit(&self, command: Command) -> Result<(), SwarmError> {
        self.commands
            .send(command)
            .map_err(|_| SwarmError::new("transmission worker has stopped"))
    }
}

impl SwarmClient for TransmissionClient {
    fn add(
        &self,
        source: &SwarmSource,
        directory: &Path,
        sink: SwarmSink,
    ) -> Result<(), SwarmError> {
        self.submit(Command::Add {
            source: source.clone(),
            directory: directory.to_path_buf(),
            sink,
        })
    }

    fn get(&self, info_hash: &str) -> Option<SwarmStats> {
        self.cache.lock().ok()?.get(info_hash).cloned()
    }

    fn remove(&self, info_hash: &str, destroy_store: bool) -> Result<(), SwarmError> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(info_hash);
        }
        self.submit(Command::Remove {
            info_hash: info_hash.to_string(),
            destroy_store,
        })
    }
}

/// Per-torrent bookkeeping on the worker.
struct Tracked {
    sink: SwarmSink,
    ready: bool,
    done: bool,
    failed: bool,
}

impl Tracked {
    fn new(sink: SwarmSink) -> Self {
        Self {
            sink,
            ready: false,
            done: false,
            failed: false,
        }
    }
}

/// Attach `sink` to `hash`. The daemon holds one copy per info-hash, so a hash
/// already owned by a different task is refused through `sink`; a newer
/// attempt of the same task takes the entry over.
fn track(tracked: &mut HashMap<String, Tracked>, hash: &str, sink: SwarmSink) -> bool {
    if let Some(entry) = tracked.get(hash) {
        if entry.sink.task_id() != sink.task_id() {
            tracing::warn!(
                "transmission: {} already belongs to task {}, refusing task {}",
                hash,
                entry.sink.task_id(),
                sink.task_id()
            );
            sink.error("duplicate torrent");
            return false;
        }
    }
    tracked.insert(hash.to_string(), Tracked::new(sink));
    true
}

struct Worker {
    rpc: RpcSession,
    commands: mpsc::Receiver<Command>,
    cache: StatsCache,
    tracked: HashMap<String, Tracked>,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self) {
        let mut next_poll = Instant::now() + self.poll_interval;
        loop {
            let wait = next_poll.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(wait) {
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if Instant::now() >= next_poll {
                self.poll();
                next_poll = Instant::now() + self.poll_interval;
            }
        }
        tracing::debug!("transmission worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add {
                source,
                directory,
                sink,
            } => self.add(&source, &directory, sink),
            Command::Remove {
                info_hash,
                destroy_store,
            } => {
                self.tracked.remove(&info_hash);
                let args = json!({ "ids": [info_hash], "delete-local-data": destroy_store });
                if let Err(e) = self.rpc.call("torrent-remove", args) {
                    tracing::warn!("transmission: torrent-remove {} failed: {}", info_hash, e);
                }
            }
        }
    }

    fn add(&mut self, source: &SwarmSource, directory: &Path, sink: SwarmSink) {
        let args = json!({
            "filename": source_argument(source),
            "download-dir": directory.display().to_string(),
            "paused": false,
        });
        let added = self
            .rpc
            .call("torrent-add", args)
            .and_then(|reply| parse_added(&reply));
        match added {
            Ok(torrent) => {
                let hash = torrent.hash_string;
                let reporter = sink.clone();
                if !track(&mut self.tracked, &hash, sink) {
                    return;
                }
                tracing::debug!(
                    "transmission: added {} for task {}",
                    hash,
                    reporter.task_id()
                );
                if let Ok(mut cache) = self.cache.lock() {
                    cache.entry(hash.clone()).or_default();
                }
                reporter.added(hash);
            }
            Err(e) => {
                sink.error(e.to_string());
            }
        }
    }

    fn poll(&mut self) {
        if self.tracked.is_empty() {
            return;
        }
        let ids: Vec<&String> = self.tracked.keys().collect();
        let args = json!({ "ids": ids, "fields": GET_FIELDS });
        let torrents = match self
            .rpc
            .call("torrent-get", args)
            .and_then(|reply| parse_torrents(&reply))
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("transmission: torrent-get failed: {}", e);
                return;
            }
        };

        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        let mut seen = Vec::with_capacity(torrents.len());
        for torrent in torrents {
            let Some(entry) = self.tracked.get_mut(&torrent.hash_string) else {
                continue;
            };
            cache.insert(torrent.hash_string.clone(), torrent.stats());
            if !entry.ready && torrent.metadata_percent_complete >= 1.0 {
                entry.ready = true;
                entry.sink.ready(&torrent.hash_string, &torrent.name);
            }
            if torrent.error != 0 {
                if !entry.failed {
                    entry.failed = true;
                    entry.sink.error(torrent.error_string.clone());
                }
            } else {
                entry.failed = false;
            }
            if entry.ready && !entry.done && torrent.is_complete() {
                entry.done = true;
                entry.sink.done();
            }
            seen.push(torrent.hash_string);
        }

        // Torrents removed behind our back are no longer tracked.
        let gone: Vec<String> = self
            .tracked
            .keys()
            .filter(|hash| !seen.contains(hash))
            .cloned()
            .collect();
        for hash in gone {
            tracing::debug!("transmission: {} disappeared from the daemon", hash);
            self.tracked.remove(&hash);
            cache.remove(&hash);
        }
    }
}

fn source_argument(source: &SwarmSource) -> String {
    match source {
        SwarmSource::Magnet(uri) => uri.clone(),
        SwarmSource::File(path) => path.display().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddedTorrent {
    hash_string: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rate_download: u64,
    #[serde(default)]
    rate_upload: u64,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    uploaded_ever: u64,
    #[serde(default)]
    peers_connected: u32,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    size_when_done: u64,
    #[serde(default)]
    left_until_done: u64,
    #[serde(default)]
    error: i64,
    #[serde(default)]
    error_string: String,
    #[serde(default)]
    metadata_percent_complete: f64,
}

impl RpcTorrent {
    fn wanted(&self) -> u64 {
        if self.size_when_done > 0 {
            self.size_when_done
        } else {
            self.total_size
        }
    }

    fn is_complete(&self) -> bool {
        self.wanted() > 0 && self.left_until_done == 0
    }

    fn stats(&self) -> SwarmStats {
        let wanted = self.wanted();
        SwarmStats {
            download_speed: self.rate_download,
            upload_speed: self.rate_upload,
            progress: self.percent_done,
            downloaded: wanted.saturating_sub(self.left_until_done),
            uploaded: self.uploaded_ever,
            peers: self.peers_connected,
            length: wanted,
            name: Some(self.name.clone()).filter(|n| !n.is_empty()),
        }
    }
}

fn parse_added(arguments: &Value) -> Result<AddedTorrent, SwarmError> {
    let added = arguments
        .get("torrent-added")
        .or_else(|| arguments.get("torrent-duplicate"))
        .ok_or_else(|| SwarmError::new("transmission: torrent-add returned no torrent"))?;
    serde_json::from_value(added.clone())
        .map_err(|e| SwarmError::new(format!("transmission: bad torrent-add reply: {e}")))
}

fn parse_torrents(arguments: &Value) -> Result<Vec<RpcTorrent>, SwarmError> {
    let torrents = arguments
        .get("torrents")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    serde_json::from_value(torrents)
        .map_err(|e| SwarmError::new(format!("transmission: bad torrent-get reply: {e}")))
}

/// Value of the session-id header in a raw header line.
fn session_header_value(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?;
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case(SESSION_HEADER) {
        Some(value.trim().to_string())
    } else {
        None
    }
}

fn rpc_error(e: curl::Error) -> SwarmError {
    SwarmError::new(format!("transmission rpc: {e}"))
}

struct RpcReply {
    status: u32,
    session_id: Option<String>,
    body: Vec<u8>,
}

/// One RPC endpoint plus the CSRF session id it handed out.
struct RpcSession {
    url: String,
    session_id: Option<String>,
}

impl RpcSession {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            session_id: None,
        }
    }

    /// Call `method`, retrying once when the daemon asks for a new session id (409).
    fn call(&mut self, method: &str, arguments: Value) -> Result<Value, SwarmError> {
        let body = serde_json::to_vec(&json!({ "method": method, "arguments": arguments }))
            .map_err(|e| SwarmError::new(format!("transmission rpc: {e}")))?;
        for _ in 0..2 {
            let reply = self.post(&body)?;
            if reply.status == 409 {
                match reply.session_id {
                    Some(id) => {
                        tracing::debug!("transmission: new session id");
                        self.session_id = Some(id);
                        continue;
                    }
                    None => break,
                }
            }
            if reply.status != 200 {
                return Err(SwarmError::new(format!(
                    "transmission rpc {method}: HTTP {}",
                    reply.status
                )));
            }
            let response: RpcResponse = serde_json::from_slice(&reply.body)
                .map_err(|e| SwarmError::new(format!("transmission rpc {method}: {e}")))?;
            if response.result != "success" {
                return Err(SwarmError::new(response.result));
            }
            return Ok(response.arguments);
        }
        Err(SwarmError::new(format!(
            "transmission rpc {method}: session handshake failed"
        )))
    }

    fn post(&self, body: &[u8]) -> Result<RpcReply, SwarmError> {
        let mut headers = List::new();
        headers
            .append("Content-Type: application/json")
            .map_err(rpc_error)?;
        if let Some(id) = &self.session_id {
            headers
                .append(&format!("{SESSION_HEADER}: {id}"))
                .map_err(rpc_error)?;
        }

        let mut easy = Easy::new();
        easy.url(&self.url).map_err(rpc_error)?;
        easy.post(true).map_err(rpc_error)?;
        easy.post_fields_copy(body).map_err(rpc_error)?;
        easy.http_headers(headers).map_err(rpc_error)?;
        easy.connect_timeout(Duration::from_secs(10))
            .map_err(rpc_error)?;
        easy.timeout(Duration::from_secs(30)).map_err(rpc_error)?;

        let mut session_id = None;
        let mut response = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|line| {
                    if let Some(id) = session_header_value(line) {
                        session_id = Some(id);
                    }
                    true
                })
                .map_err(rpc_error)?;
            transfer
                .write_function(|data| {
                    response.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(rpc_error)?;
            transfer.perform().map_err(rpc_error)?;
        }
        let status = easy.response_code().map_err(rpc_error)?;
        Ok(RpcReply {
            status,
            session_id,
            body: response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_header_is_case_insensitive() {
        assert_eq!(
            session_header_value(b"x-transmission-session-id: abc123\r\n").as_deref(),
            Some("abc123")
        );
        assert_eq!(session_header_value(b"Content-Type: text/html\r\n"), None);
        assert_eq!(session_header_value(b"HTTP/1.1 409 Conflict\r\n"), None);
    }

    #[test]
    fn torrent_get_reply_maps_to_stats() {
        let reply = json!({
            "torrents": [{
                "hashString": "abcd",
                "name": "debian.iso",
                "rateDownload": 2048,
                "rateUpload": 16,
                "percentDone": 0.25,
                "uploadedEver": 99,
                "peersConnected": 7,
                "totalSize": 2000,
                "sizeWhenDone": 1000,
                "leftUntilDone": 750,
                "error": 0,
                "errorString": "",
                "metadataPercentComplete": 1.0
            }]
        });
        let torrents = parse_torrents(&reply).unwrap();
        assert_eq!(torrents.len(), 1);
        let stats = torrents[0].stats();
        assert_eq!(stats.length, 1000);
        assert_eq!(stats.downloaded, 250);
        assert_eq!(stats.peers, 7);
        assert_eq!(stats.download_speed, 2048);
        assert_eq!(stats.name.as_deref(), Some("debian.iso"));
        assert!(!torrents[0].is_complete());
    }

    #[test]
    fn magnet_without_metadata_is_not_complete() {
        let reply = json!({ "torrents": [{ "hashString": "ff", "leftUntilDone": 0 }] });
        let torrents = parse_torrents(&reply).unwrap();
        assert!(!torrents[0].is_complete());
        assert_eq!(torrents[0].stats().name, None);
    }

    #[test]
    fn duplicate_add_is_accepted() {
        let reply = json!({ "torrent-duplicate": { "hashString": "ff", "id": 3, "name": "x" } });
        assert_eq!(parse_added(&reply).unwrap().hash_string, "ff");
        assert!(parse_added(&json!({})).is_err());
    }

    #[test]
    fn second_task_cannot_claim_a_tracked_hash() {
        use crate::swarm::SwarmEvent;
        use crate::task::TaskId;
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracked = HashMap::new();
        let first = SwarmSink::new(TaskId::from("a"), 1, tx.clone());
        let second = SwarmSink::new(TaskId::from("b"), 2, tx.clone());

        assert!(track(&mut tracked, "ff", first));
        assert!(!track(&mut tracked, "ff", second));
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.task_id, TaskId::from("b"));
        assert_eq!(notice.event, SwarmEvent::Error("duplicate torrent".into()));
        assert_eq!(tracked["ff"].sink.task_id(), &TaskId::from("a"));

        // A later attempt of the owning task replaces the entry.
        tracked.get_mut("ff").unwrap().ready = true;
        let retry = SwarmSink::new(TaskId::from("a"), 3, tx);
        assert!(track(&mut tracked, "ff", retry));
        assert!(!tracked["ff"].ready);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn source_argument_uses_magnet_or_path() {
        assert_eq!(
            source_argument(&SwarmSource::Magnet("magnet:?xt=urn:btih:ff".into())),
            "magnet:?xt=urn:btih:ff"
        );
        assert_eq!(
            source_argument(&SwarmSource::File(PathBuf::from("/t/a.torrent"))),
            "/t/a.torrent"
        );
    }
}
