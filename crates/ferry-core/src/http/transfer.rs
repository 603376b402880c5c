//! One blocking libcurl transfer per active HTTP/FTP task.
//!
//! The transfer runs on a blocking thread and reports back to the control loop
//! through [`TransferEvent`]s tagged with the task id and attempt number. The
//! only shared state is the attempt's [`AbortToken`], which the header, write,
//! and progress callbacks check, and the task's [`ArtifactLock`], held for the
//! whole transfer so two attempts never write the temp file at once.

use super::response::{classify, HeaderCollector, HeaderLine, ResponseKind};
use crate::control::{AbortToken, ArtifactLock};
use crate::error::TransferError;
use crate::storage::{self, TempWriter};
use crate::task::TaskId;
use curl::easy::Easy;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct TransferEvent {
    pub task_id: TaskId,
    pub attempt: u64,
    pub kind: TransferEventKind,
}

#[derive(Debug)]
pub enum TransferEventKind {
    /// Final response accepted; sent once, before any chunk.
    Response(ResponseKind),
    /// This many payload bytes were appended to the temp file.
    Chunk(u64),
    /// Stream ended cleanly and the temp file is closed.
    Finished,
    Failed(TransferError),
}

/// Event sender bound to one task attempt.
#[derive(Debug, Clone)]
pub struct TransferSender {
    task_id: TaskId,
    attempt: u64,
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferSender {
    pub fn new(task_id: TaskId, attempt: u64, tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self {
            task_id,
            attempt,
            tx,
        }
    }

    /// Returns false once the control loop is gone.
    pub fn send(&self, kind: TransferEventKind) -> bool {
        self.tx
            .send(TransferEvent {
                task_id: self.task_id.clone(),
                attempt: self.attempt,
                kind,
            })
            .is_ok()
    }
}

/// Everything a transfer thread needs; nothing refers back to the task record.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub temp_path: PathBuf,
    /// Bytes already on disk; requested as `Range: bytes=<offset>-` (or FTP `REST`).
    pub offset: u64,
    pub token: AbortToken,
    /// Shared by every attempt of the same task.
    pub lock: ArtifactLock,
    pub events: TransferSender,
}

/// Starts transfers for the HTTP engine. The engine never waits on a launch.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: TransferRequest);
}

/// libcurl settings applied to every transfer.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays under 1 byte/s this long; `None` disables.
    pub stall_timeout: Option<Duration>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Runs each transfer with libcurl on tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct CurlLauncher {
    options: CurlOptions,
}

impl CurlLauncher {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }
}

impl Launcher for CurlLauncher {
    fn launch(&self, request: TransferRequest) {
        let options = self.options;
        tokio::task::spawn_blocking(move || run_transfer(request, options));
    }
}

/// Perform one transfer to completion, abort, or failure, reporting the outcome.
/// Nothing is reported for an aborted transfer, and one aborted before it got
/// the lock never opens the temp file.
pub fn run_transfer(request: TransferRequest, options: CurlOptions) {
    let outcome = {
        let _held = request.lock.hold();
        let outcome = if request.token.is_aborted() {
            Ok(())
        } else {
            perform(&request, options)
        };
        if request.token.is_cancelled() {
            discard(&request.temp_path);
        }
        outcome
    };
    if request.token.is_aborted() {
        tracing::debug!(
            "transfer {} attempt {} stopped",
            request.events.task_id,
            request.events.attempt
        );
        return;
    }
    match outcome {
        Ok(()) => {
            request.events.send(TransferEventKind::Finished);
        }
        Err(e) => {
            tracing::debug!("transfer {} failed: {}", request.events.task_id, e);
            request.events.send(TransferEventKind::Failed(e));
        }
    }
}

/// Remove the temp file of a cancelled transfer.
fn discard(temp_path: &Path) {
    match storage::remove_artifact(temp_path) {
        Ok(true) => tracing::debug!("removed {}", temp_path.display()),
        Ok(false) => {}
        Err(e) => tracing::warn!("failed to remove {}: {}", temp_path.display(), e),
    }
}

/// Per-transfer state touched by the curl callbacks.
struct Session {
    writer: TempWriter,
    collector: HeaderCollector,
    kind: Option<ResponseKind>,
    received: u64,
    failure: Option<TransferError>,
}

impl Session {
    /// Adopt the server's reply; a full reply to a ranged request restarts the file.
    fn accept(&mut self, kind: ResponseKind, offset: u64, events: &TransferSender) -> bool {
        if matches!(kind, ResponseKind::Full { .. }) && offset > 0 {
            if let Err(e) = self.writer.restart() {
                self.failure = Some(e.into());
                return false;
            }
        }
        self.kind = Some(kind);
        events.send(TransferEventKind::Response(kind));
        true
    }

    /// `(expected, received)` totals for an early end of stream, if the size was announced.
    fn shortfall(&self, offset: u64) -> Option<(u64, u64)> {
        match self.kind? {
            ResponseKind::Full { content_length, .. } => content_length.map(|n| (n, self.received)),
            ResponseKind::Partial { total } => total.map(|t| (t, offset + self.received)),
        }
    }
}

fn is_ftp(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.scheme() == "ftp")
        .unwrap_or(false)
}

fn transport(e: curl::Error) -> TransferError {
    TransferError::Transport(e.to_string())
}

fn configure(
    easy: &mut Easy,
    url: &str,
    offset: u64,
    ftp: bool,
    options: CurlOptions,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.useragent(concat!("ferry/", env!("CARGO_PKG_VERSION")))?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(options.connect_timeout)?;
    if let Some(stall) = options.stall_timeout {
        easy.low_speed_limit(1)?;
        easy.low_speed_time(stall)?;
    }
    easy.progress(true)?;
    if offset > 0 {
        if ftp {
            easy.resume_from(offset)?;
        } else {
            easy.range(&format!("{offset}-"))?;
        }
    }
    Ok(())
}

fn open_writer(temp_path: &Path, offset: u64) -> Result<TempWriter, TransferError> {
    if let Some(parent) = temp_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(TempWriter::open(temp_path, offset)?)
}

fn perform(request: &TransferRequest, options: CurlOptions) -> Result<(), TransferError> {
    let TransferRequest {
        url,
        temp_path,
        offset,
        token,
        events,
        ..
    } = request;
    let offset = *offset;
    let ftp = is_ftp(url);

    let session = RefCell::new(Session {
        writer: open_writer(temp_path, offset)?,
        collector: HeaderCollector::default(),
        kind: None,
        received: 0,
        failure: None,
    });

    let mut easy = Easy::new();
    configure(&mut easy, url, offset, ftp, options).map_err(transport)?;

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                if token.is_aborted() {
                    return false;
                }
                if ftp {
                    return true;
                }
                let mut s = session.borrow_mut();
                match s.collector.feed(line) {
                    HeaderLine::Pending | HeaderLine::Interim => true,
                    HeaderLine::Final(head) => match classify(&head, offset) {
                        Ok(kind) => s.accept(kind, offset, events),
                        Err(e) => {
                            s.failure = Some(e);
                            false
                        }
                    },
                }
            })
            .map_err(transport)?;
        transfer
            .write_function(|data| {
                if token.is_aborted() {
                    return Ok(0);
                }
                let mut s = session.borrow_mut();
                if s.kind.is_none() {
                    // FTP has no status line: resuming means a continuation.
                    let kind = if offset > 0 {
                        ResponseKind::Partial { total: None }
                    } else {
                        ResponseKind::Full {
                            content_length: None,
                            accept_ranges: ftp,
                        }
                    };
                    if !s.accept(kind, offset, events) {
                        return Ok(0);
                    }
                }
                if let Err(e) = s.writer.append(data) {
                    s.failure = Some(e.into());
                    return Ok(0);
                }
                let n = data.len() as u64;
                s.received += n;
                events.send(TransferEventKind::Chunk(n));
                Ok(data.len())
            })
            .map_err(transport)?;
        transfer
            .progress_function(|_, _, _, _| !token.is_aborted())
            .map_err(transport)?;
        transfer.perform()
    };

    let mut session = session.into_inner();
    if let Some(failure) = session.failure.take() {
        let _ = session.writer.close();
        return Err(failure);
    }
    match result {
        Ok(()) => {
            if session.kind.is_none() && offset > 0 {
                // Empty FTP continuation: nothing was announced, the file is already whole.
                events.send(TransferEventKind::Response(ResponseKind::Partial { total: None }));
            } else if session.kind.is_none() {
                events.send(TransferEventKind::Response(ResponseKind::Full {
                    content_length: Some(0),
                    accept_ranges: ftp,
                }));
            }
            session.writer.close()?;
            Ok(())
        }
        Err(e) => {
            let shortfall = session.shortfall(offset);
            let _ = session.writer.close();
            match shortfall {
                Some((expected, received)) if e.is_partial_file() => {
                    Err(TransferError::Incomplete { expected, received })
                }
                _ => Err(transport(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_detection() {
        assert!(is_ftp("ftp://mirror.example.org/pub/file.iso"));
        assert!(!is_ftp("https://example.com/file.iso"));
        assert!(!is_ftp("not a url"));
    }

    #[test]
    fn sender_tags_events_with_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = TransferSender::new(TaskId::from("t"), 7, tx);
        assert!(sender.send(TransferEventKind::Chunk(3)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.task_id, TaskId::from("t"));
        assert_eq!(event.attempt, 7);
        assert!(matches!(event.kind, TransferEventKind::Chunk(3)));
        drop(rx);
        assert!(!sender.send(TransferEventKind::Finished));
    }

    fn request(
        temp_path: PathBuf,
        offset: u64,
        token: AbortToken,
        lock: ArtifactLock,
        tx: mpsc::UnboundedSender<TransferEvent>,
    ) -> TransferRequest {
        TransferRequest {
            url: "http://127.0.0.1:9/never".to_string(),
            temp_path,
            offset,
            token,
            lock,
            events: TransferSender::new(TaskId::from("t"), 1, tx),
        }
    }

    #[test]
    fn aborted_request_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = AbortToken::new();
        token.abort();
        let temp = dir.path().join("x.tmp");
        run_transfer(
            request(temp.clone(), 0, token, ArtifactLock::new(), tx),
            CurlOptions::default(),
        );
        assert!(rx.try_recv().is_err());
        assert!(!temp.exists());
    }

    #[test]
    fn cancelled_before_start_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = AbortToken::new();
        token.cancel();
        let temp = dir.path().join("x.iso.tmp");
        run_transfer(
            request(temp.clone(), 4096, token, ArtifactLock::new(), tx),
            CurlOptions::default(),
        );
        assert!(rx.try_recv().is_err());
        assert!(!temp.exists());
    }

    #[test]
    fn paused_before_start_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let temp = dir.path().join("x.iso.tmp");
        std::fs::write(&temp, b"partial").unwrap();
        let token = AbortToken::new();
        token.abort();
        run_transfer(
            request(temp.clone(), 4096, token, ArtifactLock::new(), tx),
            CurlOptions::default(),
        );
        assert_eq!(std::fs::read(&temp).unwrap(), b"partial");
    }

    #[test]
    fn next_attempt_waits_for_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("x.iso.tmp");
        std::fs::write(&temp, b"earlier attempt").unwrap();
        let lock = ArtifactLock::new();
        let held = lock.hold();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let next = request(temp.clone(), 0, AbortToken::new(), lock.clone(), tx);
        let worker = std::thread::spawn(move || run_transfer(next, CurlOptions::default()));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(std::fs::read(&temp).unwrap(), b"earlier attempt");
        assert!(rx.try_recv().is_err());

        drop(held);
        worker.join().unwrap();
        // Port 9 refuses the connection; the new attempt opened (and truncated) the file first.
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            TransferEventKind::Failed(_)
        ));
        assert_eq!(std::fs::read(&temp).unwrap(), b"");
    }
}
