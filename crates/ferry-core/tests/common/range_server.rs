//! Minimal HTTP/1.1 server answering GET with optional Range support.
//!
//! Serves one static body under `/<name>`. Every connection handles a single
//! request and is closed afterwards.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes`.
    pub advertise_ranges: bool,
    /// Answer every request with this status and an empty body.
    pub status: Option<u16>,
    /// Announce the full length but close after this many body bytes.
    pub truncate_at: Option<usize>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            advertise_ranges: true,
            status: None,
            truncate_at: None,
        }
    }
}

/// Serve `body` at `/<name>` from a background thread. Returns the full URL.
pub fn start(name: &str, body: Vec<u8>) -> String {
    start_with_options(name, body, RangeServerOptions::default())
}

pub fn start_with_options(name: &str, body: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body, opts));
        }
    });
    format!("http://127.0.0.1:{port}/{name}")
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range_start) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }
    if let Some(code) = opts.status {
        let response =
            format!("HTTP/1.1 {code} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let total = body.len();
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };
    let (head, slice) = match range_start.filter(|_| opts.support_ranges) {
        Some(start) if start >= total => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\n"
            );
            (head, &body[0..0])
        }
        Some(start) => {
            let slice = &body[start..];
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{}/{total}\r\nContent-Length: {}\r\n",
                total - 1,
                slice.len()
            );
            (head, slice)
        }
        None => (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n"),
            body,
        ),
    };
    let response = format!("{head}{accept_ranges}Connection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes());
    let sent = opts.truncate_at.map_or(slice.len(), |n| n.min(slice.len()));
    let _ = stream.write_all(&slice[..sent]);
    let _ = stream.flush();
}

/// Returns the method and the start offset of a `Range: bytes=N-` header.
fn parse_request(request: &str) -> (&str, Option<usize>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = value
                    .trim()
                    .strip_prefix("bytes=")
                    .and_then(|spec| spec.split_once('-'))
                    .and_then(|(start, _)| start.trim().parse::<usize>().ok());
            }
        }
    }
    (method, range)
}
