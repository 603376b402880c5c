//! Control protocol: request lines, replies, and a live socket round trip.

use crate::cli::control_socket::{dispatch, send_request, spawn_control_listener, Reply, Request};
use ferry_core::config::FerryConfig;
use ferry_core::{ServiceHandle, ServiceOptions, Task, TaskId, TaskKind, TaskService, TaskStatus};
use serde_json::json;
use std::path::{Path, PathBuf};

const MAGNET: &str = "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056";

fn start(dir: &Path) -> ServiceHandle {
    let config = FerryConfig {
        default_download_directory: dir.to_path_buf(),
        torrent_download_directory: dir.to_path_buf(),
        ..FerryConfig::default()
    };
    TaskService::spawn(ServiceOptions::new(config)).0
}

#[test]
fn request_lines_parse() {
    assert_eq!(
        Request::parse("enqueue https://example.com/a.iso"),
        Ok(Request::Enqueue("https://example.com/a.iso".into()))
    );
    assert_eq!(
        Request::parse("  pause   t-1 \n"),
        Ok(Request::Pause(TaskId::from("t-1")))
    );
    assert_eq!(
        Request::parse("file /srv/with space.torrent"),
        Ok(Request::File(PathBuf::from("/srv/with space.torrent")))
    );
    assert_eq!(Request::parse("list"), Ok(Request::List));
    assert_eq!(Request::parse("max 3"), Ok(Request::Max(3)));
    assert_eq!(Request::parse("seeding off"), Ok(Request::Seeding(false)));
}

#[test]
fn bad_request_lines_are_rejected() {
    assert!(Request::parse("").is_err());
    assert!(Request::parse("pause").is_err());
    assert!(Request::parse("max lots").is_err());
    assert!(Request::parse("seeding yes").is_err());
    assert_eq!(
        Request::parse("explode now"),
        Err("unknown command: explode".to_string())
    );
}

#[test]
fn request_line_matches_parser() {
    for request in [
        Request::Magnet(MAGNET.into()),
        Request::Cancel(TaskId::from("abc")),
        Request::Seeding(true),
        Request::List,
    ] {
        assert_eq!(Request::parse(&request.to_line()), Ok(request));
    }
}

#[test]
fn reply_json_shape() {
    let ok = serde_json::to_value(Reply::ok(true)).unwrap();
    assert_eq!(ok, json!({ "ok": true, "data": true }));
    let err = serde_json::to_value(Reply::error("boom")).unwrap();
    assert_eq!(err, json!({ "ok": false, "error": "boom" }));
    assert_eq!(Reply::error("boom").into_data().unwrap_err().to_string(), "boom");
}

#[tokio::test]
async fn dispatch_routes_requests() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start(dir.path());

    let max = dispatch(&handle, Request::Max(4)).await;
    assert_eq!(max.into_data().unwrap(), json!(4));

    let seeding = dispatch(&handle, Request::Seeding(true)).await;
    assert_eq!(seeding.into_data().unwrap(), json!(true));

    // Without a swarm backend the torrent is recorded but fails to start.
    let added = dispatch(&handle, Request::Magnet(MAGNET.into())).await;
    let task: Task = serde_json::from_value(added.into_data().unwrap()).unwrap();
    assert_eq!(task.kind(), TaskKind::Torrent);
    assert_eq!(task.status(), TaskStatus::Error);
    assert_eq!(
        task.header().error.as_deref(),
        Some("no swarm backend configured")
    );

    let bad = dispatch(&handle, Request::Enqueue("gopher://example.com/x".into())).await;
    assert!(!bad.ok);
    assert_eq!(bad.error.as_deref(), Some("unsupported URL scheme: gopher"));

    let missing = dispatch(&handle, Request::Pause(TaskId::from("nope"))).await;
    assert_eq!(missing.into_data().unwrap(), json!(false));

    let list = dispatch(&handle, Request::List).await;
    let tasks: Vec<Task> = serde_json::from_value(list.into_data().unwrap()).unwrap();
    assert_eq!(tasks.len(), 1);

    let cancelled = dispatch(&handle, Request::Cancel(task.id().clone())).await;
    assert_eq!(cancelled.into_data().unwrap(), json!(true));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn socket_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start(dir.path());
    let socket = dir.path().join("control.sock");
    let listener = spawn_control_listener(handle.clone(), &socket).unwrap();

    let reply = send_request(&socket, &Request::List).await.unwrap();
    assert_eq!(reply.into_data().unwrap(), json!([]));

    let reply = send_request(&socket, &Request::Max(2)).await.unwrap();
    assert_eq!(reply.into_data().unwrap(), json!(2));

    listener.abort();
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_daemon_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = send_request(&dir.path().join("absent.sock"), &Request::List)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("ferry daemon is not running"));
}
