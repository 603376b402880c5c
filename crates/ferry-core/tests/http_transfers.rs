//! Integration tests: real libcurl transfers against a local HTTP server,
//! driven through the task service.

mod common;

use common::range_server::{self, RangeServerOptions};
use ferry_core::config::FerryConfig;
use ferry_core::store::TaskStore;
use ferry_core::{HttpTask, ServiceHandle, ServiceOptions, TaskId, TaskService, TaskStatus};
use std::path::Path;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

fn config(download_dir: &Path) -> FerryConfig {
    FerryConfig {
        default_download_directory: download_dir.to_path_buf(),
        torrent_download_directory: download_dir.to_path_buf(),
        stall_timeout_secs: 10,
        ..FerryConfig::default()
    }
}

fn start_service(download_dir: &Path, data_dir: Option<&Path>) -> ServiceHandle {
    let mut options = ServiceOptions::new(config(download_dir));
    if let Some(data_dir) = data_dir {
        options = options.with_data_dir(data_dir);
    }
    TaskService::spawn(options).0
}

/// Poll until the task leaves `pending`/`downloading`.
async fn settle(handle: &ServiceHandle, id: &TaskId) -> HttpTask {
    for _ in 0..500 {
        let task = handle
            .downloads()
            .await
            .unwrap()
            .into_iter()
            .find(|t| &t.header.id == id)
            .expect("task listed");
        if !matches!(
            task.header.status,
            TaskStatus::Pending | TaskStatus::Downloading
        ) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("download {id} did not settle");
}

/// Write a `paused` record with `have` bytes already in its temp file.
fn preseed(data_dir: &TempDir, download_dir: &Path, url: &str, content: &[u8], have: usize) -> TaskId {
    let mut task = HttpTask::new(url, "blob.bin", download_dir.to_path_buf());
    task.header.status = TaskStatus::Paused;
    task.header.downloaded_bytes = have as u64;
    task.header.total_bytes = content.len() as u64;
    task.resumable = true;
    std::fs::write(task.temp_path(), &content[..have]).unwrap();

    let id = task.header.id.clone();
    let mut store = TaskStore::<HttpTask>::in_memory();
    store.push(task);
    store
        .save_to_path(&data_dir.path().join("downloads.json"))
        .unwrap();
    id
}

#[tokio::test]
async fn full_download_completes_and_file_matches() {
    let content = body(64 * 1024);
    let url = range_server::start("debian.iso", content.clone());
    let downloads = tempdir().unwrap();
    let handle = start_service(downloads.path(), None);

    let task = handle.enqueue(&url).await.unwrap();
    assert_eq!(task.filename, "debian.iso");
    let task = settle(&handle, &task.header.id).await;

    assert_eq!(task.header.status, TaskStatus::Completed, "{:?}", task.header.error);
    assert_eq!(task.header.total_bytes, content.len() as u64);
    assert_eq!(task.header.downloaded_bytes, content.len() as u64);
    assert!(task.resumable);
    assert_eq!(std::fs::read(task.target_path()).unwrap(), content);
    assert!(!task.temp_path().exists());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn paused_download_resumes_with_range() {
    let content = body(48 * 1024);
    let url = range_server::start("blob.bin", content.clone());
    let downloads = tempdir().unwrap();
    let data = tempdir().unwrap();
    let id = preseed(&data, downloads.path(), &url, &content, 10_000);

    let handle = start_service(downloads.path(), Some(data.path()));
    assert!(handle.resume_download(&id).await.unwrap());
    let task = settle(&handle, &id).await;

    assert_eq!(task.header.status, TaskStatus::Completed, "{:?}", task.header.error);
    assert_eq!(task.header.downloaded_bytes, content.len() as u64);
    assert_eq!(std::fs::read(task.target_path()).unwrap(), content);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn server_ignoring_range_restarts_from_zero() {
    let content = body(32 * 1024);
    let url = range_server::start_with_options(
        "blob.bin",
        content.clone(),
        RangeServerOptions {
            support_ranges: false,
            ..RangeServerOptions::default()
        },
    );
    let downloads = tempdir().unwrap();
    let data = tempdir().unwrap();
    let id = preseed(&data, downloads.path(), &url, &content, 5_000);

    let handle = start_service(downloads.path(), Some(data.path()));
    assert!(handle.resume_download(&id).await.unwrap());
    let task = settle(&handle, &id).await;

    assert_eq!(task.header.status, TaskStatus::Completed, "{:?}", task.header.error);
    assert!(!task.resumable);
    assert_eq!(task.header.downloaded_bytes, content.len() as u64);
    assert_eq!(std::fs::read(task.target_path()).unwrap(), content);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn http_error_status_fails_the_task() {
    let url = range_server::start_with_options(
        "missing.bin",
        Vec::new(),
        RangeServerOptions {
            status: Some(404),
            ..RangeServerOptions::default()
        },
    );
    let downloads = tempdir().unwrap();
    let handle = start_service(downloads.path(), None);

    let task = handle.enqueue(&url).await.unwrap();
    let task = settle(&handle, &task.header.id).await;
    assert_eq!(task.header.status, TaskStatus::Error);
    assert_eq!(task.header.error.as_deref(), Some("HTTP error: 404"));
    assert!(!task.target_path().exists());

    // Resuming requeues the same record.
    assert!(handle.resume_download(&task.header.id).await.unwrap());
    let again = settle(&handle, &task.header.id).await;
    assert_eq!(again.header.status, TaskStatus::Error);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn short_body_is_reported_incomplete() {
    let content = body(20_000);
    let url = range_server::start_with_options(
        "short.bin",
        content,
        RangeServerOptions {
            truncate_at: Some(7_000),
            ..RangeServerOptions::default()
        },
    );
    let downloads = tempdir().unwrap();
    let handle = start_service(downloads.path(), None);

    let task = handle.enqueue(&url).await.unwrap();
    let task = settle(&handle, &task.header.id).await;
    assert_eq!(task.header.status, TaskStatus::Error);
    assert_eq!(
        task.header.error.as_deref(),
        Some("incomplete download: got 7000 of 20000 bytes")
    );
    assert!(!task.target_path().exists());
    assert_eq!(task.header.downloaded_bytes, 7_000);
    handle.shutdown().await.unwrap();
}
