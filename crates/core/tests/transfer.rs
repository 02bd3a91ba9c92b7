//! End-to-end transfer tests against an in-memory transport

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use common::{MemoryTransport, payload};
use mpx_core::controller::{DOWNLOAD_CHECKPOINT_SUFFIX, DOWNLOAD_TEMP_SUFFIX, UPLOAD_CHECKPOINT_SUFFIX};
use mpx_core::{
    CheckpointStore, DownloadRequest, Error, ErrorKind, ProgressPolicy, ProgressSnapshot, TransferController,
    TransferEvent, UploadRequest, UploadSource,
};

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_source(dir: &TempDir, data: &[u8]) -> PathBuf {
    let path = dir.path().join("source.bin");
    std::fs::write(&path, data).unwrap();
    path
}

fn upload_request(path: &Path) -> UploadRequest {
    UploadRequest::new(UploadSource::file(path), "bucket", "object.bin")
        .part_size(1000)
        .task_count(3)
}

#[tokio::test]
async fn test_upload_assembles_object() {
    let dir = TempDir::new().unwrap();
    let data = payload(9_500);
    let path = write_source(&dir, &data);
    let transport = Arc::new(MemoryTransport::new());

    let outcome = TransferController::new(transport.clone())
        .upload(upload_request(&path))
        .await
        .unwrap();

    assert_eq!(outcome.parts, 10);
    assert_eq!(transport.object("bucket", "object.bin").unwrap(), data);
    assert_eq!(transport.put_calls(), (1..=10).collect::<Vec<_>>());
    assert!(!with_suffix(&path, UPLOAD_CHECKPOINT_SUFFIX).exists());
}

#[tokio::test]
async fn test_empty_upload_writes_one_part() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, b"");
    let transport = Arc::new(MemoryTransport::new());

    let outcome = TransferController::new(transport.clone())
        .upload(upload_request(&path))
        .await
        .unwrap();

    assert_eq!(outcome.parts, 1);
    assert_eq!(outcome.size, 0);
    assert_eq!(transport.put_calls(), vec![1]);
    assert_eq!(transport.object("bucket", "object.bin").unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_resume_dispatches_only_pending_parts() {
    let dir = TempDir::new().unwrap();
    let data = payload(10_000);
    let path = write_source(&dir, &data);
    let transport = Arc::new(MemoryTransport::new());
    for part in 6..=10 {
        transport.fail_put_once(part, Error::server("connection reset"));
    }

    let controller = TransferController::new(transport.clone());
    let err = controller.upload(upload_request(&path)).await.unwrap_err();
    assert!(err.is_resumable());

    let checkpoint = CheckpointStore::new(with_suffix(&path, UPLOAD_CHECKPOINT_SUFFIX))
        .load()
        .await
        .unwrap();
    let done: Vec<u32> = checkpoint
        .parts
        .iter()
        .filter(|p| p.completed)
        .map(|p| p.part_number)
        .collect();
    assert_eq!(done, vec![1, 2, 3, 4, 5]);
    assert!(transport.aborted().is_empty());

    transport.reset_calls();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let outcome = controller
        .upload(
            upload_request(&path)
                .events(move |e: &TransferEvent| sink.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();

    assert!(outcome.resumed);
    assert_eq!(transport.put_calls(), vec![6, 7, 8, 9, 10]);
    assert_eq!(transport.object("bucket", "object.bin").unwrap(), data);
    assert!(events.lock().unwrap().contains(&TransferEvent::CheckpointResumed {
        completed: 5,
        pending: 5
    }));
}

#[tokio::test]
async fn test_crash_resume_matches_single_run() {
    let dir = TempDir::new().unwrap();
    let data = payload(7_300);
    let path = write_source(&dir, &data);

    let reference = Arc::new(MemoryTransport::new());
    let expected = TransferController::new(reference.clone())
        .upload(upload_request(&path))
        .await
        .unwrap();

    let transport = Arc::new(MemoryTransport::new());
    transport.fail_put_once(4, Error::from_status(Some(503), None, "slow down"));
    let controller = TransferController::new(transport.clone());
    controller.upload(upload_request(&path)).await.unwrap_err();
    let resumed = controller.upload(upload_request(&path)).await.unwrap();

    assert_eq!(resumed.etag, expected.etag);
    assert_eq!(
        transport.object("bucket", "object.bin"),
        reference.object("bucket", "object.bin")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_task_count() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, &payload(12_000));
    let transport = Arc::new(MemoryTransport::with_latency(Duration::from_millis(20)));

    TransferController::new(transport.clone())
        .upload(upload_request(&path).task_count(3))
        .await
        .unwrap();

    assert_eq!(transport.put_calls().len(), 12);
    assert!(transport.peak() <= 3);
    assert_eq!(transport.peak(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_error_halts_dispatch_and_aborts() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, &payload(20_000));
    let transport = Arc::new(MemoryTransport::with_latency(Duration::from_millis(10)));
    transport.fail_put_once(2, Error::from_status(Some(403), Some("AccessDenied".into()), "denied"));

    let err = TransferController::new(transport.clone())
        .upload(upload_request(&path).task_count(2))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Client { status: Some(403), .. }));
    // Everything dispatched before the failure drained; nothing new started
    assert_eq!(transport.in_flight(), 0);
    assert!(transport.put_calls().len() < 20);
    assert_eq!(transport.aborted(), vec!["session-0".to_string()]);
    assert_eq!(transport.open_sessions(), 0);
    assert!(!with_suffix(&path, UPLOAD_CHECKPOINT_SUFFIX).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_is_monotonic_and_bounded() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, &payload(25_000));
    let transport = Arc::new(MemoryTransport::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    TransferController::new(transport)
        .upload(
            upload_request(&path)
                .task_count(4)
                .progress_policy(ProgressPolicy::ByBytes(1))
                .progress(move |s: ProgressSnapshot| sink.lock().unwrap().push(s)),
        )
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].transferred <= w[1].transferred));
    assert!(seen.iter().all(|s| s.transferred <= s.total));
    assert_eq!(seen.last().unwrap().transferred, 25_000);
}

#[tokio::test]
async fn test_stream_upload_from_current_position() {
    let dir = TempDir::new().unwrap();
    let data = payload(3_200);
    let mut cursor = std::io::Cursor::new(data.clone());
    cursor.set_position(200);
    let transport = Arc::new(MemoryTransport::new());

    TransferController::new(transport.clone())
        .upload(
            UploadRequest::new(UploadSource::stream(cursor), "bucket", "object.bin")
                .part_size(1000)
                .checkpoint_path(dir.path().join("stream.ckpt")),
        )
        .await
        .unwrap();

    assert_eq!(transport.object("bucket", "object.bin").unwrap(), &data[200..]);
    assert_eq!(transport.put_calls(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_download_writes_destination() {
    let dir = TempDir::new().unwrap();
    let data = payload(2_500);
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "object.bin", data.clone());
    let dest = dir.path().join("out/object.bin");

    let meta = TransferController::new(transport.clone())
        .download(DownloadRequest::new("bucket", "object.bin", dest.clone()).part_size(1000))
        .await
        .unwrap();

    assert_eq!(meta.size, 2_500);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(transport.range_calls(), vec![0, 1000, 2000]);
    assert!(!with_suffix(&dest, DOWNLOAD_TEMP_SUFFIX).exists());
    assert!(!with_suffix(&dest, DOWNLOAD_CHECKPOINT_SUFFIX).exists());
}

#[tokio::test]
async fn test_download_empty_object() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "empty", Vec::new());
    let dest = dir.path().join("empty");

    TransferController::new(transport.clone())
        .download(DownloadRequest::new("bucket", "empty", &dest))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), Vec::<u8>::new());
    assert!(transport.range_calls().is_empty());
}

#[tokio::test]
async fn test_download_length_mismatch_is_integrity_error() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "object.bin", payload(3_000));
    transport.truncate_range(1000);
    let dest = dir.path().join("object.bin");

    let err = TransferController::new(transport)
        .download(DownloadRequest::new("bucket", "object.bin", dest.clone()).part_size(1000))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Integrity(_)));
    assert!(!dest.exists());
    assert!(!with_suffix(&dest, DOWNLOAD_TEMP_SUFFIX).exists());
    assert!(!with_suffix(&dest, DOWNLOAD_CHECKPOINT_SUFFIX).exists());
}

#[tokio::test]
async fn test_download_resumes_after_server_error() {
    let dir = TempDir::new().unwrap();
    let data = payload(5_000);
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "object.bin", data.clone());
    transport.fail_range_once(3000, Error::server("timeout"));
    let dest = dir.path().join("object.bin");
    let request = || DownloadRequest::new("bucket", "object.bin", dest.clone()).part_size(1000);

    let controller = TransferController::new(transport.clone());
    let err = controller.download(request()).await.unwrap_err();
    assert!(err.is_resumable());
    assert!(with_suffix(&dest, DOWNLOAD_TEMP_SUFFIX).exists());
    assert!(with_suffix(&dest, DOWNLOAD_CHECKPOINT_SUFFIX).exists());

    transport.reset_calls();
    controller.download(request()).await.unwrap();
    assert_eq!(transport.range_calls(), vec![3000]);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_changed_remote_object_restarts_download() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "object.bin", payload(3_000));
    transport.fail_range_once(0, Error::server("timeout"));
    let dest = dir.path().join("object.bin");
    let request = || DownloadRequest::new("bucket", "object.bin", dest.clone()).part_size(1000);

    let controller = TransferController::new(transport.clone());
    controller.download(request()).await.unwrap_err();

    let replaced: Vec<u8> = payload(3_000).into_iter().rev().collect();
    transport.insert_object("bucket", "object.bin", replaced.clone());
    transport.reset_calls();

    controller.download(request()).await.unwrap();
    assert_eq!(transport.range_calls(), vec![0, 1000, 2000]);
    assert_eq!(std::fs::read(&dest).unwrap(), replaced);
}

#[tokio::test]
async fn test_missing_object_is_client_error() {
    let dir = TempDir::new().unwrap();
    let err = TransferController::new(Arc::new(MemoryTransport::new()))
        .download(DownloadRequest::new("bucket", "nope", dir.path().join("nope")))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(!dir.path().join("nope").exists());
}

#[tokio::test]
async fn test_corrupt_checkpoint_falls_back_to_fresh_upload() {
    let dir = TempDir::new().unwrap();
    let data = payload(3_000);
    let path = write_source(&dir, &data);
    let checkpoint_path = with_suffix(&path, UPLOAD_CHECKPOINT_SUFFIX);
    std::fs::write(&checkpoint_path, b"{\"formatVersion\": 1, \"parts\": [").unwrap();
    let transport = Arc::new(MemoryTransport::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let outcome = TransferController::new(transport.clone())
        .upload(
            upload_request(&path)
                .events(move |e: &TransferEvent| sink.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();

    assert!(!outcome.resumed);
    assert_eq!(transport.put_calls(), vec![1, 2, 3]);
    assert_eq!(transport.object("bucket", "object.bin").unwrap(), data);
    assert!(transport.aborted().is_empty());
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TransferEvent::CheckpointDiscarded { .. }))
    );
    assert!(!checkpoint_path.exists());
}

#[tokio::test]
async fn test_checkpoint_write_failure_does_not_fail_parts() {
    let dir = TempDir::new().unwrap();
    let data = payload(3_000);
    let path = write_source(&dir, &data);
    let state_dir = dir.path().join("state");
    let transport = Arc::new(MemoryTransport::new());
    let completed = Arc::new(Mutex::new(Vec::new()));
    let sink = completed.clone();
    let blocked = state_dir.clone();

    // After the first part lands, the checkpoint directory turns into a file
    let outcome = TransferController::new(transport.clone())
        .upload(
            upload_request(&path)
                .task_count(1)
                .checkpoint_path(state_dir.join("upload.json"))
                .events(move |e: &TransferEvent| {
                    if let TransferEvent::PartCompleted { part_number, .. } = e {
                        sink.lock().unwrap().push(*part_number);
                        if *part_number == 1 {
                            std::fs::remove_dir_all(&blocked).unwrap();
                            std::fs::write(&blocked, b"blocker").unwrap();
                        }
                    }
                }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.parts, 3);
    assert_eq!(*completed.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(transport.object("bucket", "object.bin").unwrap(), data);
    assert!(state_dir.is_file());
}

#[tokio::test]
async fn test_failed_placement_is_not_resumable() {
    let dir = TempDir::new().unwrap();
    let data = payload(2_000);
    let transport = Arc::new(MemoryTransport::new());
    transport.insert_object("bucket", "object.bin", data.clone());
    let dest = dir.path().join("taken");
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(dest.join("existing.txt"), b"keep me").unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let err = TransferController::new(transport)
        .download(
            DownloadRequest::new("bucket", "object.bin", dest.clone())
                .part_size(1000)
                .events(move |e: &TransferEvent| sink.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap_err();

    let temp = with_suffix(&dest, DOWNLOAD_TEMP_SUFFIX);
    assert!(matches!(err, Error::Placement { .. }));
    assert_eq!(err.kind(), ErrorKind::LocalIo);
    assert!(!err.is_resumable());
    assert!(err.to_string().contains(&temp.display().to_string()));
    assert!(!with_suffix(&dest, DOWNLOAD_CHECKPOINT_SUFFIX).exists());
    assert_eq!(std::fs::read(&temp).unwrap(), data);
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TransferEvent::FinalizeFailed { kind: ErrorKind::LocalIo, .. }))
    );
}
