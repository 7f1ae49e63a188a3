//! Queue worker behaviour against a real SQLite store.

mod fixtures;
mod helpers;

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use scan_relay_client::{
    config::QueueConfig,
    models::event::{CaptureContext, EventStatus},
    services::{
        event_store::EventStore,
        upload::DirectUploader,
        worker::{DrainQueue, JobOutcome, QueueWorker, WorkStep},
    },
};

use helpers::{open_store, RecordingUploader, ScriptedScanSender};

fn worker(
    store: Arc<dyn EventStore>,
    scans: Arc<ScriptedScanSender>,
    images: Arc<RecordingUploader>,
) -> QueueWorker {
    QueueWorker::new(
        store,
        scans,
        images,
        QueueConfig {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
            ..QueueConfig::default()
        },
    )
}

fn outcome(step: WorkStep) -> JobOutcome {
    match step {
        WorkStep::Processed { outcome, .. } => outcome,
        WorkStep::Idle => panic!("expected a job to be processed"),
    }
}

#[tokio::test]
async fn test_drain_delivers_in_capture_order() {
    let t = open_store().await;
    let mut ids = Vec::new();
    for barcode in ["A-1", "A-2", "A-3"] {
        ids.push(
            t.store
                .record_scan(&fixtures::scan(barcode), &CaptureContext::default())
                .await
                .unwrap(),
        );
        t.clock.advance(ChronoDuration::seconds(1));
    }

    let scans = ScriptedScanSender::succeeding();
    let worker = worker(t.store.clone(), scans.clone(), RecordingUploader::new());
    let report = worker.drain(&CancellationToken::new()).await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.retry_after, None);
    assert_eq!(scans.attempts(), vec!["A-1", "A-2", "A-3"]);
    assert_eq!(t.store.queue_depth().await.unwrap(), 0);

    for id in ids {
        let event = t.store.get_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Buffered);
        assert!(event.checksum.is_some());
    }
}

#[tokio::test]
async fn test_transient_failures_fail_event_at_retry_cap() {
    let t = open_store().await;
    let id = t
        .store
        .record_scan(&fixtures::scan("B-1"), &CaptureContext::for_order("SO-9"))
        .await
        .unwrap();

    let scans = ScriptedScanSender::failing();
    let worker = worker(t.store.clone(), scans.clone(), RecordingUploader::new());

    assert_eq!(
        outcome(worker.run_once().await.unwrap()),
        JobOutcome::Retry { retries: 1 }
    );
    assert_eq!(
        outcome(worker.run_once().await.unwrap()),
        JobOutcome::Retry { retries: 2 }
    );
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Failed);

    // No fourth attempt: the job is gone.
    assert_eq!(worker.run_once().await.unwrap(), WorkStep::Idle);
    assert_eq!(scans.attempts().len(), 3);

    let event = t.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
}

#[tokio::test]
async fn test_retry_stops_drain_and_keeps_head_of_queue() {
    let t = open_store().await;
    for barcode in ["C-1", "C-2"] {
        t.store
            .record_scan(&fixtures::scan(barcode), &CaptureContext::default())
            .await
            .unwrap();
        t.clock.advance(ChronoDuration::seconds(1));
    }

    let scans = ScriptedScanSender::scripted(&[true]);
    let worker = worker(t.store.clone(), scans.clone(), RecordingUploader::new());

    let report = worker.drain(&CancellationToken::new()).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.retry_after, Some(Duration::from_secs(2)));
    assert_eq!(t.store.queue_depth().await.unwrap(), 2);

    let head = t.store.oldest_job().await.unwrap().unwrap();
    assert_eq!(head.retries, 1);

    let report = worker.drain(&CancellationToken::new()).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(scans.attempts(), vec!["C-1", "C-1", "C-2"]);
}

#[tokio::test]
async fn test_image_upload_confirms_event() {
    let t = open_store().await;
    let path = fixtures::write_png(t._dir.path(), "shelf.png");
    let id = t
        .store
        .record_image_upload(&fixtures::image(&path, "img-1"), &CaptureContext::for_order("SO-2"))
        .await
        .unwrap();

    let images = RecordingUploader::new();
    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), images.clone());
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Delivered);

    let event = t.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Confirmed);
    assert_eq!(event.checksum.as_deref(), Some("img:img-1"));

    let uploads = images.uploads.lock();
    assert_eq!(uploads[0].image_id, "img-1");
    assert_eq!(uploads[0].order_id.as_deref(), Some("SO-2"));
    assert_eq!(uploads[0].file_name, "shelf.png");
}

#[tokio::test]
async fn test_missing_image_fails_without_spending_retries() {
    let t = open_store().await;
    let missing = t._dir.path().join("gone.jpg").display().to_string();
    let id = t
        .store
        .record_image_upload(&fixtures::image(&missing, "img-2"), &CaptureContext::default())
        .await
        .unwrap();

    let images = RecordingUploader::new();
    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), images.clone());
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Failed);

    assert_eq!(images.count(), 0);
    assert_eq!(t.store.queue_depth().await.unwrap(), 0);
    let event = t.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
}

#[tokio::test]
async fn test_undecodable_image_fails_permanently() {
    let t = open_store().await;
    let path = fixtures::write_garbage(t._dir.path(), "broken.jpg");
    let id = t
        .store
        .record_image_upload(&fixtures::image(&path, "img-3"), &CaptureContext::default())
        .await
        .unwrap();

    let images = RecordingUploader::new();
    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), images.clone());
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Failed);

    assert_eq!(images.count(), 0);
    let event = t.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
}

#[tokio::test]
async fn test_direct_upload_makes_queued_job_a_no_op() {
    let t = open_store().await;
    let path = fixtures::write_png(t._dir.path(), "direct.png");
    let id = t
        .store
        .record_image_upload(&fixtures::image(&path, "img-4"), &CaptureContext::default())
        .await
        .unwrap();

    let images = RecordingUploader::new();
    let direct = DirectUploader::new(t.store.clone(), images.clone());
    let record = direct.upload_now(id).await.unwrap();
    assert_eq!(record.status, EventStatus::Confirmed);

    // A second direct call short-circuits too.
    direct.upload_now(id).await.unwrap();

    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), images.clone());
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Skipped);

    assert_eq!(images.count(), 1);
    assert_eq!(t.store.queue_depth().await.unwrap(), 0);
    let event = t.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Confirmed);
}

#[tokio::test]
async fn test_unknown_job_type_is_dropped() {
    let t = open_store().await;
    sqlx::query(
        "INSERT INTO queue_jobs (job_type, payload, retries, created_at) VALUES ('label_print', '{}', 0, 0)",
    )
    .execute(t.store.pool())
    .await
    .unwrap();

    let scans = ScriptedScanSender::succeeding();
    let worker = worker(t.store.clone(), scans.clone(), RecordingUploader::new());
    assert_eq!(outcome(worker.run_once().await.unwrap()), JobOutcome::Skipped);
    assert_eq!(t.store.queue_depth().await.unwrap(), 0);
    assert!(scans.attempts().is_empty());
}

#[tokio::test]
async fn test_cancelled_drain_processes_nothing() {
    let t = open_store().await;
    t.store
        .record_scan(&fixtures::scan("D-1"), &CaptureContext::default())
        .await
        .unwrap();

    let scans = ScriptedScanSender::succeeding();
    let worker = worker(t.store.clone(), scans.clone(), RecordingUploader::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = worker.drain(&cancel).await;
    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert_eq!(t.store.queue_depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_job_limit_per_run() {
    let t = open_store().await;
    for barcode in ["E-1", "E-2", "E-3"] {
        t.store
            .record_scan(&fixtures::scan(barcode), &CaptureContext::default())
            .await
            .unwrap();
        t.clock.advance(ChronoDuration::seconds(1));
    }

    let worker = QueueWorker::new(
        t.store.clone(),
        ScriptedScanSender::succeeding(),
        RecordingUploader::new(),
        QueueConfig {
            max_jobs_per_run: Some(1),
            ..QueueConfig::default()
        },
    );
    let report = worker.drain(&CancellationToken::new()).await;
    assert_eq!(report.processed, 1);
    assert_eq!(t.store.queue_depth().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_captures_each_get_one_job() {
    let t = open_store().await;
    let captures = (0..12).map(|n| {
        let store = t.store.clone();
        async move {
            store
                .record_scan(&fixtures::scan(&format!("F-{n}")), &CaptureContext::default())
                .await
        }
    });

    let mut ids = Vec::new();
    for result in futures::future::join_all(captures).await {
        ids.push(tokio_test::assert_ok!(result));
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);
    assert_eq!(t.store.queue_depth().await.unwrap(), 12);

    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), RecordingUploader::new());
    let report = worker.drain(&CancellationToken::new()).await;
    assert_eq!(report.delivered, 12);
}

#[tokio::test]
async fn test_store_error_retries_run_without_charging_job() {
    let t = open_store().await;
    let path = fixtures::write_png(t._dir.path(), "late.png");
    t.store
        .record_image_upload(&fixtures::image(&path, "img-5"), &CaptureContext::default())
        .await
        .unwrap();

    // Jobs stay readable while event lookups start failing.
    sqlx::query("ALTER TABLE events RENAME TO events_moved")
        .execute(t.store.pool())
        .await
        .unwrap();

    let images = RecordingUploader::new();
    let worker = worker(t.store.clone(), ScriptedScanSender::succeeding(), images.clone());
    assert!(worker.run_once().await.is_err());

    let report = worker.drain(&CancellationToken::new()).await;
    assert_eq!(report.processed, 0);
    assert_eq!(report.retry_after, Some(Duration::from_secs(2)));

    let job = t.store.oldest_job().await.unwrap().unwrap();
    assert_eq!(job.retries, 0);
    assert_eq!(images.count(), 0);
}
