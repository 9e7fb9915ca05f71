//! End-to-end tests for the client synchronizer
//!
//! Drives a JobSynchronizer over HTTP against a real test server.

mod common;

use common::{
    FakeOutcome, TestServer, TestServerOptions, FAKE_SEGMENT_COUNT, MEDIA_1_ID, MEDIA_2_ID,
    MISSING_MEDIA_ID, REQUEST_TIMEOUT_SECS,
};
use scribe_server::job_store::JobStatus;
use scribe_server::sync::{
    ApiError, HttpJobsApi, JobSynchronizer, SyncError, SyncPhase, SyncSettings, TrackedJob,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn synchronizer(server: &TestServer) -> JobSynchronizer {
    let api = HttpJobsApi::new(
        server.base_url.clone(),
        Duration::from_secs(REQUEST_TIMEOUT_SECS),
    )
    .unwrap();
    JobSynchronizer::new(
        Arc::new(api),
        SyncSettings {
            poll_interval: Duration::from_millis(50),
            ..SyncSettings::default()
        },
    )
}

/// Waits until the published view satisfies `done`, returning every phase seen.
async fn wait_for(
    views: &mut watch::Receiver<Option<TrackedJob>>,
    done: impl Fn(&TrackedJob) -> bool,
) -> (TrackedJob, Vec<SyncPhase>) {
    let mut phases = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(view) = views.borrow_and_update().clone() {
                if phases.last() != Some(&view.phase) {
                    phases.push(view.phase);
                }
                if done(&view) {
                    return view;
                }
            }
            views.changed().await.unwrap();
        }
    })
    .await;
    match result {
        Ok(view) => (view, phases),
        Err(_) => panic!("view did not reach the expected state, phases: {:?}", phases),
    }
}

#[tokio::test]
async fn test_synchronizer_follows_job_to_completion() {
    let server = TestServer::spawn_with(TestServerOptions {
        engine_gate_open: false,
        ..Default::default()
    })
    .await;
    let sync = synchronizer(&server);
    let mut views = sync.subscribe();

    sync.track(MEDIA_1_ID);
    let (idle, _) = wait_for(&mut views, |v| v.info.is_some()).await;
    assert_eq!(idle.phase, SyncPhase::Idle);

    let started = sync.request_start().await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);
    assert!(sync.snapshot().unwrap().phase.is_processing());

    let (confirmed, _) = wait_for(&mut views, |v| v.phase == SyncPhase::ConfirmedProcessing).await;
    assert_eq!(confirmed.info.unwrap().stage.as_deref(), Some("loading engine"));

    server.engine.open_gate();
    let (settled, phases) = wait_for(&mut views, |v| v.phase == SyncPhase::Settled).await;
    let info = settled.info.unwrap();
    assert_eq!(info.status, JobStatus::Completed);
    assert_eq!(info.output_count, FAKE_SEGMENT_COUNT as u64);
    assert!(!phases.contains(&SyncPhase::Idle));
}

#[tokio::test]
async fn test_synchronizer_reports_failure() {
    let server = TestServer::spawn_with(TestServerOptions {
        outcome: FakeOutcome::Fail("unsupported codec".to_string()),
        ..Default::default()
    })
    .await;
    let sync = synchronizer(&server);
    let mut views = sync.subscribe();

    sync.track(MEDIA_1_ID);
    sync.request_start().await.unwrap();

    let (settled, _) = wait_for(&mut views, |v| v.phase == SyncPhase::Settled).await;
    let info = settled.info.unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.error.unwrap().message.contains("unsupported codec"));
}

#[tokio::test]
async fn test_synchronizer_start_of_missing_resource_fails() {
    let server = TestServer::spawn().await;
    let sync = synchronizer(&server);

    sync.track(MISSING_MEDIA_ID);
    let err = sync.request_start().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Api(ApiError::Status { status: 404, .. })
    ));

    let view = sync.snapshot().unwrap();
    assert!(!view.phase.is_processing());
    assert!(view.start_error.is_some());
}

#[tokio::test]
async fn test_synchronizer_switch_shows_only_new_resource() {
    let server = TestServer::spawn_with(TestServerOptions {
        engine_gate_open: false,
        ..Default::default()
    })
    .await;
    let sync = synchronizer(&server);
    let mut views = sync.subscribe();

    sync.track(MEDIA_1_ID);
    sync.request_start().await.unwrap();

    sync.track(MEDIA_2_ID);
    let (view, _) = wait_for(&mut views, |v| v.resource_id == MEDIA_2_ID && v.info.is_some()).await;
    assert_eq!(view.resource_id, MEDIA_2_ID);
    assert_eq!(view.phase, SyncPhase::Idle);
    assert_eq!(view.info.unwrap().id, MEDIA_2_ID);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let view = sync.snapshot().unwrap();
    assert_eq!(view.resource_id, MEDIA_2_ID);
    assert_eq!(view.info.unwrap().status, JobStatus::NotStarted);
}
