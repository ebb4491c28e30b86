//! Job lifecycle integration tests.
//!
//! Drives jobs through submit, claim, cancel, retry and the liveness
//! monitor, checking state through the status tracker.

mod common;

use assert_matches::assert_matches;
use common::TestHarness;
use vf_core::config::Config;
use vf_core::{Error, JobState, Transition, TransformRequest, CANCELLED_MESSAGE};
use vf_db::queries::{assets, jobs};
use vf_server::liveness::LivenessMonitor;
use vf_server::worker::{process_job, JobOutcome};
use vf_server::{status, submit};

fn trim(asset_id: vf_core::AssetId) -> TransformRequest {
    TransformRequest::Trim {
        asset_id,
        start_secs: 1.0,
        end_secs: 3.0,
    }
}

// ---------------------------------------------------------------------------
// Submit -> status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_job_is_immediately_pending() {
    let harness = TestHarness::new();
    let source = harness.seed_asset("movie.mp4", 60.0);

    let job = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    let observed = status::get_status(&harness.ctx, job.id).unwrap();

    assert_eq!(observed.state, JobState::Pending);
    assert_eq!(observed.attempt, 1);
    assert!(observed.claimed_by.is_none());
    assert!(observed.started_at.is_none());
    assert_eq!(observed.request, trim(source.id));
}

#[tokio::test]
async fn trim_past_known_duration_is_rejected() {
    let harness = TestHarness::new();
    let source = harness.seed_asset("short.mp4", 10.0);

    let err = submit::submit(
        &harness.ctx,
        TransformRequest::Trim {
            asset_id: source.id,
            start_secs: 5.0,
            end_secs: 15.0,
        },
    )
    .await
    .unwrap_err();
    assert_matches!(err, Error::Validation(_));
    assert!(status::list(&harness.ctx, None, 0, 10).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Guarded transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_jobs_accept_no_further_transitions() {
    let harness = TestHarness::new();
    let source = harness.seed_asset("movie.mp4", 60.0);
    let job = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    harness.run_next().await.unwrap();

    let conn = harness.conn();
    let done = jobs::get_job(&conn, job.id).unwrap().unwrap();
    assert_eq!(done.state, JobState::Success);

    for transition in [
        Transition::Start {
            worker: "late".into(),
        },
        Transition::Fail {
            detail: vf_core::ErrorDetail::new("late failure"),
        },
        Transition::Cancel,
    ] {
        assert!(!jobs::apply_transition(&conn, job.id, &transition).unwrap());
    }
    assert_eq!(jobs::get_job(&conn, job.id).unwrap().unwrap(), done);
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_pending_then_conflict_once_started() {
    let harness = TestHarness::new();
    let source = harness.seed_asset("movie.mp4", 60.0);

    let pending = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    let cancelled = submit::cancel(&harness.ctx, pending.id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Failure);
    assert_eq!(cancelled.error.unwrap().message, CANCELLED_MESSAGE);

    let running = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    assert!(harness.ctx.queue.claim(running.id, "w1").unwrap());
    assert_matches!(
        submit::cancel(&harness.ctx, running.id).await,
        Err(Error::Conflict(_))
    );
    assert_eq!(
        status::get_status(&harness.ctx, running.id).unwrap().state,
        JobState::Started
    );

    assert_matches!(
        submit::cancel(&harness.ctx, vf_core::JobId::new()).await,
        Err(Error::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_retry_runs_as_new_job() {
    let harness = TestHarness::with_script("exit 1");
    let source = harness.seed_asset("movie.mp4", 60.0);
    let first = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    harness.run_next().await.unwrap();

    let second = submit::retry(&harness.ctx, first.id).await.unwrap();
    assert_eq!(second.retry_of, Some(first.id));
    assert_eq!(second.attempt, 2);
    assert_eq!(second.request, first.request);

    assert_matches!(
        submit::retry(&harness.ctx, first.id).await,
        Err(Error::Conflict(_))
    );

    // The original failure record is left as it was.
    let original = status::get_status(&harness.ctx, first.id).unwrap();
    assert_eq!(original.state, JobState::Failure);
    assert!(original.error.is_some());
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphaned_started_job_is_failed_not_requeued() {
    let mut config = Config::default();
    config.workers.stale_after_secs = 1;
    let harness = TestHarness::with_script_and_config(common::WRITES_OUTPUT, config);
    let source = harness.seed_asset("movie.mp4", 60.0);

    let job = submit::submit(&harness.ctx, trim(source.id)).await.unwrap();
    assert!(harness.ctx.queue.claim(job.id, "crashed-worker").unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let monitor = LivenessMonitor::new(harness.ctx.clone()).unwrap();
    assert_eq!(monitor.sweep().await.unwrap(), vec![job.id]);

    let failed = status::get_status(&harness.ctx, job.id).unwrap();
    assert_eq!(failed.state, JobState::Failure);
    assert!(failed.error.unwrap().message.starts_with("worker lost"));
    assert!(harness.run_next().await.is_none(), "stale job must not be re-queued");
}

#[tokio::test]
async fn late_finish_after_liveness_failure_leaves_no_asset() {
    let mut config = Config::default();
    config.workers.stale_after_secs = 1;
    let harness = TestHarness::with_script_and_config(
        r#"sleep 2; printf video > "$last""#,
        config,
    );
    let source = harness.seed_asset("movie.mp4", 60.0);
    submit::submit(&harness.ctx, trim(source.id)).await.unwrap();

    let job = jobs::claim_next(&harness.conn(), "slow-worker")
        .unwrap()
        .unwrap();
    let running = {
        let ctx = harness.ctx.clone();
        let job = job.clone();
        tokio::spawn(async move { process_job(&ctx, "slow-worker", job).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
    let monitor = LivenessMonitor::new(harness.ctx.clone()).unwrap();
    assert_eq!(monitor.sweep().await.unwrap(), vec![job.id]);

    assert_eq!(running.await.unwrap(), JobOutcome::Abandoned);

    let failed = status::get_status(&harness.ctx, job.id).unwrap();
    assert_eq!(failed.state, JobState::Failure);
    assert!(failed.result_asset_id.is_none());

    let conn = harness.conn();
    assert_eq!(assets::list_assets(&conn, 0, 10).unwrap(), vec![source]);
    drop(conn);
    assert!(harness.output_files().is_empty(), "late output left behind");
}

#[tokio::test]
async fn invalid_request_fails_identically_and_creates_no_job() {
    let harness = TestHarness::new();
    let source = harness.seed_asset("movie.mp4", 60.0);
    let blank = TransformRequest::TextOverlay {
        asset_id: source.id,
        text: "  ".into(),
        x: 10,
        y: 10,
        font_size: 24,
        font_color: "white".into(),
    };

    let first = submit::submit(&harness.ctx, blank.clone()).await.unwrap_err();
    let second = submit::submit(&harness.ctx, blank).await.unwrap_err();

    assert_matches!(first, Error::Validation(_));
    assert_eq!(first.to_string(), second.to_string());
    assert!(status::list(&harness.ctx, None, 0, 10).unwrap().is_empty());
    assert!(harness.ctx.event_bus.recent_events(10).is_empty());
}
