//! Accepting, cancelling and retrying jobs.
//!
//! Everything here returns as soon as the job record is written. No call in
//! this module waits on a transcode.

use std::path::Path;

use vf_core::events::EventPayload;
use vf_core::{Error, Job, JobId, OverlayRef, Result, TransformRequest};
use vf_db::pool::get_conn;
use vf_db::queries::{assets, jobs};

use crate::context::AppContext;

/// Validate `request` and queue it as a new `PENDING` job.
///
/// An invalid request fails with the same error every time and creates no
/// job. Temporary uploads referenced by a rejected request are deleted.
pub async fn submit(ctx: &AppContext, request: TransformRequest) -> Result<Job> {
    match check(ctx, &request) {
        Ok(()) => {}
        Err(e) => {
            remove_uploads(&request).await;
            return Err(e);
        }
    }

    let job = match ctx.queue.enqueue(&request) {
        Ok(job) => job,
        Err(e) => {
            remove_uploads(&request).await;
            return Err(e);
        }
    };

    tracing::info!(job_id = %job.id, kind = %request.kind(), asset_id = %request.asset_id(), "job submitted");
    ctx.event_bus.emit(EventPayload::JobQueued {
        job_id: job.id,
        kind: request.kind(),
    });
    Ok(job)
}

fn check(ctx: &AppContext, request: &TransformRequest) -> Result<()> {
    request.validate()?;

    let conn = get_conn(&ctx.db)?;
    let source = assets::get_asset(&conn, request.asset_id())?
        .ok_or_else(|| Error::not_found("asset", request.asset_id()))?;
    request.validate_against(&source)?;

    if let Some(OverlayRef::Asset(overlay_id)) = request.overlay() {
        if assets::get_asset(&conn, *overlay_id)?.is_none() {
            return Err(Error::not_found("asset", overlay_id));
        }
    }
    Ok(())
}

/// Cancel a job that has not been claimed yet.
///
/// The job ends in `FAILURE` with a cancellation message. A job that already
/// started or finished is a `Conflict`.
pub async fn cancel(ctx: &AppContext, id: JobId) -> Result<Job> {
    let job = {
        let conn = get_conn(&ctx.db)?;
        jobs::cancel_job(&conn, id)?
    };

    remove_uploads(&job.request).await;
    tracing::info!(job_id = %id, "job cancelled");
    ctx.event_bus.emit(EventPayload::JobCancelled { job_id: id });
    Ok(job)
}

/// Queue a fresh attempt of a failed job.
pub async fn retry(ctx: &AppContext, failed_id: JobId) -> Result<Job> {
    let job = {
        let conn = get_conn(&ctx.db)?;
        jobs::create_retry(&conn, failed_id)?
    };

    ctx.queue.wake();
    tracing::info!(job_id = %job.id, retry_of = %failed_id, attempt = job.attempt, "job retried");
    ctx.event_bus.emit(EventPayload::JobQueued {
        job_id: job.id,
        kind: job.request.kind(),
    });
    Ok(job)
}

/// Delete every temporary upload a request references. Missing files are fine.
pub(crate) async fn remove_uploads(request: &TransformRequest) {
    for path in request.temporary_uploads() {
        remove_file_quietly(path).await;
    }
}

pub(crate) async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove temporary file: {e}"),
    }
}
