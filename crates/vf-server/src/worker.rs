//! Worker pool.
//!
//! Each worker is a tokio task that claims one job at a time from the
//! [`JobQueue`](crate::queue::JobQueue), runs it to a terminal state and
//! loops. A failing transcode never takes a worker down.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vf_av::{build_invocation, output_locator, ResolvedInputs};
use vf_core::events::EventPayload;
use vf_core::{
    Error, ErrorDetail, Job, MediaAsset, NewAsset, OverlayRef, Result, TransformRequest, Transition,
};
use vf_db::pool::get_conn;
use vf_db::queries::{assets, jobs};

use crate::context::AppContext;
use crate::submit::{remove_file_quietly, remove_uploads};

/// How a job attempt ended, as seen by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(MediaAsset),
    Failed(ErrorDetail),
    /// A storage error interrupted the attempt. The job stays `STARTED`
    /// until the liveness monitor fails it.
    Abandoned,
}

/// Handles to a fixed set of worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `concurrency` workers. They stop when `cancel` fires, after
    /// finishing the job they are running.
    pub fn spawn(ctx: AppContext, concurrency: usize, cancel: CancellationToken) -> Self {
        let pid = std::process::id();
        let handles = (0..concurrency.max(1))
            .map(|i| {
                let worker = format!("{pid}:worker-{i}");
                tokio::spawn(run_worker(ctx.clone(), worker, cancel.clone()))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("worker task panicked: {e}");
            }
        }
    }
}

/// Claim-and-run loop for one worker.
pub async fn run_worker(ctx: AppContext, worker: String, cancel: CancellationToken) {
    tracing::info!(worker = %worker, "worker started");

    loop {
        match ctx.queue.dequeue(&worker, &cancel).await {
            Ok(Some(job)) => {
                let span = tracing::info_span!("job", job_id = %job.id, worker = %worker);
                process_job(&ctx, &worker, job).instrument(span).await;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(worker = %worker, "failed to claim job: {e}");
                tokio::select! {
                    _ = tokio::time::sleep(ctx.config.workers.poll_interval()) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    tracing::info!(worker = %worker, "worker stopped");
}

/// Run a claimed (`STARTED`) job to completion and record the result.
///
/// Temporary uploads are removed whatever the outcome.
pub async fn process_job(ctx: &AppContext, worker: &str, job: Job) -> JobOutcome {
    let started = Instant::now();
    tracing::info!(kind = %job.request.kind(), attempt = job.attempt, "job started");
    ctx.event_bus.emit(EventPayload::JobStarted {
        job_id: job.id,
        worker: worker.to_string(),
    });

    let outcome = match execute(ctx, &job).await {
        Ok((produced, attrs)) => finish(ctx, &job, &produced, &attrs).await,
        Err(e @ Error::Database { .. }) => {
            tracing::error!("storage error, leaving job STARTED: {e}");
            JobOutcome::Abandoned
        }
        Err(e) => record_failure(ctx, &job, &e),
    };

    remove_uploads(&job.request).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        JobOutcome::Succeeded(asset) => {
            tracing::info!(result_asset_id = %asset.id, elapsed_ms, "job succeeded")
        }
        JobOutcome::Failed(detail) => {
            tracing::warn!(error = %detail.message, elapsed_ms, "job failed")
        }
        JobOutcome::Abandoned => {}
    }
    outcome
}

/// Resolve inputs and transcode. Returns the produced file and the asset
/// record to register for it.
async fn execute(ctx: &AppContext, job: &Job) -> Result<(PathBuf, NewAsset)> {
    let request = &job.request;
    let (source, overlay) = resolve_inputs(ctx, request)?;

    let output_dir = &ctx.config.storage.output_dir;
    tokio::fs::create_dir_all(output_dir).await?;

    let input = PathBuf::from(&source.locator);
    let output = output_locator(output_dir, &input, request.kind());
    let invocation = build_invocation(
        request,
        &ResolvedInputs { input, overlay },
        &output,
        &ctx.filter_options(),
    )?;

    let produced = ctx
        .transcoder
        .run(&invocation, ctx.config.workers.transcode_timeout())
        .await?;

    match describe_output(ctx, request, &source, &produced).await {
        Ok(attrs) => Ok((produced, attrs)),
        Err(e) => {
            remove_file_quietly(&produced).await;
            Err(e)
        }
    }
}

/// Look up the source asset and the overlay input, if any.
fn resolve_inputs(
    ctx: &AppContext,
    request: &TransformRequest,
) -> Result<(MediaAsset, Option<PathBuf>)> {
    let conn = get_conn(&ctx.db)?;
    let source = assets::get_asset(&conn, request.asset_id())?
        .ok_or_else(|| Error::not_found("asset", request.asset_id()))?;

    let overlay = match request.overlay() {
        Some(OverlayRef::Asset(id)) => {
            let asset = assets::get_asset(&conn, *id)?.ok_or_else(|| Error::not_found("asset", id))?;
            Some(PathBuf::from(asset.locator))
        }
        Some(OverlayRef::Upload(path)) => Some(path.clone()),
        None => None,
    };

    Ok((source, overlay))
}

async fn describe_output(
    ctx: &AppContext,
    request: &TransformRequest,
    source: &MediaAsset,
    produced: &Path,
) -> Result<NewAsset> {
    let size_bytes = tokio::fs::metadata(produced).await?.len();

    // A stream-copy trim is exactly as long as its window.
    let duration_secs = match request {
        TransformRequest::Trim {
            start_secs,
            end_secs,
            ..
        } => end_secs - start_secs,
        _ => ctx.probe.probe_duration(produced).await.unwrap_or(0.0),
    };

    let file_name = produced
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.kind().to_string());

    Ok(NewAsset {
        file_name,
        locator: produced.to_string_lossy().into_owned(),
        size_bytes,
        duration_secs,
        derived_from: Some(source.id),
    })
}

/// Register the output and mark the job `SUCCESS` in one transaction.
///
/// When the job already left `STARTED`, or the write fails, the produced
/// file is deleted so no output outlives a job that did not succeed.
async fn finish(ctx: &AppContext, job: &Job, produced: &Path, attrs: &NewAsset) -> JobOutcome {
    let completed =
        get_conn(&ctx.db).and_then(|conn| jobs::complete_with_asset(&conn, job.id, attrs));

    match completed {
        Ok(Some(asset)) => {
            ctx.event_bus.emit(EventPayload::AssetCreated {
                asset_id: asset.id,
                derived_from: asset.derived_from,
            });
            ctx.event_bus.emit(EventPayload::JobSucceeded {
                job_id: job.id,
                result_asset_id: asset.id,
            });
            JobOutcome::Succeeded(asset)
        }
        Ok(None) => {
            tracing::warn!("job left STARTED before it finished; discarding output");
            remove_file_quietly(produced).await;
            JobOutcome::Abandoned
        }
        Err(e @ Error::Database { .. }) => {
            tracing::error!("failed to record job success, leaving job STARTED: {e}");
            remove_file_quietly(produced).await;
            JobOutcome::Abandoned
        }
        Err(e) => {
            remove_file_quietly(produced).await;
            record_failure(ctx, job, &e)
        }
    }
}

fn record_failure(ctx: &AppContext, job: &Job, err: &Error) -> JobOutcome {
    let detail = ErrorDetail::from_error(err);
    let transition = Transition::Fail {
        detail: detail.clone(),
    };
    match apply(ctx, job, &transition) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("job left STARTED before its failure was recorded");
            return JobOutcome::Abandoned;
        }
        Err(e) => {
            tracing::error!("failed to record job failure: {e}");
            return JobOutcome::Abandoned;
        }
    }

    ctx.event_bus.emit(EventPayload::JobFailed {
        job_id: job.id,
        error: detail.message.clone(),
    });

    if err.is_tool_failure() {
        maybe_retry(ctx, job);
    }
    JobOutcome::Failed(detail)
}

fn apply(ctx: &AppContext, job: &Job, transition: &Transition) -> Result<bool> {
    let conn = get_conn(&ctx.db)?;
    jobs::apply_transition(&conn, job.id, transition)
}

/// Queue another attempt of a job that failed in the transcoder.
fn maybe_retry(ctx: &AppContext, job: &Job) {
    if job.attempt >= ctx.config.workers.max_attempts || !job.request.is_retryable() {
        return;
    }

    let retried = get_conn(&ctx.db).and_then(|conn| jobs::create_retry(&conn, job.id));
    match retried {
        Ok(next) => {
            tracing::info!(retry_job_id = %next.id, attempt = next.attempt, "scheduled automatic retry");
            ctx.queue.wake();
            ctx.event_bus.emit(EventPayload::JobQueued {
                job_id: next.id,
                kind: next.request.kind(),
            });
        }
        Err(e) => tracing::warn!("automatic retry not scheduled: {e}"),
    }
}
