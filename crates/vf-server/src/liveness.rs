//! Liveness monitor for claimed jobs.
//!
//! A worker that dies mid-job (process crash, host restart) leaves its job
//! `STARTED` forever. The monitor fails any job that has been `STARTED` for
//! longer than `workers.stale_after_secs`. It never re-queues: a stale job may
//! have partially run, so a fresh attempt goes through retry instead.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use vf_core::events::EventPayload;
use vf_core::{Error, JobId, Result};
use vf_db::pool::get_conn;
use vf_db::queries::jobs;

use crate::context::AppContext;
use crate::submit::remove_uploads;

pub struct LivenessMonitor {
    ctx: AppContext,
    stale_after: Duration,
    interval: Duration,
}

impl LivenessMonitor {
    /// `None` when `stale_after_secs` is 0, which disables the monitor.
    pub fn new(ctx: AppContext) -> Option<Self> {
        let workers = &ctx.config.workers;
        if workers.stale_after_secs == 0 {
            return None;
        }
        let stale_after = Duration::from_secs(workers.stale_after_secs);
        let interval = Duration::from_secs(workers.liveness_interval_secs.max(1));
        Some(Self {
            ctx,
            stale_after,
            interval,
        })
    }

    /// Sweep once immediately, then every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.interval.as_secs(),
            "liveness monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!("liveness sweep failed: {e}");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("liveness monitor stopped");
    }

    /// Fail every job that has been `STARTED` for too long.
    pub async fn sweep(&self) -> Result<Vec<JobId>> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| Error::Internal(format!("stale_after out of range: {e}")))?;
        let deadline = Utc::now() - stale_after;
        let message = format!(
            "worker lost: no result after {}s",
            self.stale_after.as_secs()
        );

        let (failed, stale_jobs) = {
            let conn = get_conn(&self.ctx.db)?;
            let failed = jobs::fail_stale_jobs(&conn, deadline, &message)?;
            let mut stale_jobs = Vec::with_capacity(failed.len());
            for id in &failed {
                if let Some(job) = jobs::get_job(&conn, *id)? {
                    stale_jobs.push(job);
                }
            }
            (failed, stale_jobs)
        };

        for job in &stale_jobs {
            tracing::warn!(
                job_id = %job.id,
                claimed_by = ?job.claimed_by,
                started_at = ?job.started_at,
                "failed stale job"
            );
            remove_uploads(&job.request).await;
            self.ctx.event_bus.emit(EventPayload::JobFailed {
                job_id: job.id,
                error: message.clone(),
            });
        }

        Ok(failed)
    }
}
