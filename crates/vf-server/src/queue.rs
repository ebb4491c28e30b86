//! Durable job queue.
//!
//! The `jobs` table is the queue. [`JobQueue`] adds a wake-up signal so idle
//! workers notice new jobs without waiting out a full poll interval. The poll
//! still runs as a fallback for jobs created by another process or a retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use vf_core::{Job, JobId, Result, TransformRequest};
use vf_db::pool::{get_conn, DbPool};
use vf_db::queries::jobs;

#[derive(Clone)]
pub struct JobQueue {
    db: DbPool,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl JobQueue {
    pub fn new(db: DbPool, poll_interval: Duration) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
            poll_interval,
        }
    }

    /// Persist a `PENDING` job and wake one idle worker.
    ///
    /// The record is committed before this returns, so the job survives a
    /// restart even if no worker ever sees the wake-up.
    pub fn enqueue(&self, request: &TransformRequest) -> Result<Job> {
        let job = {
            let conn = get_conn(&self.db)?;
            jobs::create_job(&conn, request)?
        };
        tracing::debug!(job_id = %job.id, kind = %job.request.kind(), "job enqueued");
        self.notify.notify_one();
        Ok(job)
    }

    /// Wake a worker for a job created outside [`JobQueue::enqueue`].
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Claim the oldest pending job, waiting until one exists.
    ///
    /// Returns `Ok(None)` only when `cancel` fires. The returned job is
    /// already `STARTED` and owned by `worker`.
    pub async fn dequeue(&self, worker: &str, cancel: &CancellationToken) -> Result<Option<Job>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let claimed = {
                let conn = get_conn(&self.db)?;
                jobs::claim_next(&conn, worker)?
            };
            if let Some(job) = claimed {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    /// Claim one specific job. Exactly one of several racing callers wins.
    pub fn claim(&self, id: JobId, worker: &str) -> Result<bool> {
        let conn = get_conn(&self.db)?;
        jobs::claim_job(&conn, id, worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::{AssetId, JobState};
    use vf_db::pool::init_memory_pool;

    fn trim() -> TransformRequest {
        TransformRequest::Trim {
            asset_id: AssetId::new(),
            start_secs: 0.0,
            end_secs: 1.0,
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_claims_job() {
        let queue = JobQueue::new(init_memory_pool().unwrap(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let job = queue.enqueue(&trim()).unwrap();
        assert_eq!(job.state, JobState::Pending);

        let claimed = queue.dequeue("w1", &cancel).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::Started);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_cancel() {
        let queue = JobQueue::new(init_memory_pool().unwrap(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue("w1", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn enqueue_wakes_idle_worker() {
        let queue = JobQueue::new(init_memory_pool().unwrap(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue("w1", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = queue.enqueue(&trim()).unwrap();

        let claimed = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("worker was not woken")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let queue = JobQueue::new(init_memory_pool().unwrap(), Duration::from_secs(60));
        let job = queue.enqueue(&trim()).unwrap();

        assert!(queue.claim(job.id, "w1").unwrap());
        assert!(!queue.claim(job.id, "w2").unwrap());
    }
}
