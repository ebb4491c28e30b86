//! Job records and the durable queue built on them.
//!
//! Every state change is one `UPDATE ... WHERE state = <expected>` so the new
//! state and its timestamp land together or not at all, and a transition
//! from the wrong state affects zero rows.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use vf_core::{
    Error, Job, JobId, JobState, MediaAsset, NewAsset, Result, TransformRequest, Transition,
    CANCELLED_MESSAGE,
};

use crate::models::{format_ts, job_from_row, now_ts, JOB_COLS};
use crate::queries::assets;

fn db(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn insert_job(
    conn: &Connection,
    request: &TransformRequest,
    attempt: u32,
    retry_of: Option<JobId>,
) -> Result<Job> {
    let request_json = serde_json::to_string(request)
        .map_err(|e| Error::Internal(format!("failed to encode request: {e}")))?;

    let q = format!(
        "INSERT INTO jobs (id, kind, asset_id, request, state, attempt, retry_of, created_at)
         VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?6, ?7)
         RETURNING {JOB_COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![
            JobId::new().to_string(),
            request.kind().as_str(),
            request.asset_id().to_string(),
            request_json,
            attempt,
            retry_of.map(|id| id.to_string()),
            now_ts(),
        ],
        job_from_row,
    )
    .map_err(db)
}

/// Create a new `PENDING` job for a validated request.
pub fn create_job(conn: &Connection, request: &TransformRequest) -> Result<Job> {
    insert_job(conn, request, 1, None)
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], job_from_row) {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(db(e)),
    }
}

/// List jobs with optional state filter and pagination, oldest first.
pub fn list_jobs(
    conn: &Connection,
    state: Option<JobState>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Job>> {
    let q = format!(
        "SELECT {JOB_COLS} FROM jobs
         WHERE (?1 IS NULL OR state = ?1)
         ORDER BY created_at ASC, rowid ASC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&q).map_err(db)?;
    let rows = stmt
        .query_map(
            rusqlite::params![state.map(|s| s.as_str()), limit, offset],
            job_from_row,
        )
        .map_err(db)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db)?;
    Ok(rows)
}

/// Number of jobs in each state.
pub fn count_by_state(conn: &Connection) -> Result<Vec<(JobState, i64)>> {
    let mut stmt = conn
        .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state ORDER BY state")
        .map_err(db)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(db)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db)?;
    rows.into_iter()
        .map(|(state, n)| Ok((state.parse::<JobState>()?, n)))
        .collect()
}

/// Apply one state transition if the job is still in the transition's
/// expected from-state.
///
/// Returns `false` when no row matched (unknown id, or the job already moved
/// on). Callers decide whether that is a conflict.
pub fn apply_transition(conn: &Connection, id: JobId, transition: &Transition) -> Result<bool> {
    let now = now_ts();
    let from = transition.from_state().as_str();
    let to = transition.to_state().as_str();
    let id = id.to_string();

    let n = match transition {
        Transition::Start { worker } => conn.execute(
            "UPDATE jobs SET state = ?1, claimed_by = ?2, started_at = ?3
             WHERE id = ?4 AND state = ?5",
            rusqlite::params![to, worker, now, id, from],
        ),
        Transition::Succeed { result_asset_id } => conn.execute(
            "UPDATE jobs SET state = ?1, result_asset_id = ?2, finished_at = ?3
             WHERE id = ?4 AND state = ?5",
            rusqlite::params![to, result_asset_id.to_string(), now, id, from],
        ),
        Transition::Fail { detail } => conn.execute(
            "UPDATE jobs SET state = ?1, error_message = ?2, diagnostics = ?3, finished_at = ?4
             WHERE id = ?5 AND state = ?6",
            rusqlite::params![to, detail.message, detail.diagnostics.as_deref(), now, id, from],
        ),
        Transition::Cancel => conn.execute(
            "UPDATE jobs SET state = ?1, error_message = ?2, finished_at = ?3
             WHERE id = ?4 AND state = ?5",
            rusqlite::params![to, CANCELLED_MESSAGE, now, id, from],
        ),
    }
    .map_err(db)?;

    Ok(n > 0)
}

/// Register a job's output asset and mark the job `SUCCESS`, atomically.
///
/// Returns `None` with nothing written when the job is no longer `STARTED`
/// (for example the liveness monitor failed it first).
pub fn complete_with_asset(
    conn: &Connection,
    id: JobId,
    attrs: &NewAsset,
) -> Result<Option<MediaAsset>> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(db)?;

    let asset = assets::create_asset(&tx, attrs)?;
    let transition = Transition::Succeed {
        result_asset_id: asset.id,
    };
    if !apply_transition(&tx, id, &transition)? {
        // Dropping the transaction rolls back the asset insert.
        return Ok(None);
    }

    tx.commit().map_err(db)?;
    Ok(Some(asset))
}

/// Compare-and-set claim of one specific job.
///
/// Exactly one of several racing callers gets `true`.
pub fn claim_job(conn: &Connection, id: JobId, worker: &str) -> Result<bool> {
    apply_transition(
        conn,
        id,
        &Transition::Start {
            worker: worker.to_string(),
        },
    )
}

/// Atomically claim the oldest `PENDING` job.
///
/// The select and the update run as one statement inside a `BEGIN IMMEDIATE`
/// transaction, so two workers can never both receive the same job.
pub fn claim_next(conn: &Connection, worker: &str) -> Result<Option<Job>> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(db)?;

    let q = format!(
        "UPDATE jobs SET state = 'STARTED', claimed_by = ?1, started_at = ?2
         WHERE id = (
             SELECT id FROM jobs WHERE state = 'PENDING'
             ORDER BY created_at ASC, rowid ASC LIMIT 1
         ) AND state = 'PENDING'
         RETURNING {JOB_COLS}"
    );
    let job = match tx.query_row(&q, rusqlite::params![worker, now_ts()], job_from_row) {
        Ok(j) => Some(j),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(db(e)),
    };

    tx.commit().map_err(db)?;
    Ok(job)
}

/// Cancel a job that no worker has claimed yet.
///
/// Fails with `NotFound` for an unknown id and `Conflict` once the job has
/// left `PENDING`.
pub fn cancel_job(conn: &Connection, id: JobId) -> Result<Job> {
    let cancelled = apply_transition(conn, id, &Transition::Cancel)?;
    let job = get_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))?;
    if !cancelled {
        return Err(Error::Conflict(format!(
            "job {id} is {}; only PENDING jobs can be cancelled",
            job.state
        )));
    }
    Ok(job)
}

/// Create a new `PENDING` job re-running a failed job's request.
///
/// The failed record is left untouched. A failed job can be retried once;
/// later retries go through the newest job in the chain.
pub fn create_retry(conn: &Connection, failed_id: JobId) -> Result<Job> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(db)?;

    let failed = get_job(&tx, failed_id)?.ok_or_else(|| Error::not_found("job", failed_id))?;
    if failed.state != JobState::Failure {
        return Err(Error::Conflict(format!(
            "job {failed_id} is {}; only FAILURE jobs can be retried",
            failed.state
        )));
    }
    if !failed.request.is_retryable() {
        return Err(Error::Validation(format!(
            "job {failed_id} used a temporary upload that no longer exists"
        )));
    }

    let already: bool = tx
        .query_row(
            "SELECT COUNT(*) > 0 FROM jobs WHERE retry_of = ?1",
            [failed_id.to_string()],
            |row| row.get(0),
        )
        .map_err(db)?;
    if already {
        return Err(Error::Conflict(format!("job {failed_id} was already retried")));
    }

    let job = insert_job(&tx, &failed.request, failed.attempt + 1, Some(failed_id))?;
    tx.commit().map_err(db)?;
    Ok(job)
}

/// Fail every `STARTED` job claimed before `deadline`.
///
/// Returns the ids that were failed. Jobs never go back to `PENDING`.
pub fn fail_stale_jobs(
    conn: &Connection,
    deadline: DateTime<Utc>,
    message: &str,
) -> Result<Vec<JobId>> {
    let mut stmt = conn
        .prepare(
            "UPDATE jobs SET state = 'FAILURE', error_message = ?1, finished_at = ?2
             WHERE state = 'STARTED' AND started_at < ?3
             RETURNING id",
        )
        .map_err(db)?;
    let ids = stmt
        .query_map(
            rusqlite::params![message, now_ts(), format_ts(deadline)],
            |row| row.get::<_, String>(0),
        )
        .map_err(db)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db)?;

    ids.iter()
        .map(|s| {
            s.parse::<JobId>()
                .map_err(|e| Error::database(format!("bad job id {s}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use std::path::PathBuf;
    use vf_core::{AssetId, ErrorDetail, OverlayRef};

    fn trim() -> TransformRequest {
        TransformRequest::Trim {
            asset_id: AssetId::new(),
            start_secs: 5.0,
            end_secs: 15.0,
        }
    }

    fn fail(conn: &Connection, id: JobId, message: &str) -> bool {
        apply_transition(
            conn,
            id,
            &Transition::Fail {
                detail: ErrorDetail::new(message),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_then_get_is_pending() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let req = trim();
        let job = create_job(&conn, &req).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt, 1);

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.state, JobState::Pending);
        assert_eq!(found.request, req);
        assert!(found.started_at.is_none());
        assert!(found.claimed_by.is_none());
    }

    #[test]
    fn claim_next_is_fifo() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let first = create_job(&conn, &trim()).unwrap();
        let second = create_job(&conn, &trim()).unwrap();

        let a = claim_next(&conn, "w1").unwrap().unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(a.state, JobState::Started);
        assert_eq!(a.claimed_by.as_deref(), Some("w1"));
        assert!(a.started_at.is_some());

        let b = claim_next(&conn, "w2").unwrap().unwrap();
        assert_eq!(b.id, second.id);

        assert!(claim_next(&conn, "w3").unwrap().is_none());
    }

    #[test]
    fn claim_job_is_compare_and_set() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();

        assert!(claim_job(&conn, job.id, "w1").unwrap());
        assert!(!claim_job(&conn, job.id, "w2").unwrap());

        let found = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(found.claimed_by.as_deref(), Some("w1"));
    }

    #[test]
    fn transitions_are_guarded_by_from_state() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();
        let result = Transition::Succeed {
            result_asset_id: AssetId::new(),
        };

        // Cannot skip STARTED.
        assert!(!apply_transition(&conn, job.id, &result).unwrap());
        assert!(claim_job(&conn, job.id, "w1").unwrap());
        assert!(apply_transition(&conn, job.id, &result).unwrap());

        // Terminal: nothing else applies.
        assert!(!fail(&conn, job.id, "late"));
        assert!(!claim_job(&conn, job.id, "w2").unwrap());

        let done = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(done.state, JobState::Success);
        assert!(done.result_asset_id.is_some());
        assert!(done.error.is_none());
        assert!(done.finished_at.unwrap() >= done.started_at.unwrap());
    }

    #[test]
    fn failure_keeps_raw_diagnostics() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();
        claim_job(&conn, job.id, "w1").unwrap();

        let detail = ErrorDetail {
            message: "Tool error [ffmpeg]: exit code 1".into(),
            diagnostics: Some(b"Invalid data \xfe\xff".to_vec()),
        };
        assert!(apply_transition(&conn, job.id, &Transition::Fail { detail: detail.clone() }).unwrap());

        let failed = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failure);
        assert_eq!(failed.error, Some(detail));
        assert!(failed.result_asset_id.is_none());
    }

    #[test]
    fn cancel_only_while_pending() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let pending = create_job(&conn, &trim()).unwrap();
        let started = create_job(&conn, &trim()).unwrap();
        claim_job(&conn, started.id, "w1").unwrap();

        let cancelled = cancel_job(&conn, pending.id).unwrap();
        assert_eq!(cancelled.state, JobState::Failure);
        assert_eq!(cancelled.error.unwrap().message, CANCELLED_MESSAGE);
        assert!(cancelled.started_at.is_none());

        assert!(matches!(
            cancel_job(&conn, started.id).unwrap_err(),
            Error::Conflict(_)
        ));
        assert!(matches!(
            cancel_job(&conn, JobId::new()).unwrap_err(),
            Error::NotFound { .. }
        ));

        // A cancelled job is never handed to a worker.
        assert!(claim_next(&conn, "w2").unwrap().is_none());
    }

    #[test]
    fn retry_creates_new_job() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();
        claim_job(&conn, job.id, "w1").unwrap();
        fail(&conn, job.id, "boom");

        let retry = create_retry(&conn, job.id).unwrap();
        assert_ne!(retry.id, job.id);
        assert_eq!(retry.state, JobState::Pending);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of, Some(job.id));
        assert_eq!(retry.request, job.request);

        // The original stays FAILURE.
        let original = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(original.state, JobState::Failure);

        assert!(matches!(
            create_retry(&conn, job.id).unwrap_err(),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn retry_rejects_non_failed_and_uploads() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let pending = create_job(&conn, &trim()).unwrap();
        assert!(matches!(
            create_retry(&conn, pending.id).unwrap_err(),
            Error::Conflict(_)
        ));

        let upload = TransformRequest::ImageOverlay {
            asset_id: AssetId::new(),
            overlay: OverlayRef::Upload(PathBuf::from("/tmp/logo.png")),
            x: 0,
            y: 0,
        };
        let job = create_job(&conn, &upload).unwrap();
        cancel_job(&conn, job.id).unwrap();
        assert!(matches!(
            create_retry(&conn, job.id).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn list_and_count_by_state() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        create_job(&conn, &trim()).unwrap();
        create_job(&conn, &trim()).unwrap();
        claim_next(&conn, "w1").unwrap();

        assert_eq!(list_jobs(&conn, None, 0, 100).unwrap().len(), 2);
        assert_eq!(list_jobs(&conn, Some(JobState::Pending), 0, 100).unwrap().len(), 1);
        assert_eq!(list_jobs(&conn, Some(JobState::Started), 0, 100).unwrap().len(), 1);
        assert!(list_jobs(&conn, Some(JobState::Success), 0, 100).unwrap().is_empty());

        let counts = count_by_state(&conn).unwrap();
        assert!(counts.contains(&(JobState::Pending, 1)));
        assert!(counts.contains(&(JobState::Started, 1)));
    }

    #[test]
    fn stale_started_jobs_fail() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let stuck = create_job(&conn, &trim()).unwrap();
        let waiting = create_job(&conn, &trim()).unwrap();
        claim_job(&conn, stuck.id, "w1").unwrap();

        // Deadline in the past: nothing is stale yet.
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(fail_stale_jobs(&conn, past, "worker lost").unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::seconds(1);
        let failed = fail_stale_jobs(&conn, future, "worker lost").unwrap();
        assert_eq!(failed, vec![stuck.id]);

        let job = get_job(&conn, stuck.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failure);
        assert_eq!(job.error.unwrap().message, "worker lost");

        // PENDING jobs are untouched.
        let job = get_job(&conn, waiting.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
    }

    fn output(derived_from: AssetId) -> NewAsset {
        NewAsset {
            file_name: "out.mp4".into(),
            locator: "/out/out.mp4".into(),
            size_bytes: 10,
            duration_secs: 10.0,
            derived_from: Some(derived_from),
        }
    }

    #[test]
    fn complete_with_asset_links_result() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();
        assert!(claim_job(&conn, job.id, "w").unwrap());

        let asset = complete_with_asset(&conn, job.id, &output(job.request.asset_id()))
            .unwrap()
            .expect("job was STARTED");

        let done = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(done.state, JobState::Success);
        assert_eq!(done.result_asset_id, Some(asset.id));
        assert!(assets::get_asset(&conn, asset.id).unwrap().is_some());
    }

    #[test]
    fn complete_with_asset_on_failed_job_writes_nothing() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let job = create_job(&conn, &trim()).unwrap();
        assert!(claim_job(&conn, job.id, "w").unwrap());
        assert!(fail(&conn, job.id, "worker lost"));

        let result = complete_with_asset(&conn, job.id, &output(job.request.asset_id())).unwrap();
        assert!(result.is_none());

        assert!(assets::list_assets(&conn, 0, 10).unwrap().is_empty());
        let stored = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failure);
        assert!(stored.result_asset_id.is_none());
    }
}
