//! Read-only job status.
//!
//! Status comes from the persisted record alone. Nothing here touches the
//! queue or guesses whether a `STARTED` job is still alive.

use vf_core::{Error, Job, JobId, JobState, Result};
use vf_db::pool::get_conn;
use vf_db::queries::jobs;

use crate::context::AppContext;

/// Largest page [`list`] will return.
pub const MAX_PAGE_SIZE: i64 = 500;

pub fn get_status(ctx: &AppContext, id: JobId) -> Result<Job> {
    let conn = get_conn(&ctx.db)?;
    jobs::get_job(&conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// Jobs in submission order, optionally restricted to one state.
pub fn list(ctx: &AppContext, state: Option<JobState>, offset: i64, limit: i64) -> Result<Vec<Job>> {
    let conn = get_conn(&ctx.db)?;
    jobs::list_jobs(&conn, state, offset.max(0), limit.clamp(1, MAX_PAGE_SIZE))
}

/// Number of jobs in each state.
pub fn counts(ctx: &AppContext) -> Result<Vec<(JobState, i64)>> {
    let conn = get_conn(&ctx.db)?;
    jobs::count_by_state(&conn)
}
