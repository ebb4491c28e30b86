//! Row mapping between SQLite and the vf-core domain types.
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision
//! and a `Z` suffix, so lexical order matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;
use vf_core::{ErrorDetail, Job, JobState, MediaAsset, TransformRequest};

/// Columns selected for an asset, in `asset_from_row` order.
pub const ASSET_COLS: &str =
    "id, file_name, locator, size_bytes, duration_secs, derived_from, created_at";

/// Columns selected for a job, in `job_from_row` order.
pub const JOB_COLS: &str = "id, request, state, claimed_by, result_asset_id, error_message,
    diagnostics, attempt, retry_of, created_at, started_at, finished_at";

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map(T::from)
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| Uuid::parse_str(&v).map(T::from).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// MediaAsset
// ---------------------------------------------------------------------------

pub fn asset_from_row(row: &rusqlite::Row) -> rusqlite::Result<MediaAsset> {
    let size: i64 = row.get(3)?;
    Ok(MediaAsset {
        id: parse_id(row, 0)?,
        file_name: row.get(1)?,
        locator: row.get(2)?,
        size_bytes: size.max(0) as u64,
        duration_secs: row.get(4)?,
        derived_from: parse_opt_id(row, 5)?,
        created_at: parse_ts(row, 6)?,
    })
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let request_json: String = row.get(1)?;
    let request: TransformRequest =
        serde_json::from_str(&request_json).map_err(|e| conversion_err(1, e))?;

    let state_str: String = row.get(2)?;
    let state: JobState = state_str.parse().map_err(|e| conversion_err(2, e))?;

    let error_message: Option<String> = row.get(5)?;
    let diagnostics: Option<Vec<u8>> = row.get(6)?;
    let error = error_message.map(|message| ErrorDetail {
        message,
        diagnostics,
    });

    Ok(Job {
        id: parse_id(row, 0)?,
        request,
        state,
        claimed_by: row.get(3)?,
        result_asset_id: parse_opt_id(row, 4)?,
        error,
        attempt: row.get(7)?,
        retry_of: parse_opt_id(row, 8)?,
        created_at: parse_ts(row, 9)?,
        started_at: parse_opt_ts(row, 10)?,
        finished_at: parse_opt_ts(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let a = format_ts(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let b = format_ts(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert!(a < b);
        assert!(a.ends_with('Z'));
        assert_eq!(a, "2024-01-01T09:00:00.000000Z");
    }
}
