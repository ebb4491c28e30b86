//! Job records and the job state machine.
//!
//! A job moves `PENDING -> STARTED -> SUCCESS | FAILURE`, or
//! `PENDING -> FAILURE` when cancelled. Nothing ever returns to `PENDING`;
//! a retry is a new job with `retry_of` set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::{AssetId, JobId};
use crate::request::TransformRequest;

/// Diagnostics beyond this many bytes are truncated from the front.
pub const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Detail recorded when a job is cancelled while pending.
pub const CANCELLED_MESSAGE: &str = "cancelled before start";

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Success,
    Failure,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Started,
        JobState::Success,
        JobState::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    /// `SUCCESS` and `FAILURE` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Started)
                | (JobState::Pending, JobState::Failure)
                | (JobState::Started, JobState::Success)
                | (JobState::Started, JobState::Failure)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "STARTED" => Ok(JobState::Started),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            other => Err(Error::Validation(format!("unknown job state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorDetail
// ---------------------------------------------------------------------------

/// Why a job failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    /// Human-readable cause, independent of raw tool output.
    pub message: String,
    /// Tail of the transcoder's standard error, as raw bytes.
    pub diagnostics: Option<Vec<u8>>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            message: err.to_string(),
            diagnostics: err.diagnostics().map(tail),
        }
    }

    /// Lossy UTF-8 rendering of the diagnostics, for display only.
    pub fn diagnostics_text(&self) -> Option<Cow<'_, str>> {
        self.diagnostics
            .as_deref()
            .map(String::from_utf8_lossy)
    }
}

fn tail(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
    bytes[start..].to_vec()
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A single persisted state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Claimed by a worker.
    Start { worker: String },
    Succeed { result_asset_id: AssetId },
    Fail { detail: ErrorDetail },
    /// Withdrawn before any worker claimed it.
    Cancel,
}

impl Transition {
    /// The state the job must be in for this transition to apply.
    pub fn from_state(&self) -> JobState {
        match self {
            Transition::Start { .. } | Transition::Cancel => JobState::Pending,
            Transition::Succeed { .. } | Transition::Fail { .. } => JobState::Started,
        }
    }

    pub fn to_state(&self) -> JobState {
        match self {
            Transition::Start { .. } => JobState::Started,
            Transition::Succeed { .. } => JobState::Success,
            Transition::Fail { .. } | Transition::Cancel => JobState::Failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One asynchronous execution of a [`TransformRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub request: TransformRequest,
    pub state: JobState,
    /// Worker that claimed the job; set together with `STARTED`.
    pub claimed_by: Option<String>,
    /// Set only on `SUCCESS`.
    pub result_asset_id: Option<AssetId>,
    /// Set only on `FAILURE`.
    pub error: Option<ErrorDetail>,
    /// 1-based attempt number across a retry chain.
    pub attempt: u32,
    pub retry_of: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
