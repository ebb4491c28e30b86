//! Unified error type for the vidforge workspace.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`]
//! and for workers to record a job failure via [`Error::diagnostics`].

use std::fmt;
use std::time::Duration;

/// How an external tool invocation went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailure {
    /// The binary could not be located or spawned.
    Unavailable,
    /// The process exited with a non-zero status (`None` when killed by a signal).
    ExitStatus(Option<i32>),
    /// The process exceeded its deadline and was killed.
    TimedOut(Duration),
    /// The process exited cleanly but did not produce its output file.
    MissingOutput,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Unavailable => write!(f, "unavailable"),
            ToolFailure::ExitStatus(Some(code)) => write!(f, "exit code {code}"),
            ToolFailure::ExitStatus(None) => write!(f, "terminated by signal"),
            ToolFailure::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
            ToolFailure::MissingOutput => write!(f, "no output produced"),
        }
    }
}

/// Unified error type covering all failure modes in vidforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "asset", "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not allowed in the entity's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Failure classification.
        kind: ToolFailure,
        /// Human-readable error description.
        message: String,
        /// Raw standard-error output, possibly not UTF-8.
        diagnostics: Vec<u8>,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`] without diagnostics.
    ///
    /// The message defaults to the failure kind's description.
    pub fn tool(tool: impl Into<String>, kind: ToolFailure) -> Self {
        Error::Tool {
            tool: tool.into(),
            kind,
            message: kind.to_string(),
            diagnostics: Vec::new(),
        }
    }

    /// Attach captured standard-error bytes to a [`Error::Tool`].
    ///
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_diagnostics(self, bytes: Vec<u8>) -> Self {
        match self {
            Error::Tool {
                tool,
                kind,
                message,
                ..
            } => Error::Tool {
                tool,
                kind,
                message,
                diagnostics: bytes,
            },
            other => other,
        }
    }

    /// Raw diagnostic output carried by a tool failure, if any.
    pub fn diagnostics(&self) -> Option<&[u8]> {
        match self {
            Error::Tool { diagnostics, .. } if !diagnostics.is_empty() => Some(diagnostics),
            _ => None,
        }
    }

    /// Whether this error came from an external tool rather than storage or validation.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Error::Tool { .. })
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
