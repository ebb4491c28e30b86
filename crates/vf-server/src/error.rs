//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any [`vf_core::Error`]
//! converts with `?` and renders as `{ error, code, request_id }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::RequestId;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: vf_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: vf_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: &RequestId) -> Self {
        self.request_id = Some(id.0.clone());
        self
    }

    pub fn inner(&self) -> &vf_core::Error {
        &self.inner
    }
}

impl From<vf_core::Error> for AppError {
    fn from(e: vf_core::Error) -> Self {
        Self::new(e)
    }
}

/// Stable machine-readable code for each error class.
fn error_code(err: &vf_core::Error) -> &'static str {
    match err {
        vf_core::Error::NotFound { .. } => "not_found",
        vf_core::Error::Validation(_) => "validation_error",
        vf_core::Error::Conflict(_) => "conflict",
        vf_core::Error::Database { .. } => "database_error",
        vf_core::Error::Io { .. } => "io_error",
        vf_core::Error::Tool { .. } => "tool_error",
        vf_core::Error::Internal(_) => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = ?self.request_id,
                "server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": error_code(&self.inner),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
