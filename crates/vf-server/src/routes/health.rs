//! Liveness and readiness probe.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use vf_av::tools::{FFMPEG, FFPROBE};
use vf_core::JobState;

use crate::context::AppContext;
use crate::error::AppError;
use crate::status;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether each external tool was found at startup.
    pub tools: BTreeMap<String, bool>,
    /// Job count per state, zero for states with no jobs.
    pub jobs: BTreeMap<String, i64>,
}

/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(ctx): State<AppContext>) -> Result<Json<HealthResponse>, AppError> {
    let mut jobs: BTreeMap<String, i64> = JobState::ALL
        .iter()
        .map(|state| (state.to_string(), 0))
        .collect();
    for (state, n) in status::counts(&ctx)? {
        jobs.insert(state.to_string(), n);
    }

    let tools = [FFMPEG, FFPROBE]
        .into_iter()
        .map(|name| (name.to_string(), ctx.tools.get(name).is_some()))
        .collect();

    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        tools,
        jobs,
    }))
}
