//! Event feeds: a snapshot of recent events and a live SSE stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use vf_core::events::Event;
use vf_core::JobId;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::parse_id;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RecentParams {
    #[serde(default = "default_recent")]
    pub limit: usize,
}

fn default_recent() -> usize {
    50
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StreamParams {
    /// Only forward events about this job.
    pub job_id: Option<String>,
}

/// GET /api/events/recent
#[utoipa::path(
    get,
    path = "/api/events/recent",
    params(RecentParams),
    responses(
        (status = 200, description = "Recent events, newest first")
    )
)]
pub async fn recent_events(
    State(ctx): State<AppContext>,
    Query(params): Query<RecentParams>,
) -> Json<Vec<Event>> {
    Json(ctx.event_bus.recent_events(params.limit))
}

/// GET /api/events
///
/// Replays recent events oldest first, then forwards live ones.
#[utoipa::path(
    get,
    path = "/api/events",
    params(StreamParams),
    responses(
        (status = 200, description = "Server-Sent Events stream (text/event-stream)")
    )
)]
pub async fn events_stream(
    State(ctx): State<AppContext>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let filter: Option<JobId> = params
        .job_id
        .as_deref()
        .map(|raw| parse_id(raw, "job"))
        .transpose()?;

    let recent = ctx.event_bus.recent_events(50);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if matches_job(&event, filter) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(SseEvent::default().data(data));
                }
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches_job(&event, filter) {
                        if let Ok(data) = serde_json::to_string(&event) {
                            yield Ok(SseEvent::default().data(data));
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn matches_job(event: &Event, filter: Option<JobId>) -> bool {
    match filter {
        None => true,
        Some(id) => event.payload.job_id() == Some(id),
    }
}
