//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "vidforge", description = "Asynchronous media transformation API"),
    paths(
        routes::health::health,
        routes::assets::upload_asset,
        routes::assets::list_assets,
        routes::assets::get_asset,
        routes::transforms::submit_trim,
        routes::transforms::submit_text,
        routes::transforms::submit_image,
        routes::transforms::submit_video,
        routes::jobs::list_jobs,
        routes::jobs::get_job,
        routes::jobs::cancel_job,
        routes::jobs::retry_job,
        routes::events::recent_events,
        routes::events::events_stream,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::assets::AssetResponse,
        routes::assets::UploadForm,
        routes::transforms::TrimBody,
        routes::transforms::TextOverlayBody,
        routes::transforms::ImageOverlayForm,
        routes::transforms::VideoOverlayForm,
        routes::jobs::JobResponse,
        routes::jobs::SubmitResponse,
    ))
)]
pub struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(routes::health::health))
        // Assets
        .route(
            "/assets",
            get(routes::assets::list_assets).post(routes::assets::upload_asset),
        )
        .route("/assets/{id}", get(routes::assets::get_asset))
        // Transforms
        .route("/transforms/trim", post(routes::transforms::submit_trim))
        .route("/transforms/text", post(routes::transforms::submit_text))
        .route("/transforms/image", post(routes::transforms::submit_image))
        .route("/transforms/video", post(routes::transforms::submit_video))
        // Jobs
        .route("/jobs", get(routes::jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(routes::jobs::get_job).delete(routes::jobs::cancel_job),
        )
        .route("/jobs/{id}/retry", post(routes::jobs::retry_job))
        // Events
        .route("/events", get(routes::events::events_stream))
        .route("/events/recent", get(routes::events::recent_events));

    Router::new()
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(ctx.config.storage.max_upload_bytes))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request_id::X_REQUEST_ID;
    use crate::test_support::context;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_is_ok_and_echoes_request_id() {
        let (ctx, _dir) = context();
        let response = build_router(ctx)
            .oneshot(
                Request::get("/api/health")
                    .header(&X_REQUEST_ID, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&X_REQUEST_ID], "req-42");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (ctx, _dir) = context();
        let response = build_router(ctx)
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["paths"]["/api/transforms/trim"].is_object());
    }

    #[tokio::test]
    async fn unknown_job_is_404_json() {
        let (ctx, _dir) = context();
        let uri = format!("/api/jobs/{}", vf_core::JobId::new());
        let response = build_router(ctx)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "not_found");
    }
}
