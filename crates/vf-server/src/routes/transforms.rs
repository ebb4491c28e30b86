//! Transform submission.
//!
//! Every transform kind is accepted the same way: validate, queue, answer
//! `202 Accepted` with the job id. None of these handlers wait for ffmpeg.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;
use vf_core::{AssetId, Error, OverlayRef, TransformRequest};

use crate::context::AppContext;
use crate::error::AppError;
use crate::intake;
use crate::middleware::request_id::RequestId;
use crate::routes::jobs::SubmitResponse;
use crate::routes::parse_id;
use crate::submit;

const DEFAULT_POSITION: i64 = 10;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TrimBody {
    pub asset_id: Uuid,
    pub start_secs: f64,
    pub end_secs: f64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TextOverlayBody {
    pub asset_id: Uuid,
    pub text: String,
    #[serde(default = "default_position")]
    pub x: i64,
    #[serde(default = "default_position")]
    pub y: i64,
    #[serde(default = "default_font_size")]
    pub font_size: i64,
    #[serde(default = "default_font_color")]
    pub font_color: String,
}

fn default_position() -> i64 {
    DEFAULT_POSITION
}

fn default_font_size() -> i64 {
    24
}

fn default_font_color() -> String {
    "white".into()
}

/// Multipart body for an image overlay.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct ImageOverlayForm {
    asset_id: String,
    x: Option<i64>,
    y: Option<i64>,
    #[schema(value_type = String, format = Binary)]
    image_file: Vec<u8>,
}

/// Multipart body for a video overlay. Send exactly one of `overlay_file`
/// and `overlay_asset_id`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct VideoOverlayForm {
    asset_id: String,
    x: Option<i64>,
    y: Option<i64>,
    #[schema(value_type = Option<String>, format = Binary)]
    overlay_file: Option<Vec<u8>>,
    overlay_asset_id: Option<String>,
}

/// Attaches the request id to an error so every rejection carries it.
fn tagged(request_id: &RequestId) -> impl FnOnce(Error) -> AppError + '_ {
    move |e| AppError::from(e).with_request_id(request_id)
}

/// Turns a JSON extractor rejection into a tagged validation error.
fn json_body<T>(
    body: Result<Json<T>, JsonRejection>,
    request_id: &RequestId,
) -> Result<T, AppError> {
    body.map(|Json(b)| b)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
        .map_err(tagged(request_id))
}

async fn accept(
    ctx: &AppContext,
    request_id: &RequestId,
    request: TransformRequest,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let job = submit::submit(ctx, request)
        .await
        .map_err(tagged(request_id))?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from_model(&job))))
}

/// POST /api/transforms/trim
#[utoipa::path(
    post,
    path = "/api/transforms/trim",
    request_body = TrimBody,
    responses(
        (status = 202, description = "Trim queued", body = SubmitResponse),
        (status = 400, description = "Invalid trim window"),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn submit_trim(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<TrimBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let body = json_body(body, &request_id)?;
    let request = TransformRequest::Trim {
        asset_id: body.asset_id.into(),
        start_secs: body.start_secs,
        end_secs: body.end_secs,
    };
    accept(&ctx, &request_id, request).await
}

/// POST /api/transforms/text
#[utoipa::path(
    post,
    path = "/api/transforms/text",
    request_body = TextOverlayBody,
    responses(
        (status = 202, description = "Text overlay queued", body = SubmitResponse),
        (status = 400, description = "Invalid overlay parameters"),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn submit_text(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<TextOverlayBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let body = json_body(body, &request_id)?;
    let request = TransformRequest::TextOverlay {
        asset_id: body.asset_id.into(),
        text: body.text,
        x: body.x,
        y: body.y,
        font_size: body.font_size,
        font_color: body.font_color,
    };
    accept(&ctx, &request_id, request).await
}

/// POST /api/transforms/image
#[utoipa::path(
    post,
    path = "/api/transforms/image",
    request_body(content = ImageOverlayForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Image overlay queued", body = SubmitResponse),
        (status = 400, description = "Invalid form"),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn submit_image(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let request = image_request(&ctx, multipart)
        .await
        .map_err(tagged(&request_id))?;
    accept(&ctx, &request_id, request).await
}

async fn image_request(ctx: &AppContext, multipart: Multipart) -> Result<TransformRequest, Error> {
    let form = OverlayForm::read(multipart, "image_file").await?;
    let (asset_id, x, y) = form.common()?;
    let Some((name, bytes)) = form.file else {
        return Err(Error::Validation("Missing 'image_file' field.".into()));
    };

    let overlay = intake::stage_overlay(ctx, &name, &bytes).await?;
    Ok(TransformRequest::ImageOverlay {
        asset_id,
        overlay,
        x,
        y,
    })
}

/// POST /api/transforms/video
#[utoipa::path(
    post,
    path = "/api/transforms/video",
    request_body(content = VideoOverlayForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Video overlay queued", body = SubmitResponse),
        (status = 400, description = "Invalid form"),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn submit_video(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let request = video_request(&ctx, multipart)
        .await
        .map_err(tagged(&request_id))?;
    accept(&ctx, &request_id, request).await
}

async fn video_request(ctx: &AppContext, multipart: Multipart) -> Result<TransformRequest, Error> {
    let form = OverlayForm::read(multipart, "overlay_file").await?;
    let (asset_id, x, y) = form.common()?;

    let overlay = match (form.file, form.overlay_asset_id.as_deref()) {
        (Some((name, bytes)), None) => intake::stage_overlay(ctx, &name, &bytes).await?,
        (None, Some(raw)) => OverlayRef::Asset(parse_id(raw, "overlay asset")?),
        _ => {
            return Err(Error::Validation(
                "Provide exactly one of 'overlay_file' and 'overlay_asset_id'.".into(),
            ))
        }
    };

    Ok(TransformRequest::VideoOverlay {
        asset_id,
        overlay,
        x,
        y,
    })
}

/// Fields shared by the overlay forms, read fully before anything is staged.
#[derive(Default)]
struct OverlayForm {
    asset_id: Option<String>,
    x: Option<String>,
    y: Option<String>,
    file: Option<(String, Bytes)>,
    overlay_asset_id: Option<String>,
}

impl OverlayForm {
    async fn read(mut multipart: Multipart, file_field: &str) -> Result<Self, Error> {
        let malformed = |e: axum::extract::multipart::MultipartError| {
            Error::Validation(format!("Malformed multipart body: {e}"))
        };

        let mut form = OverlayForm::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "asset_id" => form.asset_id = Some(field.text().await.map_err(malformed)?),
                "x" => form.x = Some(field.text().await.map_err(malformed)?),
                "y" => form.y = Some(field.text().await.map_err(malformed)?),
                "overlay_asset_id" => {
                    let raw = field.text().await.map_err(malformed)?;
                    form.overlay_asset_id = Some(raw).filter(|s| !s.trim().is_empty());
                }
                n if n == file_field => {
                    let file_name = field.file_name().unwrap_or("overlay").to_string();
                    let bytes = field.bytes().await.map_err(malformed)?;
                    form.file = Some((file_name, bytes));
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn common(&self) -> Result<(AssetId, i64, i64), Error> {
        let asset_id = self
            .asset_id
            .as_deref()
            .ok_or_else(|| Error::Validation("Missing 'asset_id' field.".into()))?;
        Ok((
            parse_id(asset_id, "asset")?,
            parse_position(self.x.as_deref(), "x")?,
            parse_position(self.y.as_deref(), "y")?,
        ))
    }
}

fn parse_position(raw: Option<&str>, name: &str) -> Result<i64, Error> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(DEFAULT_POSITION),
        Some(s) => s
            .parse()
            .map_err(|_| Error::Validation(format!("{name} must be an integer."))),
    }
}
