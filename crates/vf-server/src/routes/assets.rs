//! Asset upload and lookup.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use vf_core::{AssetId, Error, MediaAsset};
use vf_db::pool::get_conn;
use vf_db::queries::assets;

use crate::context::AppContext;
use crate::error::AppError;
use crate::intake;
use crate::routes::parse_id;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListAssetsParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AssetResponse {
    pub id: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Seconds; 0 when unknown.
    pub duration_secs: f64,
    pub derived_from: Option<String>,
    pub created_at: String,
}

impl AssetResponse {
    pub fn from_model(asset: &MediaAsset) -> Self {
        Self {
            id: asset.id.to_string(),
            file_name: asset.file_name.clone(),
            size_bytes: asset.size_bytes,
            duration_secs: asset.duration_secs,
            derived_from: asset.derived_from.map(|id| id.to_string()),
            created_at: asset.created_at.to_rfc3339(),
        }
    }
}

/// Multipart body for an upload.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// POST /api/assets
#[utoipa::path(
    post,
    path = "/api/assets",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Asset stored", body = AssetResponse),
        (status = 400, description = "Missing or empty file")
    )
)]
pub async fn upload_asset(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AssetResponse>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read upload: {e}")))?;

        let asset = intake::store_upload(&ctx, &file_name, &bytes).await?;
        return Ok((StatusCode::CREATED, Json(AssetResponse::from_model(&asset))));
    }

    Err(Error::Validation("Missing 'file' field.".into()).into())
}

/// GET /api/assets
#[utoipa::path(
    get,
    path = "/api/assets",
    params(ListAssetsParams),
    responses(
        (status = 200, description = "List assets, newest first", body = Vec<AssetResponse>)
    )
)]
pub async fn list_assets(
    State(ctx): State<AppContext>,
    Query(params): Query<ListAssetsParams>,
) -> Result<Json<Vec<AssetResponse>>, AppError> {
    let conn = get_conn(&ctx.db)?;
    let list = assets::list_assets(&conn, params.offset.max(0), params.limit.clamp(1, 500))?;
    Ok(Json(list.iter().map(AssetResponse::from_model).collect()))
}

/// GET /api/assets/{id}
#[utoipa::path(
    get,
    path = "/api/assets/{id}",
    params(("id" = String, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Asset details", body = AssetResponse),
        (status = 404, description = "Asset not found")
    )
)]
pub async fn get_asset(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<AssetResponse>, AppError> {
    let asset_id: AssetId = parse_id(&id, "asset")?;
    let conn = get_conn(&ctx.db)?;
    let asset = assets::get_asset(&conn, asset_id)?
        .ok_or_else(|| Error::not_found("asset", asset_id))?;
    Ok(Json(AssetResponse::from_model(&asset)))
}
