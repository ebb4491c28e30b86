//! Storing uploaded files.
//!
//! Uploads land under `storage.upload_dir` with a `<uuid>_<name>` file name,
//! so two uploads of the same name never collide. Overlay files attached to a
//! single transform go to a `staging` subdirectory and are deleted when their
//! job ends.

use std::path::{Path, PathBuf};

use uuid::Uuid;
use vf_core::events::EventPayload;
use vf_core::{Error, MediaAsset, NewAsset, OverlayRef, Result};
use vf_db::pool::get_conn;
use vf_db::queries::assets;

use crate::context::AppContext;
use crate::submit::remove_file_quietly;

const STAGING_DIR: &str = "staging";
const MAX_NAME_CHARS: usize = 100;

/// Store an uploaded media file and register it as a source asset.
pub async fn store_upload(ctx: &AppContext, file_name: &str, bytes: &[u8]) -> Result<MediaAsset> {
    let path = write_unique(&ctx.config.storage.upload_dir, file_name, bytes).await?;

    let duration_secs = ctx.probe.probe_duration(&path).await.unwrap_or(0.0);

    let created = get_conn(&ctx.db).and_then(|conn| {
        assets::create_asset(
            &conn,
            &NewAsset {
                file_name: sanitize_file_name(file_name),
                locator: path.to_string_lossy().into_owned(),
                size_bytes: bytes.len() as u64,
                duration_secs,
                derived_from: None,
            },
        )
    });
    let asset = match created {
        Ok(asset) => asset,
        Err(e) => {
            remove_file_quietly(&path).await;
            return Err(e);
        }
    };

    tracing::info!(asset_id = %asset.id, size_bytes = asset.size_bytes, duration_secs, "asset stored");
    ctx.event_bus.emit(EventPayload::AssetCreated {
        asset_id: asset.id,
        derived_from: None,
    });
    Ok(asset)
}

/// Write a one-off overlay file for a single transform request.
pub async fn stage_overlay(ctx: &AppContext, file_name: &str, bytes: &[u8]) -> Result<OverlayRef> {
    let dir = ctx.config.storage.upload_dir.join(STAGING_DIR);
    let path = write_unique(&dir, file_name, bytes).await?;
    tracing::debug!(path = %path.display(), "overlay staged");
    Ok(OverlayRef::Upload(path))
}

async fn write_unique(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(Error::Validation("Uploaded file is empty.".into()));
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}", Uuid::new_v4(), sanitize_file_name(file_name)));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Reduce a client-supplied name to a safe single path component.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
