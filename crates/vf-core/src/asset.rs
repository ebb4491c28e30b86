//! Media asset records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AssetId;

/// An immutable stored media file.
///
/// Transform outputs are always new assets with `derived_from` pointing at
/// their source; an asset's bytes are never rewritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: AssetId,
    /// Display name of the file.
    pub file_name: String,
    /// Stable path to the bytes on local storage.
    pub locator: String,
    pub size_bytes: u64,
    /// `0.0` means the probe failed and the duration is unknown.
    pub duration_secs: f64,
    /// Source asset for transform outputs, `None` for direct uploads.
    pub derived_from: Option<AssetId>,
    pub created_at: DateTime<Utc>,
}

impl MediaAsset {
    /// Whether the duration is known (probing succeeded).
    pub fn has_known_duration(&self) -> bool {
        self.duration_secs > 0.0
    }
}

/// Attributes for creating a [`MediaAsset`]; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub file_name: String,
    pub locator: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub derived_from: Option<AssetId>,
}
