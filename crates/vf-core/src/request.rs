//! Transform requests: the four operations a job can perform.
//!
//! [`TransformRequest`] is persisted as JSON on the job row, so its serde
//! shape is part of the storage format. Validation happens before a job is
//! created; anything that reaches the queue has already passed
//! [`TransformRequest::validate`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::asset::MediaAsset;
use crate::error::{Error, Result};
use crate::ids::AssetId;

/// Longest overlay text accepted, in characters.
pub const MAX_TEXT_CHARS: usize = 1024;

// ---------------------------------------------------------------------------
// TransformKind
// ---------------------------------------------------------------------------

/// Discriminant of a [`TransformRequest`], stored in its own column for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Trim,
    TextOverlay,
    ImageOverlay,
    VideoOverlay,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::Trim => "trim",
            TransformKind::TextOverlay => "text_overlay",
            TransformKind::ImageOverlay => "image_overlay",
            TransformKind::VideoOverlay => "video_overlay",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trim" => Ok(TransformKind::Trim),
            "text_overlay" => Ok(TransformKind::TextOverlay),
            "image_overlay" => Ok(TransformKind::ImageOverlay),
            "video_overlay" => Ok(TransformKind::VideoOverlay),
            other => Err(Error::Validation(format!("unknown transform kind: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// OverlayRef
// ---------------------------------------------------------------------------

/// Second input for image and video overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayRef {
    /// An existing stored asset.
    Asset(AssetId),
    /// A temporary file written during request intake, removed when the job ends.
    Upload(PathBuf),
}

// ---------------------------------------------------------------------------
// TransformRequest
// ---------------------------------------------------------------------------

fn default_position() -> i64 {
    10
}

fn default_font_size() -> i64 {
    24
}

fn default_font_color() -> String {
    "white".into()
}

/// One transformation applied to a source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformRequest {
    Trim {
        asset_id: AssetId,
        start_secs: f64,
        end_secs: f64,
    },
    TextOverlay {
        asset_id: AssetId,
        text: String,
        #[serde(default = "default_position")]
        x: i64,
        #[serde(default = "default_position")]
        y: i64,
        #[serde(default = "default_font_size")]
        font_size: i64,
        #[serde(default = "default_font_color")]
        font_color: String,
    },
    ImageOverlay {
        asset_id: AssetId,
        overlay: OverlayRef,
        #[serde(default = "default_position")]
        x: i64,
        #[serde(default = "default_position")]
        y: i64,
    },
    VideoOverlay {
        asset_id: AssetId,
        overlay: OverlayRef,
        #[serde(default = "default_position")]
        x: i64,
        #[serde(default = "default_position")]
        y: i64,
    },
}

impl TransformRequest {
    pub fn kind(&self) -> TransformKind {
        match self {
            TransformRequest::Trim { .. } => TransformKind::Trim,
            TransformRequest::TextOverlay { .. } => TransformKind::TextOverlay,
            TransformRequest::ImageOverlay { .. } => TransformKind::ImageOverlay,
            TransformRequest::VideoOverlay { .. } => TransformKind::VideoOverlay,
        }
    }

    /// The asset being transformed.
    pub fn asset_id(&self) -> AssetId {
        match self {
            TransformRequest::Trim { asset_id, .. }
            | TransformRequest::TextOverlay { asset_id, .. }
            | TransformRequest::ImageOverlay { asset_id, .. }
            | TransformRequest::VideoOverlay { asset_id, .. } => *asset_id,
        }
    }

    pub fn overlay(&self) -> Option<&OverlayRef> {
        match self {
            TransformRequest::ImageOverlay { overlay, .. }
            | TransformRequest::VideoOverlay { overlay, .. } => Some(overlay),
            TransformRequest::Trim { .. } | TransformRequest::TextOverlay { .. } => None,
        }
    }

    /// Temporary intake files owned by this request.
    pub fn temporary_uploads(&self) -> Vec<&Path> {
        match self.overlay() {
            Some(OverlayRef::Upload(path)) => vec![path.as_path()],
            _ => Vec::new(),
        }
    }

    /// A request can be re-run only if every input outlives the job.
    pub fn is_retryable(&self) -> bool {
        self.temporary_uploads().is_empty()
    }

    /// Check the numeric and string constraints of the request.
    ///
    /// Pure and deterministic: the same request always yields the same error.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransformRequest::Trim {
                start_secs,
                end_secs,
                ..
            } => {
                if !start_secs.is_finite() || !end_secs.is_finite() {
                    return Err(Error::Validation(
                        "start and end must be finite numbers.".into(),
                    ));
                }
                if *start_secs < 0.0 {
                    return Err(Error::Validation("start must be non-negative.".into()));
                }
                if start_secs >= end_secs {
                    return Err(Error::Validation("start must be less than end.".into()));
                }
            }
            TransformRequest::TextOverlay {
                text,
                x,
                y,
                font_size,
                font_color,
                ..
            } => {
                if text.trim().is_empty() {
                    return Err(Error::Validation("Text cannot be empty.".into()));
                }
                if text.chars().count() > MAX_TEXT_CHARS {
                    return Err(Error::Validation(format!(
                        "Text must be at most {MAX_TEXT_CHARS} characters."
                    )));
                }
                check_position(*x, *y)?;
                if *font_size <= 0 {
                    return Err(Error::Validation(
                        "font_size must be greater than zero.".into(),
                    ));
                }
                if !is_valid_color(font_color) {
                    return Err(Error::Validation(format!(
                        "font_color '{font_color}' is not a color name or hex value."
                    )));
                }
            }
            TransformRequest::ImageOverlay { x, y, .. }
            | TransformRequest::VideoOverlay { x, y, .. } => check_position(*x, *y)?,
        }
        Ok(())
    }

    /// Check constraints that depend on the resolved source asset.
    ///
    /// A trim window may not run past a known duration. Unknown durations
    /// (`0.0`) are not checked.
    pub fn validate_against(&self, source: &MediaAsset) -> Result<()> {
        if let TransformRequest::Trim { end_secs, .. } = self {
            if source.has_known_duration() && *end_secs > source.duration_secs {
                return Err(Error::Validation(format!(
                    "end ({end_secs}s) exceeds source duration ({}s).",
                    source.duration_secs
                )));
            }
        }
        Ok(())
    }
}

fn check_position(x: i64, y: i64) -> Result<()> {
    if x < 0 || y < 0 {
        return Err(Error::Validation(
            "x and y positions must be non-negative.".into(),
        ));
    }
    Ok(())
}

/// Color names (`white`), hex (`#ff0000`, `0xff0000`) and alpha suffixes (`white@0.5`).
fn is_valid_color(color: &str) -> bool {
    !color.is_empty()
        && color.len() <= 32
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '.'))
}
