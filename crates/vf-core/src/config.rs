//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub workers: WorkerConfig,
    pub transforms: TransformConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }
        if self.workers.concurrency == 0 {
            warnings.push("workers.concurrency is 0; a single worker will be started".into());
        }
        if self.workers.transcode_timeout_secs == 0 {
            warnings.push("workers.transcode_timeout_secs is 0; every transcode will time out".into());
        }
        if self.workers.max_attempts == 0 {
            warnings.push("workers.max_attempts is 0; treated as 1".into());
        }
        if self.workers.stale_after_secs != 0
            && self.workers.stale_after_secs <= self.workers.transcode_timeout_secs
        {
            warnings.push(
                "workers.stale_after_secs should exceed transcode_timeout_secs or live jobs will be failed"
                    .into(),
            );
        }
        if self.transforms.overlay_scale_width == 0 || self.transforms.overlay_scale_height == 0 {
            warnings.push("transforms.overlay_scale_* must be positive".into());
        }
        if self.storage.upload_dir == self.storage.output_dir {
            warnings.push("storage.upload_dir and output_dir are the same directory".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            db_path: PathBuf::from("./data/vidforge.db"),
        }
    }
}

/// Where uploaded and produced media files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./data/uploads"),
            output_dir: PathBuf::from("./data/outputs"),
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Paths to external CLI tools. `None` means look them up on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Worker pool and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Fallback poll interval when no enqueue wake-up arrives.
    pub poll_interval_ms: u64,
    pub transcode_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// `STARTED` jobs older than this are failed as lost. `0` disables the monitor.
    pub stale_after_secs: u64,
    pub liveness_interval_secs: u64,
    /// Total attempts for a request that fails in the transcoder.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval_ms: 1000,
            transcode_timeout_secs: 600,
            probe_timeout_secs: 30,
            stale_after_secs: 1800,
            liveness_interval_secs: 60,
            max_attempts: 1,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Filter parameters shared by every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Bounding box the overlay stream of a video overlay is scaled to.
    pub overlay_scale_width: u32,
    pub overlay_scale_height: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            overlay_scale_width: 200,
            overlay_scale_height: 200,
        }
    }
}
