//! Media duration probing.
//!
//! A probe never fails its caller: any problem (missing tool, unreadable
//! file, unparsable output, timeout) yields `None`, which callers record as
//! an unknown duration of `0.0`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, FFPROBE};

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds, or `None` if it could not be determined.
    async fn probe_duration(&self, path: &Path) -> Option<f64>;
}

/// Asks `ffprobe` for the container duration.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    ffprobe_path: Option<PathBuf>,
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(ffprobe_path: PathBuf, timeout: Duration) -> Self {
        Self {
            ffprobe_path: Some(ffprobe_path),
            timeout,
        }
    }

    /// A probe using the registry's ffprobe. Without one every probe is `None`.
    pub fn from_registry(tools: &ToolRegistry, timeout: Duration) -> Self {
        Self {
            ffprobe_path: tools.get(FFPROBE).map(Path::to_path_buf),
            timeout,
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let ffprobe = self.ffprobe_path.clone()?;

        let result = ToolCommand::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await;

        match result {
            Ok(out) => {
                let duration = parse_duration(&out.stdout_lossy());
                if duration.is_none() {
                    tracing::debug!(path = %path.display(), "ffprobe reported no usable duration");
                }
                duration
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "duration probe failed: {e}");
                None
            }
        }
    }
}

/// First line of ffprobe output as a non-negative finite number.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .next()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}
