//! Running one ffmpeg invocation.
//!
//! [`Transcoder`] is the seam workers depend on, so tests can swap in a fake.
//! [`FfmpegTranscoder`] is the real implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use vf_core::{Error, Result, ToolFailure};

use crate::command::ToolCommand;
use crate::filters::Invocation;
use crate::tools::{ToolRegistry, FFMPEG};

/// Executes a built [`Invocation`] under a hard timeout.
///
/// On success the output file exists. On any failure no output file is
/// left behind. Implementations never retry.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    pub fn from_registry(tools: &ToolRegistry) -> Result<Self> {
        Ok(Self::new(tools.require(FFMPEG)?.to_path_buf()))
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<PathBuf> {
        let output = &invocation.output;

        let result = ToolCommand::new(self.ffmpeg_path.clone())
            .args(invocation.args.iter().cloned())
            .timeout(timeout)
            .execute()
            .await;

        let run = match result {
            Ok(run) => run,
            Err(e) => {
                remove_partial(output).await;
                return Err(e);
            }
        };

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() => Ok(output.clone()),
            _ => {
                remove_partial(output).await;
                Err(Error::Tool {
                    tool: FFMPEG.into(),
                    kind: ToolFailure::MissingOutput,
                    message: format!("{} was not written", output.display()),
                    diagnostics: run.stderr,
                })
            }
        }
    }
}

/// Delete a partially written output. Missing files are fine.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove partial output: {e}"),
    }
}
