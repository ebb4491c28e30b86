//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use vf_core::{Error, ToolFailure};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Shortest wait for the output pipes to drain once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Longest stderr line copied into an error message.
const SUMMARY_MAX_CHARS: usize = 200;

/// Output captured from a successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error. Not assumed to be UTF-8.
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// ```no_run
/// use vf_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> vf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "error", "-show_entries", "format=duration"])
///     .arg("/path/to/video.mp4")
///     .timeout(Duration::from_secs(10))
///     .execute()
///     .await?;
/// println!("{}", output.stdout_lossy());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time. The process is killed when it expires.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run the command to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Every failure is an [`Error::Tool`] carrying the captured stderr:
    ///
    /// - [`ToolFailure::Unavailable`] if the process could not be spawned.
    /// - [`ToolFailure::ExitStatus`] if it exited non-zero.
    /// - [`ToolFailure::TimedOut`] if it outlived the timeout; the process is
    ///   killed before this returns.
    ///
    /// The timeout also bounds collecting output after a normal exit. Output
    /// still held open by a leftover grandchild past that point is dropped.
    pub async fn execute(&self) -> vf_core::Result<ToolOutput> {
        let tool = self.tool_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = %tool, args = ?self.args, "spawning tool");

        let mut child = cmd.spawn().map_err(|e| Error::Tool {
            tool: tool.clone(),
            kind: ToolFailure::Unavailable,
            message: format!("failed to spawn: {e}"),
            diagnostics: Vec::new(),
        })?;

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(Error::Tool {
                    tool,
                    kind: ToolFailure::ExitStatus(None),
                    message: format!("I/O error waiting for process: {e}"),
                    diagnostics: Vec::new(),
                });
            }
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %tool, "failed to kill timed-out process: {e}");
                }
                stdout_task.abort();
                let stderr = drain(stderr_task, DRAIN_GRACE).await;
                return Err(
                    Error::tool(tool, ToolFailure::TimedOut(self.timeout)).with_diagnostics(stderr)
                );
            }
        };

        let grace = deadline
            .saturating_duration_since(Instant::now())
            .max(DRAIN_GRACE);
        let (stdout, stderr) = tokio::join!(
            drain(stdout_task, grace),
            drain(stderr_task, grace)
        );

        if !status.success() {
            let kind = ToolFailure::ExitStatus(status.code());
            let message = match last_line(&stderr) {
                Some(line) => format!("{kind}: {line}"),
                None => kind.to_string(),
            };
            return Err(Error::Tool {
                tool,
                kind,
                message,
                diagnostics: stderr,
            });
        }

        Ok(ToolOutput {
            status,
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // A read error just truncates what we keep.
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Collect a reader's bytes. A reader still blocked after `grace` (e.g. on a
/// grandchild holding the pipe open) is aborted and yields nothing.
async fn drain(task: JoinHandle<Vec<u8>>, grace: Duration) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// Last non-empty line of diagnostic output, decoded lossily and shortened.
fn last_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(SUMMARY_MAX_CHARS).collect())
}
