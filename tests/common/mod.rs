//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] over an in-memory database
//! with storage in a temp dir. ffmpeg is replaced by a small `sh` script so
//! the real process handling (exit codes, timeouts, partial output cleanup)
//! is exercised without media tools installed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use vf_av::{DurationProbe, FfmpegTranscoder, ToolRegistry};
use vf_core::config::Config;
use vf_core::{MediaAsset, NewAsset};
use vf_db::pool::{get_conn, init_memory_pool, PooledConnection};
use vf_db::queries::{assets, jobs};
use vf_server::context::AppContext;
use vf_server::router::build_router;
use vf_server::worker::{process_job, JobOutcome};

/// ffmpeg stand-in body that writes a small file to the output path.
pub const WRITES_OUTPUT: &str = r#"printf video > "$last""#;

/// Probe returning a fixed duration.
pub struct FixedProbe(pub Option<f64>);

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: TempDir,
    args_file: PathBuf,
}

impl TestHarness {
    /// Harness whose ffmpeg always succeeds.
    pub fn new() -> Self {
        Self::with_script(WRITES_OUTPUT)
    }

    /// Harness whose ffmpeg runs `body`. `$last` holds the output path.
    pub fn with_script(body: &str) -> Self {
        Self::with_script_and_config(body, Config::default())
    }

    pub fn with_script_and_config(body: &str, mut config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("outputs");
        config.workers.poll_interval_ms = 20;

        let args_file = dir.path().join("ffmpeg-args.txt");
        let script = dir.path().join("ffmpeg");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nfor last; do :; done\n{body}\n",
                args_file.display()
            ),
        )
        .expect("failed to write fake ffmpeg");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod fake ffmpeg");

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let tools = ToolRegistry::with_paths([(vf_av::tools::FFMPEG, script.clone())]);
        let ctx = AppContext::new(
            db,
            config,
            tools,
            Arc::new(FfmpegTranscoder::new(script)),
            Arc::new(FixedProbe(None)),
        );

        Self {
            ctx,
            dir,
            args_file,
        }
    }

    /// Start an Axum server on a random port.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Get a database connection. The in-memory pool holds one connection,
    /// so drop it before calling into the context.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.ctx.db).expect("failed to get db connection")
    }

    /// Register a source asset backed by a real (tiny) file.
    pub fn seed_asset(&self, name: &str, duration_secs: f64) -> MediaAsset {
        let media = self.dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let path = media.join(format!("{}_{name}", next_seq()));
        std::fs::write(&path, b"source").unwrap();

        let conn = self.conn();
        assets::create_asset(
            &conn,
            &NewAsset {
                file_name: name.into(),
                locator: path.to_string_lossy().into_owned(),
                size_bytes: 6,
                duration_secs,
                derived_from: None,
            },
        )
        .unwrap()
    }

    /// Claim the oldest pending job and run it to completion.
    pub async fn run_next(&self) -> Option<JobOutcome> {
        let job = {
            let conn = self.conn();
            jobs::claim_next(&conn, "test-worker").unwrap()
        }?;
        Some(process_job(&self.ctx, "test-worker", job).await)
    }

    /// Arguments the fake ffmpeg received on its most recent run.
    pub fn last_ffmpeg_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args_file)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Files currently in the output directory.
    pub fn output_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.ctx.config.storage.output_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn next_seq() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static N: AtomicU64 = AtomicU64::new(0);
    format!("{:08}", N.fetch_add(1, Ordering::Relaxed))
}
