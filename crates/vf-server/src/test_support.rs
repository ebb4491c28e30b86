//! Fakes and fixtures shared by this crate's unit tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vf_av::{DurationProbe, Invocation, ToolRegistry, Transcoder};
use vf_core::config::Config;
use vf_core::{Error, MediaAsset, NewAsset, ToolFailure};
use vf_db::pool::{get_conn, init_memory_pool};
use vf_db::queries::assets;

use crate::context::AppContext;

pub enum Behavior {
    Write(Vec<u8>),
    Fail(ToolFailure, Vec<u8>),
}

/// Stands in for ffmpeg: writes fixed bytes to the output or fails.
pub struct FakeTranscoder {
    behavior: Behavior,
    pub calls: Mutex<Vec<Invocation>>,
}

impl FakeTranscoder {
    pub fn writes(bytes: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Write(bytes.to_vec()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fails(kind: ToolFailure, stderr: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Fail(kind, stderr.to_vec()),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn run(&self, invocation: &Invocation, _timeout: Duration) -> vf_core::Result<PathBuf> {
        self.calls.lock().unwrap().push(invocation.clone());
        match &self.behavior {
            Behavior::Write(bytes) => {
                tokio::fs::write(&invocation.output, bytes).await?;
                Ok(invocation.output.clone())
            }
            Behavior::Fail(kind, stderr) => {
                Err(Error::tool("ffmpeg", *kind).with_diagnostics(stderr.clone()))
            }
        }
    }
}

pub struct FakeProbe(pub Option<f64>);

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}

/// A context over an in-memory database with storage under a temp dir.
pub fn context() -> (AppContext, TempDir) {
    context_with(Config::default(), FakeTranscoder::writes(b"out"), FakeProbe(None))
}

pub fn context_with(
    mut config: Config,
    transcoder: Arc<FakeTranscoder>,
    probe: FakeProbe,
) -> (AppContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    config.storage.upload_dir = dir.path().join("uploads");
    config.storage.output_dir = dir.path().join("outputs");
    config.workers.poll_interval_ms = 20;

    let ctx = AppContext::new(
        init_memory_pool().unwrap(),
        config,
        ToolRegistry::default(),
        transcoder,
        Arc::new(probe),
    );
    (ctx, dir)
}

/// Register an asset whose locator is a path that need not exist.
pub fn seed_asset(ctx: &AppContext, name: &str, duration_secs: f64) -> MediaAsset {
    let conn = get_conn(&ctx.db).unwrap();
    assets::create_asset(
        &conn,
        &NewAsset {
            file_name: name.into(),
            locator: format!("/media/{}_{name}", uuid::Uuid::new_v4()),
            size_bytes: 1024,
            duration_secs,
            derived_from: None,
        },
    )
    .unwrap()
}
