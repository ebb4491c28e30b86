//! vf-server: HTTP API, job queue, and background workers.
//!
//! This crate ties the other vf-* crates into a running service:
//!
//! - Axum HTTP API for uploads, transform submission and job status
//! - Durable job queue on the `jobs` table with wake-up signalling
//! - A fixed pool of worker tasks that run ffmpeg jobs
//! - A liveness monitor that fails jobs orphaned by a dead worker
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod intake;
pub mod liveness;
pub mod middleware;
pub mod queue;
pub mod router;
pub mod routes;
pub mod status;
pub mod submit;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vf_av::{DurationProbe, FfmpegTranscoder, FfprobeDurationProbe, ToolRegistry, Transcoder};
use vf_core::config::Config;

use crate::context::AppContext;
use crate::liveness::LivenessMonitor;
use crate::worker::WorkerPool;

/// Start the vidforge server.
///
/// Opens the database, discovers ffmpeg/ffprobe, starts the workers and the
/// liveness monitor, and serves HTTP until a shutdown signal arrives. Workers
/// finish the job they hold before this returns.
pub async fn start(config: Config) -> vf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let db = vf_db::pool::init_pool(db_path)?;
    tracing::info!("Database opened at {}", db_path.display());

    for dir in [&config.storage.upload_dir, &config.storage.output_dir] {
        std::fs::create_dir_all(dir)?;
    }

    let tools = ToolRegistry::discover(&config.tools);
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let transcoder: Arc<dyn Transcoder> = match FfmpegTranscoder::from_registry(&tools) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            // Jobs will fail with an "unavailable" tool error rather than hang.
            tracing::warn!("{e}; transforms will fail until ffmpeg is installed");
            Arc::new(FfmpegTranscoder::new(vf_av::tools::FFMPEG.into()))
        }
    };
    let probe: Arc<dyn DurationProbe> = Arc::new(FfprobeDurationProbe::from_registry(
        &tools,
        config.workers.probe_timeout(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| vf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let concurrency = config.workers.concurrency;
    let ctx = AppContext::new(db, config, tools, transcoder, probe);
    let cancel = CancellationToken::new();

    let liveness_handle = LivenessMonitor::new(ctx.clone()).map(|monitor| {
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    });
    let pool = WorkerPool::spawn(ctx.clone(), concurrency, cancel.clone());
    tracing::info!(workers = pool.len(), "Worker pool started");

    let app = router::build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| vf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Listening on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;
    if let Err(e) = served {
        tracing::error!("HTTP server error: {e}");
    }

    cancel.cancel();
    pool.join().await;
    if let Some(handle) = liveness_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
