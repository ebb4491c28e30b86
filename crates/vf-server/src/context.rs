//! Shared application context.
//!
//! [`AppContext`] is handed to route handlers through Axum state and to every
//! background task by clone. It holds no mutable state of its own; all job
//! state lives in the database.

use std::sync::Arc;

use vf_av::{DurationProbe, FilterOptions, ToolRegistry, Transcoder};
use vf_core::config::Config;
use vf_core::events::EventBus;
use vf_db::pool::DbPool;

use crate::queue::JobQueue;

/// Cheaply cloneable handle to everything a request or worker needs.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub event_bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub transcoder: Arc<dyn Transcoder>,
    pub probe: Arc<dyn DurationProbe>,
    pub queue: JobQueue,
}

impl AppContext {
    /// Assemble a context. The queue and event bus are created fresh.
    pub fn new(
        db: DbPool,
        config: Config,
        tools: ToolRegistry,
        transcoder: Arc<dyn Transcoder>,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        let config = Arc::new(config);
        let queue = JobQueue::new(db.clone(), config.workers.poll_interval());
        Self {
            db,
            config,
            event_bus: Arc::new(EventBus::default()),
            tools: Arc::new(tools),
            transcoder,
            probe,
            queue,
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::from(&self.config.transforms)
    }
}
