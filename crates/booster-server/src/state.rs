//! Application state shared across handlers.

use booster_pod::Scheduler;
use booster_registry::ModelRegistry;
use std::sync::Arc;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Pod scheduler: admission, queues, worker pools.
    pub scheduler: Arc<Scheduler>,
    /// Model registry, for health reporting.
    pub registry: Arc<ModelRegistry>,
    /// Instance ID from the configuration, echoed by `/health`.
    pub server_id: String,
}
