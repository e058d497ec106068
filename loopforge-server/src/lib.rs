//! loopforge-server - LoopForge backend service
//!
//! Sample-chopping / generative-sequencing workbench: ingests a track,
//! produces stems, slices them on transients, and drives a deterministic
//! generative sequencer. Around the engines sit a persistent job queue, an
//! event bus and a session/asset storage layer.

pub mod api;
pub mod engines;
pub mod error;
pub mod moments;
pub mod queue;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use sqlx::SqlitePool;

use loopforge_common::config::ForgeConfig;
use loopforge_common::{EventBus, Storage};

use crate::queue::JobQueue;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub storage: Storage,
    pub event_bus: EventBus,
    pub queue: Arc<JobQueue>,
    pub config: ForgeConfig,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        storage: Storage,
        event_bus: EventBus,
        queue: Arc<JobQueue>,
        config: ForgeConfig,
    ) -> Self {
        Self {
            db,
            storage,
            event_bus,
            queue,
            config,
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    // Uploads are capped by config, not by axum's 2 MB default
    let max_body = state.config.max_upload_mb as usize * 1024 * 1024 + 64 * 1024;

    Router::new()
        .merge(api::sessions::routes())
        .merge(api::jobs::routes())
        .merge(api::assets::routes())
        .merge(api::slices::routes())
        .merge(api::moments::routes())
        .merge(api::system::routes())
        .merge(api::ws::routes())
        .layer(axum::extract::DefaultBodyLimit::max(max_body))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
