pub mod config;
pub mod error;
pub mod state;
pub mod models;
pub mod routes;
pub mod profiles;
pub mod manifest;
pub mod resolver;
pub mod supervisor;
pub mod queue;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::manifest::AcfManifestReader;
use crate::profiles::ProfileStore;
use crate::queue::store::QueueStore;
use crate::queue::{QueueDeps, QueueManager};
use crate::resolver::DependencyResolver;
use crate::state::{AppState, SharedState};
use crate::supervisor::ProcessSupervisor;

/// Wire the production collaborators together. The worker is not started.
pub async fn build_state(config: Config) -> Result<SharedState, String> {
    let profiles = Arc::new(ProfileStore::open(&config.profiles_file).await?);

    let queue = QueueManager::open(QueueDeps {
        store: QueueStore::new(&config.queue_file),
        profiles: profiles.clone(),
        executor: Arc::new(ProcessSupervisor::new(config.supervisor.clone())),
        resolver: DependencyResolver::new(Arc::new(AcfManifestReader)),
        history_limit: config.history_limit,
    })
    .await
    .map_err(|e| format!("Failed to open queue: {e}"))?;

    Ok(Arc::new(AppState {
        config,
        profiles,
        queue,
    }))
}

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
