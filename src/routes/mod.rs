pub mod profiles;
pub mod queue;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Queue
        .route(
            "/api/v1/queue",
            get(queue::overview).post(queue::enqueue).delete(queue::clear),
        )
        .route("/api/v1/queue/{id}", delete(queue::remove))
        .route("/api/v1/queue/history", get(queue::history))
        .route("/api/v1/queue/durable", get(queue::durable))
        .route("/api/v1/queue/start", post(queue::start))
        .route("/api/v1/queue/stop", post(queue::stop))
        // Profiles
        .route("/api/v1/profiles", get(profiles::list))
        .route("/api/v1/profiles/reload", post(profiles::reload))
        .route("/api/v1/profiles/{id}/update", post(profiles::update))
}
