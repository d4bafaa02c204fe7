use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::models::QueueItem;
use crate::profiles::ProfileLookup;
use crate::queue::StopMode;
use crate::queue::store::QueueSnapshot;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub profile_id: i64,
    pub app_id: Option<String>,
    pub is_main_app: Option<bool>,
}

#[derive(Deserialize)]
pub struct StopParams {
    pub cancel_current: Option<bool>,
}

#[derive(Serialize)]
pub struct QueueOverview {
    pub queue: Vec<QueueItem>,
    pub history: Vec<QueueItem>,
    pub processing: bool,
    pub durability_degraded: bool,
    pub settings: QueueSettings,
}

/// Effective runtime settings, as loaded from the environment.
#[derive(Serialize)]
pub struct QueueSettings {
    pub history_limit: usize,
    pub job_timeout_secs: u64,
    pub autostart: bool,
}

pub async fn overview(State(state): State<SharedState>) -> Json<QueueOverview> {
    let snapshot = state.queue.snapshot().await;
    Json(QueueOverview {
        queue: snapshot.queue,
        history: snapshot.history,
        processing: state.queue.is_processing().await,
        durability_degraded: state.queue.durability_degraded(),
        settings: QueueSettings {
            history_limit: state.config.history_limit,
            job_timeout_secs: state.config.supervisor.job_timeout.as_secs(),
            autostart: state.config.autostart,
        },
    })
}

pub async fn enqueue(
    State(state): State<SharedState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<Value>, AppError> {
    let profile = state
        .profiles
        .get_profile(req.profile_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", req.profile_id)))?;

    let app_id = req.app_id.unwrap_or_else(|| profile.app_id.clone());
    let is_main_app = req.is_main_app.unwrap_or(app_id == profile.app_id);

    let item = state.queue.enqueue(profile.id, &app_id, is_main_app).await?;
    Ok(Json(with_warning(&state, json!({ "message": "Queued", "item": item }))))
}

pub async fn clear(State(state): State<SharedState>) -> Json<Value> {
    let removed = state.queue.clear().await;
    Json(with_warning(&state, json!({ "message": "Cleared", "removed": removed })))
}

pub async fn remove(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    if !state.queue.remove(id).await {
        return Err(AppError::NotFound(format!("No pending item {id}")));
    }
    Ok(Json(with_warning(&state, json!({ "message": "Removed" }))))
}

pub async fn history(State(state): State<SharedState>) -> Json<Vec<QueueItem>> {
    Json(state.queue.history().await)
}

pub async fn durable(State(state): State<SharedState>) -> Result<Json<QueueSnapshot>, AppError> {
    Ok(Json(state.queue.load_from_durable_store().await?))
}

pub async fn start(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    if !state.queue.start_processing().await {
        return Err(AppError::Conflict(
            "Queue is stopping; try again once the current item finishes".to_string(),
        ));
    }
    Ok(Json(json!({ "message": "Processing started" })))
}

pub async fn stop(
    State(state): State<SharedState>,
    Query(params): Query<StopParams>,
) -> Json<Value> {
    let mode = if params.cancel_current.unwrap_or(false) {
        StopMode::CancelCurrent
    } else {
        StopMode::AfterCurrent
    };
    state.queue.stop_processing(mode).await;
    Json(json!({ "message": "Processing stopped" }))
}

fn with_warning(state: &SharedState, mut body: Value) -> Value {
    if state.queue.durability_degraded() {
        body["warning"] = json!("Queue could not be saved to disk; changes are held in memory only");
    }
    body
}
