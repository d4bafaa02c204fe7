use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::models::Profile;
use crate::profiles::ProfileLookup;
use crate::state::SharedState;

pub async fn list(State(state): State<SharedState>) -> Json<Vec<Profile>> {
    Json(state.profiles.list().await)
}

/// Queue an update of the profile's own app.
pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let profile = state
        .profiles
        .get_profile(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Profile {id} not found")))?;

    let item = state.queue.enqueue(profile.id, &profile.app_id, true).await?;
    Ok(Json(json!({ "message": "Queued", "item": item })))
}

pub async fn reload(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let count = state.profiles.reload().await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "message": "Profiles reloaded", "count": count })))
}
