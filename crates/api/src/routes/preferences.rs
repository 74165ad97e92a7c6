//! User notification preference routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{NotificationLevel, UserPreference};
use herald_engine::preferences::{PreferenceStatistics, PreferenceUpdate};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/users/{id}/preferences",
            get(get_preferences).patch(update_preferences),
        )
        .route("/api/users/{id}/register", post(register_user))
        .route("/api/preferences/stats", get(statistics))
}

/// Parameters for updating a user's preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesParams {
    pub opted_out: Option<bool>,
    pub notification_level: Option<String>,
}

/// GET /api/users/:id/preferences: Current settings (defaults if unknown).
async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<UserPreference> {
    Json(state.notifications.preferences().get_user_preferences(&id).await)
}

/// PATCH /api/users/:id/preferences: Change opt-out and/or level.
async fn update_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<UpdatePreferencesParams>,
) -> Result<Json<UserPreference>, AppError> {
    // A bad level rejects the whole update.
    let level = params
        .notification_level
        .as_deref()
        .map(str::parse::<NotificationLevel>)
        .transpose()?;

    if params.opted_out.is_none() && level.is_none() {
        return Err(AppError::Validation(
            "Provide optedOut and/or notificationLevel".to_string(),
        ));
    }

    let prefs = state.notifications.preferences();
    let updated = prefs
        .update_user_preferences(
            &id,
            PreferenceUpdate {
                opted_out: params.opted_out,
                notification_level: level,
                last_interaction: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;

    tracing::info!(
        user_id = %id,
        opted_out = updated.opted_out,
        level = %updated.notification_level,
        "Preferences updated"
    );
    Ok(Json(updated))
}

/// POST /api/users/:id/register: Make a user known with default settings.
async fn register_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<UserPreference> {
    Json(state.notifications.preferences().register_user(&id).await)
}

/// GET /api/preferences/stats: Aggregate preference counts.
async fn statistics(State(state): State<AppState>) -> Json<PreferenceStatistics> {
    Json(state.notifications.preferences().get_statistics().await)
}
