//! Notification trigger routes.
//!
//! Signature verification of inbound webhooks happens in front of this service.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use herald_common::error::AppError;
use herald_engine::orchestrator::CheckOutcome;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/hooks/release", post(release_event))
        .route("/api/notify/check", post(manual_check))
}

/// Subset of a release webhook event.
#[derive(Debug, Deserialize)]
pub struct ReleaseEvent {
    pub action: String,
    pub release: Option<ReleaseEventRelease>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseEventRelease {
    pub tag_name: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub notified: bool,
    pub reason: Option<&'static str>,
    pub result: CheckOutcome,
}

impl From<CheckOutcome> for CheckResponse {
    fn from(outcome: CheckOutcome) -> Self {
        Self {
            notified: outcome.notified(),
            reason: outcome.reason(),
            result: outcome,
        }
    }
}

/// POST /api/hooks/release: Run a cycle when a release is published.
async fn release_event(
    State(state): State<AppState>,
    Json(event): Json<ReleaseEvent>,
) -> Result<Json<serde_json::Value>, AppError> {
    if event.action != "published" {
        tracing::debug!(action = %event.action, "Ignoring release event");
        return Ok(Json(serde_json::json!({ "ignored": true, "action": event.action })));
    }

    let tag = event.release.map(|r| r.tag_name).unwrap_or_default();
    tracing::info!(tag = %tag, "Release published, checking for notifications");

    // The new release must not be hidden behind a cached lookup.
    state.notifications.releases().clear_cache().await;
    let outcome = state.run_check().await?;
    Ok(Json(serde_json::to_value(CheckResponse::from(outcome))?))
}

/// POST /api/notify/check: Run a cycle now.
async fn manual_check(State(state): State<AppState>) -> Result<Json<CheckResponse>, AppError> {
    let outcome = state.run_check().await?;
    Ok(Json(outcome.into()))
}
