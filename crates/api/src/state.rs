//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio::sync::Mutex;

use herald_common::error::AppError;
use herald_engine::orchestrator::{CheckOutcome, NotificationOrchestrator};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<NotificationOrchestrator>,
    /// Held for the duration of a notification cycle.
    cycle_guard: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(notifications: Arc<NotificationOrchestrator>) -> Self {
        Self {
            notifications,
            cycle_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Run one notification cycle unless another trigger is already running one.
    ///
    /// The orchestrator does not serialize cycles itself; webhook, manual and
    /// scheduled triggers all go through here.
    pub async fn run_check(&self) -> Result<CheckOutcome, AppError> {
        let _guard = self.cycle_guard.try_lock().map_err(|_| {
            AppError::Conflict("a release check is already running".to_string())
        })?;
        self.notifications.check_and_notify().await
    }

    /// Whether a cycle is in progress right now.
    pub fn check_running(&self) -> bool {
        self.cycle_guard.try_lock().is_err()
    }
}
