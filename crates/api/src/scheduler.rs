use std::time::Duration;

use herald_common::error::AppError;

use crate::state::AppState;

/// Periodically runs a notification cycle, sharing the re-entrancy guard with
/// the HTTP triggers.
pub struct CheckScheduler {
    state: AppState,
    interval: Option<Duration>,
}

impl CheckScheduler {
    /// An interval of 0 seconds runs a single check at startup and stops.
    pub fn new(state: AppState, interval_secs: u64) -> Self {
        Self {
            state,
            interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
        }
    }

    /// Run until the task is cancelled. The first check happens immediately.
    pub async fn run(&self) {
        let Some(period) = self.interval else {
            tracing::info!("Scheduled checks disabled, running a single startup check");
            self.tick().await;
            return;
        };

        tracing::info!(interval_secs = period.as_secs(), "Release check scheduler started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        match self.state.run_check().await {
            Ok(outcome) => {
                tracing::debug!(notified = outcome.notified(), reason = ?outcome.reason(), "Scheduled check finished");
            }
            Err(AppError::Conflict(_)) => {
                tracing::debug!("Skipping scheduled check, another cycle is running");
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled release check failed");
            }
        }
    }
}
