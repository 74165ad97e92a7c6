//! Notification orchestrator: decides what to announce and fans it out.
//!
//! A cycle runs:
//! 1. Version check (no new version → no side effects)
//! 2. Release range resolution (first run: capped history from a floor version)
//! 3. Recipient selection from the preference store
//! 4. Per-recipient payload build + delivery, isolated per recipient
//! 5. Version marker write, strictly after the whole batch
//!
//! Errors before step 3 abort the cycle without persisting anything, so the next
//! trigger retries cleanly. Concurrent `check_and_notify` calls are not serialized
//! here; the host owns the re-entrancy guard.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

use herald_common::error::{AppError, DeliveryError};
use herald_common::types::{ChangeType, NotificationPayload};

use crate::payload::{DEFAULT_FIELD_VALUE_LIMIT, ReleaseAnnouncement};
use crate::preferences::{PreferenceStore, PreferenceUpdate};
use crate::releases::ReleaseSource;
use crate::version::VersionTracker;

/// Sends one payload to one recipient.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lower bound used to resolve releases when no marker exists.
    pub first_run_floor: String,
    /// Most recent releases announced on a first run.
    pub first_run_release_cap: usize,
    /// Per-field character budget of the transport.
    pub field_value_limit: usize,
    /// Maximum deliveries in flight at once.
    pub delivery_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            first_run_floor: "0.0.0".to_string(),
            first_run_release_cap: 5,
            field_value_limit: DEFAULT_FIELD_VALUE_LIMIT,
            delivery_concurrency: 4,
        }
    }
}

/// Aggregate result of a completed fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub version: String,
    pub change_type: ChangeType,
    pub releases: usize,
    pub users_notified: usize,
    /// Every failed delivery, including the ones that caused an opt-out.
    pub users_failed: usize,
    pub users_opted_out: usize,
}

/// What a call to `check_and_notify` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CheckOutcome {
    NoNewVersion,
    NoReleasesFound {
        version: String,
    },
    NoRecipients {
        version: String,
        change_type: ChangeType,
    },
    Notified(DeliveryReport),
}

impl CheckOutcome {
    pub fn notified(&self) -> bool {
        matches!(self, CheckOutcome::Notified(_))
    }

    /// Why nothing was sent, when nothing was.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            CheckOutcome::NoNewVersion => Some("No new version"),
            CheckOutcome::NoReleasesFound { .. } => Some("No releases found"),
            CheckOutcome::NoRecipients { .. } => Some("No users opted in for this change type"),
            CheckOutcome::Notified(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecipientResult {
    Delivered,
    OptedOut,
    Failed,
}

/// Context object owning the notification subsystem. Build once at startup.
pub struct NotificationOrchestrator {
    tracker: VersionTracker,
    releases: Arc<dyn ReleaseSource>,
    preferences: PreferenceStore,
    config: OrchestratorConfig,
    transport: RwLock<Option<Arc<dyn DeliveryTransport>>>,
}

impl NotificationOrchestrator {
    pub fn new(
        tracker: VersionTracker,
        releases: Arc<dyn ReleaseSource>,
        preferences: PreferenceStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tracker,
            releases,
            preferences,
            config,
            transport: RwLock::new(None),
        }
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    pub fn releases(&self) -> &Arc<dyn ReleaseSource> {
        &self.releases
    }

    pub async fn is_initialized(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Load state, heal a dangling marker and attach the transport.
    ///
    /// Fails (and stays uninitialized) when the current version cannot be read.
    pub async fn initialize(&self, transport: Arc<dyn DeliveryTransport>) -> Result<(), AppError> {
        let current = self.tracker.get_current_version().await?;
        self.preferences.load().await?;

        // A marker with nobody ever notified would suppress the first-run
        // announcement forever.
        if let Some(last) = self.tracker.get_last_notified_version().await? {
            if !self.preferences.has_any_user_been_notified().await {
                tracing::warn!(
                    marker = %last,
                    "Version marker exists but no user was ever notified, clearing it"
                );
                self.tracker.clear_saved_version().await?;
            }
        }

        *self.transport.write().await = Some(transport);
        tracing::info!(version = %current, "Release notifications initialized");
        Ok(())
    }

    /// Run one notification cycle.
    pub async fn check_and_notify(&self) -> Result<CheckOutcome, AppError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(AppError::NotInitialized)?;

        let span = tracing::info_span!("release_check", cycle_id = %Uuid::new_v4());
        self.run_cycle(transport).instrument(span).await
    }

    /// Flush preferences before the process exits.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.preferences.force_save().await?;
        tracing::info!("Release notifications shut down");
        Ok(())
    }

    async fn run_cycle(&self, transport: Arc<dyn DeliveryTransport>) -> Result<CheckOutcome, AppError> {
        let check = self.tracker.check_for_new_version().await?;
        let change_type = match check.change_type {
            Some(change_type) if check.has_new_version => change_type,
            _ => {
                tracing::debug!(version = %check.current_version, "No new version");
                return Ok(CheckOutcome::NoNewVersion);
            }
        };
        let version = check.current_version.clone();

        let releases = match &check.last_version {
            None => {
                let mut releases = self
                    .releases
                    .get_releases_between(&self.config.first_run_floor, &version)
                    .await?;
                releases.truncate(self.config.first_run_release_cap);
                releases
            }
            Some(last) => self.releases.get_releases_between(last, &version).await?,
        };

        if releases.is_empty() {
            tracing::warn!(version = %version, "No releases found for new version");
            return Ok(CheckOutcome::NoReleasesFound { version });
        }

        let recipients = self.preferences.get_users_to_notify(change_type).await;
        if recipients.is_empty() {
            self.tracker.save_notified_version(&version).await?;
            tracing::info!(
                version = %version,
                change_type = %change_type,
                "No users opted in for this change type"
            );
            return Ok(CheckOutcome::NoRecipients {
                version,
                change_type,
            });
        }

        let announcement =
            ReleaseAnnouncement::new(releases, version.clone(), check.last_version, change_type);
        tracing::info!(
            version = %version,
            change_type = %change_type,
            releases = announcement.releases.len(),
            recipients = recipients.len(),
            "Delivering release notification"
        );

        let results: Vec<RecipientResult> = futures::stream::iter(recipients)
            .map(|user_id| {
                let transport = Arc::clone(&transport);
                let announcement = &announcement;
                let version = version.as_str();
                async move {
                    self.notify_recipient(transport.as_ref(), announcement, &user_id, version)
                        .await
                }
            })
            .buffer_unordered(self.config.delivery_concurrency.max(1))
            .collect()
            .await;

        let users_notified = results
            .iter()
            .filter(|r| **r == RecipientResult::Delivered)
            .count();
        let users_opted_out = results
            .iter()
            .filter(|r| **r == RecipientResult::OptedOut)
            .count();
        let users_failed = results.len() - users_notified;

        self.tracker.save_notified_version(&version).await?;

        let report = DeliveryReport {
            version,
            change_type,
            releases: announcement.releases.len(),
            users_notified,
            users_failed,
            users_opted_out,
        };
        tracing::info!(
            version = %report.version,
            users_notified,
            users_failed,
            users_opted_out,
            "Release notification cycle complete"
        );

        Ok(CheckOutcome::Notified(report))
    }

    async fn notify_recipient(
        &self,
        transport: &dyn DeliveryTransport,
        announcement: &ReleaseAnnouncement,
        user_id: &str,
        version: &str,
    ) -> RecipientResult {
        let pref = self.preferences.get_user_preferences(user_id).await;
        let payload = announcement.payload_for(&pref, self.config.field_value_limit);

        match transport.deliver(user_id, &payload).await {
            Ok(()) => {
                self.preferences.record_notification(user_id, version).await;
                tracing::info!(user_id = %user_id, "Release notification delivered");
                RecipientResult::Delivered
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Recipient cannot be messaged, opting them out"
                );
                // Not a user choice, so last_interaction stays untouched.
                self.preferences
                    .update_user_preferences(
                        user_id,
                        PreferenceUpdate {
                            opted_out: Some(true),
                            ..Default::default()
                        },
                    )
                    .await;
                RecipientResult::OptedOut
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Release notification failed");
                RecipientResult::Failed
            }
        }
    }
}
