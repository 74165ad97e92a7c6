//! Preference store: per-user notification settings with debounced persistence.
//!
//! All reads are served from memory. Mutations mark the store dirty and schedule a
//! single delayed write; a newer `save()` cancels the pending one, so a burst of
//! updates ends in exactly one write of the final state. `force_save()` drains the
//! pending write immediately (shutdown, tests).
//!
//! This store is the only source of truth for who receives notifications.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use herald_common::error::AppError;
use herald_common::storage::{JsonStore, PREFERENCES_KEY};
use herald_common::types::{ChangeType, NotificationLevel, UserPreference};

/// Default delay between the last mutation and the durable write.
const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PreferenceStoreConfig {
    pub debounce: Duration,
}

impl Default for PreferenceStoreConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Partial update merged onto a user's current preferences.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdate {
    pub opted_out: Option<bool>,
    pub notification_level: Option<NotificationLevel>,
    pub last_notified: Option<String>,
    pub last_interaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub major: usize,
    pub minor: usize,
    pub patch: usize,
    pub none: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceStatistics {
    pub total_users: usize,
    pub opted_out: usize,
    pub notified_users: usize,
    pub by_level: LevelCounts,
}

/// The single outstanding delayed write, if any.
#[derive(Default)]
struct PendingWrite {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

struct Inner {
    store: Arc<dyn JsonStore>,
    prefs: RwLock<HashMap<String, UserPreference>>,
    pending: Mutex<PendingWrite>,
    /// Serializes snapshot-and-write so the newest snapshot always lands last.
    write_lock: Mutex<()>,
    debounce: Duration,
}

impl Inner {
    async fn write_snapshot(&self) -> Result<(), AppError> {
        let _writing = self.write_lock.lock().await;
        let snapshot: BTreeMap<String, UserPreference> = self
            .prefs
            .read()
            .await
            .iter()
            .map(|(id, pref)| (id.clone(), pref.clone()))
            .collect();
        let users = snapshot.len();

        self.store
            .write(PREFERENCES_KEY, &serde_json::to_value(&snapshot)?)
            .await?;

        tracing::debug!(users, "Preferences written");
        Ok(())
    }
}

/// In-memory preference map backed by a durable JSON store. Cheap to clone.
#[derive(Clone)]
pub struct PreferenceStore {
    inner: Arc<Inner>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn JsonStore>, config: PreferenceStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                prefs: RwLock::new(HashMap::new()),
                pending: Mutex::new(PendingWrite::default()),
                write_lock: Mutex::new(()),
                debounce: config.debounce,
            }),
        }
    }

    /// Populate memory from durable storage. Nothing stored means a first run.
    pub async fn load(&self) -> Result<usize, AppError> {
        let loaded: HashMap<String, UserPreference> =
            match self.inner.store.read(PREFERENCES_KEY).await? {
                Some(doc) => serde_json::from_value::<HashMap<String, UserPreference>>(doc)?
                    .into_iter()
                    .map(|(id, mut pref)| {
                        pref.user_id = id.clone();
                        (id, pref)
                    })
                    .collect(),
                None => {
                    tracing::info!("No stored preferences, starting empty");
                    HashMap::new()
                }
            };

        let count = loaded.len();
        *self.inner.prefs.write().await = loaded;
        tracing::info!(users = count, "Preferences loaded");
        Ok(count)
    }

    /// Schedule a debounced write, replacing any pending one.
    pub async fn save(&self) {
        let mut pending = self.inner.pending.lock().await;
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
        pending.generation += 1;
        let generation = pending.generation;

        let inner = Arc::clone(&self.inner);
        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;

            {
                let mut pending = inner.pending.lock().await;
                if pending.generation != generation {
                    return;
                }
                pending.handle = None;
            }

            if let Err(e) = inner.write_snapshot().await {
                tracing::error!(error = %e, "Debounced preference write failed");
            }
        }));
    }

    /// Cancel any pending write and persist the current state now.
    pub async fn force_save(&self) -> Result<(), AppError> {
        {
            let mut pending = self.inner.pending.lock().await;
            if let Some(handle) = pending.handle.take() {
                handle.abort();
            }
            pending.generation += 1;
        }
        self.inner.write_snapshot().await
    }

    /// Whether a debounced write is scheduled and has not started yet.
    pub async fn has_pending_write(&self) -> bool {
        self.inner.pending.lock().await.handle.is_some()
    }

    /// Stored preferences merged over defaults. Never mutates the store.
    pub async fn get_user_preferences(&self, user_id: &str) -> UserPreference {
        self.inner
            .prefs
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserPreference::with_defaults(user_id, Utc::now()))
    }

    /// Merge `update` onto the user's current preferences and schedule a save.
    pub async fn update_user_preferences(
        &self,
        user_id: &str,
        update: PreferenceUpdate,
    ) -> UserPreference {
        let updated = {
            let mut prefs = self.inner.prefs.write().await;
            let now = Utc::now();
            let mut pref = prefs
                .get(user_id)
                .cloned()
                .unwrap_or_else(|| UserPreference::with_defaults(user_id, now));

            if let Some(opted_out) = update.opted_out {
                pref.opted_out = opted_out;
            }
            if let Some(level) = update.notification_level {
                pref.notification_level = level;
            }
            if let Some(version) = update.last_notified {
                pref.last_notified = Some(version);
            }
            if let Some(at) = update.last_interaction {
                pref.last_interaction = Some(at);
            }
            pref.updated_at = now;

            prefs.insert(user_id.to_string(), pref.clone());
            pref
        };

        self.save().await;
        updated
    }

    /// Make a user known to the store with default settings.
    pub async fn register_user(&self, user_id: &str) -> UserPreference {
        if let Some(existing) = self.inner.prefs.read().await.get(user_id) {
            return existing.clone();
        }
        tracing::info!(user_id = %user_id, "Registered user for release notifications");
        self.update_user_preferences(user_id, PreferenceUpdate::default())
            .await
    }

    pub async fn set_opt_out(&self, user_id: &str, opted_out: bool) -> UserPreference {
        tracing::info!(user_id = %user_id, opted_out, "Opt-out changed");
        self.update_user_preferences(
            user_id,
            PreferenceUpdate {
                opted_out: Some(opted_out),
                last_interaction: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// Set the level from user input; rejects anything outside major/minor/patch/none.
    pub async fn set_notification_level(
        &self,
        user_id: &str,
        level: &str,
    ) -> Result<UserPreference, AppError> {
        let level: NotificationLevel = level.parse()?;
        tracing::info!(user_id = %user_id, level = %level, "Notification level changed");
        Ok(self
            .update_user_preferences(
                user_id,
                PreferenceUpdate {
                    notification_level: Some(level),
                    last_interaction: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await)
    }

    pub async fn record_notification(&self, user_id: &str, version: &str) -> UserPreference {
        self.update_user_preferences(
            user_id,
            PreferenceUpdate {
                last_notified: Some(version.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Users who should hear about a change of `change_type`, sorted by id.
    pub async fn get_users_to_notify(&self, change_type: ChangeType) -> Vec<String> {
        let prefs = self.inner.prefs.read().await;
        let mut users: Vec<String> = prefs
            .values()
            .filter(|p| !p.opted_out && p.notification_level.admits(change_type))
            .map(|p| p.user_id.clone())
            .collect();
        users.sort();
        users
    }

    pub async fn get_statistics(&self) -> PreferenceStatistics {
        let prefs = self.inner.prefs.read().await;
        let mut stats = PreferenceStatistics {
            total_users: prefs.len(),
            ..Default::default()
        };

        for pref in prefs.values() {
            if pref.opted_out {
                stats.opted_out += 1;
            }
            if pref.last_notified.is_some() {
                stats.notified_users += 1;
            }
            match pref.notification_level {
                NotificationLevel::Major => stats.by_level.major += 1,
                NotificationLevel::Minor => stats.by_level.minor += 1,
                NotificationLevel::Patch => stats.by_level.patch += 1,
                NotificationLevel::None => stats.by_level.none += 1,
            }
        }

        stats
    }

    pub async fn has_any_user_been_notified(&self) -> bool {
        self.inner
            .prefs
            .read()
            .await
            .values()
            .any(|p| p.last_notified.is_some())
    }
}
