//! Version tracker: detects and classifies version changes.
//!
//! Reads the authoritative current version, compares it to the persisted
//! last-notified marker and classifies the transition as major, minor or patch.
//! Comparison is deliberately lenient: a component without leading digits counts as 0.
//!
//! The tracker never writes the marker on its own during a check. The orchestrator
//! saves it once the recipient decision for a cycle is final, so a crash mid-cycle
//! re-processes the version instead of silently skipping it.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use herald_common::error::AppError;
use herald_common::storage::{JsonStore, VERSION_MARKER_KEY};
use herald_common::types::{ChangeType, VersionMarker};

/// Parsed `major.minor.patch` triple. Field order gives the lexicographic `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTriple {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl std::fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Strip surrounding whitespace and a leading `v`/`V` from a tag.
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

/// Decompose a version string. Never fails: missing or non-numeric components are 0.
pub fn parse_version(version: &str) -> VersionTriple {
    let mut parts = normalize_tag(version).split('.').map(leading_number);
    VersionTriple {
        major: parts.next().unwrap_or(0),
        minor: parts.next().unwrap_or(0),
        patch: parts.next().unwrap_or(0),
    }
}

fn leading_number(component: &str) -> u64 {
    let digits: String = component
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Total order over parsed version triples.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    parse_version(a).cmp(&parse_version(b))
}

/// Highest-order component that increased from `last` to `current`, if any.
pub fn classify_change(last: &str, current: &str) -> Option<ChangeType> {
    let last = parse_version(last);
    let current = parse_version(current);
    if current <= last {
        return None;
    }

    if current.major > last.major {
        Some(ChangeType::Major)
    } else if current.minor > last.minor {
        Some(ChangeType::Minor)
    } else {
        Some(ChangeType::Patch)
    }
}

/// Where the authoritative current version comes from.
#[derive(Debug, Clone)]
pub enum VersionSource {
    /// A version known at startup (e.g. from configuration).
    Fixed(String),
    /// A file holding either plain text or a JSON object with a `version` key.
    File(PathBuf),
}

/// Result of comparing the current version to the last-notified marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub has_new_version: bool,
    pub current_version: String,
    pub last_version: Option<String>,
    pub change_type: Option<ChangeType>,
}

impl VersionCheck {
    pub fn is_first_run(&self) -> bool {
        self.last_version.is_none()
    }
}

/// Tracks which version the last notification cycle completed for.
pub struct VersionTracker {
    source: VersionSource,
    store: Arc<dyn JsonStore>,
}

impl VersionTracker {
    pub fn new(source: VersionSource, store: Arc<dyn JsonStore>) -> Self {
        Self { source, store }
    }

    /// Read the authoritative current version.
    pub async fn get_current_version(&self) -> Result<String, AppError> {
        let version = match &self.source {
            VersionSource::Fixed(version) => version.trim().to_string(),
            VersionSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AppError::Config(format!(
                        "cannot read current version from {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                extract_version(&raw)
            }
        };

        if version.is_empty() {
            return Err(AppError::Config(
                "current version source is empty".to_string(),
            ));
        }

        Ok(version)
    }

    /// Version of the persisted marker, or `None` when no cycle has completed yet.
    pub async fn get_last_notified_version(&self) -> Result<Option<String>, AppError> {
        match self.store.read(VERSION_MARKER_KEY).await? {
            Some(doc) => {
                let marker: VersionMarker = serde_json::from_value(doc)?;
                Ok(Some(marker.version))
            }
            None => Ok(None),
        }
    }

    /// Persist `{version, notifiedAt: now}`.
    pub async fn save_notified_version(&self, version: &str) -> Result<VersionMarker, AppError> {
        let marker = VersionMarker {
            version: version.to_string(),
            notified_at: Utc::now(),
        };
        self.store
            .write(VERSION_MARKER_KEY, &serde_json::to_value(&marker)?)
            .await?;

        tracing::info!(version = %version, "Saved notified version marker");
        Ok(marker)
    }

    /// Remove the marker. A missing marker is not an error.
    pub async fn clear_saved_version(&self) -> Result<(), AppError> {
        self.store.delete(VERSION_MARKER_KEY).await?;
        tracing::info!("Cleared notified version marker");
        Ok(())
    }

    /// Compare the current version to the marker. Does not persist anything.
    pub async fn check_for_new_version(&self) -> Result<VersionCheck, AppError> {
        let current_version = self.get_current_version().await?;
        let last_version = self.get_last_notified_version().await?;

        let check = match last_version {
            None => {
                // A fresh x.0.0 deploy is announced as a major release.
                let parsed = parse_version(&current_version);
                let change_type = if parsed.minor == 0 && parsed.patch == 0 {
                    ChangeType::Major
                } else {
                    ChangeType::Minor
                };
                VersionCheck {
                    has_new_version: true,
                    current_version,
                    last_version: None,
                    change_type: Some(change_type),
                }
            }
            Some(last) => {
                let change_type = classify_change(&last, &current_version);
                VersionCheck {
                    has_new_version: change_type.is_some(),
                    current_version,
                    last_version: Some(last),
                    change_type,
                }
            }
        };

        tracing::debug!(
            current = %check.current_version,
            last = ?check.last_version,
            change_type = ?check.change_type,
            "Version check complete"
        );

        Ok(check)
    }
}

fn extract_version(raw: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
        return map
            .get("version")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
    }
    raw.trim().to_string()
}
