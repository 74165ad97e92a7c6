use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Classification of a version transition. Ordered `Patch < Minor < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Patch,
    Minor,
    Major,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Patch => write!(f, "patch"),
            ChangeType::Minor => write!(f, "minor"),
            ChangeType::Major => write!(f, "major"),
        }
    }
}

/// The most severe kind of change a user wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Major,
    #[default]
    Minor,
    Patch,
    None,
}

impl NotificationLevel {
    pub const ALL: [NotificationLevel; 4] = [
        NotificationLevel::Major,
        NotificationLevel::Minor,
        NotificationLevel::Patch,
        NotificationLevel::None,
    ];

    /// Whether a user at this level should hear about a change of `change_type`.
    ///
    /// Inclusion is monotonic: `patch` admits everything, `minor` admits minor and
    /// major, `major` admits only major, `none` admits nothing.
    pub fn admits(self, change_type: ChangeType) -> bool {
        match self {
            NotificationLevel::None => false,
            NotificationLevel::Major => change_type == ChangeType::Major,
            NotificationLevel::Minor => change_type >= ChangeType::Minor,
            NotificationLevel::Patch => true,
        }
    }
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationLevel::Major => write!(f, "major"),
            NotificationLevel::Minor => write!(f, "minor"),
            NotificationLevel::Patch => write!(f, "patch"),
            NotificationLevel::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for NotificationLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(NotificationLevel::Major),
            "minor" => Ok(NotificationLevel::Minor),
            "patch" => Ok(NotificationLevel::Patch),
            "none" => Ok(NotificationLevel::None),
            other => Err(AppError::Validation(format!(
                "Invalid notification level '{}'. Valid levels: {}",
                other,
                NotificationLevel::ALL
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Durable record of the last version a notification cycle completed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMarker {
    pub version: String,
    pub notified_at: DateTime<Utc>,
}

/// A published release as reported by the release API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub tag: String,
    pub name: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub html_url: String,
    pub draft: bool,
    pub prerelease: bool,
}

/// Changelog entries of one or more releases, bucketed by heading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub features: Vec<String>,
    pub fixes: Vec<String>,
    pub breaking: Vec<String>,
    pub other: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
            && self.fixes.is_empty()
            && self.breaking.is_empty()
            && self.other.is_empty()
    }
}

/// Per-user notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub opted_out: bool,
    #[serde(default)]
    pub notification_level: NotificationLevel,
    #[serde(default)]
    pub last_notified: Option<String>,
    /// Last time the user changed a setting themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    /// Defaults for a user the store has never seen.
    pub fn with_defaults(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            opted_out: false,
            notification_level: NotificationLevel::default(),
            last_notified: None,
            last_interaction: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One named block of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Structured, transport-agnostic notification content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub color: u32,
    pub fields: Vec<PayloadField>,
    pub footer: String,
    pub timestamp: DateTime<Utc>,
}
