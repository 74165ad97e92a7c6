//! Notification payload building.
//!
//! One `ReleaseAnnouncement` is built per cycle from the resolved releases; each
//! recipient then gets a payload that only differs in its footer.

use chrono::Utc;

use herald_common::types::{
    ChangeSet, ChangeType, NotificationPayload, PayloadField, ReleaseRecord, UserPreference,
};

use crate::changelog::aggregate_changes;

/// Default per-field character budget (Discord embed field values).
pub const DEFAULT_FIELD_VALUE_LIMIT: usize = 1024;

const BULLET: &str = "• ";

/// Render `items` as bullet lines within `budget` characters.
///
/// Greedy: keep as many leading items as fit together with a trailing
/// `…and K more` line naming the items that were left out.
pub fn truncate_items(items: &[String], budget: usize) -> String {
    let lines: Vec<String> = items.iter().map(|i| format!("{}{}", BULLET, i)).collect();
    let full = lines.join("\n");
    if full.chars().count() <= budget {
        return full;
    }

    let more = |k: usize| format!("…and {} more", k);
    let mut kept = 0;
    let mut used = 0;

    for (idx, line) in lines.iter().enumerate() {
        let separator = usize::from(idx > 0);
        let remaining_after = lines.len() - idx - 1;
        // Room for "\n…and K more" unless this line would be the last one.
        let suffix = if remaining_after > 0 {
            1 + more(remaining_after).chars().count()
        } else {
            0
        };

        if used + separator + line.chars().count() + suffix > budget {
            break;
        }
        used += separator + line.chars().count();
        kept += 1;
    }

    let omitted = lines.len() - kept;
    if kept == 0 {
        return more(omitted);
    }
    format!("{}\n{}", lines[..kept].join("\n"), more(omitted))
}

/// Which footer a recipient sees, based on their history with the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FooterKind {
    /// Never notified before and never touched their settings.
    FirstNotification,
    /// Notified before but never touched their settings.
    NotOptedOut,
    /// Changed their settings at some point.
    Interacted,
}

impl FooterKind {
    pub fn for_recipient(pref: &UserPreference) -> Self {
        if pref.last_interaction.is_some() {
            FooterKind::Interacted
        } else if pref.last_notified.is_none() {
            FooterKind::FirstNotification
        } else {
            FooterKind::NotOptedOut
        }
    }
}

fn footer_text(pref: &UserPreference) -> String {
    let base = match FooterKind::for_recipient(pref) {
        FooterKind::FirstNotification => {
            "You're receiving this because release updates are on by default. \
             Use /notifications off to opt out."
        }
        FooterKind::NotOptedOut => {
            "You're getting release updates because you haven't opted out. \
             Use /notifications off to stop them."
        }
        FooterKind::Interacted => "Change what you hear about with /notifications.",
    };

    match &pref.last_notified {
        Some(version) => format!("Thanks for reading since v{}! {}", version.trim_start_matches('v'), base),
        None => base.to_string(),
    }
}

fn color_for(change_type: ChangeType) -> u32 {
    match change_type {
        ChangeType::Major => 0xE74C3C,
        ChangeType::Minor => 0x3498DB,
        ChangeType::Patch => 0x2ECC71,
    }
}

/// Everything a cycle announces, shared by all recipients.
#[derive(Debug, Clone)]
pub struct ReleaseAnnouncement {
    /// Newest first; never empty.
    pub releases: Vec<ReleaseRecord>,
    pub changes: ChangeSet,
    pub current_version: String,
    pub last_version: Option<String>,
    pub change_type: ChangeType,
}

impl ReleaseAnnouncement {
    pub fn new(
        releases: Vec<ReleaseRecord>,
        current_version: String,
        last_version: Option<String>,
        change_type: ChangeType,
    ) -> Self {
        let changes = aggregate_changes(&releases);
        Self {
            releases,
            changes,
            current_version,
            last_version,
            change_type,
        }
    }

    fn newest(&self) -> Option<&ReleaseRecord> {
        self.releases.first()
    }

    fn title_and_description(&self) -> (String, String) {
        match self.releases.as_slice() {
            [single] => (
                format!("🚀 {} released", single.name),
                format!(
                    "A new {} release is available: **{}**.",
                    self.change_type, single.tag
                ),
            ),
            many => {
                let tags: Vec<&str> = many.iter().map(|r| r.tag.as_str()).collect();
                (
                    format!("🚀 {} new releases", many.len()),
                    format!(
                        "Catch up on {} releases since your last update: {}.",
                        many.len(),
                        tags.join(", ")
                    ),
                )
            }
        }
    }

    fn change_fields(&self, field_value_limit: usize) -> Vec<PayloadField> {
        let sections = [
            ("⚠️ Breaking Changes", &self.changes.breaking),
            ("✨ New Features", &self.changes.features),
            ("🐛 Bug Fixes", &self.changes.fixes),
            ("📝 Other Changes", &self.changes.other),
        ];

        sections
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(name, items)| PayloadField {
                name: name.to_string(),
                value: truncate_items(items, field_value_limit),
                inline: false,
            })
            .collect()
    }

    /// Build the payload for one recipient.
    pub fn payload_for(&self, recipient: &UserPreference, field_value_limit: usize) -> NotificationPayload {
        let (title, description) = self.title_and_description();
        let mut fields = Vec::new();

        if let Some(last) = &self.last_version {
            fields.push(PayloadField {
                name: "Version".to_string(),
                value: format!("{} → {}", last, self.current_version),
                inline: true,
            });
        }

        let change_fields = self.change_fields(field_value_limit);
        if change_fields.is_empty() {
            let url = self.newest().map(|r| r.html_url.as_str()).unwrap_or_default();
            fields.push(PayloadField {
                name: "Release notes".to_string(),
                value: if url.is_empty() {
                    "No categorized changes were listed for this release.".to_string()
                } else {
                    format!("See the full release notes: {}", url)
                },
                inline: false,
            });
        } else {
            fields.extend(change_fields);
        }

        NotificationPayload {
            title,
            description,
            url: self
                .newest()
                .map(|r| r.html_url.clone())
                .filter(|u| !u.is_empty()),
            color: color_for(self.change_type),
            fields,
            footer: footer_text(recipient),
            timestamp: self
                .newest()
                .and_then(|r| r.published_at)
                .unwrap_or_else(Utc::now),
        }
    }
}
