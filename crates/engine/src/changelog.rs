//! Changelog parsing: turns free-text release bodies into categorized entries.
//!
//! The parser is line oriented. Markdown headings switch the active bucket, bullet
//! lines are appended to whichever bucket is active. Bullets before any recognised
//! heading land in `other`.

use herald_common::types::{ChangeSet, ReleaseRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Features,
    Fixes,
    Breaking,
    Other,
}

/// Map a heading's text to a bucket. Unknown headings keep the current bucket.
fn classify_heading(text: &str) -> Option<Bucket> {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["breaking"]) {
        Some(Bucket::Breaking)
    } else if has(&["feature", "added"]) {
        Some(Bucket::Features)
    } else if has(&["fix", "bug"]) {
        Some(Bucket::Fixes)
    } else if has(&["changed", "other", "misc", "chore", "removed"]) {
        Some(Bucket::Other)
    } else {
        None
    }
}

/// Heading text of `#`-style or whole-line bold (`**Fixes**`) headings.
fn heading_text(line: &str) -> Option<&str> {
    if line.starts_with('#') {
        return Some(line.trim_start_matches('#').trim());
    }
    line.strip_prefix("**")
        .and_then(|rest| rest.strip_suffix("**").or_else(|| rest.strip_suffix("**:")))
        .map(str::trim)
}

fn bullet_text(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Parse one release body into buckets.
pub fn parse_release_changes(release: &ReleaseRecord) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut active = Bucket::Other;

    for line in release.body.lines() {
        let line = line.trim();

        if let Some(heading) = heading_text(line) {
            if let Some(bucket) = classify_heading(heading) {
                active = bucket;
            }
            continue;
        }

        if let Some(entry) = bullet_text(line) {
            let entry = entry.to_string();
            match active {
                Bucket::Features => changes.features.push(entry),
                Bucket::Fixes => changes.fixes.push(entry),
                Bucket::Breaking => changes.breaking.push(entry),
                Bucket::Other => changes.other.push(entry),
            }
        }
    }

    changes
}

/// Concatenate the changes of several releases, keeping the given (newest-first)
/// order. With more than one release every entry is prefixed with `[tag]`.
pub fn aggregate_changes(releases: &[ReleaseRecord]) -> ChangeSet {
    let prefix = releases.len() > 1;
    let mut aggregated = ChangeSet::default();

    for release in releases {
        let parsed = parse_release_changes(release);
        let tagged = |entries: Vec<String>| -> Vec<String> {
            if prefix {
                entries
                    .into_iter()
                    .map(|e| format!("[{}] {}", release.tag, e))
                    .collect()
            } else {
                entries
            }
        };

        aggregated.features.extend(tagged(parsed.features));
        aggregated.fixes.extend(tagged(parsed.fixes));
        aggregated.breaking.extend(tagged(parsed.breaking));
        aggregated.other.extend(tagged(parsed.other));
    }

    aggregated
}
