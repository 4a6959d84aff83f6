//! Content-addressed identifiers for changes and tags.
//!
//! Identifiers are SHA-1 hex digests over a fixed, space-separated field
//! layout. The layout must stay bit-for-bit stable: registries written by
//! other implementations record the same ids.
//!
//! - change: `{name} {deps} {timestamp} {planner_name} {planner_email} {note}`
//! - tag: `{name} {timestamp} {planner_name} {planner_email} {note}`
//!
//! `{deps}` is the space-joined canonical dependency list (empty when there
//! are none) and `{timestamp}` is the UTC instant as
//! `YYYY-MM-DDTHH:MM:SS+00:00`.

use chrono::{DateTime, SecondsFormat, Utc};
use sha1::{Digest, Sha1};

use super::types::{Change, Tag};

/// Hasher for computing change and tag identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdHasher;

impl IdHasher {
    /// Creates a new identifier hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the identifier of a change.
    #[must_use]
    pub fn change_id(&self, change: &Change) -> String {
        let deps = change
            .dependencies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        let content = format!(
            "{} {} {} {} {} {}",
            change.name,
            deps,
            Self::format_timestamp(&change.timestamp),
            change.planner_name,
            change.planner_email,
            change.note
        );

        Self::digest(&content)
    }

    /// Computes the identifier of a tag.
    #[must_use]
    pub fn tag_id(&self, tag: &Tag) -> String {
        let content = format!(
            "{} {} {} {} {}",
            tag.name,
            Self::format_timestamp(&tag.timestamp),
            tag.planner_name,
            tag.planner_email,
            tag.note
        );

        Self::digest(&content)
    }

    /// Computes a short identifier (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_id(id: &str) -> &str {
        id.get(..8).unwrap_or(id)
    }

    /// Formats a timestamp the way identifiers expect it.
    #[must_use]
    pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    fn digest(content: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::{Dependency, Planner};
    use chrono::TimeZone;

    fn planner() -> Planner {
        Planner::new("Alice Example", "alice@example.com")
    }

    fn users() -> Change {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        Change::new("users", ts, &planner()).with_note("Create users table")
    }

    fn posts() -> Change {
        let ts = Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap();
        Change::new("posts", ts, &planner())
            .with_note("Add posts")
            .with_dependencies(vec![Dependency::require("users")])
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(IdHasher::format_timestamp(&ts), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn test_change_id_without_dependencies() {
        assert_eq!(users().id(), "815ca5a6f0e7e6a93847a2186eb7023ea93b6585");
    }

    #[test]
    fn test_change_id_with_dependencies() {
        assert_eq!(posts().id(), "49311eb1f278c4e90a1b49e08c3a24b883a2b60f");

        let mixed = posts().with_dependencies(vec![
            Dependency::require("users"),
            Dependency::conflict("legacy"),
            Dependency::require("audit").in_project("infra"),
        ]);
        assert_eq!(mixed.id(), "3f60f90a1230e294ae7922f94511c034aaf96e19");
    }

    #[test]
    fn test_tag_id() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 17, 12, 0, 0).unwrap();
        let tag = Tag::new("v1.0", ts, &planner()).with_note("First release");
        assert_eq!(tag.id(), "eaed12c0665114923e995e1f38ee69030d9d3c6a");
    }

    #[test]
    fn test_id_deterministic() {
        assert_eq!(users().id(), users().id());
    }

    #[test]
    fn test_any_field_changes_id() {
        let base = users().id();

        assert_ne!(users().with_note("other").id(), base);
        assert_ne!(
            users()
                .with_dependencies(vec![Dependency::require("roles")])
                .id(),
            base
        );

        let mut later = users();
        later.timestamp += chrono::Duration::seconds(1);
        assert_ne!(later.id(), base);

        let mut renamed = users();
        renamed.planner_name = String::from("Bob");
        assert_ne!(renamed.id(), base);

        let mut email = users();
        email.planner_email = String::from("bob@example.com");
        assert_ne!(email.id(), base);
    }

    #[test]
    fn test_tags_and_rework_do_not_change_id() {
        let base = users().id();
        let mut tagged = users().mark_reworked();
        tagged.tags.push(String::from("v1.0"));
        assert_eq!(tagged.id(), base);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(IdHasher::short_id("abcdef1234567890"), "abcdef12");
        assert_eq!(IdHasher::short_id("abc"), "abc");
    }
}
