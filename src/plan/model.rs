//! The plan: ordered changes and tags for one project.
//!
//! Changes and tags live in two append-only arenas. Name and id lookups go
//! through a [`PlanIndex`] that is rebuilt from the arenas after every
//! mutation; the index is a cache and never the source of truth.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

use crate::error::PlanError;

use super::parser::PlanParser;
use super::types::{Change, Planner, Tag};

/// Default plan syntax version.
pub const DEFAULT_SYNTAX_VERSION: &str = "1.0.0";

/// Timestamp layout used when writing plan text.
const PLAN_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Derived lookup tables over a plan's arenas.
#[derive(Debug, Default, Clone)]
struct PlanIndex {
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    tags: HashMap<String, usize>,
}

impl PlanIndex {
    fn build(changes: &[Change], tags: &[Tag]) -> Self {
        let mut index = Self::default();
        for (position, change) in changes.iter().enumerate() {
            index.by_name.insert(change.name.clone(), position);
            index.by_id.insert(change.id(), position);
        }
        for (position, tag) in tags.iter().enumerate() {
            index.tags.insert(tag.name.clone(), position);
        }
        index
    }
}

/// A parsed deployment plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Project name from `%project`.
    pub project: String,
    /// Optional project URI from `%uri`.
    pub uri: Option<String>,
    /// Plan syntax version from `%syntax-version`.
    pub syntax_version: String,
    changes: Vec<Change>,
    tags: Vec<Tag>,
    index: PlanIndex,
}

impl Plan {
    /// Creates an empty plan for a project.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            uri: None,
            syntax_version: String::from(DEFAULT_SYNTAX_VERSION),
            changes: Vec::new(),
            tags: Vec::new(),
            index: PlanIndex::default(),
        }
    }

    /// Sets the project URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Parses plan text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is malformed or inconsistent.
    pub fn parse(content: &str) -> Result<Self, PlanError> {
        PlanParser::new().parse(content)
    }

    /// Loads and parses a plan file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        info!("Loading plan from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| PlanError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Writes the serialized plan to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PlanError> {
        let path = path.as_ref();
        info!("Saving plan to: {}", path.display());

        std::fs::write(path, self.to_plan_string()).map_err(|e| PlanError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Replaces both arenas and rebuilds the index. Used by the parser,
    /// which has already checked consistency.
    pub(crate) fn replace_entries(&mut self, changes: Vec<Change>, tags: Vec<Tag>) {
        self.changes = changes;
        self.tags = tags;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = PlanIndex::build(&self.changes, &self.tags);
    }

    /// All changes in deployment order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// All tags in plan order.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Number of changes.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.changes.len()
    }

    /// Returns true when the plan has no changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Planner name of the first change.
    #[must_use]
    pub fn creator_name(&self) -> Option<&str> {
        self.changes.first().map(|c| c.planner_name.as_str())
    }

    /// Planner email of the first change.
    #[must_use]
    pub fn creator_email(&self) -> Option<&str> {
        self.changes.first().map(|c| c.planner_email.as_str())
    }

    /// Looks up a change by name, then by id.
    #[must_use]
    pub fn get(&self, name_or_id: &str) -> Option<&Change> {
        self.position_of(name_or_id).map(|i| &self.changes[i])
    }

    /// Looks up a change by id only.
    #[must_use]
    pub fn change_by_id(&self, id: &str) -> Option<&Change> {
        self.index.by_id.get(id).map(|&i| &self.changes[i])
    }

    /// Returns the change at a plan position.
    #[must_use]
    pub fn change_at(&self, position: usize) -> Option<&Change> {
        self.changes.get(position)
    }

    /// Looks up a tag by name, with or without the `@` prefix.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.index.tags.get(name).map(|&i| &self.tags[i])
    }

    /// Plan position of the change with the given id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.by_id.get(id).copied()
    }

    /// Plan position of the change with the given name or id.
    #[must_use]
    pub fn position_of(&self, name_or_id: &str) -> Option<usize> {
        self.index
            .by_name
            .get(name_or_id)
            .or_else(|| self.index.by_id.get(name_or_id))
            .copied()
    }

    /// Name of the change with the given id.
    #[must_use]
    pub fn name_for_id(&self, id: &str) -> Option<&str> {
        self.change_by_id(id).map(|c| c.name.as_str())
    }

    /// Changes after the given change.
    ///
    /// # Errors
    ///
    /// Returns an error if no change matches.
    pub fn changes_since(&self, name_or_id: &str) -> Result<&[Change], PlanError> {
        let position = self
            .position_of(name_or_id)
            .ok_or_else(|| PlanError::UnknownChange {
                name: name_or_id.to_string(),
            })?;
        Ok(&self.changes[position + 1..])
    }

    /// Last plan position whose change timestamp is at or before the tag's.
    ///
    /// Returns `None` when the tag is unknown or precedes every change.
    #[must_use]
    pub fn position_up_to_tag(&self, name: &str) -> Option<usize> {
        let tag = self.tag(name)?;
        self.changes
            .iter()
            .take_while(|c| c.timestamp <= tag.timestamp)
            .count()
            .checked_sub(1)
    }

    /// Appends a change.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or a text field cannot be written back as
    /// plan text, the name is taken, the change is older than the last
    /// change, or a same-project requirement names no existing change.
    pub fn add_change(&mut self, change: Change) -> Result<(), PlanError> {
        check_entry(
            "change",
            &change.name,
            &change.note,
            &change.planner_name,
            &change.planner_email,
        )?;

        if self.index.by_name.contains_key(&change.name) {
            return Err(PlanError::DuplicateChange {
                line: 0,
                name: change.name,
            });
        }

        if let Some(last) = self.changes.last().filter(|l| change.timestamp < l.timestamp) {
            return Err(PlanError::OutOfOrder {
                line: 0,
                name: change.name,
                previous: last.name.clone(),
            });
        }

        if let Some(missing) = change
            .local_requirements()
            .find(|dep| !self.index.by_name.contains_key(&dep.change))
        {
            return Err(PlanError::UnknownDependency {
                line: 0,
                change: change.name.clone(),
                dependency: missing.change.clone(),
            });
        }

        debug!("Adding change {} to plan {}", change.name, self.project);
        self.changes.push(change);
        self.reindex();
        Ok(())
    }

    /// Appends a tag after the last change.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or a text field cannot be written back as
    /// plan text, or the name is taken.
    pub fn add_tag(&mut self, mut tag: Tag) -> Result<(), PlanError> {
        check_entry("tag", &tag.name, &tag.note, &tag.planner_name, &tag.planner_email)?;

        if self.index.tags.contains_key(&tag.name) {
            return Err(PlanError::DuplicateTag {
                line: 0,
                name: tag.name,
            });
        }

        if let Some(last) = self.changes.last_mut() {
            tag.change = Some(last.name.clone());
            last.tags.push(tag.name.clone());
        }

        debug!("Adding tag @{} to plan {}", tag.name, self.project);
        self.tags.push(tag);
        self.reindex();
        Ok(())
    }

    /// Creates a tag on the named change, or on the last change.
    ///
    /// A tag on the last change is stamped now. A tag on an earlier change
    /// takes that change's timestamp, so it stays attached to it once the
    /// plan is saved and reloaded. Later changes planned in the same second
    /// share that timestamp and the reloaded tag follows the last of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the name, note or planner cannot be written back
    /// as plan text, the tag exists, the change is unknown, or the plan has
    /// no changes.
    pub fn create_tag(
        &mut self,
        name: &str,
        change: Option<&str>,
        note: &str,
        planner: &Planner,
    ) -> Result<&Tag, PlanError> {
        self.create_tag_at(name, change, note, planner, Utc::now().trunc_subsecs(0))
    }

    fn create_tag_at(
        &mut self,
        name: &str,
        change: Option<&str>,
        note: &str,
        planner: &Planner,
        timestamp: DateTime<Utc>,
    ) -> Result<&Tag, PlanError> {
        let name = name.strip_prefix('@').unwrap_or(name);
        check_entry("tag", name, note, &planner.name, &planner.email)?;

        if self.index.tags.contains_key(name) {
            return Err(PlanError::DuplicateTag {
                line: 0,
                name: name.to_string(),
            });
        }

        let position = match change {
            Some(wanted) => self
                .position_of(wanted)
                .ok_or_else(|| PlanError::UnknownChange {
                    name: wanted.to_string(),
                })?,
            None => self
                .changes
                .len()
                .checked_sub(1)
                .ok_or_else(|| PlanError::EmptyPlan {
                    tag: name.to_string(),
                })?,
        };

        let timestamp = if position + 1 == self.changes.len() {
            timestamp
        } else {
            self.changes[position].timestamp
        };

        let target = &mut self.changes[position];
        let mut tag = Tag::new(name, timestamp, planner).with_note(note);
        tag.change = Some(target.name.clone());
        if !target.tags.iter().any(|t| t == name) {
            target.tags.push(name.to_string());
        }

        info!("Tagged {} as @{name}", target.name);
        let slot = self.tags.partition_point(|t| t.timestamp <= timestamp);
        self.tags.insert(slot, tag);
        self.reindex();

        Ok(&self.tags[slot])
    }

    /// Serializes the plan: pragmas, a blank line, then changes and tags
    /// merged and stable-sorted by timestamp.
    #[must_use]
    pub fn to_plan_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "%syntax-version={}", self.syntax_version);
        let _ = writeln!(out, "%project={}", self.project);
        if let Some(uri) = &self.uri {
            let _ = writeln!(out, "%uri={uri}");
        }
        out.push('\n');

        let mut entries: Vec<(DateTime<Utc>, String)> = self
            .changes
            .iter()
            .map(|c| (c.timestamp, format_change(c)))
            .chain(self.tags.iter().map(|t| (t.timestamp, format_tag(t))))
            .collect();
        entries.sort_by_key(|(timestamp, _)| *timestamp);

        for (_, line) in entries {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_plan_string())
    }
}

fn format_change(change: &Change) -> String {
    let mut line = change.name.clone();
    if !change.dependencies.is_empty() {
        let deps = change
            .dependencies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(line, " [{deps}]");
    }
    let _ = write!(
        line,
        " {} {} <{}>",
        change.timestamp.format(PLAN_TIMESTAMP_FORMAT),
        change.planner_name,
        change.planner_email
    );
    if !change.note.is_empty() {
        let _ = write!(line, " # {}", change.note);
    }
    line
}

fn format_tag(tag: &Tag) -> String {
    let mut line = format!(
        "@{} {} {} <{}>",
        tag.name,
        tag.timestamp.format(PLAN_TIMESTAMP_FORMAT),
        tag.planner_name,
        tag.planner_email
    );
    if !tag.note.is_empty() {
        let _ = write!(line, " # {}", tag.note);
    }
    line
}

/// Longest accepted change or tag name, in bytes.
const MAX_NAME_LENGTH: usize = 255;

/// Checks that an entry serializes to a line that parses back unchanged.
fn check_entry(
    kind: &'static str,
    name: &str,
    note: &str,
    planner_name: &str,
    planner_email: &str,
) -> Result<(), PlanError> {
    check_name(kind, name)?;

    let field_error = |field: &'static str, reason: &'static str| PlanError::InvalidField {
        kind,
        name: name.to_string(),
        field,
        reason,
    };

    if note.contains(['\n', '\r']) {
        return Err(field_error("note", "must be a single line"));
    }
    if note.trim() != note {
        return Err(field_error("note", "has leading or trailing whitespace"));
    }
    let collapsed = planner_name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed != planner_name || planner_name.contains(['#', '<', '>']) {
        return Err(field_error("planner name", "is not a single plain line"));
    }
    if planner_email.is_empty()
        || planner_email.trim() != planner_email
        || planner_email.contains(['\n', '\r', '#', '<', '>'])
    {
        return Err(field_error("planner email", "is empty or contains reserved characters"));
    }
    Ok(())
}

/// Checks a change or tag name against the plan line grammar.
fn check_name(kind: &'static str, name: &str) -> Result<(), PlanError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LENGTH {
        Some("name is longer than 255 bytes")
    } else if name.chars().any(char::is_whitespace) {
        Some("name contains whitespace")
    } else if name.starts_with(['%', '!']) {
        Some("name starts with a reserved character")
    } else if name.contains([':', '@', '#', '[', ']']) {
        Some("name contains a reserved character")
    } else {
        None
    };

    reason.map_or(Ok(()), |reason| {
        Err(PlanError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        })
    })
}
