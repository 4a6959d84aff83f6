//! Plan entity types: changes, tags and dependencies.
//!
//! These are plain data carriers. Identifiers are derived from their fields
//! by [`IdHasher`](super::hash::IdHasher) and are never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hash::IdHasher;

/// Kind of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// The named change must be deployed first.
    Require,
    /// The named change must not be deployed.
    Conflict,
}

/// A dependency of a change on another change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Require or conflict.
    pub kind: DependencyKind,
    /// Name of the change depended upon.
    pub change: String,
    /// Project qualifier for cross-project dependencies.
    pub project: Option<String>,
}

impl Dependency {
    /// Creates a same-project requirement.
    #[must_use]
    pub fn require(change: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Require,
            change: change.into(),
            project: None,
        }
    }

    /// Creates a same-project conflict.
    #[must_use]
    pub fn conflict(change: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Conflict,
            change: change.into(),
            project: None,
        }
    }

    /// Qualifies the dependency with a project.
    #[must_use]
    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Parses the canonical form: `[!]change[@project]`.
    ///
    /// Returns `None` when no change name remains.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (kind, rest) = text
            .strip_prefix('!')
            .map_or((DependencyKind::Require, text), |rest| {
                (DependencyKind::Conflict, rest)
            });

        let (change, project) = match rest.rsplit_once('@') {
            Some((change, project)) if !project.is_empty() => (change, Some(project.to_string())),
            Some((change, _)) => (change, None),
            None => (rest, None),
        };

        if change.is_empty() {
            return None;
        }

        Some(Self {
            kind,
            change: change.to_string(),
            project,
        })
    }

    /// Returns true for a requirement within the same project.
    #[must_use]
    pub const fn is_local_requirement(&self) -> bool {
        matches!(self.kind, DependencyKind::Require) && self.project.is_none()
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind == DependencyKind::Conflict {
            f.write_str("!")?;
        }
        f.write_str(&self.change)?;
        if let Some(project) = &self.project {
            write!(f, "@{project}")?;
        }
        Ok(())
    }
}

/// Identity of whoever planned a change or tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planner {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Planner {
    /// Creates a planner identity.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A single named, timestamped schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Change name, unique within a plan.
    pub name: String,
    /// Free-form note.
    pub note: String,
    /// When the change was planned.
    pub timestamp: DateTime<Utc>,
    /// Planner display name.
    pub planner_name: String,
    /// Planner email.
    pub planner_email: String,
    /// Names of tags attached after this change, in plan order.
    pub tags: Vec<String>,
    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<Dependency>,
    /// Names of conflicting changes.
    pub conflicts: Vec<String>,
    /// Re-authored after being tagged; its original verify script is skipped.
    pub reworked: bool,
}

impl Change {
    /// Creates a change with no dependencies, tags or note.
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, planner: &Planner) -> Self {
        Self {
            name: name.into(),
            note: String::new(),
            timestamp,
            planner_name: planner.name.clone(),
            planner_email: planner.email.clone(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            reworked: false,
        }
    }

    /// Sets the note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Sets the dependencies; conflict names are derived from them.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.conflicts = dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Conflict)
            .map(|d| d.change.clone())
            .collect();
        self.dependencies = dependencies;
        self
    }

    /// Marks the change as reworked.
    #[must_use]
    pub const fn mark_reworked(mut self) -> Self {
        self.reworked = true;
        self
    }

    /// Returns the content-addressed identifier.
    #[must_use]
    pub fn id(&self) -> String {
        IdHasher::new().change_id(self)
    }

    /// Returns same-project requirements.
    pub fn local_requirements(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| d.is_local_requirement())
    }

    /// Formats the name followed by its tags, e.g. `users @v1.0`.
    #[must_use]
    pub fn format_name_with_tags(&self) -> String {
        let mut out = self.name.clone();
        for tag in &self.tags {
            out.push_str(" @");
            out.push_str(tag);
        }
        out
    }
}

/// A named checkpoint in the change sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag name without the `@` prefix, unique within a plan.
    pub name: String,
    /// Free-form note.
    pub note: String,
    /// When the tag was planned.
    pub timestamp: DateTime<Utc>,
    /// Planner display name.
    pub planner_name: String,
    /// Planner email.
    pub planner_email: String,
    /// Name of the change this tag follows. A relation, not ownership.
    pub change: Option<String>,
}

impl Tag {
    /// Creates a tag not yet attached to a change.
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, planner: &Planner) -> Self {
        Self {
            name: name.into(),
            note: String::new(),
            timestamp,
            planner_name: planner.name.clone(),
            planner_email: planner.email.clone(),
            change: None,
        }
    }

    /// Sets the note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Returns the content-addressed identifier.
    #[must_use]
    pub fn id(&self) -> String {
        IdHasher::new().tag_id(self)
    }
}
