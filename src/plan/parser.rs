//! Plan text parser.
//!
//! The plan format is line oriented. Blank lines and `#` comments are
//! skipped; every other line is a pragma (`%key=value`), a tag
//! (`@name timestamp planner <email> [# note]`) or a change
//! (`name [deps] timestamp planner <email> [# note]`).

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::PlanError;

use super::model::Plan;
use super::types::{Change, Dependency, Tag};

/// Parser for plan text.
#[derive(Debug, Default)]
pub struct PlanParser;

/// Where a parsed entry came from, for error reporting.
#[derive(Debug, Clone, Copy)]
struct Origin {
    line: usize,
}

impl PlanParser {
    /// Creates a new plan parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses plan text into a validated [`Plan`].
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] naming the offending line on malformed
    /// pragmas, tags, changes, timestamps or emails; on duplicate names; on
    /// out-of-order timestamps; on same-project requirements that name no
    /// change in the plan; or when `%project` is missing.
    pub fn parse(&self, content: &str) -> Result<Plan, PlanError> {
        let mut project: Option<String> = None;
        let mut uri: Option<String> = None;
        let mut syntax_version: Option<String> = None;
        let mut changes: Vec<(Change, Origin)> = Vec::new();
        let mut tags: Vec<(Tag, Origin)> = Vec::new();

        for (index, raw) in content.lines().enumerate() {
            let origin = Origin { line: index + 1 };
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(pragma) = line.strip_prefix('%') {
                let (key, value) = Self::parse_pragma(pragma, origin)?;
                match key {
                    "syntax-version" => syntax_version = Some(value.to_string()),
                    "project" => project = Some(value.to_string()),
                    "uri" => uri = Some(value.to_string()),
                    other => debug!("Ignoring unknown pragma %{other} on line {}", origin.line),
                }
            } else if let Some(body) = line.strip_prefix('@') {
                let mut tag = Self::parse_tag(body, origin)?;
                if let Some((change, _)) = changes.last_mut() {
                    change.tags.push(tag.name.clone());
                    tag.change = Some(change.name.clone());
                }
                tags.push((tag, origin));
            } else {
                let change = Self::parse_change(line, origin)?;
                changes.push((change, origin));
            }
        }

        let project = project
            .filter(|p| !p.is_empty())
            .ok_or(PlanError::MissingProject)?;

        Self::check_consistency(&changes, &tags)?;

        let mut plan = Plan::new(project);
        if let Some(version) = syntax_version {
            plan.syntax_version = version;
        }
        plan.uri = uri;
        plan.replace_entries(
            changes.into_iter().map(|(c, _)| c).collect(),
            tags.into_iter().map(|(t, _)| t).collect(),
        );

        debug!(
            "Parsed plan {} with {} changes and {} tags",
            plan.project,
            plan.count(),
            plan.tags().len()
        );
        Ok(plan)
    }

    /// Splits a pragma body into key and value.
    fn parse_pragma(body: &str, origin: Origin) -> Result<(&str, &str), PlanError> {
        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| PlanError::syntax(origin.line, format!("invalid pragma format: %{body}")))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(PlanError::syntax(origin.line, format!("invalid pragma format: %{body}")));
        }
        Ok((key, value.trim()))
    }

    /// Parses a tag line with the leading `@` removed.
    fn parse_tag(body: &str, origin: Origin) -> Result<Tag, PlanError> {
        let (head, note) = split_note(body);
        let mut tokens = head.split_whitespace();

        let name = tokens
            .next()
            .ok_or_else(|| PlanError::syntax(origin.line, format!("invalid tag format: @{body}")))?;
        let timestamp_text = tokens
            .next()
            .ok_or_else(|| PlanError::syntax(origin.line, format!("invalid tag format: @{body}")))?;
        let rest = tokens.collect::<Vec<_>>().join(" ");

        let timestamp = parse_timestamp(timestamp_text).ok_or_else(|| {
            PlanError::syntax(
                origin.line,
                format!("invalid timestamp in tag {name}: {timestamp_text}"),
            )
        })?;
        let (planner_name, planner_email) = split_planner(&rest).ok_or_else(|| {
            PlanError::syntax(
                origin.line,
                format!("missing or invalid email format in tag: @{body}"),
            )
        })?;

        Ok(Tag {
            name: name.to_string(),
            note,
            timestamp,
            planner_name,
            planner_email,
            change: None,
        })
    }

    /// Parses a change line.
    fn parse_change(line: &str, origin: Origin) -> Result<Change, PlanError> {
        let (head, note) = split_note(line);
        let tokens: Vec<&str> = head.split_whitespace().collect();

        if tokens.len() < 3 {
            return Err(PlanError::syntax(origin.line, format!("invalid change format: {line}")));
        }

        let name = tokens[0];
        let mut cursor = 1;
        let mut dependencies = Vec::new();

        let mut group = Vec::new();
        while cursor < tokens.len() && tokens[cursor].starts_with('[') {
            let mut depth: i64 = 0;

            while cursor < tokens.len() {
                let token = tokens[cursor];
                group.push(token);
                depth += bracket_balance(token);
                cursor += 1;
                if depth <= 0 {
                    break;
                }
            }

            if depth != 0 {
                return Err(PlanError::syntax(
                    origin.line,
                    format!("unbalanced dependency brackets in change {name}"),
                ));
            }
        }

        if !group.is_empty() {
            for text in bracket_contents(&group.join(" ")) {
                let dep = Dependency::parse(text).ok_or_else(|| {
                    PlanError::syntax(
                        origin.line,
                        format!("invalid dependency \"{text}\" in change {name}"),
                    )
                })?;
                dependencies.push(dep);
            }
        }

        let remaining = &tokens[cursor..];
        if remaining.len() < 2 {
            return Err(PlanError::syntax(
                origin.line,
                format!("missing timestamp or planner info in change: {line}"),
            ));
        }

        let timestamp = parse_timestamp(remaining[0]).ok_or_else(|| {
            PlanError::syntax(
                origin.line,
                format!("invalid timestamp in change {name}: {}", remaining[0]),
            )
        })?;
        let (planner_name, planner_email) =
            split_planner(&remaining[1..].join(" ")).ok_or_else(|| {
                PlanError::syntax(
                    origin.line,
                    format!("missing or invalid email format in change: {line}"),
                )
            })?;

        let change = Change {
            name: name.to_string(),
            note,
            timestamp,
            planner_name,
            planner_email,
            tags: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            reworked: false,
        };
        Ok(change.with_dependencies(dependencies))
    }

    /// Enforces name uniqueness, timestamp order and local requirements.
    fn check_consistency(
        changes: &[(Change, Origin)],
        tags: &[(Tag, Origin)],
    ) -> Result<(), PlanError> {
        let mut seen = std::collections::HashSet::new();
        for (change, origin) in changes {
            if !seen.insert(change.name.as_str()) {
                return Err(PlanError::DuplicateChange {
                    line: origin.line,
                    name: change.name.clone(),
                });
            }
        }

        let mut seen_tags = std::collections::HashSet::new();
        for (tag, origin) in tags {
            if !seen_tags.insert(tag.name.as_str()) {
                return Err(PlanError::DuplicateTag {
                    line: origin.line,
                    name: tag.name.clone(),
                });
            }
        }

        for pair in changes.windows(2) {
            let (previous, _) = &pair[0];
            let (current, origin) = &pair[1];
            if current.timestamp < previous.timestamp {
                return Err(PlanError::OutOfOrder {
                    line: origin.line,
                    name: current.name.clone(),
                    previous: previous.name.clone(),
                });
            }
        }

        for (change, origin) in changes {
            if let Some(missing) = change
                .local_requirements()
                .find(|dep| !seen.contains(dep.change.as_str()))
            {
                return Err(PlanError::UnknownDependency {
                    line: origin.line,
                    change: change.name.clone(),
                    dependency: missing.change.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Splits `text # note` into the head and a trimmed note.
fn split_note(text: &str) -> (&str, String) {
    text.split_once('#').map_or((text.trim(), String::new()), |(head, note)| {
        (head.trim(), note.trim().to_string())
    })
}

/// Splits `Planner Name <email>` into its parts.
fn split_planner(text: &str) -> Option<(String, String)> {
    let open = text.find('<')?;
    let close = open + text[open..].find('>')?;
    let email = text[open + 1..close].trim();
    if email.is_empty() {
        return None;
    }
    Some((text[..open].trim().to_string(), email.to_string()))
}

/// Net number of opening brackets in a token.
fn bracket_balance(token: &str) -> i64 {
    token.chars().fold(0, |acc, c| match c {
        '[' => acc + 1,
        ']' => acc - 1,
        _ => acc,
    })
}

/// Yields every whitespace-separated item inside each `[...]` group.
fn bracket_contents(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        items.extend(after[..close].split_whitespace());
        rest = &after[close + 1..];
    }
    items
}

/// Parses an RFC 3339 timestamp, or a naive one taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "\
%syntax-version=1.0.0
%project=blog
%uri=https://example.com/blog

# Users come first.
users 2024-01-15T10:30:00Z Alice Example <alice@example.com> # Create users table
posts [users] 2024-01-16T09:00:00Z Alice Example <alice@example.com> # Add posts
@v1.0 2024-01-17T12:00:00Z Alice Example <alice@example.com> # First release
comments [posts users] [!spam audit@infra] 2024-01-18T08:00:00Z Bob <bob@example.com>
";

    fn parse(text: &str) -> Result<Plan, PlanError> {
        PlanParser::new().parse(text)
    }

    #[test]
    fn test_parse_full_plan() {
        let plan = parse(PLAN).expect("plan should parse");

        assert_eq!(plan.project, "blog");
        assert_eq!(plan.uri.as_deref(), Some("https://example.com/blog"));
        assert_eq!(plan.syntax_version, "1.0.0");
        assert_eq!(plan.count(), 3);
        assert_eq!(plan.tags().len(), 1);

        let users = plan.get("users").expect("users");
        assert_eq!(users.note, "Create users table");
        assert_eq!(users.planner_name, "Alice Example");
        assert_eq!(users.planner_email, "alice@example.com");
        assert_eq!(users.id(), "815ca5a6f0e7e6a93847a2186eb7023ea93b6585");

        let posts = plan.get("posts").expect("posts");
        assert_eq!(posts.tags, vec![String::from("v1.0")]);
        assert_eq!(posts.id(), "49311eb1f278c4e90a1b49e08c3a24b883a2b60f");

        let comments = plan.get("comments").expect("comments");
        let deps: Vec<String> = comments.dependencies.iter().map(ToString::to_string).collect();
        assert_eq!(deps, vec!["posts", "users", "!spam", "audit@infra"]);
        assert_eq!(comments.conflicts, vec![String::from("spam")]);
        assert!(comments.note.is_empty());

        let tag = plan.tag("v1.0").expect("tag");
        assert_eq!(tag.change.as_deref(), Some("posts"));
        assert_eq!(tag.note, "First release");
    }

    #[test]
    fn test_unknown_pragma_ignored() {
        let plan = parse("%project=x\n%future-thing=1\n").expect("parse");
        assert_eq!(plan.project, "x");
        assert_eq!(plan.count(), 0);
    }

    #[test]
    fn test_missing_project() {
        let err = parse("users 2024-01-15T10:30:00Z A <a@b.c>\n").unwrap_err();
        assert!(matches!(err, PlanError::MissingProject));
    }

    #[test]
    fn test_malformed_pragma_names_line() {
        let err = parse("%project=x\n%bogus\n").unwrap_err();
        assert!(matches!(err, PlanError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_bad_timestamp() {
        let err = parse("%project=x\nusers yesterday A <a@b.c>\n").unwrap_err();
        match err {
            PlanError::Syntax { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("timestamp"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_email() {
        let err = parse("%project=x\nusers 2024-01-15T10:30:00Z Alice\n").unwrap_err();
        assert!(matches!(err, PlanError::Syntax { line: 2, .. }));

        let err = parse("%project=x\nusers 2024-01-15T10:30:00Z Alice <>\n").unwrap_err();
        assert!(matches!(err, PlanError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_bad_tag() {
        let err = parse("%project=x\n@v1\n").unwrap_err();
        assert!(matches!(err, PlanError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_change() {
        let text = "%project=x\n\
            a 2024-01-15T10:30:00Z A <a@b.c>\n\
            a 2024-01-16T10:30:00Z A <a@b.c>\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateChange { line: 3, .. }));
    }

    #[test]
    fn test_duplicate_tag() {
        let text = "%project=x\n\
            a 2024-01-15T10:30:00Z A <a@b.c>\n\
            @t 2024-01-15T11:00:00Z A <a@b.c>\n\
            @t 2024-01-15T12:00:00Z A <a@b.c>\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateTag { line: 4, .. }));
    }

    #[test]
    fn test_out_of_order() {
        let text = "%project=x\n\
            a 2024-01-16T10:30:00Z A <a@b.c>\n\
            b 2024-01-15T10:30:00Z A <a@b.c>\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, PlanError::OutOfOrder { line: 3, .. }));
    }

    #[test]
    fn test_unknown_dependency() {
        let text = "%project=x\nb [a] 2024-01-15T10:30:00Z A <a@b.c>\n";
        let err = parse(text).unwrap_err();
        match err {
            PlanError::UnknownDependency { line, change, dependency } => {
                assert_eq!(line, 2);
                assert_eq!(change, "b");
                assert_eq!(dependency, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cross_project_and_conflict_dependencies_not_checked() {
        let text = "%project=x\nb [a@other !ghost] 2024-01-15T10:30:00Z A <a@b.c>\n";
        let plan = parse(text).expect("parse");
        assert_eq!(plan.count(), 1);
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let text = "%project=x\na 2024-01-15T10:30:00 A <a@b.c>\n";
        let plan = parse(text).expect("parse");
        let change = plan.get("a").expect("a");
        assert_eq!(
            crate::plan::IdHasher::format_timestamp(&change.timestamp),
            "2024-01-15T10:30:00+00:00"
        );
    }

    #[test]
    fn test_tag_before_any_change_is_unattached() {
        let text = "%project=x\n@t 2024-01-15T10:00:00Z A <a@b.c>\n";
        let plan = parse(text).expect("parse");
        assert!(plan.tag("t").expect("tag").change.is_none());
    }
}
