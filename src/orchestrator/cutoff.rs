//! Inclusive change-or-tag boundaries.

use crate::error::ValidationError;
use crate::plan::Plan;

/// A deploy, revert or verify boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cutoff {
    /// A change name or id.
    Change(String),
    /// A tag name without the `@` prefix.
    Tag(String),
}

impl Cutoff {
    /// Parses a positional boundary; a leading `@` makes it a tag.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        text.strip_prefix('@')
            .map_or_else(|| Self::Change(text.to_string()), |tag| Self::Tag(tag.to_string()))
    }

    /// The boundary as the user would type it.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Change(name) => name.clone(),
            Self::Tag(name) => format!("@{name}"),
        }
    }

    /// Resolves the boundary to a plan position.
    ///
    /// A change resolves to its own position. A tag resolves to the last
    /// change whose timestamp is not after the tag's; `Ok(None)` means the
    /// tag precedes every change.
    ///
    /// # Errors
    ///
    /// Returns an error if the change or tag is not in the plan.
    pub fn resolve(&self, plan: &Plan) -> Result<Option<usize>, ValidationError> {
        match self {
            Self::Change(name) => plan
                .position_of(name)
                .map(Some)
                .ok_or_else(|| ValidationError::UnknownChange { name: name.clone() }),
            Self::Tag(name) => {
                if plan.tag(name).is_none() {
                    return Err(ValidationError::UnknownTag { name: name.clone() });
                }
                Ok(plan.position_up_to_tag(name))
            }
        }
    }
}

impl std::fmt::Display for Cutoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "\
%project=app

a 2024-03-01T00:00:00Z A <a@example.com>
b 2024-03-02T00:00:00Z A <a@example.com>
@v1 2024-03-02T12:00:00Z A <a@example.com>
c 2024-03-03T00:00:00Z A <a@example.com>
";

    #[test]
    fn test_parse() {
        assert_eq!(Cutoff::parse("users"), Cutoff::Change(String::from("users")));
        assert_eq!(Cutoff::parse("@v1.0"), Cutoff::Tag(String::from("v1.0")));
        assert_eq!(Cutoff::parse("@v1.0").to_string(), "@v1.0");
    }

    #[test]
    fn test_resolve_change_by_name_and_id() {
        let plan = Plan::parse(PLAN).unwrap();
        let id = plan.get("b").unwrap().id();

        assert_eq!(Cutoff::Change(String::from("b")).resolve(&plan).unwrap(), Some(1));
        assert_eq!(Cutoff::Change(id).resolve(&plan).unwrap(), Some(1));
        assert!(matches!(
            Cutoff::Change(String::from("zzz")).resolve(&plan),
            Err(ValidationError::UnknownChange { .. })
        ));
    }

    #[test]
    fn test_resolve_tag_by_timestamp() {
        let plan = Plan::parse(PLAN).unwrap();
        assert_eq!(Cutoff::parse("@v1").resolve(&plan).unwrap(), Some(1));
        assert!(matches!(
            Cutoff::parse("@nope").resolve(&plan),
            Err(ValidationError::UnknownTag { .. })
        ));
    }
}
