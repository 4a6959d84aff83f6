//! Dependency validation for a batch of changes about to be deployed.

use std::collections::HashSet;

use tracing::debug;

use crate::error::ValidationError;

use super::model::Plan;
use super::types::Change;

/// Checks same-project requirements of a deployment batch.
#[derive(Debug)]
pub struct DependencyValidator<'a> {
    plan: &'a Plan,
}

impl<'a> DependencyValidator<'a> {
    /// Creates a validator resolving ids against the given plan.
    #[must_use]
    pub const fn new(plan: &'a Plan) -> Self {
        Self { plan }
    }

    /// Validates that every same-project requirement in `batch` is either
    /// already deployed or part of the batch itself.
    ///
    /// Deployed ids that do not resolve to a plan change contribute nothing.
    /// Cross-project requirements and conflicts are not checked.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingRequirement`] for the first unmet
    /// requirement, naming the dependent change and the requirement.
    pub fn validate(&self, batch: &[&Change], deployed_ids: &[String]) -> Result<(), ValidationError> {
        let mut available: HashSet<&str> = deployed_ids
            .iter()
            .filter_map(|id| self.plan.name_for_id(id))
            .collect();
        available.extend(batch.iter().map(|c| c.name.as_str()));

        for change in batch {
            for dep in change.local_requirements() {
                if !available.contains(dep.change.as_str()) {
                    return Err(ValidationError::MissingRequirement {
                        change: change.name.clone(),
                        requirement: dep.change.clone(),
                    });
                }
            }
        }

        debug!(
            "Validated {} changes against {} deployed",
            batch.len(),
            deployed_ids.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::{Dependency, Planner};
    use chrono::{TimeZone, Utc};

    fn plan() -> Plan {
        let planner = Planner::new("Alice", "alice@example.com");
        let ts = |d| Utc.with_ymd_and_hms(2024, 2, d, 0, 0, 0).unwrap();
        let mut plan = Plan::new("app");
        plan.add_change(Change::new("a", ts(1), &planner)).unwrap();
        plan.add_change(
            Change::new("b", ts(2), &planner).with_dependencies(vec![
                Dependency::require("a"),
                Dependency::require("ext").in_project("other"),
                Dependency::conflict("legacy"),
            ]),
        )
        .unwrap();
        plan
    }

    #[test]
    fn test_missing_requirement_names_both() {
        let plan = plan();
        let b = plan.get("b").unwrap();

        let err = DependencyValidator::new(&plan).validate(&[b], &[]).unwrap_err();
        match err {
            ValidationError::MissingRequirement { change, requirement } => {
                assert_eq!(change, "b");
                assert_eq!(requirement, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_requirement_in_batch() {
        let plan = plan();
        let batch: Vec<&Change> = plan.changes().iter().collect();
        assert!(DependencyValidator::new(&plan).validate(&batch, &[]).is_ok());
    }

    #[test]
    fn test_requirement_already_deployed() {
        let plan = plan();
        let a_id = plan.get("a").unwrap().id();
        let b = plan.get("b").unwrap();
        assert!(DependencyValidator::new(&plan).validate(&[b], &[a_id]).is_ok());
    }

    #[test]
    fn test_unknown_deployed_ids_ignored() {
        let plan = plan();
        let b = plan.get("b").unwrap();
        let result = DependencyValidator::new(&plan).validate(&[b], &[String::from("deadbeef")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_batch() {
        let plan = plan();
        assert!(DependencyValidator::new(&plan).validate(&[], &[]).is_ok());
    }
}
