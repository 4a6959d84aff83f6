//! Read-only deployment status.
//!
//! Compares the engine's deployed ids against the plan without running any
//! script or touching the registry.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{EXIT_FAILURE, EXIT_SUCCESS, Result};
use crate::plan::Plan;

/// The most recently deployed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedChange {
    /// Change id.
    pub id: String,
    /// Change name, or the raw id when the plan does not know it.
    pub name: String,
    /// Tags the plan attaches to the change.
    pub tags: Vec<String>,
    /// Whether the plan contains the change.
    pub in_plan: bool,
}

/// Where a target stands against its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Project name.
    pub project: String,
    /// Target description.
    pub target: String,
    /// Number of deployed changes.
    pub deployed: usize,
    /// Last change in registry order.
    pub last: Option<DeployedChange>,
    /// Plan changes after the furthest deployed one, with their tags.
    pub pending: Vec<String>,
    /// Plan changes before the furthest deployed one that were never deployed.
    pub undeployed: Vec<String>,
    /// Deployed ids the plan does not contain.
    pub not_in_plan: Vec<String>,
}

impl StatusReport {
    /// Builds the report from the plan and the engine's registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot list deployed changes.
    pub async fn collect(plan: &Plan, engine: &dyn Engine, target: impl Into<String>) -> Result<Self> {
        let deployed = engine.get_deployed_changes().await?;
        debug!("Status of {}: {} deployed changes", plan.project, deployed.len());

        let deployed_set: HashSet<&str> = deployed.iter().map(String::as_str).collect();
        let furthest = deployed.iter().filter_map(|id| plan.position(id)).max();

        let not_in_plan: Vec<String> = deployed
            .iter()
            .filter(|id| plan.position(id).is_none())
            .cloned()
            .collect();
        if !not_in_plan.is_empty() {
            warn!("{} deployed changes are missing from the plan", not_in_plan.len());
        }

        let (undeployed, pending) = match furthest {
            Some(furthest) => {
                let (before, after) = plan.changes().split_at(furthest + 1);
                let undeployed = before
                    .iter()
                    .filter(|c| !deployed_set.contains(c.id().as_str()))
                    .map(|c| c.format_name_with_tags())
                    .collect();
                (undeployed, after.iter().map(|c| c.format_name_with_tags()).collect())
            }
            None => (
                Vec::new(),
                plan.changes().iter().map(|c| c.format_name_with_tags()).collect(),
            ),
        };

        let last = deployed.last().map(|id| match plan.change_by_id(id) {
            Some(change) => DeployedChange {
                id: id.clone(),
                name: change.name.clone(),
                tags: change.tags.clone(),
                in_plan: true,
            },
            None => DeployedChange {
                id: id.clone(),
                name: id.clone(),
                tags: Vec::new(),
                in_plan: false,
            },
        });

        Ok(Self {
            project: plan.project.clone(),
            target: target.into(),
            deployed: deployed.len(),
            last,
            pending,
            undeployed,
            not_in_plan,
        })
    }

    /// Whether every planned change is deployed.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.deployed > 0 && self.pending.is_empty() && self.undeployed.is_empty()
    }

    /// Whether the registry and the plan disagree.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.undeployed.is_empty() || !self.not_in_plan.is_empty()
    }

    /// Process exit code: `1` when nothing is deployed, otherwise `0`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.deployed == 0 {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}
