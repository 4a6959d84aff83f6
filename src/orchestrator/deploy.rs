//! Deploy orchestrator.

use std::collections::HashSet;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{DeploymentError, Result};
use crate::plan::{Change, DependencyValidator, Plan};

use super::cutoff::Cutoff;
use super::is_cancelled;
use super::outcome::{Operation, Outcome, RunState};
use super::sink::{Event, MessageSink};

/// Applies pending plan changes in plan order.
pub struct DeployOrchestrator<'a> {
    plan: &'a Plan,
    engine: &'a dyn Engine,
    sink: &'a dyn MessageSink,
    target: String,
    cutoff: Option<Cutoff>,
    verify: bool,
    log_only: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> DeployOrchestrator<'a> {
    /// Creates a deploy orchestrator with no cutoff and verification on.
    #[must_use]
    pub fn new(plan: &'a Plan, engine: &'a dyn Engine, sink: &'a dyn MessageSink) -> Self {
        Self {
            plan,
            engine,
            sink,
            target: String::from(engine.engine_type()),
            cutoff: None,
            verify: true,
            log_only: false,
            cancel: None,
        }
    }

    /// Sets the target description shown to the user.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Deploys up to and including this boundary.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: Option<Cutoff>) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Verifies each change right after deploying it.
    #[must_use]
    pub const fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Reports the selection without deploying anything.
    #[must_use]
    pub const fn with_log_only(mut self, log_only: bool) -> Self {
        self.log_only = log_only;
        self
    }

    /// Stops between changes once the flag becomes true.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Selects changes not yet deployed, up to the cutoff, in plan order.
    ///
    /// # Errors
    ///
    /// Returns an error if the cutoff is not in the plan.
    pub fn pending(&self, deployed: &[String]) -> Result<Vec<&'a Change>> {
        let limit = match &self.cutoff {
            Some(cutoff) => cutoff.resolve(self.plan)?,
            None => self.plan.count().checked_sub(1),
        };
        let Some(limit) = limit else {
            return Ok(Vec::new());
        };

        let deployed: HashSet<&str> = deployed.iter().map(String::as_str).collect();
        Ok(self.plan.changes()[..=limit]
            .iter()
            .filter(|c| !deployed.contains(c.id().as_str()))
            .collect())
    }

    /// Runs the deployment.
    ///
    /// Validation failures return an error before anything is deployed. A
    /// failure while deploying returns a [`RunState::Failed`] outcome whose
    /// `completed` counts the changes that stay deployed.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be prepared or read, the
    /// cutoff is unknown, or a requirement is unmet.
    pub async fn run(&self) -> Result<Outcome> {
        info!("Deploying {} to {}", self.plan.project, self.target);

        if !self.log_only {
            self.engine.ensure_registry().await?;
        }

        let deployed = self.engine.get_deployed_changes().await?;
        let pending = self.pending(&deployed)?;
        debug!("{} of {} changes pending", pending.len(), self.plan.count());

        DependencyValidator::new(self.plan).validate(&pending, &deployed)?;

        if pending.is_empty() {
            info!("Nothing to deploy");
            self.sink.emit(&Event::NothingToDo {
                operation: Operation::Deploy,
                reason: "Nothing to deploy (up-to-date)",
            });
            return Ok(Outcome::nothing_to_do(Operation::Deploy));
        }

        let names: Vec<String> = pending.iter().map(|c| c.name.clone()).collect();
        self.sink.emit(&Event::Planned {
            operation: Operation::Deploy,
            changes: &pending,
            target: &self.target,
        });

        if self.log_only {
            return Ok(Outcome::with_state(Operation::Deploy, RunState::Previewed, names));
        }

        let mut completed = 0;
        for change in &pending {
            if is_cancelled(self.cancel.as_ref()) {
                warn!("Deploy cancelled after {completed} changes");
                self.sink.emit(&Event::Cancelled {
                    operation: Operation::Deploy,
                    completed,
                });
                let mut outcome = Outcome::with_state(Operation::Deploy, RunState::Cancelled, names);
                outcome.completed = completed;
                return Ok(outcome);
            }

            self.sink.emit(&Event::Starting {
                operation: Operation::Deploy,
                change,
            });

            if let Err(e) = self.deploy_one(change).await {
                error!("Deploy of {} failed: {e}", change.name);
                self.sink.emit(&Event::ChangeFailed {
                    operation: Operation::Deploy,
                    change,
                    error: &e,
                });
                let mut outcome = Outcome::with_state(Operation::Deploy, RunState::Failed, names);
                outcome.completed = completed;
                outcome.error = Some(e);
                return Ok(outcome);
            }

            self.sink.emit(&Event::Finished {
                operation: Operation::Deploy,
                change,
            });
            completed += 1;
        }

        info!("Deployed {completed} changes");
        let mut outcome = Outcome::with_state(Operation::Deploy, RunState::Completed, names);
        outcome.completed = completed;
        Ok(outcome)
    }

    async fn deploy_one(&self, change: &Change) -> Result<()> {
        self.engine.deploy_change(change).await?;

        if self.verify {
            let outcome = self.engine.verify_change(change).await?;
            if !outcome.passed {
                return Err(DeploymentError::VerificationFailed {
                    change: change.name.clone(),
                    reason: outcome
                        .error
                        .unwrap_or_else(|| String::from("verify script failed")),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FakeEngine, RecordingSink};
    use crate::error::{SchemaflowError, ValidationError};

    const PLAN: &str = "\
%project=app

a 2024-05-01T00:00:00Z A <a@example.com>
b [a] 2024-05-02T00:00:00Z A <a@example.com>
@v1 2024-05-02T12:00:00Z A <a@example.com>
c 2024-05-03T00:00:00Z A <a@example.com>
";

    fn plan() -> Plan {
        Plan::parse(PLAN).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_all_then_nothing() {
        let plan = plan();
        let engine = FakeEngine::new();
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink).run().await.unwrap();
        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.completed, 3);
        assert!(engine.registry_ensured());
        assert_eq!(engine.calls_of("deploy"), vec!["a", "b", "c"]);
        assert_eq!(engine.calls_of("verify"), vec!["a", "b", "c"]);

        let again = DeployOrchestrator::new(&plan, &engine, &sink).run().await.unwrap();
        assert_eq!(again.state, RunState::NothingToDo);
        assert_eq!(again.exit_code(), 0);
        assert_eq!(engine.calls_of("deploy").len(), 3);
    }

    #[tokio::test]
    async fn test_cutoff_by_change_and_tag() {
        let plan = plan();
        let engine = FakeEngine::new();
        let sink = RecordingSink::new();

        DeployOrchestrator::new(&plan, &engine, &sink)
            .with_cutoff(Some(Cutoff::parse("a")))
            .run()
            .await
            .unwrap();
        assert_eq!(engine.calls_of("deploy"), vec!["a"]);

        DeployOrchestrator::new(&plan, &engine, &sink)
            .with_cutoff(Some(Cutoff::parse("@v1")))
            .run()
            .await
            .unwrap();
        assert_eq!(engine.calls_of("deploy"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_cutoff() {
        let plan = plan();
        let engine = FakeEngine::new();
        let sink = RecordingSink::new();

        let err = DeployOrchestrator::new(&plan, &engine, &sink)
            .with_cutoff(Some(Cutoff::parse("@nope")))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaflowError::Validation(ValidationError::UnknownTag { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_requirement_deploys_nothing() {
        let source = plan();
        let b = source.get("b").unwrap().clone();
        let mut plan = Plan::new("app");
        plan.replace_entries(vec![b], Vec::new());

        let engine = FakeEngine::new();
        let sink = RecordingSink::new();

        let err = DeployOrchestrator::new(&plan, &engine, &sink).run().await.unwrap_err();
        match err {
            SchemaflowError::Validation(ValidationError::MissingRequirement { change, requirement }) => {
                assert_eq!(change, "b");
                assert_eq!(requirement, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.calls_of("deploy").is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_log_only_touches_nothing() {
        let plan = plan();
        let engine = FakeEngine::new();
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink)
            .with_log_only(true)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.state, RunState::Previewed);
        assert_eq!(outcome.changes, vec!["a", "b", "c"]);
        assert!(!engine.registry_ensured());
        assert!(engine.calls().is_empty());
        assert_eq!(sink.events(), vec!["planned:deploy:a,b,c"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_changes() {
        let plan = plan();
        let engine = FakeEngine::new().failing_deploy("b");
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink).run().await.unwrap();
        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(engine.deployed(), vec![plan.get("a").unwrap().id()]);
        assert!(outcome.error.unwrap().to_string().contains("script for b"));
        assert!(sink.events().contains(&String::from("failed:deploy:b")));
    }

    #[tokio::test]
    async fn test_failed_verification_stops_deploy() {
        let plan = plan();
        let engine = FakeEngine::new().failing_verify("a");
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink).run().await.unwrap();
        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.completed, 0);
        assert!(matches!(
            outcome.error,
            Some(SchemaflowError::Deployment(DeploymentError::VerificationFailed { .. }))
        ));
        assert_eq!(engine.calls_of("deploy"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_no_verify() {
        let plan = plan();
        let engine = FakeEngine::new().failing_verify("a");
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink)
            .with_verify(false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.state, RunState::Completed);
        assert!(engine.calls_of("verify").is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_between_changes() {
        let plan = plan();
        let (tx, rx) = watch::channel(false);
        let engine = FakeEngine::new().cancel_after("a", tx);
        let sink = RecordingSink::new();

        let outcome = DeployOrchestrator::new(&plan, &engine, &sink)
            .with_cancellation(rx)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.state, RunState::Cancelled);
        assert_eq!(outcome.exit_code(), 130);
        assert_eq!(outcome.completed, 1);
        assert_eq!(engine.calls_of("deploy"), vec!["a"]);
        assert!(sink.events().contains(&String::from("cancelled:deploy:1")));
    }
}
