//! Revert orchestrator.

use std::collections::HashSet;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Result, ValidationError};
use crate::plan::{Change, Plan};

use super::cutoff::Cutoff;
use super::is_cancelled;
use super::outcome::{Operation, Outcome, RunState};
use super::sink::{Event, MessageSink};

/// Reverts deployed changes newest first.
pub struct RevertOrchestrator<'a> {
    plan: &'a Plan,
    engine: &'a dyn Engine,
    sink: &'a dyn MessageSink,
    target: String,
    cutoff: Option<Cutoff>,
    no_prompt: bool,
    log_only: bool,
    strict: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> RevertOrchestrator<'a> {
    /// Creates a revert orchestrator that reverts everything after confirming.
    #[must_use]
    pub fn new(plan: &'a Plan, engine: &'a dyn Engine, sink: &'a dyn MessageSink) -> Self {
        Self {
            plan,
            engine,
            sink,
            target: String::from(engine.engine_type()),
            cutoff: None,
            no_prompt: false,
            log_only: false,
            strict: false,
            cancel: None,
        }
    }

    /// Sets the target description shown to the user.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Keeps this boundary and everything before it deployed.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: Option<Cutoff>) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Skips the confirmation prompt.
    #[must_use]
    pub const fn with_no_prompt(mut self, no_prompt: bool) -> Self {
        self.no_prompt = no_prompt;
        self
    }

    /// Reports the selection without reverting anything.
    #[must_use]
    pub const fn with_log_only(mut self, log_only: bool) -> Self {
        self.log_only = log_only;
        self
    }

    /// Requires an explicit cutoff.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Stops between changes once the flag becomes true.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Selects deployed changes after the cutoff, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the cutoff is unknown, or names a change that
    /// is not deployed.
    pub fn selection(&self, deployed: &[String]) -> Result<Vec<&'a Change>> {
        let deployed: HashSet<&str> = deployed.iter().map(String::as_str).collect();

        let keep = match &self.cutoff {
            None => None,
            Some(cutoff) => {
                let position = cutoff.resolve(self.plan)?;
                if let (Cutoff::Change(name), Some(p)) = (cutoff, position) {
                    let id = self.plan.change_at(p).map(Change::id).unwrap_or_default();
                    if !deployed.contains(id.as_str()) {
                        return Err(ValidationError::NotDeployed { name: name.clone() }.into());
                    }
                }
                position
            }
        };
        let start = keep.map_or(0, |p| p + 1);

        Ok(self
            .plan
            .changes()
            .iter()
            .skip(start)
            .filter(|c| deployed.contains(c.id().as_str()))
            .rev()
            .collect())
    }

    /// Runs the revert.
    ///
    /// # Errors
    ///
    /// Returns an error if strict mode has no cutoff, the registry cannot
    /// be read, or the cutoff cannot be resolved.
    pub async fn run(&self) -> Result<Outcome> {
        if self.strict && self.cutoff.is_none() {
            return Err(ValidationError::StrictRequiresCutoff.into());
        }

        info!("Reverting {} from {}", self.plan.project, self.target);
        let deployed = self.engine.get_deployed_changes().await?;
        let selection = self.selection(&deployed)?;
        debug!("{} changes selected for revert", selection.len());

        if selection.is_empty() {
            let reason = if deployed.is_empty() {
                "Nothing to revert (nothing deployed)"
            } else {
                "No changes to revert"
            };
            info!("{reason}");
            self.sink.emit(&Event::NothingToDo {
                operation: Operation::Revert,
                reason,
            });
            return Ok(Outcome::nothing_to_do(Operation::Revert));
        }

        let names: Vec<String> = selection.iter().map(|c| c.name.clone()).collect();
        self.sink.emit(&Event::Planned {
            operation: Operation::Revert,
            changes: &selection,
            target: &self.target,
        });

        if self.log_only {
            return Ok(Outcome::with_state(Operation::Revert, RunState::Previewed, names));
        }

        if !self.no_prompt && !self.sink.confirm(Operation::Revert, &selection) {
            info!("Revert declined");
            return Ok(Outcome::with_state(Operation::Revert, RunState::Declined, names));
        }

        let mut completed = 0;
        for change in &selection {
            if is_cancelled(self.cancel.as_ref()) {
                warn!("Revert cancelled after {completed} changes");
                self.sink.emit(&Event::Cancelled {
                    operation: Operation::Revert,
                    completed,
                });
                let mut outcome = Outcome::with_state(Operation::Revert, RunState::Cancelled, names);
                outcome.completed = completed;
                return Ok(outcome);
            }

            self.sink.emit(&Event::Starting {
                operation: Operation::Revert,
                change,
            });

            if let Err(e) = self.engine.revert_change(change).await {
                error!("Revert of {} failed: {e}", change.name);
                self.sink.emit(&Event::ChangeFailed {
                    operation: Operation::Revert,
                    change,
                    error: &e,
                });
                let mut outcome = Outcome::with_state(Operation::Revert, RunState::Failed, names);
                outcome.completed = completed;
                outcome.error = Some(e);
                return Ok(outcome);
            }

            self.sink.emit(&Event::Finished {
                operation: Operation::Revert,
                change,
            });
            completed += 1;
        }

        info!("Reverted {completed} changes");
        let mut outcome = Outcome::with_state(Operation::Revert, RunState::Completed, names);
        outcome.completed = completed;
        Ok(outcome)
    }
}
