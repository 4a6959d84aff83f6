//! Verify orchestrator.
//!
//! Verifies a range of deployed changes, sequentially or through a fixed
//! pool of workers, and reports drift between the registry and the plan.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{DeploymentError, Result, ValidationError};
use crate::plan::{Change, Plan};

use super::cutoff::Cutoff;
use super::is_cancelled;
use super::outcome::{Operation, Outcome, RunState};
use super::sink::{Event, MessageSink};

/// Default worker pool size.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Result of verifying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Change name, or the raw id for entries missing from the plan.
    pub name: String,
    /// Change id.
    pub id: String,
    /// Display label: the name followed by its tags.
    pub label: String,
    /// Whether the verify script passed, or was skipped for a reworked change.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Plan position differs from registry position.
    pub out_of_order: bool,
    /// Deployed but absent from the plan.
    pub not_in_plan: bool,
    /// Reworked; the script was not run.
    pub reworked: bool,
    /// Inside the range by plan order but never deployed.
    pub not_deployed: bool,
}

impl VerificationResult {
    fn for_change(change: &Change) -> Self {
        Self {
            name: change.name.clone(),
            id: change.id(),
            label: change.format_name_with_tags(),
            success: true,
            error: None,
            out_of_order: false,
            not_in_plan: false,
            reworked: false,
            not_deployed: false,
        }
    }

    /// Whether this entry fails the run.
    #[must_use]
    pub const fn has_errors(&self) -> bool {
        !self.success || self.out_of_order || self.not_in_plan || self.not_deployed
    }
}

/// One deployed entry to check.
#[derive(Debug)]
struct Entry<'p> {
    id: &'p str,
    change: Option<&'p Change>,
    out_of_order: bool,
}

impl Entry<'_> {
    fn label(&self) -> String {
        self.change
            .map_or_else(|| self.id.to_string(), Change::format_name_with_tags)
    }
}

/// Orchestrates verification of deployed changes.
pub struct VerifyOrchestrator<'a> {
    plan: &'a Plan,
    engine: &'a dyn Engine,
    sink: &'a dyn MessageSink,
    from: Option<Cutoff>,
    to: Option<Cutoff>,
    parallel: bool,
    max_workers: usize,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> VerifyOrchestrator<'a> {
    /// Creates a verify orchestrator: full range, parallel, default pool size.
    #[must_use]
    pub fn new(plan: &'a Plan, engine: &'a dyn Engine, sink: &'a dyn MessageSink) -> Self {
        Self {
            plan,
            engine,
            sink,
            from: None,
            to: None,
            parallel: true,
            max_workers: DEFAULT_MAX_WORKERS,
            cancel: None,
        }
    }

    /// Sets the first change to verify.
    #[must_use]
    pub fn with_from(mut self, from: Option<Cutoff>) -> Self {
        self.from = from;
        self
    }

    /// Sets the last change to verify.
    #[must_use]
    pub fn with_to(mut self, to: Option<Cutoff>) -> Self {
        self.to = to;
        self
    }

    /// Enables or disables the worker pool.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the worker pool size limit.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Stops dispatching new work once the flag becomes true.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read, a boundary cannot
    /// be resolved, or changes are deployed but none are planned.
    pub async fn run(&self) -> Result<Outcome> {
        let deployed = self.engine.get_deployed_changes().await?;
        info!("Verifying {} deployed changes of {}", deployed.len(), self.plan.project);

        if deployed.is_empty() {
            self.sink.emit(&Event::NothingToDo {
                operation: Operation::Verify,
                reason: "No changes deployed",
            });
            return Ok(Outcome::nothing_to_do(Operation::Verify));
        }

        if self.plan.is_empty() {
            return Err(ValidationError::NothingPlanned.into());
        }

        let first = match &self.from {
            Some(cutoff) => self.deployed_index(cutoff, &deployed)?,
            None => 0,
        };
        let last = match &self.to {
            Some(cutoff) => self.deployed_index(cutoff, &deployed)?,
            None => deployed.len() - 1,
        };

        if first > last {
            self.sink.emit(&Event::NothingToDo {
                operation: Operation::Verify,
                reason: "No changes to verify",
            });
            return Ok(Outcome::nothing_to_do(Operation::Verify));
        }

        let entries: Vec<Entry<'_>> = deployed[first..=last]
            .iter()
            .enumerate()
            .map(|(offset, id)| {
                let position = self.plan.position(id);
                Entry {
                    id: id.as_str(),
                    change: position.and_then(|p| self.plan.change_at(p)),
                    out_of_order: position.is_some_and(|p| p != first + offset),
                }
            })
            .collect();

        let width = entries
            .iter()
            .map(|e| e.label().chars().count())
            .max()
            .unwrap_or(0);

        let mut results = if self.parallel && entries.len() > 1 {
            self.verify_parallel(&entries, width).await
        } else {
            self.verify_sequential(&entries, width).await
        };

        let cancelled = results.len() < entries.len();
        let deployed_set: HashSet<&str> = deployed.iter().map(String::as_str).collect();
        let positions: Vec<usize> = entries
            .iter()
            .filter_map(|e| self.plan.position(e.id))
            .collect();

        if !cancelled {
            for result in self.not_deployed(&positions, &deployed_set) {
                self.sink.emit(&Event::Verified {
                    result: &result,
                    width,
                });
                results.push(result);
            }
        }

        let pending = self.pending(&positions, &deployed_set);
        let changes = results.iter().map(|r| r.name.clone()).collect();

        if cancelled {
            warn!("Verify cancelled after {} of {} changes", results.len(), entries.len());
            self.sink.emit(&Event::Cancelled {
                operation: Operation::Verify,
                completed: results.len(),
            });
            let mut outcome = Outcome::with_state(Operation::Verify, RunState::Cancelled, changes);
            outcome.completed = results.len();
            outcome.results = results;
            outcome.pending = pending;
            return Ok(outcome);
        }

        let errors = results.iter().filter(|r| r.has_errors()).count();
        let total = results.len();
        let state = if errors == 0 {
            info!("Verify successful: {total} changes");
            RunState::Completed
        } else {
            warn!("Verify failed: {errors} of {total} changes reported errors");
            RunState::Failed
        };

        let mut outcome = Outcome::with_state(Operation::Verify, state, changes);
        outcome.completed = total;
        outcome.results = results;
        outcome.pending = pending;
        if errors > 0 {
            outcome.error = Some(DeploymentError::VerifyFailed { errors, total }.into());
        }
        Ok(outcome)
    }

    /// Resolves a boundary to an index in the deployed list.
    fn deployed_index(&self, cutoff: &Cutoff, deployed: &[String]) -> Result<usize> {
        match cutoff {
            Cutoff::Change(name) => {
                if let Some(change) = self.plan.get(name) {
                    let id = change.id();
                    return deployed
                        .iter()
                        .position(|d| *d == id)
                        .ok_or_else(|| ValidationError::NotDeployed { name: name.clone() }.into());
                }
                deployed
                    .iter()
                    .position(|d| d == name)
                    .ok_or_else(|| ValidationError::NotFound { name: name.clone() }.into())
            }
            Cutoff::Tag(name) => {
                let not_found = || ValidationError::NotFound {
                    name: cutoff.label(),
                };
                if self.plan.tag(name).is_none() {
                    return Err(not_found().into());
                }
                let limit = self
                    .plan
                    .position_up_to_tag(name)
                    .ok_or_else(|| ValidationError::NotDeployed { name: cutoff.label() })?;
                deployed
                    .iter()
                    .rposition(|id| self.plan.position(id).is_some_and(|p| p <= limit))
                    .ok_or_else(|| ValidationError::NotDeployed { name: cutoff.label() }.into())
            }
        }
    }

    async fn verify_sequential(&self, entries: &[Entry<'_>], width: usize) -> Vec<VerificationResult> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            if is_cancelled(self.cancel.as_ref()) {
                break;
            }
            let result = self.check(entry).await;
            self.sink.emit(&Event::Verified {
                result: &result,
                width,
            });
            results.push(result);
        }
        results
    }

    /// Fixed-size pool: each worker claims the next index, writes only its
    /// own slot, and holds the emit lock only while reporting.
    async fn verify_parallel(&self, entries: &[Entry<'_>], width: usize) -> Vec<VerificationResult> {
        let workers = entries.len().min(self.max_workers.max(1));
        debug!("Verifying {} changes with {workers} workers", entries.len());

        let next = AtomicUsize::new(0);
        let slots: Vec<OnceLock<VerificationResult>> =
            entries.iter().map(|_| OnceLock::new()).collect();
        let emit_lock = Mutex::new(());

        let next = &next;
        let slots = &slots;
        let emit_lock = &emit_lock;

        let pool = (0..workers).map(|worker| async move {
            loop {
                if is_cancelled(self.cancel.as_ref()) {
                    debug!("Worker {worker} stopping on cancellation");
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(entry) = entries.get(index) else {
                    break;
                };

                let result = self.check(entry).await;
                {
                    let _guard = emit_lock.lock().unwrap_or_else(PoisonError::into_inner);
                    self.sink.emit(&Event::Verified {
                        result: &result,
                        width,
                    });
                }
                let _ = slots[index].set(result);
            }
        });
        join_all(pool).await;

        slots.iter().filter_map(|slot| slot.get().cloned()).collect()
    }

    async fn check(&self, entry: &Entry<'_>) -> VerificationResult {
        let Some(change) = entry.change else {
            return VerificationResult {
                name: entry.id.to_string(),
                id: entry.id.to_string(),
                label: entry.id.to_string(),
                success: false,
                error: Some(String::from("Not present in the plan")),
                out_of_order: false,
                not_in_plan: true,
                reworked: false,
                not_deployed: false,
            };
        };

        let mut result = VerificationResult::for_change(change);
        result.out_of_order = entry.out_of_order;

        if change.reworked {
            debug!("Skipping verify script of reworked change {}", change.name);
            result.reworked = true;
            return result;
        }

        match self.engine.verify_change(change).await {
            Ok(outcome) => {
                result.success = outcome.passed;
                result.error = outcome.error;
            }
            Err(e) => {
                result.success = false;
                result.error = Some(e.to_string());
            }
        }
        if result.out_of_order && result.error.is_none() {
            result.error = Some(String::from("Out of order"));
        }
        result
    }

    /// Plan changes inside the verified plan span that were never deployed.
    fn not_deployed(&self, positions: &[usize], deployed: &HashSet<&str>) -> Vec<VerificationResult> {
        let (Some(&low), Some(&high)) = (positions.iter().min(), positions.iter().max()) else {
            return Vec::new();
        };

        self.plan.changes()[low..=high]
            .iter()
            .filter(|c| !deployed.contains(c.id().as_str()))
            .map(|change| {
                let mut result = VerificationResult::for_change(change);
                result.success = false;
                result.not_deployed = true;
                result.error = Some(String::from("Not deployed"));
                result
            })
            .collect()
    }

    /// Undeployed plan changes after the verified plan span.
    fn pending(&self, positions: &[usize], deployed: &HashSet<&str>) -> Vec<String> {
        let start = positions.iter().max().map_or(0, |p| p + 1);
        self.plan
            .changes()
            .iter()
            .skip(start)
            .filter(|c| !deployed.contains(c.id().as_str()))
            .map(|c| c.name.clone())
            .collect()
    }
}
