//! In-memory engine and recording sink for orchestrator tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{DeploymentError, EngineError, Result};
use crate::orchestrator::{Event, MessageSink, Operation};
use crate::plan::Change;

use super::contract::{Engine, VerifyOutcome};

/// Scriptable in-memory [`Engine`].
#[derive(Debug, Default)]
pub struct FakeEngine {
    deployed: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    registry: AtomicBool,
    fail_deploy: HashSet<String>,
    fail_revert: HashSet<String>,
    fail_verify: HashSet<String>,
    broken_verify: HashSet<String>,
    delays: HashMap<String, Duration>,
    cancel_after: Option<(String, watch::Sender<bool>)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployed<'a>(self, changes: impl IntoIterator<Item = &'a Change>) -> Self {
        self.deployed
            .lock()
            .unwrap()
            .extend(changes.into_iter().map(Change::id));
        self
    }

    pub fn with_deployed_ids(self, ids: &[&str]) -> Self {
        self.deployed
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| (*id).to_string()));
        self
    }

    pub fn failing_deploy(mut self, name: &str) -> Self {
        self.fail_deploy.insert(name.to_string());
        self
    }

    pub fn failing_revert(mut self, name: &str) -> Self {
        self.fail_revert.insert(name.to_string());
        self
    }

    /// The verify script runs and reports failure.
    pub fn failing_verify(mut self, name: &str) -> Self {
        self.fail_verify.insert(name.to_string());
        self
    }

    /// `verify_change` itself returns an error.
    pub fn broken_verify(mut self, name: &str) -> Self {
        self.broken_verify.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Flips the cancellation flag once `name` has been deployed or reverted.
    pub fn cancel_after(mut self, name: &str, sender: watch::Sender<bool>) -> Self {
        self.cancel_after = Some((name.to_string(), sender));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn deployed(&self) -> Vec<String> {
        self.deployed.lock().unwrap().clone()
    }

    pub fn registry_ensured(&self) -> bool {
        self.registry.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, kind: &str, change: &Change) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{kind}:{}", change.name));
    }

    async fn pause(&self, change: &Change) {
        if let Some(delay) = self.delays.get(&change.name) {
            tokio::time::sleep(*delay).await;
        }
    }

    fn maybe_cancel(&self, change: &Change) {
        if let Some((name, sender)) = &self.cancel_after {
            if *name == change.name {
                let _ = sender.send(true);
            }
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn ensure_registry(&self) -> Result<()> {
        self.registry.store(true, Ordering::SeqCst);
        self.calls.lock().unwrap().push(String::from("ensure_registry"));
        Ok(())
    }

    async fn get_deployed_changes(&self) -> Result<Vec<String>> {
        Ok(self.deployed())
    }

    async fn deploy_change(&self, change: &Change) -> Result<()> {
        self.record("deploy", change);
        self.pause(change).await;
        if self.fail_deploy.contains(&change.name) {
            return Err(DeploymentError::script_failed(&change.name, "deploy", "boom").into());
        }
        self.deployed.lock().unwrap().push(change.id());
        self.maybe_cancel(change);
        Ok(())
    }

    async fn revert_change(&self, change: &Change) -> Result<()> {
        self.record("revert", change);
        self.pause(change).await;
        if self.fail_revert.contains(&change.name) {
            return Err(DeploymentError::script_failed(&change.name, "revert", "boom").into());
        }
        let id = change.id();
        self.deployed.lock().unwrap().retain(|d| *d != id);
        self.maybe_cancel(change);
        Ok(())
    }

    async fn verify_change(&self, change: &Change) -> Result<VerifyOutcome> {
        self.record("verify", change);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pause(change).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken_verify.contains(&change.name) {
            return Err(EngineError::task("connection lost").into());
        }
        if self.fail_verify.contains(&change.name) {
            return Ok(VerifyOutcome::failed("verify script failed"));
        }
        Ok(VerifyOutcome::passed())
    }

    fn engine_type(&self) -> &'static str {
        "fake"
    }
}

/// Sink recording events as short strings.
#[derive(Debug)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
    answer: bool,
    prompts: AtomicUsize,
    emitting: AtomicBool,
    overlaps: AtomicUsize,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::answering(true)
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answer: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            answer,
            prompts: AtomicUsize::new(0),
            emitting: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl MessageSink for RecordingSink {
    fn emit(&self, event: &Event<'_>) {
        if self.emitting.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let line = match event {
            Event::Planned { operation, changes, .. } => format!(
                "planned:{operation}:{}",
                changes.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(",")
            ),
            Event::Starting { operation, change } => format!("start:{operation}:{}", change.name),
            Event::Finished { operation, change } => format!("done:{operation}:{}", change.name),
            Event::ChangeFailed { operation, change, .. } => {
                format!("failed:{operation}:{}", change.name)
            }
            Event::Verified { result, .. } => format!(
                "verified:{}:{}",
                result.label,
                if result.has_errors() { "not ok" } else { "ok" }
            ),
            Event::NothingToDo { operation, .. } => format!("nothing:{operation}"),
            Event::Cancelled { operation, completed } => format!("cancelled:{operation}:{completed}"),
        };
        self.events.lock().unwrap().push(line);

        self.emitting.store(false, Ordering::SeqCst);
    }

    fn confirm(&self, _operation: Operation, _changes: &[&Change]) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
