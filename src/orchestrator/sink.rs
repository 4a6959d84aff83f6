//! Caller-supplied output for orchestrator progress.
//!
//! Orchestrators never print. They describe what happens as [`Event`]s and
//! ask the sink to confirm destructive work.

use crate::error::SchemaflowError;
use crate::plan::Change;

use super::outcome::Operation;
use super::verify::VerificationResult;

/// Something worth telling the user.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// The resolved selection, before anything runs.
    Planned {
        /// Which operation.
        operation: Operation,
        /// Changes in processing order.
        changes: &'a [&'a Change],
        /// Target description.
        target: &'a str,
    },
    /// A change is about to be processed.
    Starting {
        /// Which operation.
        operation: Operation,
        /// The change.
        change: &'a Change,
    },
    /// A change was processed.
    Finished {
        /// Which operation.
        operation: Operation,
        /// The change.
        change: &'a Change,
    },
    /// A change failed; the run stops.
    ChangeFailed {
        /// Which operation.
        operation: Operation,
        /// The change.
        change: &'a Change,
        /// Why.
        error: &'a SchemaflowError,
    },
    /// One verification finished.
    Verified {
        /// The result.
        result: &'a VerificationResult,
        /// Label column width for alignment.
        width: usize,
    },
    /// Nothing was selected.
    NothingToDo {
        /// Which operation.
        operation: Operation,
        /// Human-readable reason.
        reason: &'a str,
    },
    /// Cancellation stopped the run.
    Cancelled {
        /// Which operation.
        operation: Operation,
        /// Changes processed before stopping.
        completed: usize,
    },
}

/// Receives orchestrator events.
pub trait MessageSink: Send + Sync {
    /// Reports an event.
    fn emit(&self, event: &Event<'_>);

    /// Asks whether to proceed with `operation` over `changes`.
    fn confirm(&self, operation: Operation, changes: &[&Change]) -> bool;
}

/// A sink that drops every event and confirms everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl MessageSink for SilentSink {
    fn emit(&self, _event: &Event<'_>) {}

    fn confirm(&self, _operation: Operation, _changes: &[&Change]) -> bool {
        true
    }
}
