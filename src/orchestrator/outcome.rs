//! Structured results of a deploy, revert or verify run.

use serde::Serialize;

use crate::error::{EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS, SchemaflowError};

use super::verify::VerificationResult;

/// Which orchestrator produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Apply pending changes.
    Deploy,
    /// Undo deployed changes.
    Revert,
    /// Check deployed changes.
    Verify,
}

impl Operation {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Revert => "revert",
            Self::Verify => "verify",
        }
    }

    /// Present participle for progress messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Deploy => "Deploying",
            Self::Revert => "Reverting",
            Self::Verify => "Verifying",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Every selected change was processed.
    Completed,
    /// Nothing was selected.
    NothingToDo,
    /// Log-only mode reported the selection without touching the target.
    Previewed,
    /// The user declined the confirmation prompt.
    Declined,
    /// A change failed; earlier changes stay processed.
    Failed,
    /// Cancelled between changes.
    Cancelled,
}

/// Result of one orchestrator run.
#[derive(Debug)]
pub struct Outcome {
    /// Which operation ran.
    pub operation: Operation,
    /// How it ended.
    pub state: RunState,
    /// Selected change names, in processing order.
    pub changes: Vec<String>,
    /// Changes fully processed before the run ended.
    pub completed: usize,
    /// Per-change verification results, in range order.
    pub results: Vec<VerificationResult>,
    /// Undeployed plan changes beyond a verified range.
    pub pending: Vec<String>,
    /// What stopped a failed run.
    pub error: Option<SchemaflowError>,
}

impl Outcome {
    /// A run with no selection.
    #[must_use]
    pub const fn nothing_to_do(operation: Operation) -> Self {
        Self::with_state(operation, RunState::NothingToDo, Vec::new())
    }

    /// A run that ended in `state` over the given selection.
    #[must_use]
    pub const fn with_state(operation: Operation, state: RunState, changes: Vec<String>) -> Self {
        Self {
            operation,
            state,
            changes,
            completed: 0,
            results: Vec::new(),
            pending: Vec::new(),
            error: None,
        }
    }

    /// Whether the run ended without failure or cancellation.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.state, RunState::Failed | RunState::Cancelled)
    }

    /// Process exit code: `0` success, `1` failure, `2` internal, `130` cancelled.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.state {
            RunState::Cancelled => EXIT_CANCELLED,
            RunState::Failed => self.error.as_ref().map_or(EXIT_FAILURE, SchemaflowError::exit_code),
            _ => EXIT_SUCCESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::nothing_to_do(Operation::Deploy).exit_code(), 0);

        let cancelled = Outcome::with_state(Operation::Revert, RunState::Cancelled, Vec::new());
        assert_eq!(cancelled.exit_code(), 130);
        assert!(!cancelled.is_success());

        let mut failed = Outcome::with_state(Operation::Deploy, RunState::Failed, Vec::new());
        assert_eq!(failed.exit_code(), 1);
        failed.error = Some(SchemaflowError::internal("boom"));
        assert_eq!(failed.exit_code(), 2);

        let declined = Outcome::with_state(Operation::Revert, RunState::Declined, Vec::new());
        assert_eq!(declined.exit_code(), 0);
        assert!(declined.is_success());
    }
}
