//! Deploy, revert and verify orchestration.
//!
//! Each orchestrator selects changes from the plan against the engine's
//! deployed set, reports progress through a [`MessageSink`] and returns a
//! structured [`Outcome`]. [`StatusReport`] is the read-only counterpart.

mod cutoff;
mod deploy;
mod outcome;
mod revert;
mod sink;
mod status;
mod verify;

use tokio::sync::watch;

pub use cutoff::Cutoff;
pub use deploy::DeployOrchestrator;
pub use outcome::{Operation, Outcome, RunState};
pub use revert::RevertOrchestrator;
pub use sink::{Event, MessageSink, SilentSink};
pub use status::{DeployedChange, StatusReport};
pub use verify::{DEFAULT_MAX_WORKERS, VerificationResult, VerifyOrchestrator};

/// Whether the cancellation flag, if any, has been raised.
fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}
