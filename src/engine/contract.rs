//! The engine contract consumed by every orchestrator.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::plan::Change;

/// Result of running a change's verify script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyOutcome {
    /// Whether the script ran without error.
    pub passed: bool,
    /// Backend message when it did not.
    pub error: Option<String>,
}

impl VerifyOutcome {
    /// A passing outcome.
    #[must_use]
    pub const fn passed() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    /// A failing outcome with a message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Storage backend for deployed state and script execution.
///
/// Implementations must tolerate concurrent `verify_change` calls, each on
/// an independent connection.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Provisions registry bookkeeping. Safe to call repeatedly.
    async fn ensure_registry(&self) -> Result<()>;

    /// Returns deployed change ids in deployment order.
    async fn get_deployed_changes(&self) -> Result<Vec<String>>;

    /// Runs the deploy script and records the change, atomically.
    async fn deploy_change(&self, change: &Change) -> Result<()>;

    /// Runs the revert script and unrecords the change, atomically.
    async fn revert_change(&self, change: &Change) -> Result<()>;

    /// Runs the verify script without persisting anything.
    async fn verify_change(&self, change: &Change) -> Result<VerifyOutcome>;

    /// Gets the engine type name.
    fn engine_type(&self) -> &'static str;
}

#[async_trait]
impl Engine for Box<dyn Engine> {
    async fn ensure_registry(&self) -> Result<()> {
        (**self).ensure_registry().await
    }

    async fn get_deployed_changes(&self) -> Result<Vec<String>> {
        (**self).get_deployed_changes().await
    }

    async fn deploy_change(&self, change: &Change) -> Result<()> {
        (**self).deploy_change(change).await
    }

    async fn revert_change(&self, change: &Change) -> Result<()> {
        (**self).revert_change(change).await
    }

    async fn verify_change(&self, change: &Change) -> Result<VerifyOutcome> {
        (**self).verify_change(change).await
    }

    fn engine_type(&self) -> &'static str {
        (**self).engine_type()
    }
}
