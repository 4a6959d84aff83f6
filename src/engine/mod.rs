//! Engine module: the backend contract and its implementations.
//!
//! Orchestrators only ever talk to [`Engine`]. Backend selection happens
//! once, in [`connect`].

mod contract;
mod layout;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Settings;
use crate::error::{ConfigError, Result};

pub use contract::{Engine, VerifyOutcome};
pub use layout::{ScriptKind, ScriptLayout};
pub use sqlite::{REGISTRY_TABLE, SqliteEngine};

/// Supported backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// SQLite via `rusqlite`.
    #[default]
    Sqlite,
}

impl EngineKind {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the configured engine for a project.
///
/// # Errors
///
/// Returns an error if no database is configured.
pub fn connect(settings: &Settings, project: &str) -> Result<Box<dyn Engine>> {
    let database = settings
        .database_path()
        .ok_or_else(|| ConfigError::invalid("target.database", "no database configured"))?;

    info!(
        "Using {} engine at {}",
        settings.target.engine,
        database.display()
    );

    match settings.target.engine {
        EngineKind::Sqlite => Ok(Box::new(SqliteEngine::new(
            database,
            project,
            settings.script_layout(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_database() {
        let settings = Settings::default();
        assert!(connect(&settings, "app").is_err());
    }

    #[test]
    fn test_connect_sqlite() {
        let mut settings = Settings::default();
        settings.target.database = Some(String::from("app.db"));
        let engine = connect(&settings, "app").unwrap();
        assert_eq!(engine.engine_type(), "sqlite");
    }
}
