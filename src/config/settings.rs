//! Settings types mapping to `schemaflow.yaml`.
//!
//! Every section is optional; missing values fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::{EngineKind, ScriptLayout};
use crate::error::{ConfigError, Result};
use crate::plan::Planner;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Plan and script locations.
    #[serde(default)]
    pub project: ProjectSettings,
    /// Database target.
    #[serde(default)]
    pub target: TargetSettings,
    /// Identity recorded on new changes and tags.
    #[serde(default)]
    pub planner: PlannerSettings,
    /// Deploy defaults.
    #[serde(default)]
    pub deploy: DeploySettings,
    /// Verify defaults.
    #[serde(default)]
    pub verify: VerifySettings,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Plan and script locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Plan file path.
    #[serde(default = "default_plan_file")]
    pub plan_file: String,
    /// Root directory for script directories.
    #[serde(default = "default_top_dir")]
    pub top_dir: String,
    /// Deploy scripts directory under `top_dir`.
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: String,
    /// Revert scripts directory under `top_dir`.
    #[serde(default = "default_revert_dir")]
    pub revert_dir: String,
    /// Verify scripts directory under `top_dir`.
    #[serde(default = "default_verify_dir")]
    pub verify_dir: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            plan_file: default_plan_file(),
            top_dir: default_top_dir(),
            deploy_dir: default_deploy_dir(),
            revert_dir: default_revert_dir(),
            verify_dir: default_verify_dir(),
        }
    }
}

/// Database target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSettings {
    /// Backend kind.
    #[serde(default)]
    pub engine: EngineKind,
    /// Database location (a file path for SQLite).
    #[serde(default)]
    pub database: Option<String>,
}

/// Planner identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannerSettings {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

/// Deploy defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploySettings {
    /// Verify each change right after deploying it.
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Verify defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifySettings {
    /// Use the worker pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Worker pool size limit.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: default_max_workers(),
        }
    }
}

impl Settings {
    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty plan file, a zero worker limit or a
    /// missing database.
    pub fn validate(&self) -> Result<()> {
        if self.project.plan_file.trim().is_empty() {
            return Err(ConfigError::invalid("project.plan_file", "must not be empty").into());
        }

        if self.verify.max_workers == 0 {
            return Err(ConfigError::invalid("verify.max_workers", "must be at least 1").into());
        }

        if self.target.database.as_deref().is_none_or(|d| d.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "target.database",
                "no database given; set it in the config file, SCHEMAFLOW_TARGET or --target",
            )
            .into());
        }

        Ok(())
    }

    /// Resolved plan file path.
    #[must_use]
    pub fn plan_path(&self) -> PathBuf {
        self.resolve(&self.project.plan_file)
    }

    /// Resolved database path, if configured.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        self.target.database.as_deref().map(|d| self.resolve(d))
    }

    /// Script locations for the configured project.
    #[must_use]
    pub fn script_layout(&self) -> ScriptLayout {
        ScriptLayout::new(self.resolve(&self.project.top_dir))
            .with_deploy_dir(&self.project.deploy_dir)
            .with_revert_dir(&self.project.revert_dir)
            .with_verify_dir(&self.project.verify_dir)
    }

    /// Planner identity, falling back to placeholders.
    #[must_use]
    pub fn planner(&self) -> Planner {
        Planner::new(
            self.planner.name.clone().unwrap_or_else(|| String::from("Unknown")),
            self.planner
                .email
                .clone()
                .unwrap_or_else(|| String::from("unknown@localhost")),
        )
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn default_plan_file() -> String {
    String::from("sqitch.plan")
}

fn default_top_dir() -> String {
    String::from(".")
}

fn default_deploy_dir() -> String {
    String::from("deploy")
}

fn default_revert_dir() -> String {
    String::from("revert")
}

fn default_verify_dir() -> String {
    String::from("verify")
}

const fn default_true() -> bool {
    true
}

const fn default_max_workers() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.project.plan_file, "sqitch.plan");
        assert_eq!(settings.project.deploy_dir, "deploy");
        assert_eq!(settings.target.engine, EngineKind::Sqlite);
        assert!(settings.deploy.verify);
        assert!(settings.verify.parallel);
        assert_eq!(settings.verify.max_workers, 4);
    }

    #[test]
    fn test_validate_requires_database() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err());

        settings.target.database = Some(String::from("app.db"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut settings = Settings::default();
        settings.target.database = Some(String::from("app.db"));
        settings.verify.max_workers = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let mut settings = Settings {
            base_dir: PathBuf::from("/srv/app"),
            ..Settings::default()
        };
        settings.target.database = Some(String::from("/var/db/app.db"));

        assert_eq!(settings.plan_path(), PathBuf::from("/srv/app/sqitch.plan"));
        assert_eq!(settings.database_path(), Some(PathBuf::from("/var/db/app.db")));
        assert_eq!(
            settings.script_layout().deploy_script("users"),
            PathBuf::from("/srv/app/./deploy/users.sql")
        );
    }
}
