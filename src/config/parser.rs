//! Configuration loader for `schemaflow.yaml` and the environment.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, a `.env` file
//! next to it, then `SCHEMAFLOW_*` environment variables.

use crate::error::{ConfigError, Result, SchemaflowError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::Settings;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "SCHEMAFLOW_CONFIG";

/// Default configuration file names looked up in the working directory.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["schemaflow.yaml", "schemaflow.yml"];

/// Loads [`Settings`] from disk and the environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Directory searched for default config files and `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader rooted at the working directory.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory searched for default files.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from an explicit path, `SCHEMAFLOW_CONFIG`, or the
    /// default file names, then applies `.env` and environment overrides.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error. Settings are not validated here.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn load(&self, explicit: Option<&Path>) -> Result<Settings> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut settings = match explicit {
            Some(path) => self.load_file(&path)?,
            None => match self.find_default() {
                Some(path) => self.load_file(&path)?,
                None => {
                    debug!("No configuration file found, using defaults");
                    Settings {
                        base_dir: self.base_dir(),
                        ..Settings::default()
                    }
                }
            },
        };

        self.load_dotenv(&settings.base_dir)?;
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(SchemaflowError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            SchemaflowError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut settings = self.parse_yaml(&content, Some(path))?;
        settings.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| self.base_dir(), Path::to_path_buf);
        Ok(settings)
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Settings> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(Settings {
                base_dir: self.base_dir(),
                ..Settings::default()
            });
        }

        let mut settings: Settings = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            SchemaflowError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;
        settings.base_dir = self.base_dir();
        Ok(settings)
    }

    fn find_default(&self) -> Option<PathBuf> {
        let dir = self.base_dir();
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    fn base_dir(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Loads `.env` from the given directory if present.
    fn load_dotenv(&self, dir: &Path) -> Result<()> {
        let env_path = dir.join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                SchemaflowError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Applies `SCHEMAFLOW_*` overrides.
    fn apply_env_overrides(settings: &mut Settings) {
        if let Ok(target) = std::env::var("SCHEMAFLOW_TARGET") {
            debug!("Overriding target.database from environment");
            settings.target.database = Some(target);
        }

        if let Ok(plan_file) = std::env::var("SCHEMAFLOW_PLAN_FILE") {
            debug!("Overriding project.plan_file from environment");
            settings.project.plan_file = plan_file;
        }

        if let Ok(name) = std::env::var("SCHEMAFLOW_PLANNER_NAME") {
            debug!("Overriding planner.name from environment");
            settings.planner.name = Some(name);
        }

        if let Ok(email) = std::env::var("SCHEMAFLOW_PLANNER_EMAIL") {
            debug!("Overriding planner.email from environment");
            settings.planner.email = Some(email);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
target:
  database: app.db
";
        let settings = ConfigLoader::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(settings.target.database.as_deref(), Some("app.db"));
        assert_eq!(settings.target.engine, EngineKind::Sqlite);
        assert_eq!(settings.project.plan_file, "sqitch.plan");
        assert_eq!(settings.verify.max_workers, 4);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
project:
  plan_file: db/app.plan
  top_dir: db
  deploy_dir: up
  revert_dir: down
  verify_dir: check
target:
  engine: sqlite
  database: data/app.db
planner:
  name: Alice Example
  email: alice@example.com
deploy:
  verify: false
verify:
  parallel: false
  max_workers: 8
";
        let settings = ConfigLoader::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(settings.project.plan_file, "db/app.plan");
        assert_eq!(settings.project.deploy_dir, "up");
        assert!(!settings.deploy.verify);
        assert!(!settings.verify.parallel);
        assert_eq!(settings.verify.max_workers, 8);
        assert_eq!(settings.planner().email, "alice@example.com");
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let yaml = "target:\n  engine: oracle\n";
        assert!(ConfigLoader::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let settings = ConfigLoader::new().parse_yaml("  \n", None).unwrap();
        assert_eq!(settings.project.plan_file, "sqitch.plan");
    }

    #[test]
    fn test_load_file_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemaflow.yaml");
        std::fs::write(&path, "target:\n  database: app.db\n").unwrap();

        let settings = ConfigLoader::new().load_file(&path).unwrap();
        assert_eq!(settings.base_dir, dir.path());
        assert_eq!(settings.database_path(), Some(dir.path().join("app.db")));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = ConfigLoader::new()
            .load_file("/nonexistent/schemaflow.yaml")
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaflowError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_default_file_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schemaflow.yml"), "verify:\n  max_workers: 2\n").unwrap();

        let loader = ConfigLoader::new().with_base_path(dir.path());
        let found = loader.find_default().unwrap();
        assert!(found.ends_with("schemaflow.yml"));
    }
}
