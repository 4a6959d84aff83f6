//! Configuration module for Schemaflow.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `schemaflow.yaml`
//! - Loading `.env` and applying `SCHEMAFLOW_*` overrides
//! - Validation of configuration values

mod parser;
mod settings;

pub use parser::{CONFIG_ENV_VAR, ConfigLoader, DEFAULT_CONFIG_FILES};
pub use settings::{
    DeploySettings, PlannerSettings, ProjectSettings, Settings, TargetSettings, VerifySettings,
};
