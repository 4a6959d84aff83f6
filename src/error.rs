//! Error types for the Schemaflow change-management engine.
//!
//! This module provides the error hierarchy used across the plan model,
//! the dependency validator, the orchestrators and the engine contract:
//! plan content, validation, deployment, engine and configuration failures.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for success or a no-op.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code for an operational failure (validation, deploy, revert, verify).
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for an unexpected internal error.
pub const EXIT_INTERNAL: u8 = 2;

/// Exit code for a user cancellation.
pub const EXIT_CANCELLED: u8 = 130;

/// The main error type for Schemaflow.
#[derive(Debug, Error)]
pub enum SchemaflowError {
    /// Malformed or inconsistent plan content.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Dependency or precondition failure.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A specific change's script or verification failed.
    #[error("Deployment error: {0}")]
    Deployment(#[from] DeploymentError),

    /// The backend cannot honor the engine contract.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Unexpected error: {0}")]
    Internal(String),
}

/// Plan content errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A line could not be parsed.
    #[error("line {line}: {message}")]
    Syntax {
        /// One-based line number in the plan text.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// The `%project` pragma is absent.
    #[error("missing %project pragma")]
    MissingProject,

    /// A change name appears twice.
    #[error("line {line}: duplicate change name: {name}")]
    DuplicateChange {
        /// One-based line number, or 0 when added programmatically.
        line: usize,
        /// The duplicated name.
        name: String,
    },

    /// A tag name appears twice.
    #[error("line {line}: duplicate tag name: {name}")]
    DuplicateTag {
        /// One-based line number, or 0 when added programmatically.
        line: usize,
        /// The duplicated name.
        name: String,
    },

    /// A change is older than the change before it.
    #[error("line {line}: change {name} has an earlier timestamp than the previous change {previous}")]
    OutOfOrder {
        /// One-based line number, or 0 when added programmatically.
        line: usize,
        /// The out-of-order change.
        name: String,
        /// The change it should not precede.
        previous: String,
    },

    /// A same-project requirement names no change in the plan.
    #[error("line {line}: change {change} depends on unknown change: {dependency}")]
    UnknownDependency {
        /// One-based line number, or 0 when added programmatically.
        line: usize,
        /// The dependent change.
        change: String,
        /// The missing requirement.
        dependency: String,
    },

    /// No change matches the given name or id.
    #[error("unknown change: \"{name}\"")]
    UnknownChange {
        /// The requested name or id.
        name: String,
    },

    /// A change or tag name cannot be written to plan text.
    #[error("invalid {kind} name \"{name}\": {reason}")]
    InvalidName {
        /// "change" or "tag".
        kind: &'static str,
        /// The rejected name.
        name: String,
        /// What makes it unusable.
        reason: &'static str,
    },

    /// A note or planner field cannot be written to plan text.
    #[error("invalid {field} for {kind} {name}: {reason}")]
    InvalidField {
        /// "change" or "tag".
        kind: &'static str,
        /// The entry name.
        name: String,
        /// The rejected field.
        field: &'static str,
        /// What makes it unusable.
        reason: &'static str,
    },

    /// A tag cannot be applied to a plan with no changes.
    #[error("cannot apply tag \"@{tag}\" to a plan with no changes")]
    EmptyPlan {
        /// The requested tag.
        tag: String,
    },

    /// The plan file could not be read or written.
    #[error("plan file {path}: {message}")]
    File {
        /// Path of the plan file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Dependency and precondition errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A change requires another that is neither deployed nor in the batch.
    #[error("Change {change} requires {requirement}, but it is not deployed and not in the current deployment")]
    MissingRequirement {
        /// The dependent change.
        change: String,
        /// The unsatisfied requirement.
        requirement: String,
    },

    /// A change cutoff names nothing in the plan.
    #[error("Change not found in plan: {name}")]
    UnknownChange {
        /// The requested change name or id.
        name: String,
    },

    /// A tag cutoff names nothing in the plan.
    #[error("Tag not found in plan: {name}")]
    UnknownTag {
        /// The requested tag name.
        name: String,
    },

    /// The change exists in the plan but was never deployed.
    #[error("Change \"{name}\" has not been deployed")]
    NotDeployed {
        /// The requested change name or id.
        name: String,
    },

    /// The change exists neither in the plan nor in the registry.
    #[error("Cannot find \"{name}\" in the database or the plan")]
    NotFound {
        /// The requested change name or id.
        name: String,
    },

    /// Strict revert was requested without a boundary.
    #[error("Must specify a target revision in strict mode")]
    StrictRequiresCutoff,

    /// The registry records changes but the plan has none.
    #[error("There are deployed changes, but none planned")]
    NothingPlanned,
}

/// Change execution errors.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The script file for a change does not exist.
    #[error("{operation} script for {change} not found: {path}")]
    ScriptNotFound {
        /// The change.
        change: String,
        /// Script kind (deploy, revert, verify).
        operation: String,
        /// Expected path.
        path: PathBuf,
    },

    /// The script for a change failed.
    #[error("{operation} script for {change} failed: {message}")]
    ScriptFailed {
        /// The change.
        change: String,
        /// Script kind (deploy, revert, verify).
        operation: String,
        /// Backend message.
        message: String,
    },

    /// A change deployed but its verification did not pass.
    #[error("Verification failed for change {change}: {reason}")]
    VerificationFailed {
        /// The change.
        change: String,
        /// Why verification failed.
        reason: String,
    },

    /// A verify run found problems.
    #[error("Verify failed: {errors} of {total} changes reported errors")]
    VerifyFailed {
        /// Number of results with errors.
        errors: usize,
        /// Number of results.
        total: usize,
    },
}

/// Backend errors propagated across the engine contract.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A connection to the target could not be established.
    #[error("Cannot connect to {target}: {message}")]
    Connection {
        /// Target description.
        target: String,
        /// Backend message.
        message: String,
    },

    /// Registry provisioning or bookkeeping failed.
    #[error("Registry error: {message}")]
    Registry {
        /// Backend message.
        message: String,
    },

    /// A backend task could not complete.
    #[error("Engine task failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A value is invalid.
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Field that failed validation.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for Schemaflow operations.
pub type Result<T> = std::result::Result<T, SchemaflowError>;

impl SchemaflowError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Internal(_) => EXIT_INTERNAL,
            _ => EXIT_FAILURE,
        }
    }
}

impl PlanError {
    /// Creates a syntax error for a line.
    #[must_use]
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

impl DeploymentError {
    /// Creates a script failure for a change.
    #[must_use]
    pub fn script_failed(
        change: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ScriptFailed {
            change: change.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl EngineError {
    /// Creates a registry error with the given message.
    #[must_use]
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates a task error with the given message.
    #[must_use]
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Creates an invalid-value error for a specific field.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
