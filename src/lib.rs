// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Schemaflow
//!
//! Plan-driven database schema change management.
//!
//! ## Overview
//!
//! A project keeps an ordered, append-only plan of named changes. Each change
//! has a deploy, a revert and a verify script. Schemaflow lets you:
//!
//! - Deploy pending changes in plan order, up to a change or tag
//! - Revert deployed changes in reverse order, back to a change or tag
//! - Verify deployed changes, optionally through a bounded worker pool
//! - Detect drift between the registry and the plan
//! - Report deployment status without touching the target
//!
//! ## Architecture
//!
//! 1. **Plan**: parsed from `sqitch.plan`; every change and tag has a
//!    content-addressed SHA-1 identifier
//! 2. **Engine**: applies scripts and records deployed change ids in a
//!    registry inside the target database
//! 3. **Orchestrators**: select changes from the plan against the registry,
//!    check dependencies and drive the engine
//!
//! ## Modules
//!
//! - [`plan`]: Plan model, parser, identifiers and dependency validation
//! - [`engine`]: Engine contract and the SQLite backend
//! - [`orchestrator`]: Deploy, revert and verify orchestration
//! - [`config`]: Configuration loading
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```text
//! %syntax-version=1.0.0
//! %project=blog
//!
//! users 2024-01-15T10:30:00Z Alice Example <alice@example.com> # Create users table
//! posts [users] 2024-01-16T09:00:00Z Alice Example <alice@example.com> # Add posts
//! @v1.0 2024-01-17T12:00:00Z Alice Example <alice@example.com> # First release
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod plan;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, ConsoleSink, OutputFormatter};
pub use config::{ConfigLoader, Settings};
pub use engine::{Engine, ScriptLayout, SqliteEngine, VerifyOutcome};
pub use error::{Result, SchemaflowError};
pub use orchestrator::{
    Cutoff, DeployOrchestrator, Event, MessageSink, Operation, Outcome, RevertOrchestrator,
    RunState, SilentSink, StatusReport, VerificationResult, VerifyOrchestrator,
};
pub use plan::{Change, Dependency, DependencyValidator, Plan, PlanParser, Planner, Tag};
