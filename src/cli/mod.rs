//! CLI module for Schemaflow.
//!
//! This module provides the command-line interface over the plan and the
//! deploy, revert and verify orchestrators.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, resolve_cutoff};
pub use output::{ConsoleSink, OutputFormatter, is_affirmative};
