//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::Cutoff;

/// Schemaflow - database schema change management.
#[derive(Parser, Debug)]
#[command(name = "schemaflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "SCHEMAFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Database to operate on, overriding the configuration.
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Plan file, overriding the configuration.
    #[arg(short, long, global = true)]
    pub plan_file: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy pending changes.
    Deploy {
        /// Change or @tag to deploy up to.
        cutoff: Option<String>,

        /// Change to deploy up to.
        #[arg(long, conflicts_with_all = ["cutoff", "to_tag"])]
        to_change: Option<String>,

        /// Tag to deploy up to.
        #[arg(long, conflicts_with = "cutoff")]
        to_tag: Option<String>,

        /// Verify each change after deploying it.
        #[arg(long, conflicts_with = "no_verify")]
        verify: bool,

        /// Do not verify changes after deploying them.
        #[arg(long)]
        no_verify: bool,

        /// Show what would be deployed without deploying.
        #[arg(long)]
        log_only: bool,
    },

    /// Revert deployed changes.
    Revert {
        /// Change or @tag to keep; everything after it is reverted.
        cutoff: Option<String>,

        /// Change to revert to.
        #[arg(long, conflicts_with_all = ["cutoff", "to_tag"])]
        to_change: Option<String>,

        /// Tag to revert to.
        #[arg(long, conflicts_with = "cutoff")]
        to_tag: Option<String>,

        /// Skip confirmation prompt.
        #[arg(short = 'y', long)]
        no_prompt: bool,

        /// Show what would be reverted without reverting.
        #[arg(long)]
        log_only: bool,

        /// Require an explicit change or tag.
        #[arg(long)]
        strict: bool,
    },

    /// Verify deployed changes.
    Verify {
        /// First change or @tag to verify.
        from: Option<String>,

        /// Last change or @tag to verify.
        to: Option<String>,

        /// First change to verify.
        #[arg(long, conflicts_with = "from")]
        from_change: Option<String>,

        /// Last change to verify.
        #[arg(long, conflicts_with = "to")]
        to_change: Option<String>,

        /// Verify one change at a time.
        #[arg(long)]
        no_parallel: bool,

        /// Maximum number of concurrent verifications.
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Show which planned changes are deployed and which are pending.
    Status,

    /// Show the plan.
    Plan {
        /// Show change ids.
        #[arg(long)]
        ids: bool,
    },

    /// Add a change to the plan and create its script stubs.
    Add {
        /// Change name.
        name: String,

        /// Required change (repeatable).
        #[arg(short, long = "requires")]
        requires: Vec<String>,

        /// Conflicting change (repeatable).
        #[arg(short, long = "conflicts")]
        conflicts: Vec<String>,

        /// Change note.
        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Tag a change in the plan.
    Tag {
        /// Tag name.
        name: String,

        /// Change to tag (defaults to the last change).
        change: Option<String>,

        /// Tag note.
        #[arg(short, long, default_value = "")]
        note: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Combines a positional boundary with `--to-change` / `--to-tag`.
#[must_use]
pub fn resolve_cutoff(
    positional: Option<&str>,
    change: Option<&str>,
    tag: Option<&str>,
) -> Option<Cutoff> {
    if let Some(change) = change {
        return Some(Cutoff::Change(change.to_string()));
    }
    if let Some(tag) = tag {
        return Some(Cutoff::Tag(tag.trim_start_matches('@').to_string()));
    }
    positional.map(Cutoff::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_args() {
        let cli = Cli::try_parse_from(["schemaflow", "deploy", "@v1.0", "--no-verify"]).unwrap();
        match cli.command {
            Commands::Deploy {
                cutoff, no_verify, ..
            } => {
                assert_eq!(cutoff.as_deref(), Some("@v1.0"));
                assert!(no_verify);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::try_parse_from([
            "schemaflow",
            "verify",
            "--target",
            "app.db",
            "--output",
            "json",
            "--max-workers",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.target.as_deref(), Some("app.db"));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Verify {
                max_workers: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn test_cutoff_flags_conflict_with_positional() {
        assert!(Cli::try_parse_from(["schemaflow", "revert", "a", "--to-change", "b"]).is_err());
    }

    #[test]
    fn test_revert_short_yes() {
        let cli = Cli::try_parse_from(["schemaflow", "revert", "-y", "--strict", "users"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Revert {
                no_prompt: true,
                strict: true,
                ..
            }
        ));
    }

    #[test]
    fn test_status_takes_global_target() {
        let cli = Cli::try_parse_from(["schemaflow", "status", "--target", "prod.db"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.target.as_deref(), Some("prod.db"));
        assert!(Cli::try_parse_from(["schemaflow", "status", "extra"]).is_err());
    }

    #[test]
    fn test_add_repeatable_requires() {
        let cli = Cli::try_parse_from([
            "schemaflow", "add", "posts", "-r", "users", "-r", "roles", "-c", "legacy", "-n", "Posts",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                name,
                requires,
                conflicts,
                note,
            } => {
                assert_eq!(name, "posts");
                assert_eq!(requires, vec!["users", "roles"]);
                assert_eq!(conflicts, vec!["legacy"]);
                assert_eq!(note, "Posts");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_cutoff() {
        assert_eq!(resolve_cutoff(None, None, None), None);
        assert_eq!(
            resolve_cutoff(Some("@v1"), None, None),
            Some(Cutoff::Tag(String::from("v1")))
        );
        assert_eq!(
            resolve_cutoff(None, Some("users"), None),
            Some(Cutoff::Change(String::from("users")))
        );
        assert_eq!(
            resolve_cutoff(None, None, Some("@v1")),
            Some(Cutoff::Tag(String::from("v1")))
        );
    }
}
