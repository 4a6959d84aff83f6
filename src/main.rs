//! Schemaflow CLI entrypoint.
//!
//! This is the main entrypoint for the schemaflow command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use chrono::{SubsecRound, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use schemaflow::cli::{Cli, Commands, ConsoleSink, OutputFormatter, resolve_cutoff};
use schemaflow::config::{ConfigLoader, Settings};
use schemaflow::engine::{self, Engine, ScriptKind};
use schemaflow::error::{ConfigError, Result, SchemaflowError};
use schemaflow::orchestrator::{
    DeployOrchestrator, Outcome, RevertOrchestrator, StatusReport, VerifyOrchestrator,
};
use schemaflow::plan::{Change, Dependency, DependencyKind, Plan};

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let formatter = OutputFormatter::new(cli.output);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(schemaflow::error::EXIT_INTERNAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let _ = std::io::stderr().write_all(formatter.format_error(&e).as_bytes());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let settings = load_settings(&cli)?;
    let formatter = OutputFormatter::new(cli.output);
    let sink = ConsoleSink::new(cli.output);

    match cli.command {
        Commands::Deploy {
            cutoff,
            to_change,
            to_tag,
            verify,
            no_verify,
            log_only,
        } => {
            let plan = Plan::load(settings.plan_path())?;
            let engine = connect(&settings, &plan)?;
            let verify = if no_verify {
                false
            } else {
                verify || settings.deploy.verify
            };

            let outcome = DeployOrchestrator::new(&plan, engine.as_ref(), &sink)
                .with_target(target_label(&settings))
                .with_cutoff(resolve_cutoff(
                    cutoff.as_deref(),
                    to_change.as_deref(),
                    to_tag.as_deref(),
                ))
                .with_verify(verify)
                .with_log_only(log_only)
                .with_cancellation(cancellation())
                .run()
                .await?;
            Ok(finish(&formatter, &outcome))
        }
        Commands::Revert {
            cutoff,
            to_change,
            to_tag,
            no_prompt,
            log_only,
            strict,
        } => {
            let plan = Plan::load(settings.plan_path())?;
            let engine = connect(&settings, &plan)?;

            let outcome = RevertOrchestrator::new(&plan, engine.as_ref(), &sink)
                .with_target(target_label(&settings))
                .with_cutoff(resolve_cutoff(
                    cutoff.as_deref(),
                    to_change.as_deref(),
                    to_tag.as_deref(),
                ))
                .with_no_prompt(no_prompt)
                .with_log_only(log_only)
                .with_strict(strict)
                .with_cancellation(cancellation())
                .run()
                .await?;
            Ok(finish(&formatter, &outcome))
        }
        Commands::Verify {
            from,
            to,
            from_change,
            to_change,
            no_parallel,
            max_workers,
        } => {
            let plan = Plan::load(settings.plan_path())?;
            let engine = connect(&settings, &plan)?;

            let outcome = VerifyOrchestrator::new(&plan, engine.as_ref(), &sink)
                .with_from(resolve_cutoff(from.as_deref(), from_change.as_deref(), None))
                .with_to(resolve_cutoff(to.as_deref(), to_change.as_deref(), None))
                .with_parallel(settings.verify.parallel && !no_parallel)
                .with_max_workers(max_workers.unwrap_or(settings.verify.max_workers))
                .with_cancellation(cancellation())
                .run()
                .await?;
            Ok(finish(&formatter, &outcome))
        }
        Commands::Status => {
            let plan = Plan::load(settings.plan_path())?;
            let engine = connect(&settings, &plan)?;

            let report = StatusReport::collect(&plan, engine.as_ref(), target_label(&settings)).await?;
            write_stdout(&formatter.format_status(&report));
            Ok(report.exit_code())
        }
        Commands::Plan { ids } => {
            let plan = Plan::load(settings.plan_path())?;
            write_stdout(&formatter.format_plan(&plan, ids));
            Ok(schemaflow::error::EXIT_SUCCESS)
        }
        Commands::Add {
            name,
            requires,
            conflicts,
            note,
        } => cmd_add(&settings, &formatter, &name, &requires, &conflicts, &note),
        Commands::Tag { name, change, note } => {
            cmd_tag(&settings, &formatter, &name, change.as_deref(), &note)
        }
    }
}

/// Appends a change to the plan and writes its script stubs.
fn cmd_add(
    settings: &Settings,
    formatter: &OutputFormatter,
    name: &str,
    requires: &[String],
    conflicts: &[String],
    note: &str,
) -> Result<u8> {
    let path = settings.plan_path();
    let mut plan = Plan::load(&path)?;

    let mut dependencies = Vec::with_capacity(requires.len() + conflicts.len());
    for text in requires {
        dependencies.push(parse_dependency(text, DependencyKind::Require)?);
    }
    for text in conflicts {
        dependencies.push(parse_dependency(text, DependencyKind::Conflict)?);
    }

    let change = Change::new(name, Utc::now().trunc_subsecs(0), &settings.planner())
        .with_note(note.trim())
        .with_dependencies(dependencies);
    plan.add_change(change)?;
    plan.save(&path)?;

    let layout = settings.script_layout();
    for kind in [ScriptKind::Deploy, ScriptKind::Revert, ScriptKind::Verify] {
        let script = layout.script(kind, name);
        if script.exists() {
            debug!("Keeping existing script {}", script.display());
            continue;
        }
        write_stub(&script, &script_stub(kind, &plan.project, name, requires))?;
        info!("Created {}", script.display());
    }

    write_stdout(&formatter.success(&format!(
        "Added \"{name}\" to {}",
        path.display()
    )));
    Ok(schemaflow::error::EXIT_SUCCESS)
}

/// Tags a change in the plan.
fn cmd_tag(
    settings: &Settings,
    formatter: &OutputFormatter,
    name: &str,
    change: Option<&str>,
    note: &str,
) -> Result<u8> {
    let path = settings.plan_path();
    let mut plan = Plan::load(&path)?;

    let tag = plan.create_tag(name, change, note.trim(), &settings.planner())?;
    let message = format!(
        "Tagged \"{}\" with @{}",
        tag.change.as_deref().unwrap_or_default(),
        tag.name
    );
    plan.save(&path)?;

    write_stdout(&formatter.success(&message));
    Ok(schemaflow::error::EXIT_SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads settings and applies command-line overrides.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = ConfigLoader::new().load(cli.config.as_deref())?;
    let cwd = std::env::current_dir()?;

    if let Some(target) = &cli.target {
        settings.target.database = Some(cwd.join(target).display().to_string());
    }
    if let Some(plan_file) = &cli.plan_file {
        settings.project.plan_file = cwd.join(plan_file).display().to_string();
    }

    debug!("Plan file: {}", settings.plan_path().display());
    Ok(settings)
}

/// Validates settings and builds the configured engine.
fn connect(settings: &Settings, plan: &Plan) -> Result<Box<dyn Engine>> {
    settings.validate()?;
    engine::connect(settings, &plan.project)
}

/// Describes the target in progress messages.
fn target_label(settings: &Settings) -> String {
    settings
        .database_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Raises a cancellation flag on Ctrl-C.
fn cancellation() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current change");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Prints the outcome summary and returns its exit code.
fn finish(formatter: &OutputFormatter, outcome: &Outcome) -> u8 {
    write_stdout(&formatter.format_outcome(outcome));
    outcome.exit_code()
}

fn parse_dependency(text: &str, kind: DependencyKind) -> Result<Dependency> {
    let mut dependency = Dependency::parse(text.trim_start_matches('!')).ok_or_else(|| {
        SchemaflowError::Config(ConfigError::invalid("dependency", format!("invalid dependency \"{text}\"")))
    })?;
    dependency.kind = kind;
    Ok(dependency)
}

fn script_stub(kind: ScriptKind, project: &str, name: &str, requires: &[String]) -> String {
    let mut stub = match kind {
        ScriptKind::Deploy => format!("-- Deploy {project}:{name}\n"),
        ScriptKind::Revert => format!("-- Revert {project}:{name}\n"),
        ScriptKind::Verify => format!("-- Verify {project}:{name}\n"),
    };
    if kind == ScriptKind::Deploy {
        for requirement in requires {
            stub.push_str("-- requires: ");
            stub.push_str(requirement);
            stub.push('\n');
        }
    }
    stub.push('\n');
    stub
}

fn write_stub(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn write_stdout(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dependency_kinds() {
        let conflict = parse_dependency("!legacy", DependencyKind::Conflict).unwrap();
        assert_eq!(conflict.to_string(), "!legacy");

        let remote = parse_dependency("audit@infra", DependencyKind::Require).unwrap();
        assert_eq!(remote.project.as_deref(), Some("infra"));
        assert!(parse_dependency("@infra", DependencyKind::Require).is_err());
    }

    #[test]
    fn test_script_stub() {
        let stub = script_stub(ScriptKind::Deploy, "blog", "posts", &[String::from("users")]);
        assert_eq!(stub, "-- Deploy blog:posts\n-- requires: users\n\n");
        assert_eq!(
            script_stub(ScriptKind::Verify, "blog", "posts", &[String::from("users")]),
            "-- Verify blog:posts\n\n"
        );
    }

    #[test]
    fn test_write_stub_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path: std::path::PathBuf = dir.path().join("deploy").join("users.sql");
        write_stub(&path, "-- Deploy blog:users\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-- Deploy blog:users\n");
    }
}
