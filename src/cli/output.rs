//! Output formatting for CLI commands.
//!
//! This module renders orchestrator events, run outcomes, status reports and
//! plans either as colored text or as JSON, and provides the console
//! [`MessageSink`].

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write as _};
use tabled::{Table, Tabled};

use crate::error::SchemaflowError;
use crate::orchestrator::{
    DeployedChange, Event, MessageSink, Operation, Outcome, RunState, StatusReport, VerificationResult,
};
use crate::plan::{Change, DependencyKind, IdHasher, Plan};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct PlanChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Requires")]
    requires: String,
    #[tabled(rename = "Conflicts")]
    conflicts: String,
    #[tabled(rename = "Planned")]
    planned: String,
    #[tabled(rename = "Planner")]
    planner: String,
    #[tabled(rename = "Note")]
    note: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats one orchestrator event.
    #[must_use]
    pub fn format_event(&self, event: &Event<'_>) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut line = serde_json::to_string(&EventJson::from(event)).unwrap_or_default();
                line.push('\n');
                line
            }
            OutputFormat::Text => Self::format_event_text(event),
        }
    }

    fn format_event_text(event: &Event<'_>) -> String {
        match *event {
            Event::Planned {
                operation, target, ..
            } => match operation {
                Operation::Deploy => format!("Deploying changes to {target}\n"),
                Operation::Revert => format!("Reverting changes from {target}\n"),
                Operation::Verify => format!("Verifying {target}\n"),
            },
            Event::Starting { operation, change } => {
                format!("  {} {}", Self::marker(operation), change.format_name_with_tags())
            }
            Event::Finished { .. } => format!(" .. {}\n", "ok".green()),
            Event::ChangeFailed { error, .. } => {
                format!(" .. {}\n{} {error}\n", "not ok".red(), "✗".red())
            }
            Event::Verified { result, width } => Self::format_verification(result, width),
            Event::NothingToDo { reason, .. } => format!("{reason}\n"),
            Event::Cancelled {
                operation,
                completed,
            } => format!(
                "{} {} cancelled after {completed} changes\n",
                "⚠".yellow(),
                Self::capitalized(operation)
            ),
        }
    }

    fn format_verification(result: &VerificationResult, width: usize) -> String {
        let status = if result.has_errors() {
            "not ok".red().to_string()
        } else if result.reworked {
            "ok (reworked, skipped)".yellow().to_string()
        } else {
            "ok".green().to_string()
        };

        let mut notes: Vec<&str> = result.error.iter().map(String::as_str).collect();
        for (flagged, note) in [
            (result.out_of_order, "Out of order"),
            (result.not_in_plan, "Not present in the plan"),
            (result.not_deployed, "Not deployed"),
        ] {
            if flagged && !notes.contains(&note) {
                notes.push(note);
            }
        }

        let mut output = format!("  * {:<width$} .. {status}\n", result.label);
        for note in notes {
            let _ = writeln!(output, "    # {note}");
        }
        output
    }

    /// Formats the final outcome of a run.
    ///
    /// Returns an empty string when events already said everything.
    #[must_use]
    pub fn format_outcome(&self, outcome: &Outcome) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut line = serde_json::to_string(&OutcomeJson::from(outcome)).unwrap_or_default();
                line.push('\n');
                line
            }
            OutputFormat::Text if outcome.operation == Operation::Verify => {
                Self::format_verify_summary(outcome)
            }
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &Outcome) -> String {
        let total = outcome.changes.len();
        match outcome.state {
            RunState::Completed => format!(
                "{} {} {} changes\n",
                "✓".green(),
                Self::past_tense(outcome.operation),
                outcome.completed
            ),
            RunState::Previewed => {
                let mut output = format!("Would {} {total} changes:\n", outcome.operation);
                for name in &outcome.changes {
                    let _ = writeln!(output, "  {} {name}", Self::marker(outcome.operation));
                }
                output
            }
            RunState::Declined => format!(
                "Nothing {}\n",
                Self::past_tense(outcome.operation).to_lowercase()
            ),
            RunState::Failed => {
                let mut output = format!(
                    "{} {} failed after {} of {total} changes",
                    "✗".red(),
                    Self::capitalized(outcome.operation),
                    outcome.completed
                );
                if let Some(error) = &outcome.error {
                    let _ = write!(output, ": {error}");
                }
                output.push('\n');
                output
            }
            RunState::NothingToDo | RunState::Cancelled => String::new(),
        }
    }

    fn format_verify_summary(outcome: &Outcome) -> String {
        if matches!(outcome.state, RunState::NothingToDo | RunState::Cancelled) {
            return String::new();
        }

        let errors = outcome.results.iter().filter(|r| r.has_errors()).count();
        let mut output = String::from("\nVerify Summary Report\n---------------------\n");
        let _ = writeln!(output, "Changes: {}", outcome.results.len());
        let _ = writeln!(output, "Errors:  {errors}");

        if !outcome.pending.is_empty() {
            output.push_str("\nUndeployed changes:\n");
            for name in &outcome.pending {
                let _ = writeln!(output, "  * {name}");
            }
        }

        if outcome.state == RunState::Completed {
            let _ = writeln!(output, "\n{} Verify successful", "✓".green());
        } else {
            let _ = writeln!(output, "\n{} Verify failed", "✗".red());
        }
        output
    }

    /// Formats a deployment status report.
    #[must_use]
    pub fn format_status(&self, report: &StatusReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&StatusJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_status_text(report),
        }
    }

    fn format_status_text(report: &StatusReport) -> String {
        let mut output = format!("# On database {}
", report.target);

        let Some(last) = &report.last else {
            let _ = writeln!(output, "{} No changes deployed", "✗".red());
            Self::push_list(&mut output, "Undeployed", &report.pending);
            return output;
        };

        let _ = writeln!(output, "# Project:  {}", report.project);
        let _ = writeln!(output, "# Change:   {}", last.id);
        let _ = writeln!(output, "# Name:     {}", last.name);
        if !last.tags.is_empty() {
            let word = if last.tags.len() == 1 { "Tag" } else { "Tags" };
            let tags: Vec<String> = last.tags.iter().map(|t| format!("@{t}")).collect();
            let _ = writeln!(output, "# {word}:{:width$}{}", "", tags.join(", "), width = 9 - word.len());
        }
        let _ = writeln!(output, "# Deployed: {} changes", report.deployed);
        output.push_str("#
");

        if !last.in_plan {
            let _ = writeln!(
                output,
                "{} Cannot find the last deployed change in the plan; check that this is the right database",
                "⚠".yellow()
            );
        }
        Self::push_list(&mut output, "Deployed but not planned", &report.not_in_plan);
        Self::push_list(&mut output, "Skipped", &report.undeployed);

        if report.pending.is_empty() {
            let _ = writeln!(output, "{} Nothing to deploy (up-to-date)", "✓".green());
        } else {
            Self::push_list(&mut output, "Undeployed", &report.pending);
        }
        output
    }

    fn push_list(output: &mut String, heading: &str, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let noun = if names.len() == 1 { "change" } else { "changes" };
        let _ = writeln!(output, "{heading} {noun}:");
        for name in names {
            let _ = writeln!(output, "  * {name}");
        }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, full_ids: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, full_ids),
        }
    }

    fn format_plan_text(plan: &Plan, full_ids: bool) -> String {
        let mut output = format!("\n📋 Project: {}\n", plan.project);
        if let Some(uri) = &plan.uri {
            let _ = writeln!(output, "   URI: {uri}");
        }
        output.push('\n');

        if plan.is_empty() {
            output.push_str("   No changes planned.\n");
            return output;
        }

        let rows: Vec<PlanChangeRow> = plan
            .changes()
            .iter()
            .enumerate()
            .map(|(i, change)| {
                let id = change.id();
                PlanChangeRow {
                    index: i + 1,
                    change: change.format_name_with_tags(),
                    id: if full_ids {
                        id
                    } else {
                        IdHasher::short_id(&id).to_string()
                    },
                    requires: Self::joined(change, DependencyKind::Require),
                    conflicts: Self::joined(change, DependencyKind::Conflict),
                    planned: change.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    planner: change.planner_name.clone(),
                    note: Self::truncate(&change.note, 40),
                }
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\n{} changes, {} tags\n",
            plan.count(),
            plan.tags().len()
        );
        output
    }

    /// Formats an error for display.
    #[must_use]
    pub fn format_error(&self, error: &SchemaflowError) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "status": "error",
                    "message": error.to_string(),
                    "exit_code": error.exit_code(),
                });
                format!("{json}\n")
            }
            OutputFormat::Text => format!("{} {error}\n", "✗".red()),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                format!("{json}\n")
            }
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }

    /// Builds the confirmation prompt shown before destructive work.
    #[must_use]
    pub fn confirm_prompt(operation: Operation, changes: &[&Change]) -> String {
        let mut output = format!("{} {} changes:\n", operation.verb(), changes.len());
        for change in changes {
            let _ = writeln!(
                output,
                "  {} {}",
                Self::marker(operation),
                change.format_name_with_tags()
            );
        }
        let _ = write!(output, "{} these changes? [y/N] ", Self::capitalized(operation));
        output
    }

    const fn marker(operation: Operation) -> char {
        match operation {
            Operation::Deploy => '+',
            Operation::Revert => '-',
            Operation::Verify => '*',
        }
    }

    const fn capitalized(operation: Operation) -> &'static str {
        match operation {
            Operation::Deploy => "Deploy",
            Operation::Revert => "Revert",
            Operation::Verify => "Verify",
        }
    }

    const fn past_tense(operation: Operation) -> &'static str {
        match operation {
            Operation::Deploy => "Deployed",
            Operation::Revert => "Reverted",
            Operation::Verify => "Verified",
        }
    }

    fn joined(change: &Change, kind: DependencyKind) -> String {
        change
            .dependencies
            .iter()
            .filter(|d| d.kind == kind)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{kept}...")
        }
    }
}

/// Whether a prompt answer means yes.
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Writes events to stdout and asks for confirmation on the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    formatter: OutputFormatter,
}

impl ConsoleSink {
    /// Creates a console sink for the given output format.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self {
            formatter: OutputFormatter::new(format),
        }
    }
}

impl MessageSink for ConsoleSink {
    fn emit(&self, event: &Event<'_>) {
        let text = self.formatter.format_event(event);
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn confirm(&self, operation: Operation, changes: &[&Change]) -> bool {
        {
            let mut stderr = io::stderr().lock();
            let _ = stderr.write_all(OutputFormatter::confirm_prompt(operation, changes).as_bytes());
            let _ = stderr.flush();
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct EventJson<'a> {
    event: &'static str,
    operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    change: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<usize>,
}

impl<'a> EventJson<'a> {
    const fn new(event: &'static str, operation: Operation) -> Self {
        Self {
            event,
            operation,
            change: None,
            changes: None,
            target: None,
            error: None,
            result: None,
            reason: None,
            completed: None,
        }
    }
}

impl<'a> From<&Event<'a>> for EventJson<'a> {
    fn from(event: &Event<'a>) -> Self {
        match *event {
            Event::Planned {
                operation,
                changes,
                target,
            } => Self {
                changes: Some(changes.iter().map(|c| c.name.as_str()).collect()),
                target: Some(target),
                ..Self::new("planned", operation)
            },
            Event::Starting { operation, change } => Self {
                change: Some(change.name.as_str()),
                ..Self::new("starting", operation)
            },
            Event::Finished { operation, change } => Self {
                change: Some(change.name.as_str()),
                ..Self::new("finished", operation)
            },
            Event::ChangeFailed {
                operation,
                change,
                error,
            } => Self {
                change: Some(change.name.as_str()),
                error: Some(error.to_string()),
                ..Self::new("failed", operation)
            },
            Event::Verified { result, .. } => Self {
                change: Some(result.name.as_str()),
                result: Some(result),
                ..Self::new("verified", Operation::Verify)
            },
            Event::NothingToDo { operation, reason } => Self {
                reason: Some(reason),
                ..Self::new("nothing_to_do", operation)
            },
            Event::Cancelled {
                operation,
                completed,
            } => Self {
                completed: Some(completed),
                ..Self::new("cancelled", operation)
            },
        }
    }
}

#[derive(Serialize)]
struct OutcomeJson<'a> {
    operation: Operation,
    state: RunState,
    changes: &'a [String],
    completed: usize,
    results: &'a [VerificationResult],
    pending: &'a [String],
    error: Option<String>,
    exit_code: u8,
}

impl<'a> From<&'a Outcome> for OutcomeJson<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        Self {
            operation: outcome.operation,
            state: outcome.state,
            changes: &outcome.changes,
            completed: outcome.completed,
            results: &outcome.results,
            pending: &outcome.pending,
            error: outcome.error.as_ref().map(ToString::to_string),
            exit_code: outcome.exit_code(),
        }
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    project: &'a str,
    target: &'a str,
    deployed: usize,
    last: Option<&'a DeployedChange>,
    pending: &'a [String],
    undeployed: &'a [String],
    not_in_plan: &'a [String],
    up_to_date: bool,
    drift: bool,
    exit_code: u8,
}

impl<'a> From<&'a StatusReport> for StatusJson<'a> {
    fn from(report: &'a StatusReport) -> Self {
        Self {
            project: &report.project,
            target: &report.target,
            deployed: report.deployed,
            last: report.last.as_ref(),
            pending: &report.pending,
            undeployed: &report.undeployed,
            not_in_plan: &report.not_in_plan,
            up_to_date: report.is_up_to_date(),
            drift: report.has_drift(),
            exit_code: report.exit_code(),
        }
    }
}

#[derive(Serialize)]
struct PlanJson {
    project: String,
    uri: Option<String>,
    syntax_version: String,
    changes: Vec<ChangeJson>,
    tags: Vec<TagJson>,
}

#[derive(Serialize)]
struct ChangeJson {
    name: String,
    id: String,
    planned_at: String,
    planner_name: String,
    planner_email: String,
    note: String,
    requires: Vec<String>,
    conflicts: Vec<String>,
    tags: Vec<String>,
    reworked: bool,
}

#[derive(Serialize)]
struct TagJson {
    name: String,
    id: String,
    change: Option<String>,
    planned_at: String,
    note: String,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            project: plan.project.clone(),
            uri: plan.uri.clone(),
            syntax_version: plan.syntax_version.clone(),
            changes: plan.changes().iter().map(ChangeJson::from).collect(),
            tags: plan
                .tags()
                .iter()
                .map(|t| TagJson {
                    name: t.name.clone(),
                    id: t.id(),
                    change: t.change.clone(),
                    planned_at: IdHasher::format_timestamp(&t.timestamp),
                    note: t.note.clone(),
                })
                .collect(),
        }
    }
}

impl From<&Change> for ChangeJson {
    fn from(change: &Change) -> Self {
        Self {
            name: change.name.clone(),
            id: change.id(),
            planned_at: IdHasher::format_timestamp(&change.timestamp),
            planner_name: change.planner_name.clone(),
            planner_email: change.planner_email.clone(),
            note: change.note.clone(),
            requires: change
                .dependencies
                .iter()
                .filter(|d| d.kind == DependencyKind::Require)
                .map(ToString::to_string)
                .collect(),
            conflicts: change.conflicts.clone(),
            tags: change.tags.clone(),
            reworked: change.reworked,
        }
    }
}
