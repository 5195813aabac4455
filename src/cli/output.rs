//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ContentHasher, ResourceType};
use crate::planner::{BindingAction, PlannedChange, ReconciliationPlan};
use crate::state::{LockInfo, PersistedState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
}

/// Binding row for state display.
#[derive(Tabled)]
struct BindingRow {
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Logical ID")]
    logical_id: String,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a reconciliation plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ReconciliationPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &ReconciliationPlan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - organization and stacks are up to date.\n",
                "✓".green()
            );
        }

        let hasher = ContentHasher::new();
        let mut output = String::new();
        let _ = write!(
            output,
            "\nReconciliation Plan\n   Template hash: {}\n",
            hasher.short_hash(&plan.template_hash)
        );

        Self::write_changes(&mut output, "Organization", &plan.organization);
        for (stack, changes) in &plan.stacks {
            Self::write_changes(&mut output, &format!("Stack {stack}"), changes);
        }

        if !plan.deferred.is_empty() {
            let _ = write!(
                output,
                "\n{} Deferred until the organization is applied:\n",
                "⚠".yellow()
            );
            for (stack, reason) in &plan.deferred {
                let _ = writeln!(output, "   - {stack}: {reason}");
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.deletes.to_string().red(),
            summary.unchanged
        );

        output
    }

    fn write_changes(output: &mut String, title: &str, changes: &[PlannedChange]) {
        let rows: Vec<ChangeRow> = changes
            .iter()
            .filter(|c| c.action.requires_work())
            .enumerate()
            .map(|(i, c)| ChangeRow {
                index: i + 1,
                action: Self::format_action(c.action),
                kind: c.kind.clone(),
                name: c.name.clone(),
                location: c.location.clone().unwrap_or_default(),
            })
            .collect();

        if rows.is_empty() {
            return;
        }

        let _ = write!(output, "\n{title}\n");
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
    }

    /// Formats persisted state.
    #[must_use]
    pub fn format_state(&self, state: &PersistedState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => Self::format_state_text(state),
        }
    }

    fn format_state_text(state: &PersistedState) -> String {
        let hasher = ContentHasher::new();
        let mut output = String::from("\nState\n\n");

        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(
            output,
            "   Master account: {}",
            state.master_account_id.as_deref().unwrap_or("-")
        );
        let _ = writeln!(
            output,
            "   Template hash: {}",
            state
                .previous_template_hash
                .as_deref()
                .map_or_else(|| String::from("-"), |h| hasher.short_hash(h))
        );
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);

        let rows: Vec<BindingRow> = ResourceType::ALL
            .into_iter()
            .flat_map(|t| state.bindings_of(t))
            .map(|b| BindingRow {
                resource_type: b.resource_type.to_string(),
                logical_id: b.logical_id.clone(),
                physical_id: b.physical_id.clone(),
                hash: hasher.short_hash(&b.last_committed_hash),
            })
            .collect();
        if !rows.is_empty() {
            let _ = write!(output, "\n   Bindings ({}):\n", rows.len());
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for stack in state.stack_names() {
            let _ = write!(output, "\n   Stack {stack}:\n");
            for target in state.targets_of(stack) {
                let _ = writeln!(
                    output,
                    "     {} {}/{} ({})",
                    target.logical_account_id,
                    target.account_id,
                    target.region,
                    hasher.short_hash(&target.last_committed_hash)
                );
            }
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let status = if entry.success { "✓".green() } else { "✗".red() };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} organization, {} stack, {} failed",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.organization_tasks,
                    entry.stack_tasks,
                    entry.failed_tasks
                );
            }
        }

        output
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "State locked: {} (holder {}, expires {})",
                lock.lock_id,
                lock.holder,
                lock.expires_at.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }

    /// Formats a binding action with color.
    fn format_action(action: BindingAction) -> String {
        match action {
            BindingAction::Create => "+create".green().to_string(),
            BindingAction::Update => "~update".yellow().to_string(),
            BindingAction::Delete => "-delete".red().to_string(),
            BindingAction::None => "none".dimmed().to_string(),
        }
    }
}
