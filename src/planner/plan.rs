//! Reconciliation plan types.
//!
//! A plan is the classified output of the organization and stack binders,
//! computed against current state without executing anything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::organization::ResourceBinding;
use crate::stacks::StackBinding;

use super::diff::{BindingAction, DiffSummary};

/// A complete reconciliation plan.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the organization template this plan is based on.
    pub template_hash: String,
    /// Organization changes, in binding order.
    pub organization: Vec<PlannedChange>,
    /// Stack changes, keyed by configured stack name.
    pub stacks: BTreeMap<String, Vec<PlannedChange>>,
    /// Stacks that cannot be bound until organization changes are applied,
    /// with the reason.
    pub deferred: BTreeMap<String, String>,
}

/// One classified binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    /// Required action.
    pub action: BindingAction,
    /// Resource type, or the stack name for stack targets.
    pub kind: String,
    /// Logical id, or the logical account id for stack targets.
    pub name: String,
    /// Physical id, or `account/region` for stack targets.
    pub location: Option<String>,
    /// Hash of the desired definition.
    pub hash: Option<String>,
}

impl From<&ResourceBinding> for PlannedChange {
    fn from(binding: &ResourceBinding) -> Self {
        Self {
            action: binding.action,
            kind: binding.resource_type.to_string(),
            name: binding.logical_id.clone(),
            location: binding.physical_id.clone(),
            hash: binding.hash.clone(),
        }
    }
}

impl From<&StackBinding> for PlannedChange {
    fn from(binding: &StackBinding) -> Self {
        Self {
            action: binding.action,
            kind: binding.stack_name.clone(),
            name: binding.logical_account_id.clone(),
            location: Some(format!("{}/{}", binding.account_id, binding.region)),
            hash: binding.hash.clone(),
        }
    }
}

impl ReconciliationPlan {
    /// Creates a plan from classified bindings.
    #[must_use]
    pub fn new(template_hash: impl Into<String>, organization: &[ResourceBinding]) -> Self {
        Self {
            created_at: Utc::now(),
            template_hash: template_hash.into(),
            organization: organization.iter().map(PlannedChange::from).collect(),
            stacks: BTreeMap::new(),
            deferred: BTreeMap::new(),
        }
    }

    /// Adds the classified targets of one stack.
    pub fn add_stack(&mut self, stack_name: impl Into<String>, bindings: &[StackBinding]) {
        self.stacks.insert(
            stack_name.into(),
            bindings.iter().map(PlannedChange::from).collect(),
        );
    }

    /// Records a stack that could not be bound.
    pub fn defer_stack(&mut self, stack_name: impl Into<String>, reason: impl Into<String>) {
        self.deferred.insert(stack_name.into(), reason.into());
    }

    /// Counts every change in the plan.
    #[must_use]
    pub fn summary(&self) -> DiffSummary {
        self.changes().map(|change| change.action).collect()
    }

    /// Counts organization changes.
    #[must_use]
    pub fn organization_summary(&self) -> DiffSummary {
        self.organization.iter().map(|change| change.action).collect()
    }

    /// Returns true if any binding requires work.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.summary().has_changes() || !self.deferred.is_empty()
    }

    /// One-line count of pending work, for logs.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let summary = self.summary();
        format!(
            "{} to create, {} to update, {} to delete, {} unchanged, {} deferred",
            summary.creates,
            summary.updates,
            summary.deletes,
            summary.unchanged,
            self.deferred.len()
        )
    }

    /// Iterates over organization changes followed by stack changes.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedChange> {
        self.organization
            .iter()
            .chain(self.stacks.values().flatten())
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action, self.kind, self.name)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        let pending: Vec<&PlannedChange> = self
            .changes()
            .filter(|change| change.action.requires_work())
            .collect();

        writeln!(f, "Reconciliation Plan ({} changes):", pending.len())?;
        for (i, change) in pending.iter().enumerate() {
            writeln!(f, "  {i}. {change}")?;
        }

        if !self.deferred.is_empty() {
            writeln!(f, "\nDeferred until the organization is applied:")?;
            for (stack, reason) in &self.deferred {
                writeln!(f, "  - {stack}: {reason}")?;
            }
        }

        Ok(())
    }
}
