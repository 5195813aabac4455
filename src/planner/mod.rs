//! Planning module for reconciliation.
//!
//! This module compares desired resources with stored bindings and collects
//! the resulting actions into a plan that can be reviewed before applying.

mod diff;
mod plan;

pub use diff::{BindingAction, BindingDiff, DesiredResource, DiffEngine, DiffSummary, StoredRecord};
pub use plan::{PlannedChange, ReconciliationPlan};
