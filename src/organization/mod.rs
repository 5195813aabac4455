//! Organization reconciliation.
//!
//! The binder classifies the root, master account, accounts, units and
//! policies against state. The task provider expands each classification
//! into tasks that run against an `OrganizationContext`.

mod binder;
mod context;
mod operations;
mod tasks;

pub use binder::{load_previous_model, OrganizationBinder, ResourceBinding};
pub use context::OrganizationContext;
pub use operations::{Association, AssociationKind};
pub use tasks::OrganizationTaskProvider;
