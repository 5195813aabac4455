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

//! # orgform
//!
//! A declarative, idempotent reconciler for a cloud organization and the
//! stacks deployed across it.
//!
//! ## Overview
//!
//! An organization template declares the root, the management account,
//! member accounts, organizational units and service control policies.
//! Stack templates declare resources bound to accounts and regions of that
//! organization. orgform compares both with persisted state and runs only the
//! work needed to converge.
//!
//! ## Architecture
//!
//! 1. **Binders** classify every desired resource against stored bindings
//!    by content hash (create, update, delete or nothing).
//! 2. **Task providers** turn bindings into tasks with data-driven
//!    dependency predicates.
//! 3. **The task runner** executes tasks in bounded rounds, organization
//!    first, then each stack.
//! 4. **Commit tasks** record new hashes, so a rerun retries exactly what
//!    failed.
//!
//! ## Modules
//!
//! - [`config`]: Settings and template parsing, validation and hashing
//! - [`state`]: State storage backends (local, S3) and locking
//! - [`provider`]: Interfaces to the organization and stack services
//! - [`planner`]: Binding diffs and reconciliation plans
//! - [`tasks`]: Task model and round-based scheduler
//! - [`organization`]: Organization binder, tasks and execution context
//! - [`stacks`]: Stack expansion, rendering and deploy tasks
//! - [`reconciler`]: End-to-end reconciliation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! organization:
//!   template: organization.yml
//! state:
//!   backend: s3
//!   bucket: my-org-state
//! stacks:
//!   - stack_name: baseline
//!     template: baseline.yml
//!     max_concurrent_stacks: 10
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod organization;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod stacks;
pub mod state;
pub mod tasks;

#[cfg(test)]
mod testutil;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ContentHasher, Settings, Template};
pub use error::{OrgFormError, Result};
pub use planner::{BindingAction, DiffEngine, ReconciliationPlan};
pub use provider::{OrganizationWriter, StackDeployer};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use stacks::{PlaceholderRenderer, TemplateRenderer};
pub use state::{LocalStateStore, PersistedState, S3StateStore, StateStore};
pub use tasks::{TaskOperation, TaskRunner};
