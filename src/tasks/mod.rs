//! Task model and scheduler.
//!
//! Organization tasks and stack tasks share one contract: a `TaskIdentity`
//! for dependency matching, a `DependsOn` ordering contract, and a
//! `TaskOperation` that performs the work against a family-specific context.

mod runner;
mod task;

pub use runner::{RunReport, RunnerOptions, TaskFailure, TaskRunner};
pub use task::{
    DependsOn, Task, TaskFilter, TaskGraph, TaskId, TaskIdentity, TaskKind, TaskOperation,
};
