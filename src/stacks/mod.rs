//! Stack reconciliation.
//!
//! A stack template is expanded into one concrete target per bound account
//! and region. Targets are diffed against state by content hash and turned
//! into deploy or delete tasks that run against a `StackContext`.

mod binder;
mod references;
mod render;
mod tasks;

pub use binder::{CrossAccountParameter, StackBinder, StackBinding, TargetKey};
pub use references::{collect_references, rewrite_references, ResourceReference};
pub use render::{PlaceholderRenderer, RenderContext, TemplateRenderer};
pub use tasks::{
    resolve_location, template_text, DeleteStack, DeployStack, StackContext, StackTaskProvider,
};
