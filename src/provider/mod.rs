//! Cloud provider collaborators.
//!
//! The engine talks to the provider only through these traits. Concrete
//! clients are supplied by the embedding program.

mod organization;
mod poll;
mod stacks;

pub use organization::{AccountChanges, NewAccount, OrganizationWriter, RootInfo};
pub use poll::{poll_until_complete, with_retry, MAX_RETRIES};
pub use stacks::{StackDefinition, StackDeployer, StackLocation};

#[cfg(test)]
pub use stacks::MockStackDeployer;
