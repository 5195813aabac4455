//! Execution context shared by organization tasks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ResourceType;
use crate::error::{ConfigError, Result};
use crate::provider::{OrganizationWriter, RootInfo};
use crate::state::StateHandle;

/// Everything an organization task needs at execution time.
pub struct OrganizationContext {
    state: StateHandle,
    writer: Arc<dyn OrganizationWriter>,
    resolved: Mutex<BTreeMap<(ResourceType, String), String>>,
    root: OnceCell<RootInfo>,
}

impl std::fmt::Debug for OrganizationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrganizationContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OrganizationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(state: StateHandle, writer: Arc<dyn OrganizationWriter>) -> Self {
        Self {
            state,
            writer,
            resolved: Mutex::new(BTreeMap::new()),
            root: OnceCell::new(),
        }
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Organization writer.
    #[must_use]
    pub fn writer(&self) -> &dyn OrganizationWriter {
        self.writer.as_ref()
    }

    /// Records a physical id produced by a task in this run.
    pub fn record_physical_id(&self, resource_type: ResourceType, logical_id: &str, physical_id: &str) {
        debug!("Resolved {resource_type} {logical_id} to {physical_id}");
        self.resolved
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((resource_type, logical_id.to_string()), physical_id.to_string());
    }

    /// Looks up a physical id: ids produced in this run first, then state.
    #[must_use]
    pub fn physical_id(&self, resource_type: ResourceType, logical_id: &str) -> Option<String> {
        let resolved = self
            .resolved
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(resource_type, logical_id.to_string()))
            .cloned();

        resolved.or_else(|| {
            self.state
                .read(|s| s.physical_id(resource_type, logical_id).map(str::to_string))
        })
    }

    /// Like `physical_id`, but a miss is a configuration error.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedLogicalId` if the id is unknown.
    pub fn require_physical_id(&self, resource_type: ResourceType, logical_id: &str) -> Result<String> {
        self.physical_id(resource_type, logical_id)
            .ok_or_else(|| ConfigError::unresolved(resource_type.as_str(), logical_id).into())
    }

    /// Describes the root once per run.
    ///
    /// # Errors
    ///
    /// Returns the writer's error if the root cannot be described.
    pub async fn root_info(&self) -> Result<&RootInfo> {
        self.root
            .get_or_try_init(|| async { self.writer.describe_root().await })
            .await
    }

    /// Returns the root's physical id, preferring the bound one.
    ///
    /// # Errors
    ///
    /// Returns the writer's error if the root is unbound and cannot be described.
    pub async fn root_id(&self) -> Result<String> {
        let bound = self.state.read(|s| {
            s.get_unique_binding(ResourceType::OrganizationRoot)
                .map(|b| b.physical_id.clone())
        });
        match bound {
            Some(id) => Ok(id),
            None => Ok(self.root_info().await?.root_id.clone()),
        }
    }
}
