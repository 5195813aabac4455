//! Write-side interface to the organization service.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::ServiceControlPolicyProperties;
use crate::error::Result;

/// Identity of the organization the caller is signed in to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Physical id of the organization root.
    pub root_id: String,
    /// Physical id of the management account.
    pub master_account_id: String,
}

/// Parameters for creating a member account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Account name.
    pub account_name: String,
    /// Root email address.
    pub root_email: String,
    /// Tags applied at creation.
    pub tags: BTreeMap<String, String>,
}

/// Changes to an existing account. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChanges {
    /// New account name.
    pub account_name: Option<String>,
    /// New alias. `Some(None)` removes the alias.
    pub alias: Option<Option<String>>,
}

impl AccountChanges {
    /// Returns true if nothing changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.account_name.is_none() && self.alias.is_none()
    }
}

/// Organization write operations.
///
/// Implementations classify failures into `ProviderError` variants; the
/// engine tolerates `AlreadyExists` on attach and `NotFound` on detach and
/// delete.
#[async_trait]
pub trait OrganizationWriter: Send + Sync {
    /// Describes the root and management account.
    async fn describe_root(&self) -> Result<RootInfo>;

    /// Creates a member account and returns its id once it exists.
    async fn create_account(&self, account: &NewAccount) -> Result<String>;

    /// Renames an account or changes its alias.
    async fn update_account(&self, account_id: &str, changes: &AccountChanges) -> Result<()>;

    /// Closes a member account.
    async fn close_account(&self, account_id: &str) -> Result<()>;

    /// Creates an organizational unit under a parent and returns its id.
    async fn create_organizational_unit(&self, parent_id: &str, name: &str) -> Result<String>;

    /// Renames an organizational unit.
    async fn update_organizational_unit(&self, unit_id: &str, name: &str) -> Result<()>;

    /// Deletes an empty organizational unit.
    async fn delete_organizational_unit(&self, unit_id: &str) -> Result<()>;

    /// Creates a service control policy and returns its id.
    async fn create_policy(&self, policy: &ServiceControlPolicyProperties) -> Result<String>;

    /// Replaces a policy's name, description and document.
    async fn update_policy(
        &self,
        policy_id: &str,
        policy: &ServiceControlPolicyProperties,
    ) -> Result<()>;

    /// Deletes a policy.
    ///
    /// The policy is detached from every target before it is deleted.
    async fn delete_policy(&self, policy_id: &str) -> Result<()>;

    /// Attaches a policy to a root, unit or account.
    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> Result<()>;

    /// Detaches a policy from a root, unit or account.
    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> Result<()>;

    /// Moves an account to a new parent.
    async fn move_account(&self, account_id: &str, destination_parent_id: &str) -> Result<()>;

    /// Moves an organizational unit to a new parent.
    async fn move_organizational_unit(
        &self,
        unit_id: &str,
        destination_parent_id: &str,
    ) -> Result<()>;

    /// Replaces the tags of a resource.
    async fn tag_resource(&self, resource_id: &str, tags: &BTreeMap<String, String>)
    -> Result<()>;
}
