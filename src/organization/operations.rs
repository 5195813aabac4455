//! Executable organization tasks.
//!
//! Every operation performs at most one logical read-modify-write on state.
//! Provider calls go through `with_retry` so throttling is absorbed here.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::{
    AccountProperties, OrganizationalUnitProperties, ResourceType, ServiceControlPolicyProperties,
};
use crate::error::{ConfigError, OrgFormError, Result};
use crate::provider::{with_retry, AccountChanges, NewAccount, MAX_RETRIES};
use crate::state::Binding;
use crate::tasks::TaskOperation;

use super::context::OrganizationContext;

/// What an association links to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssociationKind {
    /// A service control policy attached to the owner.
    Policy,
    /// An account placed in the owning unit.
    Account,
    /// A child unit placed in the owning unit.
    OrganizationalUnit,
}

/// One side of an attach or detach: the associated resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Association {
    /// Kind of link.
    pub kind: AssociationKind,
    /// Type of the associated resource.
    pub target_type: ResourceType,
    /// Logical id of the associated resource.
    pub target: String,
}

/// Treats errors accepted by `accept` as success, with a warning.
fn tolerate(result: Result<()>, accept: fn(&OrgFormError) -> bool, what: &str) -> Result<()> {
    match result {
        Err(e) if accept(&e) => {
            warn!("{what}: {e}, continuing");
            Ok(())
        }
        other => other,
    }
}

async fn apply_tags(
    ctx: &OrganizationContext,
    resource_id: &str,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    let writer = ctx.writer();
    with_retry(MAX_RETRIES, move || writer.tag_resource(resource_id, tags)).await
}

/// Creates a member account, or binds an existing one.
#[derive(Debug)]
pub struct CreateAccount {
    /// `Account` or `MasterAccount`.
    pub resource_type: ResourceType,
    /// Logical id.
    pub logical_id: String,
    /// Desired properties.
    pub properties: AccountProperties,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for CreateAccount {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let writer = ctx.writer();
        let props = &self.properties;

        let (account_id, created) = match (&props.account_id, self.resource_type) {
            (Some(id), _) => {
                info!("Binding existing account {id} to {}", self.logical_id);
                (id.clone(), false)
            }
            (None, ResourceType::MasterAccount) => {
                let id = ctx.root_info().await?.master_account_id.clone();
                info!("Binding management account {id} to {}", self.logical_id);
                (id, false)
            }
            (None, _) => {
                let root_email =
                    props
                        .root_email
                        .clone()
                        .ok_or_else(|| ConfigError::MissingField {
                            resource: self.logical_id.clone(),
                            field: String::from("RootEmail"),
                        })?;
                let request = NewAccount {
                    account_name: props.account_name.clone(),
                    root_email,
                    tags: props.tags.clone(),
                };
                info!("Creating account {} ({})", props.account_name, self.logical_id);
                let request = &request;
                let id = with_retry(MAX_RETRIES, move || writer.create_account(request)).await?;
                (id, true)
            }
        };

        if let Some(alias) = &props.alias {
            let changes = AccountChanges {
                account_name: None,
                alias: Some(Some(alias.clone())),
            };
            let (id, changes) = (account_id.as_str(), &changes);
            with_retry(MAX_RETRIES, move || writer.update_account(id, changes)).await?;
        }
        if !created && !props.tags.is_empty() {
            apply_tags(ctx, &account_id, &props.tags).await?;
        }

        ctx.record_physical_id(self.resource_type, &self.logical_id, &account_id);
        Ok(Some(account_id))
    }
}

/// Applies name, alias and tag changes to an account.
#[derive(Debug)]
pub struct UpdateAccount {
    /// `Account` or `MasterAccount`.
    pub resource_type: ResourceType,
    /// Logical id.
    pub logical_id: String,
    /// Name and alias changes.
    pub changes: AccountChanges,
    /// Replacement tag set, when tags changed.
    pub tags: Option<BTreeMap<String, String>>,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for UpdateAccount {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let account_id = ctx.require_physical_id(self.resource_type, &self.logical_id)?;
        let writer = ctx.writer();

        if !self.changes.is_empty() {
            info!("Updating account {} ({account_id})", self.logical_id);
            let (id, changes) = (account_id.as_str(), &self.changes);
            with_retry(MAX_RETRIES, move || writer.update_account(id, changes)).await?;
        }
        if let Some(tags) = &self.tags {
            apply_tags(ctx, &account_id, tags).await?;
        }

        Ok(None)
    }
}

/// Binds the organization root.
#[derive(Debug)]
pub struct BindRoot {
    /// Logical id.
    pub logical_id: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for BindRoot {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let root_id = ctx.root_info().await?.root_id.clone();
        info!("Binding organization root {root_id} to {}", self.logical_id);
        ctx.record_physical_id(ResourceType::OrganizationRoot, &self.logical_id, &root_id);
        Ok(Some(root_id))
    }
}

/// Creates an organizational unit under the root.
///
/// Nesting is applied afterwards by the parent's attach tasks.
#[derive(Debug)]
pub struct CreateOrganizationalUnit {
    /// Logical id.
    pub logical_id: String,
    /// Desired properties.
    pub properties: OrganizationalUnitProperties,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for CreateOrganizationalUnit {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let root_id = ctx.root_id().await?;
        let writer = ctx.writer();
        let name = self.properties.organizational_unit_name.as_str();

        info!("Creating organizational unit {name} ({})", self.logical_id);
        let parent = root_id.as_str();
        let unit_id = with_retry(MAX_RETRIES, move || {
            writer.create_organizational_unit(parent, name)
        })
        .await?;

        if !self.properties.tags.is_empty() {
            apply_tags(ctx, &unit_id, &self.properties.tags).await?;
        }

        ctx.record_physical_id(ResourceType::OrganizationalUnit, &self.logical_id, &unit_id);
        Ok(Some(unit_id))
    }
}

/// Renames or retags an organizational unit.
#[derive(Debug)]
pub struct UpdateOrganizationalUnit {
    /// Logical id.
    pub logical_id: String,
    /// New name, when it changed.
    pub name: Option<String>,
    /// Replacement tag set, when tags changed.
    pub tags: Option<BTreeMap<String, String>>,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for UpdateOrganizationalUnit {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let unit_id =
            ctx.require_physical_id(ResourceType::OrganizationalUnit, &self.logical_id)?;
        let writer = ctx.writer();

        if let Some(name) = self.name.as_deref() {
            info!("Renaming organizational unit {} to {name}", self.logical_id);
            let id = unit_id.as_str();
            with_retry(MAX_RETRIES, move || writer.update_organizational_unit(id, name)).await?;
        }
        if let Some(tags) = &self.tags {
            apply_tags(ctx, &unit_id, tags).await?;
        }

        Ok(None)
    }
}

/// Creates a service control policy.
#[derive(Debug)]
pub struct CreatePolicy {
    /// Logical id.
    pub logical_id: String,
    /// Desired properties.
    pub properties: ServiceControlPolicyProperties,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for CreatePolicy {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let writer = ctx.writer();
        let props = &self.properties;

        info!("Creating policy {} ({})", props.policy_name, self.logical_id);
        let policy_id = with_retry(MAX_RETRIES, move || writer.create_policy(props)).await?;

        if !props.tags.is_empty() {
            apply_tags(ctx, &policy_id, &props.tags).await?;
        }

        ctx.record_physical_id(ResourceType::ServiceControlPolicy, &self.logical_id, &policy_id);
        Ok(Some(policy_id))
    }
}

/// Updates a policy's content and tags.
#[derive(Debug)]
pub struct UpdatePolicy {
    /// Logical id.
    pub logical_id: String,
    /// Desired properties.
    pub properties: ServiceControlPolicyProperties,
    /// Whether name, description or document changed.
    pub content_changed: bool,
    /// Replacement tag set, when tags changed.
    pub tags: Option<BTreeMap<String, String>>,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for UpdatePolicy {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let policy_id =
            ctx.require_physical_id(ResourceType::ServiceControlPolicy, &self.logical_id)?;
        let writer = ctx.writer();

        if self.content_changed {
            info!("Updating policy {} ({policy_id})", self.logical_id);
            let (id, props) = (policy_id.as_str(), &self.properties);
            with_retry(MAX_RETRIES, move || writer.update_policy(id, props)).await?;
        }
        if let Some(tags) = &self.tags {
            apply_tags(ctx, &policy_id, tags).await?;
        }

        Ok(None)
    }
}

/// Links an associated resource to its owner.
#[derive(Debug)]
pub struct Attach {
    /// Owner type.
    pub owner_type: ResourceType,
    /// Owner logical id.
    pub owner: String,
    /// What is attached.
    pub association: Association,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for Attach {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let owner_id = ctx.require_physical_id(self.owner_type, &self.owner)?;
        let target_id =
            ctx.require_physical_id(self.association.target_type, &self.association.target)?;
        let writer = ctx.writer();
        let (owner, target) = (owner_id.as_str(), target_id.as_str());

        info!(
            "Attaching {} to {} ({target} -> {owner})",
            self.association.target, self.owner
        );
        let result = match self.association.kind {
            AssociationKind::Policy => {
                with_retry(MAX_RETRIES, move || writer.attach_policy(target, owner)).await
            }
            AssociationKind::Account => {
                with_retry(MAX_RETRIES, move || writer.move_account(target, owner)).await
            }
            AssociationKind::OrganizationalUnit => {
                with_retry(MAX_RETRIES, move || writer.move_organizational_unit(target, owner))
                    .await
            }
        };

        tolerate(
            result,
            OrgFormError::is_already_exists,
            &format!("Attach {} to {}", self.association.target, self.owner),
        )?;
        Ok(None)
    }
}

/// Unlinks an associated resource from its owner.
///
/// Accounts and units are moved back to the root.
#[derive(Debug)]
pub struct Detach {
    /// Owner type.
    pub owner_type: ResourceType,
    /// Owner logical id.
    pub owner: String,
    /// What is detached.
    pub association: Association,
    /// Owner physical id captured when the task was planned.
    pub owner_physical_id: Option<String>,
    /// Target physical id captured when the task was planned.
    pub target_physical_id: Option<String>,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for Detach {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let owner_id = self
            .owner_physical_id
            .clone()
            .or_else(|| ctx.physical_id(self.owner_type, &self.owner));
        let target_id = self
            .target_physical_id
            .clone()
            .or_else(|| ctx.physical_id(self.association.target_type, &self.association.target));

        let (Some(owner_id), Some(target_id)) = (owner_id, target_id) else {
            warn!(
                "Nothing to detach between {} and {}: not bound",
                self.owner, self.association.target
            );
            return Ok(None);
        };

        let writer = ctx.writer();
        let target = target_id.as_str();
        info!("Detaching {} from {}", self.association.target, self.owner);

        let result = match self.association.kind {
            AssociationKind::Policy => {
                let owner = owner_id.as_str();
                with_retry(MAX_RETRIES, move || writer.detach_policy(target, owner)).await
            }
            AssociationKind::Account => {
                let root_id = ctx.root_id().await?;
                let root = root_id.as_str();
                with_retry(MAX_RETRIES, move || writer.move_account(target, root)).await
            }
            AssociationKind::OrganizationalUnit => {
                let root_id = ctx.root_id().await?;
                let root = root_id.as_str();
                with_retry(MAX_RETRIES, move || writer.move_organizational_unit(target, root))
                    .await
            }
        };

        tolerate(
            result,
            OrgFormError::is_not_found,
            &format!("Detach {} from {}", self.association.target, self.owner),
        )?;
        Ok(None)
    }
}

/// Persists a binding once every other sub-task of its resource has run.
#[derive(Debug)]
pub struct Commit {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Logical id.
    pub logical_id: String,
    /// Content hash to record.
    pub hash: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for Commit {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let physical_id = ctx.require_physical_id(self.resource_type, &self.logical_id)?;
        let binding = Binding::new(
            self.resource_type,
            self.logical_id.clone(),
            physical_id.clone(),
            self.hash.clone(),
        );
        let is_master = self.resource_type == ResourceType::MasterAccount;

        ctx.state().update(|state| {
            state.set_binding(binding);
            if is_master {
                state.set_master_account_id(physical_id);
            }
        });
        Ok(None)
    }
}

/// Removes a binding without contacting the provider.
#[derive(Debug)]
pub struct Forget {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Logical id.
    pub logical_id: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for Forget {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        info!("Forgetting {} {}", self.resource_type, self.logical_id);
        ctx.state()
            .update(|state| state.remove_binding(self.resource_type, &self.logical_id));
        Ok(None)
    }
}

/// Closes a removed account and unbinds it.
#[derive(Debug)]
pub struct CloseAccount {
    /// Logical id.
    pub logical_id: String,
    /// Account id.
    pub physical_id: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for CloseAccount {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let writer = ctx.writer();
        let id = self.physical_id.as_str();

        info!("Closing account {} ({id})", self.logical_id);
        tolerate(
            with_retry(MAX_RETRIES, move || writer.close_account(id)).await,
            OrgFormError::is_not_found,
            &format!("Close account {id}"),
        )?;

        ctx.state()
            .update(|state| state.remove_binding(ResourceType::Account, &self.logical_id));
        Ok(None)
    }
}

/// Deletes a removed policy and unbinds it.
#[derive(Debug)]
pub struct DeletePolicy {
    /// Logical id.
    pub logical_id: String,
    /// Policy id.
    pub physical_id: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for DeletePolicy {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let writer = ctx.writer();
        let id = self.physical_id.as_str();

        info!("Deleting policy {} ({id})", self.logical_id);
        tolerate(
            with_retry(MAX_RETRIES, move || writer.delete_policy(id)).await,
            OrgFormError::is_not_found,
            &format!("Delete policy {id}"),
        )?;

        ctx.state().update(|state| {
            state.remove_binding(ResourceType::ServiceControlPolicy, &self.logical_id)
        });
        Ok(None)
    }
}

/// Deletes a removed organizational unit and unbinds it.
#[derive(Debug)]
pub struct DeleteOrganizationalUnit {
    /// Logical id.
    pub logical_id: String,
    /// Unit id.
    pub physical_id: String,
}

#[async_trait]
impl TaskOperation<OrganizationContext> for DeleteOrganizationalUnit {
    async fn perform(&self, ctx: &OrganizationContext) -> Result<Option<String>> {
        let writer = ctx.writer();
        let id = self.physical_id.as_str();

        info!("Deleting organizational unit {} ({id})", self.logical_id);
        tolerate(
            with_retry(MAX_RETRIES, move || writer.delete_organizational_unit(id)).await,
            OrgFormError::is_not_found,
            &format!("Delete organizational unit {id}"),
        )?;

        ctx.state().update(|state| {
            state.remove_binding(ResourceType::OrganizationalUnit, &self.logical_id)
        });
        Ok(None)
    }
}
