//! Turns classified organization bindings into a task graph.
//!
//! Each binding expands into a small subgraph: the resource's own task,
//! one attach or detach per changed association, and a trailing commit.
//! Cross-resource ordering is expressed with `TaskFilter` predicates so
//! that subgraphs can be built independently.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::{
    ContentHasher, OrganizationModel, OrganizationResource, Reference, ResourceType,
};
use crate::error::{OrgFormError, Result};
use crate::planner::BindingAction;
use crate::provider::AccountChanges;
use crate::state::PersistedState;
use crate::tasks::{DependsOn, TaskFilter, TaskGraph, TaskId, TaskIdentity, TaskKind};

use super::binder::ResourceBinding;
use super::context::OrganizationContext;
use super::operations::{
    Association, AssociationKind, Attach, BindRoot, CloseAccount, Commit, CreateAccount,
    CreateOrganizationalUnit, CreatePolicy, DeleteOrganizationalUnit, DeletePolicy, Detach,
    Forget, UpdateAccount, UpdateOrganizationalUnit, UpdatePolicy,
};

type Graph = TaskGraph<OrganizationContext>;

/// Builds organization tasks from bindings.
#[derive(Debug)]
pub struct OrganizationTaskProvider<'a> {
    current: &'a OrganizationModel,
    previous: &'a OrganizationModel,
    state: &'a PersistedState,
    close_accounts: bool,
}

impl<'a> OrganizationTaskProvider<'a> {
    /// Creates a provider over the current and previously committed models.
    #[must_use]
    pub const fn new(
        current: &'a OrganizationModel,
        previous: &'a OrganizationModel,
        state: &'a PersistedState,
    ) -> Self {
        Self {
            current,
            previous,
            state,
            close_accounts: false,
        }
    }

    /// Closes removed accounts instead of forgetting them.
    #[must_use]
    pub const fn with_close_accounts(mut self, close_accounts: bool) -> Self {
        self.close_accounts = close_accounts;
        self
    }

    /// Builds the task graph for the given bindings.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a create or update binding carries no
    /// definition.
    pub fn create_tasks(&self, bindings: &[ResourceBinding]) -> Result<Graph> {
        let mut graph = Graph::new();

        for binding in bindings {
            debug!(
                "{} {}: {}",
                binding.resource_type, binding.logical_id, binding.action
            );
            match binding.action {
                BindingAction::Create => self.add_create(&mut graph, binding)?,
                BindingAction::Update => self.add_update(&mut graph, binding)?,
                BindingAction::Delete => self.add_delete(&mut graph, binding),
                BindingAction::None => {}
            }
        }

        info!("Planned {} organization task(s)", graph.len());
        Ok(graph)
    }

    fn add_create(&self, graph: &mut Graph, binding: &ResourceBinding) -> Result<()> {
        let definition = definition_of(binding)?;
        let identity = |kind| {
            TaskIdentity::organization(
                kind,
                binding.resource_type,
                binding.logical_id.clone(),
                BindingAction::Create,
            )
        };
        let logical_id = binding.logical_id.clone();

        let create = match definition {
            OrganizationResource::OrganizationRoot(_) => graph.add(
                identity(TaskKind::CreateResource),
                DependsOn::none(),
                BindRoot { logical_id },
            ),
            OrganizationResource::MasterAccount(props) | OrganizationResource::Account(props) => {
                graph.add(
                    identity(TaskKind::CreateResource),
                    DependsOn::none(),
                    CreateAccount {
                        resource_type: binding.resource_type,
                        logical_id,
                        properties: props.clone(),
                    },
                )
            }
            OrganizationResource::OrganizationalUnit(props) => graph.add(
                identity(TaskKind::CreateResource),
                DependsOn::none(),
                CreateOrganizationalUnit {
                    logical_id,
                    properties: props.clone(),
                },
            ),
            OrganizationResource::ServiceControlPolicy(props) => graph.add(
                identity(TaskKind::CreateResource),
                DependsOn::none(),
                CreatePolicy {
                    logical_id,
                    properties: props.clone(),
                },
            ),
        };

        let mut subgraph = vec![create];
        for association in associations(self.current, definition) {
            subgraph.push(self.add_attach(graph, binding, BindingAction::Create, Some(create), association));
        }

        self.add_commit(graph, binding, BindingAction::Create, subgraph)
    }

    fn add_update(&self, graph: &mut Graph, binding: &ResourceBinding) -> Result<()> {
        let definition = definition_of(binding)?;
        let previous = self.previous_definition(binding);
        let mut subgraph = Vec::new();

        subgraph.extend(self.add_property_update(graph, binding, definition, previous));

        let current_set = associations(self.current, definition);
        let previous_set = previous
            .map(|p| associations(self.previous, p))
            .unwrap_or_default();

        for association in previous_set.difference(&current_set) {
            subgraph.push(self.add_detach(graph, binding, BindingAction::Update, association.clone()));
        }

        for association in current_set {
            let unresolved = self
                .state
                .physical_id(association.target_type, &association.target)
                .is_none();
            if !previous_set.contains(&association) || unresolved {
                subgraph.push(self.add_attach(graph, binding, BindingAction::Update, None, association));
            }
        }

        self.add_commit(graph, binding, BindingAction::Update, subgraph)
    }

    fn add_property_update(
        &self,
        graph: &mut Graph,
        binding: &ResourceBinding,
        definition: &OrganizationResource,
        previous: Option<&OrganizationResource>,
    ) -> Option<TaskId> {
        let identity = TaskIdentity::organization(
            TaskKind::UpdateResource,
            binding.resource_type,
            binding.logical_id.clone(),
            BindingAction::Update,
        );
        let logical_id = binding.logical_id.clone();

        match definition {
            OrganizationResource::MasterAccount(props) | OrganizationResource::Account(props) => {
                let prev = match previous {
                    Some(
                        OrganizationResource::MasterAccount(p) | OrganizationResource::Account(p),
                    ) => Some(p),
                    _ => None,
                };
                let changes = AccountChanges {
                    account_name: changed(prev.map(|p| &p.account_name), &props.account_name),
                    alias: changed(prev.map(|p| &p.alias), &props.alias),
                };
                let tags = changed(prev.map(|p| &p.tags), &props.tags);
                if changes.is_empty() && tags.is_none() {
                    return None;
                }
                Some(graph.add(
                    identity,
                    DependsOn::none(),
                    UpdateAccount {
                        resource_type: binding.resource_type,
                        logical_id,
                        changes,
                        tags,
                    },
                ))
            }
            OrganizationResource::OrganizationalUnit(props) => {
                let prev = match previous {
                    Some(OrganizationResource::OrganizationalUnit(p)) => Some(p),
                    _ => None,
                };
                let name = changed(
                    prev.map(|p| &p.organizational_unit_name),
                    &props.organizational_unit_name,
                );
                let tags = changed(prev.map(|p| &p.tags), &props.tags);
                if name.is_none() && tags.is_none() {
                    return None;
                }
                Some(graph.add(
                    identity,
                    DependsOn::none(),
                    UpdateOrganizationalUnit {
                        logical_id,
                        name,
                        tags,
                    },
                ))
            }
            OrganizationResource::ServiceControlPolicy(props) => {
                let prev = match previous {
                    Some(OrganizationResource::ServiceControlPolicy(p)) => Some(p),
                    _ => None,
                };
                let content_changed = prev.is_none_or(|p| {
                    p.policy_name != props.policy_name
                        || p.description != props.description
                        || ContentHasher::canonicalize(&p.policy_document)
                            != ContentHasher::canonicalize(&props.policy_document)
                });
                let tags = changed(prev.map(|p| &p.tags), &props.tags);
                if !content_changed && tags.is_none() {
                    return None;
                }
                Some(graph.add(
                    identity,
                    DependsOn::none(),
                    UpdatePolicy {
                        logical_id,
                        properties: props.clone(),
                        content_changed,
                        tags,
                    },
                ))
            }
            OrganizationResource::OrganizationRoot(_) => None,
        }
    }

    fn add_delete(&self, graph: &mut Graph, binding: &ResourceBinding) {
        let identity = |kind| {
            TaskIdentity::organization(
                kind,
                binding.resource_type,
                binding.logical_id.clone(),
                BindingAction::Delete,
            )
        };
        let logical_id = binding.logical_id.clone();

        let Some(physical_id) = binding.physical_id.clone() else {
            warn!(
                "{} {} has no physical id, forgetting it",
                binding.resource_type, binding.logical_id
            );
            graph.add(
                identity(TaskKind::ForgetResource),
                DependsOn::none(),
                Forget {
                    resource_type: binding.resource_type,
                    logical_id,
                },
            );
            return;
        };

        match binding.resource_type {
            ResourceType::OrganizationalUnit => {
                let detaches: Vec<TaskId> = self
                    .previous
                    .resource(&binding.logical_id)
                    .map(|p| associations(self.previous, p))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|a| self.add_detach(graph, binding, BindingAction::Delete, a))
                    .collect();
                graph.add(
                    identity(TaskKind::DeleteResource),
                    DependsOn::tasks(detaches).requiring_success(),
                    DeleteOrganizationalUnit {
                        logical_id,
                        physical_id,
                    },
                );
            }
            ResourceType::Account if self.close_accounts => {
                graph.add(
                    identity(TaskKind::DeleteResource),
                    DependsOn::none(),
                    CloseAccount {
                        logical_id,
                        physical_id,
                    },
                );
            }
            ResourceType::ServiceControlPolicy => {
                graph.add(
                    identity(TaskKind::DeleteResource),
                    DependsOn::none(),
                    DeletePolicy {
                        logical_id,
                        physical_id,
                    },
                );
            }
            ResourceType::Account | ResourceType::MasterAccount | ResourceType::OrganizationRoot => {
                graph.add(
                    identity(TaskKind::ForgetResource),
                    DependsOn::none(),
                    Forget {
                        resource_type: binding.resource_type,
                        logical_id,
                    },
                );
            }
        }
    }

    /// An attach waits for the owner, for the target's creation, and for
    /// any detach of the same target from its old parent.
    fn add_attach(
        &self,
        graph: &mut Graph,
        binding: &ResourceBinding,
        action: BindingAction,
        owner_task: Option<TaskId>,
        association: Association,
    ) -> TaskId {
        let mut depends_on = DependsOn::tasks(owner_task).with_filter(TaskFilter::resource(
            association.target_type,
            association.target.clone(),
            BindingAction::Create,
        ));
        if association.kind != AssociationKind::Policy {
            depends_on = depends_on.with_filter(
                TaskFilter::default()
                    .with_kind(TaskKind::Detach)
                    .with_target(association.target.clone()),
            );
        }

        graph.add(
            TaskIdentity::organization(
                TaskKind::Attach,
                binding.resource_type,
                binding.logical_id.clone(),
                action,
            )
            .with_target(association.target.clone()),
            depends_on,
            Attach {
                owner_type: binding.resource_type,
                owner: binding.logical_id.clone(),
                association,
            },
        )
    }

    /// A detach waits for the target's own deletion.
    fn add_detach(
        &self,
        graph: &mut Graph,
        binding: &ResourceBinding,
        action: BindingAction,
        association: Association,
    ) -> TaskId {
        let target_physical_id = self
            .state
            .physical_id(association.target_type, &association.target)
            .map(str::to_string);

        graph.add(
            TaskIdentity::organization(
                TaskKind::Detach,
                binding.resource_type,
                binding.logical_id.clone(),
                action,
            )
            .with_target(association.target.clone()),
            DependsOn::none().with_filter(TaskFilter::resource(
                association.target_type,
                association.target.clone(),
                BindingAction::Delete,
            )),
            Detach {
                owner_type: binding.resource_type,
                owner: binding.logical_id.clone(),
                association,
                owner_physical_id: binding.physical_id.clone(),
                target_physical_id,
            },
        )
    }

    fn add_commit(
        &self,
        graph: &mut Graph,
        binding: &ResourceBinding,
        action: BindingAction,
        subgraph: Vec<TaskId>,
    ) -> Result<()> {
        let hash = binding.hash.clone().ok_or_else(|| {
            OrgFormError::internal(format!("{} has no content hash", binding.logical_id))
        })?;

        graph.add(
            TaskIdentity::organization(
                TaskKind::Commit,
                binding.resource_type,
                binding.logical_id.clone(),
                action,
            ),
            DependsOn::tasks(subgraph).requiring_success(),
            Commit {
                resource_type: binding.resource_type,
                logical_id: binding.logical_id.clone(),
                hash,
            },
        );
        Ok(())
    }

    /// Previous definition of a binding. Unique types match by type.
    fn previous_definition(&self, binding: &ResourceBinding) -> Option<&'a OrganizationResource> {
        let resource_type = binding.resource_type;
        self.previous
            .resource(&binding.logical_id)
            .filter(|r| r.resource_type() == resource_type)
            .or_else(|| {
                if !resource_type.is_unique() {
                    return None;
                }
                self.previous
                    .resources()
                    .map(|(_, r)| r)
                    .find(|r| r.resource_type() == resource_type)
            })
    }
}

fn definition_of(binding: &ResourceBinding) -> Result<&OrganizationResource> {
    binding.definition.as_ref().ok_or_else(|| {
        OrgFormError::internal(format!(
            "{} {} has no definition",
            binding.resource_type, binding.logical_id
        ))
    })
}

/// Returns the current value when it differs from the previous one.
///
/// A missing previous value counts as the default.
fn changed<T: PartialEq + Clone + Default>(previous: Option<&T>, current: &T) -> Option<T> {
    let unchanged = match previous {
        Some(previous) => previous == current,
        None => *current == T::default(),
    };
    (!unchanged).then(|| current.clone())
}

/// Declared associations of a resource, as a sorted set.
fn associations(model: &OrganizationModel, resource: &OrganizationResource) -> BTreeSet<Association> {
    let policy = |r: &Reference| Association {
        kind: AssociationKind::Policy,
        target_type: ResourceType::ServiceControlPolicy,
        target: r.logical_id().to_string(),
    };

    match resource {
        OrganizationResource::OrganizationRoot(props) => {
            props.service_control_policies.iter().map(policy).collect()
        }
        OrganizationResource::MasterAccount(props) | OrganizationResource::Account(props) => {
            props.service_control_policies.iter().map(policy).collect()
        }
        OrganizationResource::OrganizationalUnit(props) => {
            let mut set: BTreeSet<Association> =
                props.service_control_policies.iter().map(policy).collect();
            set.extend(props.accounts.iter().map(|r| Association {
                kind: AssociationKind::Account,
                target_type: model
                    .resource_type_of(r.logical_id())
                    .filter(|t| t.is_account())
                    .unwrap_or(ResourceType::Account),
                target: r.logical_id().to_string(),
            }));
            set.extend(props.organizational_units.iter().map(|r| Association {
                kind: AssociationKind::OrganizationalUnit,
                target_type: ResourceType::OrganizationalUnit,
                target: r.logical_id().to_string(),
            }));
            set
        }
        OrganizationResource::ServiceControlPolicy(_) => BTreeSet::new(),
    }
}
