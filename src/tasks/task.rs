//! Task identity, dependency predicates and the operation contract.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::ResourceType;
use crate::error::Result;
use crate::planner::BindingAction;

/// Index of a task within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl TaskId {
    /// Returns the position of the task in its graph.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a task does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Creates (or binds) a resource.
    CreateResource,
    /// Updates a resource's own properties.
    UpdateResource,
    /// Deletes a resource through the provider.
    DeleteResource,
    /// Removes a binding from state without contacting the provider.
    ForgetResource,
    /// Attaches a policy or moves a child into a parent.
    Attach,
    /// Detaches a policy or moves a child out of a parent.
    Detach,
    /// Writes the binding once every other sub-task has run.
    Commit,
    /// Creates or updates a stack instance.
    DeployStack,
    /// Deletes a stack instance.
    DeleteStack,
    /// A task contributed by a plugin, by name.
    Plugin(String),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateResource => write!(f, "create"),
            Self::UpdateResource => write!(f, "update"),
            Self::DeleteResource => write!(f, "delete"),
            Self::ForgetResource => write!(f, "forget"),
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
            Self::Commit => write!(f, "commit"),
            Self::DeployStack => write!(f, "deploy-stack"),
            Self::DeleteStack => write!(f, "delete-stack"),
            Self::Plugin(name) => write!(f, "plugin:{name}"),
        }
    }
}

/// Identity of a task, matched by dependency filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    /// Task kind.
    pub kind: TaskKind,
    /// Organization resource type, for organization tasks.
    pub resource_type: Option<ResourceType>,
    /// Logical id of the resource the task belongs to.
    pub logical_id: String,
    /// Binding action the task is part of.
    pub action: BindingAction,
    /// Logical id of the other side of an attach or detach.
    pub target: Option<String>,
    /// Stack name, for stack tasks.
    pub stack_name: Option<String>,
    /// Physical account id, for stack tasks.
    pub account_id: Option<String>,
    /// Region, for stack tasks.
    pub region: Option<String>,
}

impl TaskIdentity {
    /// Identity of an organization task.
    #[must_use]
    pub fn organization(
        kind: TaskKind,
        resource_type: ResourceType,
        logical_id: impl Into<String>,
        action: BindingAction,
    ) -> Self {
        Self {
            kind,
            resource_type: Some(resource_type),
            logical_id: logical_id.into(),
            action,
            target: None,
            stack_name: None,
            account_id: None,
            region: None,
        }
    }

    /// Identity of a stack task.
    #[must_use]
    pub fn stack(
        kind: TaskKind,
        stack_name: impl Into<String>,
        logical_account_id: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
        action: BindingAction,
    ) -> Self {
        Self {
            kind,
            resource_type: None,
            logical_id: logical_account_id.into(),
            action,
            target: None,
            stack_name: Some(stack_name.into()),
            account_id: Some(account_id.into()),
            region: Some(region.into()),
        }
    }

    /// Sets the attach/detach target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(stack) = &self.stack_name {
            write!(f, " {stack}")?;
        }
        if let Some(resource_type) = self.resource_type {
            write!(f, " {resource_type}")?;
        }
        write!(f, " {}", self.logical_id)?;
        if let Some(target) = &self.target {
            write!(f, " -> {target}")?;
        }
        if let (Some(account), Some(region)) = (&self.account_id, &self.region) {
            write!(f, " ({account}/{region})")?;
        }
        Ok(())
    }
}

/// Data-driven dependency predicate. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Required kind.
    pub kind: Option<TaskKind>,
    /// Required resource type.
    pub resource_type: Option<ResourceType>,
    /// Required logical id.
    pub logical_id: Option<String>,
    /// Required action.
    pub action: Option<BindingAction>,
    /// Required attach/detach target.
    pub target: Option<String>,
    /// Required stack name.
    pub stack_name: Option<String>,
    /// Required account id.
    pub account_id: Option<String>,
    /// Required region.
    pub region: Option<String>,
}

impl TaskFilter {
    /// Matches every task belonging to a resource with the given action.
    #[must_use]
    pub fn resource(
        resource_type: ResourceType,
        logical_id: impl Into<String>,
        action: BindingAction,
    ) -> Self {
        Self {
            resource_type: Some(resource_type),
            logical_id: Some(logical_id.into()),
            action: Some(action),
            ..Self::default()
        }
    }

    /// Matches every task of one stack instance.
    #[must_use]
    pub fn stack_target(
        stack_name: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            stack_name: Some(stack_name.into()),
            account_id: Some(account_id.into()),
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Restricts the filter to one kind.
    #[must_use]
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restricts the filter to one attach/detach target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Returns true if the identity satisfies every set field.
    #[must_use]
    pub fn matches(&self, identity: &TaskIdentity) -> bool {
        fn check<T: PartialEq>(want: Option<&T>, have: &T) -> bool {
            want.is_none_or(|w| w == have)
        }
        fn check_opt<T: PartialEq>(want: Option<&T>, have: Option<&T>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }

        check(self.kind.as_ref(), &identity.kind)
            && check_opt(self.resource_type.as_ref(), identity.resource_type.as_ref())
            && check(self.logical_id.as_ref(), &identity.logical_id)
            && check(self.action.as_ref(), &identity.action)
            && check_opt(self.target.as_ref(), identity.target.as_ref())
            && check_opt(self.stack_name.as_ref(), identity.stack_name.as_ref())
            && check_opt(self.account_id.as_ref(), identity.account_id.as_ref())
            && check_opt(self.region.as_ref(), identity.region.as_ref())
    }
}

/// Ordering contract of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependsOn {
    /// Tasks that must finish first.
    pub tasks: Vec<TaskId>,
    /// Predicates over unfinished tasks that must not match anything.
    pub filters: Vec<TaskFilter>,
    /// Skip instead of run when a dependency failed or was skipped,
    /// whatever the failure policy.
    pub requires_success: bool,
}

impl DependsOn {
    /// No dependencies.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            tasks: Vec::new(),
            filters: Vec::new(),
            requires_success: false,
        }
    }

    /// Depends on explicit tasks.
    #[must_use]
    pub fn tasks(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
            filters: Vec::new(),
            requires_success: false,
        }
    }

    /// Requires every dependency to have succeeded.
    #[must_use]
    pub const fn requiring_success(mut self) -> Self {
        self.requires_success = true;
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TaskFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds filters.
    #[must_use]
    pub fn with_filters(mut self, filters: impl IntoIterator<Item = TaskFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Returns true if the given task satisfies this contract's predicates.
    #[must_use]
    pub fn references(&self, id: TaskId, identity: &TaskIdentity) -> bool {
        self.tasks.contains(&id) || self.filters.iter().any(|f| f.matches(identity))
    }
}

/// The executable part of a task.
///
/// `C` is the execution context shared by every task of one family.
#[async_trait]
pub trait TaskOperation<C>: Send + Sync {
    /// Performs the task. The returned value is kept as the task's result.
    async fn perform(&self, ctx: &C) -> Result<Option<String>>;
}

/// A task in a graph.
pub struct Task<C> {
    /// Position in the graph.
    pub id: TaskId,
    /// Identity, matched by filters.
    pub identity: TaskIdentity,
    /// Ordering contract.
    pub depends_on: DependsOn,
    /// Behavior.
    pub operation: Arc<dyn TaskOperation<C>>,
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// An ordered collection of tasks for one runner invocation.
pub struct TaskGraph<C> {
    tasks: Vec<Task<C>>,
}

impl<C> Default for TaskGraph<C> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<C> fmt::Debug for TaskGraph<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.tasks).finish()
    }
}

impl<C> TaskGraph<C> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task and returns its id.
    pub fn add(
        &mut self,
        identity: TaskIdentity,
        depends_on: DependsOn,
        operation: impl TaskOperation<C> + 'static,
    ) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task {
            id,
            identity,
            depends_on,
            operation: Arc::new(operation),
        });
        id
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterates over the tasks.
    pub fn iter(&self) -> impl Iterator<Item = &Task<C>> {
        self.tasks.iter()
    }

    /// Returns the task with the given id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task<C>> {
        self.tasks.get(id.0)
    }

    /// Consumes the graph.
    #[must_use]
    pub fn into_tasks(self) -> Vec<Task<C>> {
        self.tasks
    }
}
