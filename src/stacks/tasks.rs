//! Deploy and delete tasks for stack targets.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{OrgFormError, Result, StateError};
use crate::planner::BindingAction;
use crate::provider::{with_retry, StackDefinition, StackDeployer, StackLocation, MAX_RETRIES};
use crate::state::{StateHandle, Target};
use crate::tasks::{DependsOn, TaskFilter, TaskGraph, TaskIdentity, TaskKind, TaskOperation};

use super::binder::StackBinding;
use super::render::{RenderContext, TemplateRenderer};

/// Everything a stack task needs at execution time.
#[derive(Clone)]
pub struct StackContext {
    state: StateHandle,
    deployer: Arc<dyn StackDeployer>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl std::fmt::Debug for StackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StackContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        state: StateHandle,
        deployer: Arc<dyn StackDeployer>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            state,
            deployer,
            renderer,
        }
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Stack deployer.
    #[must_use]
    pub fn deployer(&self) -> &dyn StackDeployer {
        self.deployer.as_ref()
    }

    /// Template renderer.
    #[must_use]
    pub fn renderer(&self) -> &dyn TemplateRenderer {
        self.renderer.as_ref()
    }

    fn location(&self, binding: &StackBinding, render: &RenderContext) -> Result<StackLocation> {
        resolve_location(self.renderer(), binding, render)
    }
}

/// Resolves the stack name and role of a binding in its rendering context.
///
/// # Errors
///
/// Returns a `Resolution` error if the stack name or role cannot be rendered.
pub fn resolve_location(
    renderer: &dyn TemplateRenderer,
    binding: &StackBinding,
    render: &RenderContext,
) -> Result<StackLocation> {
    let role_name = binding
        .role_name
        .as_deref()
        .map(|role| renderer.resolve_scalar(role, render))
        .transpose()?;

    Ok(StackLocation {
        stack_name: renderer.resolve_scalar(&binding.stack_name, render)?,
        account_id: binding.account_id.clone(),
        region: binding.region.clone(),
        role_name,
    })
}

/// Serializes the rendered body of a binding for the provider.
///
/// # Errors
///
/// Returns an error if the binding carries no body or it cannot be serialized.
pub fn template_text(binding: &StackBinding, location: &StackLocation) -> Result<String> {
    let body = binding
        .template_body
        .as_ref()
        .ok_or_else(|| OrgFormError::internal(format!("{location} has no template body")))?;
    serde_json::to_string_pretty(body)
        .map_err(|e| StateError::serialization(format!("Failed to render {location}: {e}")).into())
}

/// Creates or updates one stack target.
#[derive(Debug)]
pub struct DeployStack {
    /// The target.
    pub binding: StackBinding,
}

impl DeployStack {
    async fn resolve_parameters(
        &self,
        ctx: &StackContext,
        render: &RenderContext,
        role_name: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        for (name, value) in &self.binding.parameters {
            let resolved = match value {
                Value::String(text) => ctx.renderer.resolve_scalar(text, render)?,
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => ctx.renderer.resolve_scalar(text, render),
                        other => Ok(other.to_string()),
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(","),
                other => other.to_string(),
            };
            parameters.insert(name.clone(), resolved);
        }

        let mut exports: BTreeMap<(String, String), BTreeMap<String, String>> = BTreeMap::new();
        for parameter in &self.binding.cross_account_parameters {
            let key = (parameter.account_id.clone(), parameter.region.clone());
            if !exports.contains_key(&key) {
                let deployer = ctx.deployer();
                let (account, region) = (key.0.as_str(), key.1.as_str());
                let role = role_name.map(str::to_string);
                let listed = with_retry(MAX_RETRIES, move || {
                    deployer.list_exports(account, region, role.clone())
                })
                .await?;
                exports.insert(key.clone(), listed);
            }

            let value = exports
                .get(&key)
                .and_then(|e| e.get(&parameter.export_name))
                .cloned()
                .unwrap_or_else(|| {
                    warn!(
                        "Export {} not found in {}/{}, using an empty value for {}",
                        parameter.export_name,
                        parameter.account_id,
                        parameter.region,
                        parameter.parameter_name
                    );
                    String::new()
                });
            parameters.insert(parameter.parameter_name.clone(), value);
        }

        Ok(parameters)
    }

    async fn log_failure(ctx: &StackContext, definition: &StackDefinition, cause: &OrgFormError) {
        error!("Stack {} failed: {cause}", definition.location);
        match ctx
            .deployer
            .describe_stack_failure(&definition.location, &definition.client_token)
            .await
        {
            Ok(reasons) => {
                for reason in reasons {
                    error!(
                        "  {} {}/{}: {reason}",
                        definition.location.stack_name,
                        definition.location.account_id,
                        definition.location.region
                    );
                }
            }
            Err(e) => warn!("Unable to describe failure of {}: {e}", definition.location),
        }
    }

    async fn deploy(ctx: &StackContext, definition: &StackDefinition) -> Result<()> {
        let deployer = ctx.deployer();
        let result = with_retry(MAX_RETRIES, move || deployer.create_or_update_stack(definition)).await;
        if let Err(e) = &result {
            Self::log_failure(ctx, definition, e).await;
        }
        result
    }
}

#[async_trait]
impl TaskOperation<StackContext> for DeployStack {
    async fn perform(&self, ctx: &StackContext) -> Result<Option<String>> {
        let binding = &self.binding;
        let render = binding.render_context();
        let location = ctx.location(binding, &render)?;
        let parameters = self
            .resolve_parameters(ctx, &render, location.role_name.as_deref())
            .await?;
        let template_body = template_text(binding, &location)?;
        let hash = binding.hash.clone().ok_or_else(|| {
            OrgFormError::internal(format!("{location} has no content hash"))
        })?;

        let mut definition = StackDefinition {
            location: location.clone(),
            template_body,
            parameters,
            termination_protection: binding.termination_protection,
            client_token: Uuid::new_v4().to_string(),
        };

        info!("Deploying stack {location}");
        match Self::deploy(ctx, &definition).await {
            Ok(()) => {}
            Err(e) if e.needs_replacement() => {
                warn!("Stack {location} must be replaced, deleting it first");
                ctx.deployer().delete_stack(&location).await?;
                definition.client_token = Uuid::new_v4().to_string();
                Self::deploy(ctx, &definition).await?;
            }
            Err(e) => return Err(e),
        }

        ctx.state.update(|state| {
            state.set_target(Target {
                stack_name: binding.stack_name.clone(),
                account_id: binding.account_id.clone(),
                region: binding.region.clone(),
                logical_account_id: binding.logical_account_id.clone(),
                last_committed_hash: hash,
                termination_protection: binding.termination_protection,
            });
        });

        Ok(Some(location.to_string()))
    }
}

/// Deletes one stack target. The target is unbound even if the delete fails.
#[derive(Debug)]
pub struct DeleteStack {
    /// The target.
    pub binding: StackBinding,
}

#[async_trait]
impl TaskOperation<StackContext> for DeleteStack {
    async fn perform(&self, ctx: &StackContext) -> Result<Option<String>> {
        let binding = &self.binding;
        let render = binding.render_context();

        match ctx.location(binding, &render) {
            Ok(location) => {
                info!("Deleting stack {location}");
                let deployer = ctx.deployer();
                let target = &location;
                match with_retry(MAX_RETRIES, move || deployer.delete_stack(target)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => warn!("Stack {location} already deleted"),
                    Err(e) => error!("Failed to delete stack {location}: {e}"),
                }
            }
            Err(e) => error!(
                "Unable to resolve stack {} in {}/{}: {e}",
                binding.stack_name, binding.account_id, binding.region
            ),
        }

        ctx.state.update(|state| {
            state.remove_target(&binding.stack_name, &binding.account_id, &binding.region)
        });
        Ok(None)
    }
}

/// Builds stack tasks from bindings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StackTaskProvider;

impl StackTaskProvider {
    /// Creates a provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// One deploy task per changed target, one delete task per removed one.
    ///
    /// A consumer's deploy waits for the deploy of every producer it reads
    /// exports from, and is skipped when one of them fails.
    #[must_use]
    pub fn create_tasks(&self, bindings: &[StackBinding]) -> TaskGraph<StackContext> {
        let mut graph = TaskGraph::new();

        for binding in bindings {
            let identity = |kind| {
                TaskIdentity::stack(
                    kind,
                    binding.stack_name.clone(),
                    binding.logical_account_id.clone(),
                    binding.account_id.clone(),
                    binding.region.clone(),
                    binding.action,
                )
            };

            match binding.action {
                BindingAction::Create | BindingAction::Update => {
                    let depends_on = DependsOn::none().with_filters(binding.depends_on.iter().map(
                        |producer| {
                            TaskFilter::stack_target(
                                binding.stack_name.clone(),
                                producer.account_id.clone(),
                                producer.region.clone(),
                            )
                            .with_kind(TaskKind::DeployStack)
                        },
                    ));
                    let depends_on = if binding.depends_on.is_empty() {
                        depends_on
                    } else {
                        depends_on.requiring_success()
                    };
                    graph.add(
                        identity(TaskKind::DeployStack),
                        depends_on,
                        DeployStack {
                            binding: binding.clone(),
                        },
                    );
                }
                BindingAction::Delete => {
                    graph.add(
                        identity(TaskKind::DeleteStack),
                        DependsOn::none(),
                        DeleteStack {
                            binding: binding.clone(),
                        },
                    );
                }
                BindingAction::None => {}
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, FailurePolicy, OrganizationModel, ResourceType, StackConfig};
    use crate::error::ProviderError;
    use crate::provider::MockStackDeployer;
    use crate::stacks::{PlaceholderRenderer, StackBinder};
    use crate::state::{Binding, PersistedState};
    use crate::tasks::{RunnerOptions, TaskRunner};
    use std::sync::Mutex;

    const TEMPLATE: &str = r#"
Organization:
  Master:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountName: Management
      AccountId: "111111111111"
  Dev:
    Type: OC::ORG::Account
    Properties:
      AccountName: Dev
Resources:
  Topic:
    Type: AWS::SNS::Topic
    OrganizationBinding:
      IncludeMasterAccount: true
      Regions: eu-central-1
  Subscription:
    Type: AWS::SNS::Subscription
    OrganizationBinding:
      Accounts: Dev
      Regions: eu-west-1
    Properties:
      TopicArn: { Ref: Topic }
"#;

    fn bindings(state: &PersistedState) -> Vec<StackBinding> {
        let template = ConfigParser::parse_template(TEMPLATE, None).expect("template");
        let model = OrganizationModel::from_template(&template);
        let mut stack = StackConfig::new("baseline-${CurrentRegion}", "baseline.yaml");
        stack
            .parameters
            .insert(String::from("Owner"), Value::String(String::from("${CurrentAccount.AccountName}")));
        StackBinder::new(&stack, &template, &model, state, &PlaceholderRenderer::new())
            .enum_bindings()
            .expect("bindings")
    }

    fn seeded_state() -> PersistedState {
        let mut state = PersistedState::new();
        state.set_binding(Binding::new(ResourceType::Account, "Dev", "222222222222", "h"));
        state
    }

    fn context(state: &StateHandle, deployer: MockStackDeployer) -> Arc<StackContext> {
        Arc::new(StackContext::new(
            state.clone(),
            Arc::new(deployer),
            Arc::new(PlaceholderRenderer::new()),
        ))
    }

    #[tokio::test]
    async fn test_consumer_waits_for_producer_and_reads_export() {
        let state = StateHandle::new(seeded_state());
        let graph = StackTaskProvider::new().create_tasks(&bindings(&state.snapshot()));
        assert_eq!(graph.len(), 2);

        let deployed = Arc::new(Mutex::new(Vec::new()));
        let mut deployer = MockStackDeployer::new();
        let log = Arc::clone(&deployed);
        deployer.expect_create_or_update_stack().times(2).returning(move |definition| {
            log.lock()
                .expect("lock")
                .push((definition.location.account_id.clone(), definition.parameters.clone()));
            Ok(())
        });
        deployer
            .expect_list_exports()
            .withf(|account, region, _| account == "111111111111" && region == "eu-central-1")
            .times(1)
            .returning(|_, _, _| {
                Ok(BTreeMap::from([(
                    String::from("baseline-eu-central-1-Topic"),
                    String::from("arn:aws:sns:eu-central-1:111111111111:topic"),
                )]))
            });

        let report = TaskRunner::new(RunnerOptions::default().with_max_concurrency(4))
            .run(graph, context(&state, deployer))
            .await
            .expect("run");
        assert!(report.is_success());

        let deployed = deployed.lock().expect("lock").clone();
        assert_eq!(deployed[0].0, "111111111111");
        assert_eq!(deployed[1].0, "222222222222");
        assert_eq!(
            deployed[1].1.get("Topic").map(String::as_str),
            Some("arn:aws:sns:eu-central-1:111111111111:topic")
        );
        assert_eq!(deployed[1].1.get("Owner").map(String::as_str), Some("Dev"));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.targets_of("baseline-${CurrentRegion}").len(), 2);
        let rerun = StackTaskProvider::new().create_tasks(&bindings(&snapshot));
        assert!(rerun.is_empty());
    }

    #[tokio::test]
    async fn test_missing_export_uses_empty_value() {
        let state = StateHandle::new(seeded_state());
        let consumer: Vec<StackBinding> = bindings(&state.snapshot())
            .into_iter()
            .filter(|b| b.account_id == "222222222222")
            .collect();
        let graph = StackTaskProvider::new().create_tasks(&consumer);

        let mut deployer = MockStackDeployer::new();
        deployer
            .expect_list_exports()
            .returning(|_, _, _| Ok(BTreeMap::new()));
        deployer
            .expect_create_or_update_stack()
            .withf(|definition| definition.parameters.get("Topic").is_some_and(String::is_empty))
            .times(1)
            .returning(|_| Ok(()));

        let report = TaskRunner::new(RunnerOptions::default())
            .run(graph, context(&state, deployer))
            .await
            .expect("run");
        assert_eq!(report.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_replacement_deletes_then_retries_once() {
        let state = StateHandle::new(seeded_state());
        let producer: Vec<StackBinding> = bindings(&state.snapshot())
            .into_iter()
            .filter(|b| b.account_id == "111111111111")
            .collect();
        let graph = StackTaskProvider::new().create_tasks(&producer);

        let mut deployer = MockStackDeployer::new();
        let mut seq = mockall::Sequence::new();
        deployer
            .expect_create_or_update_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ProviderError::NeedsReplacement {
                    resource: String::from("stack"),
                    status: String::from("ROLLBACK_COMPLETE"),
                }
                .into())
            });
        deployer
            .expect_describe_stack_failure()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![String::from("Topic: CREATE_FAILED")]));
        deployer
            .expect_delete_stack()
            .withf(|location| location.stack_name == "baseline-eu-central-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        deployer
            .expect_create_or_update_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let report = TaskRunner::new(RunnerOptions::default())
            .run(graph, context(&state, deployer))
            .await
            .expect("run");
        assert!(report.is_success());
        assert_eq!(state.read(PersistedState::target_count), 1);
    }

    #[tokio::test]
    async fn test_failed_producer_skips_consumer_under_any_policy() {
        for policy in [FailurePolicy::Continue, FailurePolicy::SkipDependents] {
            let state = StateHandle::new(seeded_state());
            let graph = StackTaskProvider::new().create_tasks(&bindings(&state.snapshot()));

            let mut deployer = MockStackDeployer::new();
            deployer
                .expect_create_or_update_stack()
                .times(1)
                .returning(|_| Err(ProviderError::other("Topic: CREATE_FAILED").into()));
            deployer
                .expect_describe_stack_failure()
                .returning(|_, _| Ok(Vec::new()));

            let report = TaskRunner::new(
                RunnerOptions::default()
                    .with_max_concurrency(4)
                    .with_failure_tolerance(1)
                    .with_failure_policy(policy),
            )
            .run(graph, context(&state, deployer))
            .await
            .expect("run");

            assert_eq!(report.failed.len(), 1, "{policy}");
            assert_eq!(report.skipped.len(), 1, "{policy}");
            assert_eq!(report.skipped[0].account_id.as_deref(), Some("222222222222"));
            assert_eq!(state.read(PersistedState::target_count), 0, "{policy}");
        }
    }

    #[tokio::test]
    async fn test_delete_unbinds_even_on_failure() {
        let mut seeded = seeded_state();
        seeded.set_target(Target {
            stack_name: String::from("baseline-${CurrentRegion}"),
            account_id: String::from("333333333333"),
            region: String::from("us-east-1"),
            logical_account_id: String::from("Gone"),
            last_committed_hash: String::from("h"),
            termination_protection: false,
        });
        let state = StateHandle::new(seeded);
        let deletes: Vec<StackBinding> = bindings(&state.snapshot())
            .into_iter()
            .filter(|b| b.action == BindingAction::Delete)
            .collect();
        assert_eq!(deletes.len(), 1);

        let mut deployer = MockStackDeployer::new();
        deployer
            .expect_delete_stack()
            .withf(|location| location.stack_name == "baseline-us-east-1")
            .returning(|_| Err(ProviderError::other("access denied").into()));

        let report = TaskRunner::new(RunnerOptions::default())
            .run(StackTaskProvider::new().create_tasks(&deletes), context(&state, deployer))
            .await
            .expect("run");
        assert!(report.is_success());
        assert_eq!(state.read(PersistedState::target_count), 0);
    }
}
