//! Reconciler for the organization and its stacks.
//!
//! This module loads the organization template and every configured stack
//! template, classifies them against persisted state and runs the resulting
//! task graphs: organization first, then one stack at a time.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{
    ConfigParser, ConfigValidator, ContentHasher, LoadedTemplate, OrganizationModel, Settings,
    StackConfig, Template, ValidationResult,
};
use crate::error::{ConfigError, OrgFormError, Result};
use crate::organization::{
    load_previous_model, OrganizationBinder, OrganizationContext, OrganizationTaskProvider,
};
use crate::planner::{BindingAction, ReconciliationPlan};
use crate::provider::{with_retry, OrganizationWriter, StackDeployer, MAX_RETRIES};
use crate::stacks::{
    resolve_location, template_text, PlaceholderRenderer, StackBinder, StackContext,
    StackTaskProvider, TemplateRenderer,
};
use crate::state::{PersistedState, RunHistoryEntry, StateHandle, StateLock, StateStore};
use crate::tasks::{RunReport, RunnerOptions, TaskRunner};

/// Reconciler for the organization and its stacks.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// Settings.
    settings: &'a Settings,
    /// Parser resolving template paths.
    parser: &'a ConfigParser,
    /// State store.
    store: &'a S,
    /// Renderer used for stack bodies, names and parameters.
    renderer: Arc<dyn TemplateRenderer>,
    validator: ConfigValidator,
    hasher: ContentHasher,
}

/// Templates loaded and validated for one run.
struct LoadedConfig<'a> {
    organization: LoadedTemplate,
    model: OrganizationModel,
    template_hash: String,
    stacks: Vec<(&'a StackConfig, Template)>,
}

/// Result of a reconciliation run.
#[derive(Debug, Default, Serialize)]
pub struct ReconciliationResult {
    /// Whether every task succeeded.
    pub success: bool,
    /// Hash of the applied organization template.
    pub template_hash: String,
    /// Organization tasks that ran.
    pub organization_tasks: usize,
    /// Stack tasks that ran.
    pub stack_tasks: usize,
    /// Failed tasks with their errors.
    pub failures: Vec<String>,
    /// Tasks skipped because a dependency failed.
    pub skipped: Vec<String>,
}

impl ReconciliationResult {
    fn record(&mut self, report: &RunReport) {
        self.failures.extend(
            report
                .failed
                .iter()
                .map(|failure| format!("{}: {}", failure.identity, failure.error)),
        );
        self.skipped
            .extend(report.skipped.iter().map(ToString::to_string));
    }

    /// Total number of tasks that ran.
    #[must_use]
    pub const fn total_tasks(&self) -> usize {
        self.organization_tasks + self.stack_tasks
    }
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a reconciler using the built-in placeholder renderer.
    #[must_use]
    pub fn new(settings: &'a Settings, parser: &'a ConfigParser, store: &'a S) -> Self {
        Self {
            settings,
            parser,
            store,
            renderer: Arc::new(PlaceholderRenderer::new()),
            validator: ConfigValidator::new(),
            hasher: ContentHasher::new(),
        }
    }

    /// Replaces the template renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Computes every organization and stack action without executing any.
    ///
    /// Stacks that reference accounts the pending organization changes
    /// would create are reported as deferred.
    ///
    /// # Errors
    ///
    /// Returns an error if a template fails to load or validate, or if a
    /// stack cannot be bound for any other reason.
    pub async fn plan(&self, stack_filter: Option<&str>) -> Result<ReconciliationPlan> {
        let loaded = self.load(stack_filter)?;
        let state = self.load_state().await?;

        let bindings = OrganizationBinder::new().enum_bindings(&loaded.model, &state)?;
        let mut plan = ReconciliationPlan::new(loaded.template_hash.as_str(), &bindings);
        let organization_pending = plan.organization_summary().has_changes();

        for (stack, template) in &loaded.stacks {
            let binder = StackBinder::new(
                stack,
                template,
                &loaded.model,
                &state,
                self.renderer.as_ref(),
            );
            match binder.enum_bindings() {
                Ok(targets) => plan.add_stack(stack.stack_name.as_str(), &targets),
                Err(OrgFormError::Config(e @ ConfigError::UnresolvedLogicalId { .. }))
                    if organization_pending =>
                {
                    debug!("Deferring stack {}: {e}", stack.stack_name);
                    plan.defer_stack(stack.stack_name.as_str(), e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        info!("Plan: {}", plan.summary_line());
        Ok(plan)
    }

    /// Renders every stack target and validates each changed body with the
    /// deployer.
    ///
    /// Returns the number of bodies validated.
    ///
    /// # Errors
    ///
    /// Returns the first binding or validation error.
    pub async fn validate_stacks(&self, deployer: &dyn StackDeployer) -> Result<usize> {
        let loaded = self.load(None)?;
        let state = self.load_state().await?;
        let mut validated = 0;

        for (stack, template) in &loaded.stacks {
            let bindings = StackBinder::new(
                stack,
                template,
                &loaded.model,
                &state,
                self.renderer.as_ref(),
            )
            .enum_bindings()?;

            for binding in bindings
                .iter()
                .filter(|b| matches!(b.action, BindingAction::Create | BindingAction::Update))
            {
                let render = binding.render_context();
                let location = resolve_location(self.renderer.as_ref(), binding, &render)?;
                let body = template_text(binding, &location)?;
                let (target, body) = (&location, body.as_str());
                with_retry(MAX_RETRIES, move || deployer.validate_template(target, body)).await?;
                debug!("Validated {location}");
                validated += 1;
            }
        }

        info!("Validated {validated} stack template(s)");
        Ok(validated)
    }

    /// Performs a full reconciliation under the state lock.
    ///
    /// State is saved even when a step fails.
    ///
    /// # Errors
    ///
    /// Returns an error if templates fail to load or validate, the lock is
    /// held elsewhere, a scheduling error aborts a runner, or state cannot be
    /// saved.
    pub async fn reconcile(
        &self,
        writer: Arc<dyn OrganizationWriter>,
        deployer: Arc<dyn StackDeployer>,
    ) -> Result<ReconciliationResult> {
        let loaded = self.load(None)?;
        info!(
            "Starting reconciliation of {} ({} stack(s))",
            self.settings.organization.template,
            loaded.stacks.len()
        );

        let lock = StateLock::acquire(self.store).await?;
        let state = match self.load_state().await {
            Ok(state) => StateHandle::new(state),
            Err(e) => {
                lock.release(self.store).await;
                return Err(e);
            }
        };

        let mut result = ReconciliationResult {
            template_hash: loaded.template_hash.clone(),
            ..ReconciliationResult::default()
        };
        let outcome = self
            .apply(&loaded, &state, writer, deployer, &mut result)
            .await;

        result.success = outcome.is_ok() && result.failures.is_empty() && result.skipped.is_empty();
        let entry = RunHistoryEntry::new(
            result.success,
            result.organization_tasks,
            result.stack_tasks,
            result.failures.len(),
        )
        .with_template_hash(Some(loaded.template_hash.clone()))
        .with_error(outcome.as_ref().err().map(ToString::to_string));
        state.update(|s| s.add_history(entry));

        let saved = self.save(&state).await;
        lock.release(self.store).await;

        if let Err(e) = outcome {
            error!("Reconciliation aborted: {e}");
            return Err(e);
        }
        saved?;

        info!("{}", result.summary_line());
        Ok(result)
    }

    async fn apply(
        &self,
        loaded: &LoadedConfig<'_>,
        state: &StateHandle,
        writer: Arc<dyn OrganizationWriter>,
        deployer: Arc<dyn StackDeployer>,
        result: &mut ReconciliationResult,
    ) -> Result<()> {
        let snapshot = state.snapshot();
        let bindings = OrganizationBinder::new().enum_bindings(&loaded.model, &snapshot)?;
        let previous = load_previous_model(&snapshot);
        let graph = OrganizationTaskProvider::new(&loaded.model, &previous, &snapshot)
            .with_close_accounts(self.settings.organization.close_accounts)
            .create_tasks(&bindings)?;

        let context = Arc::new(OrganizationContext::new(state.clone(), writer));
        let report = TaskRunner::new(self.organization_options())
            .run(graph, context)
            .await?;
        result.organization_tasks = report.executed();
        result.record(&report);

        if report.is_success() {
            let (text, hash) = (&loaded.organization.text, &loaded.template_hash);
            state.update(|s| s.set_previous_template(text.as_str(), hash.as_str()));
        } else {
            warn!(
                "{} organization task(s) failed, keeping the previously applied template",
                report.failed.len()
            );
        }

        let context = Arc::new(StackContext::new(
            state.clone(),
            deployer,
            Arc::clone(&self.renderer),
        ));
        for (stack, template) in &loaded.stacks {
            let snapshot = state.snapshot();
            let bindings = StackBinder::new(
                stack,
                template,
                &loaded.model,
                &snapshot,
                self.renderer.as_ref(),
            )
            .enum_bindings()?;

            let graph = StackTaskProvider::new().create_tasks(&bindings);
            if graph.is_empty() {
                info!("Stack {} is up to date", stack.stack_name);
                continue;
            }

            let report = TaskRunner::new(self.stack_options(stack))
                .run(graph, Arc::clone(&context))
                .await?;
            result.stack_tasks += report.executed();
            result.record(&report);
        }

        Ok(())
    }

    fn load(&self, stack_filter: Option<&str>) -> Result<LoadedConfig<'a>> {
        let settings = self.settings;
        log_warnings(&self.validator.validate_settings(settings)?);

        let organization = self.parser.load_template(&settings.organization.template)?;
        log_warnings(&self.validator.validate_organization(&organization.template)?);
        let model = OrganizationModel::from_template(&organization.template);
        let template_hash = self.hasher.hash_text(&organization.text);

        if let Some(name) = stack_filter {
            if !settings.stacks.iter().any(|s| s.stack_name == name) {
                return Err(ConfigError::validation(
                    format!("Unknown stack '{name}'"),
                    "stacks",
                )
                .into());
            }
        }

        let mut stacks = Vec::new();
        for stack in settings
            .stacks
            .iter()
            .filter(|s| stack_filter.is_none_or(|name| s.stack_name == name))
        {
            let template = self.parser.load_template(&stack.template)?.template;
            log_warnings(&self.validator.validate_stack_template(
                &stack.stack_name,
                &template,
                &model,
            )?);
            stacks.push((stack, template));
        }

        Ok(LoadedConfig {
            organization,
            model,
            template_hash,
            stacks,
        })
    }

    async fn load_state(&self) -> Result<PersistedState> {
        Ok(self.store.load().await?.unwrap_or_else(|| {
            info!("No state found in {} backend, starting fresh", self.store.backend_type());
            PersistedState::new()
        }))
    }

    async fn save(&self, state: &StateHandle) -> Result<()> {
        if !state.read(PersistedState::is_dirty) {
            debug!("State unchanged, skipping save");
            return Ok(());
        }

        let mut snapshot = state.snapshot();
        snapshot.mark_clean();
        if let Err(e) = self.store.save(&snapshot).await {
            error!("Failed to save state: {e}");
            return Err(e);
        }
        state.update(PersistedState::mark_clean);
        Ok(())
    }

    fn organization_options(&self) -> RunnerOptions {
        let organization = &self.settings.organization;
        RunnerOptions::default()
            .with_max_concurrency(organization.max_concurrent_tasks)
            .with_failure_tolerance(organization.failure_tolerance)
            .with_failure_policy(self.settings.execution.failure_policy)
    }

    fn stack_options(&self, stack: &StackConfig) -> RunnerOptions {
        RunnerOptions::default()
            .with_max_concurrency(stack.max_concurrent_stacks)
            .with_failure_tolerance(stack.failed_stack_tolerance)
            .with_failure_policy(self.settings.execution.failure_policy)
    }
}

fn log_warnings(result: &ValidationResult) {
    for warning in &result.warnings {
        warn!("{warning}");
    }
}

impl ReconciliationResult {
    fn summary_line(&self) -> String {
        format!(
            "Reconciliation {}: {} organization task(s), {} stack task(s), {} failed, {} skipped",
            if self.success { "succeeded" } else { "finished with failures" },
            self.organization_tasks,
            self.stack_tasks,
            self.failures.len(),
            self.skipped.len()
        )
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Organization tasks: {}", self.organization_tasks)?;
        writeln!(f, "  Stack tasks: {}", self.stack_tasks)?;

        if !self.failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in &self.failures {
                writeln!(f, "    - {failure}")?;
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f, "  Skipped:")?;
            for skipped in &self.skipped {
                writeln!(f, "    - {skipped}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceType;
    use crate::state::LocalStateStore;
    use crate::testutil::{FakeOrganization, FakeStacks};
    use tempfile::TempDir;

    const SETTINGS: &str = r"
organization:
  template: organization.yml
stacks:
  - stack_name: baseline
    template: baseline.yml
    max_concurrent_stacks: 2
";

    const ORGANIZATION: &str = r#"
Organization:
  Root:
    Type: OC::ORG::OrganizationRoot
    Properties:
      ServiceControlPolicies: DenyLeave
  Master:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountName: Management
      AccountId: "111111111111"
  Dev:
    Type: OC::ORG::Account
    Properties:
      AccountName: Dev
      RootEmail: dev@example.com
  Workloads:
    Type: OC::ORG::OrganizationalUnit
    Properties:
      OrganizationalUnitName: workloads
      Accounts: Dev
  DenyLeave:
    Type: OC::ORG::ServiceControlPolicy
    Properties:
      PolicyName: deny-leave
      PolicyDocument:
        Version: "2012-10-17"
"#;

    const BASELINE: &str = r"
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
";

    struct Fixture {
        dir: TempDir,
        settings: Settings,
        parser: ConfigParser,
        store: LocalStateStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("organization.yml"), ORGANIZATION).expect("write");
        std::fs::write(dir.path().join("baseline.yml"), BASELINE).expect("write");

        let parser = ConfigParser::new().with_base_path(dir.path());
        let settings = parser.parse_yaml(SETTINGS, None).expect("settings");
        let store = LocalStateStore::with_base_dir(dir.path().join(".orgform"));
        Fixture {
            dir,
            settings,
            parser,
            store,
        }
    }

    #[tokio::test]
    async fn test_second_reconcile_runs_nothing() {
        let fx = fixture();
        let reconciler = Reconciler::new(&fx.settings, &fx.parser, &fx.store);
        let organization = Arc::new(FakeOrganization::new("111111111111"));
        let stacks = Arc::new(FakeStacks::new());

        let first = reconciler
            .reconcile(organization.clone(), stacks.clone())
            .await
            .expect("first run");
        assert!(first.success, "{first}");
        assert!(first.organization_tasks > 0);
        assert_eq!(first.stack_tasks, 2);
        assert!(organization
            .calls()
            .contains(&String::from("create_account Dev")));

        let consumer = stacks
            .deployed()
            .into_values()
            .find(|d| d.location.region == "eu-west-1")
            .expect("consumer deployed");
        assert_eq!(
            consumer.parameters.get("Topic").map(String::as_str),
            Some("exported:baseline-Topic")
        );

        let calls = organization.calls().len();
        let second = reconciler
            .reconcile(organization.clone(), stacks.clone())
            .await
            .expect("second run");
        assert!(second.success);
        assert_eq!(second.total_tasks(), 0);
        assert_eq!(organization.calls().len(), calls);

        let state = fx.store.load().await.expect("load").expect("state");
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.target_count(), 2);
        assert_eq!(state.master_account_id.as_deref(), Some("111111111111"));
        assert!(state.previous_template.is_some());
        assert!(fx.dir.path().join(".orgform").exists());
    }

    #[tokio::test]
    async fn test_plan_defers_stacks_until_accounts_exist() {
        let fx = fixture();
        let reconciler = Reconciler::new(&fx.settings, &fx.parser, &fx.store);

        let plan = reconciler.plan(None).await.expect("plan");
        assert!(plan.organization_summary().creates >= 5);
        assert!(plan.deferred.contains_key("baseline"));
        assert!(plan.stacks.is_empty());

        reconciler
            .reconcile(
                Arc::new(FakeOrganization::new("111111111111")),
                Arc::new(FakeStacks::new()),
            )
            .await
            .expect("reconcile");

        let plan = reconciler.plan(Some("baseline")).await.expect("plan");
        assert!(!plan.has_changes(), "{plan}");
        assert_eq!(plan.stacks["baseline"].len(), 2);
    }

    #[tokio::test]
    async fn test_validate_stacks_renders_every_changed_target() {
        let fx = fixture();
        let mut state = PersistedState::new();
        state.set_binding(crate::state::Binding::new(
            ResourceType::Account,
            "Dev",
            "222222222222",
            "h",
        ));
        fx.store.save(&state).await.expect("save");

        let stacks = FakeStacks::new();
        let count = Reconciler::new(&fx.settings, &fx.parser, &fx.store)
            .validate_stacks(&stacks)
            .await
            .expect("validate");
        assert_eq!(count, 2);
        assert_eq!(stacks.validated(), 2);
    }

    #[tokio::test]
    async fn test_unknown_stack_filter_fails() {
        let fx = fixture();
        let err = Reconciler::new(&fx.settings, &fx.parser, &fx.store)
            .plan(Some("missing"))
            .await
            .expect_err("unknown stack");
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_reconcile_refuses_locked_state() {
        let fx = fixture();
        let lock = StateLock::acquire(&fx.store).await.expect("lock");

        let err = Reconciler::new(&fx.settings, &fx.parser, &fx.store)
            .reconcile(
                Arc::new(FakeOrganization::new("111111111111")),
                Arc::new(FakeStacks::new()),
            )
            .await
            .expect_err("locked");
        assert!(matches!(err, OrgFormError::State(_)));

        lock.release(&fx.store).await;
    }

    #[tokio::test]
    async fn test_master_mismatch_is_fatal_and_state_is_kept() {
        let fx = fixture();
        let mut state = PersistedState::new();
        state.set_master_account_id("999999999999");
        fx.store.save(&state).await.expect("save");

        let organization = Arc::new(FakeOrganization::new("111111111111"));
        let err = Reconciler::new(&fx.settings, &fx.parser, &fx.store)
            .reconcile(organization.clone(), Arc::new(FakeStacks::new()))
            .await
            .expect_err("mismatch");
        assert!(matches!(
            err,
            OrgFormError::Config(ConfigError::OrganizationMismatch { .. })
        ));
        assert!(organization.calls().is_empty());

        let saved = fx.store.load().await.expect("load").expect("state");
        assert_eq!(saved.history.len(), 1);
        assert!(!saved.history[0].success);
        assert!(!fx.store.is_locked().await.expect("lock state"));
    }
}
