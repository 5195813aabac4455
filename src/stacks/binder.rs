//! Expands a stack template across the accounts and regions it is bound to.
//!
//! Every (account, region) pair selected by at least one resource becomes a
//! target with its own template body. A reference to a resource that lives
//! only in another target is rewritten into an export on the producing side
//! and a parameter on the consuming side.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::{
    ContentHasher, OrganizationBinding, OrganizationModel, ResourceType, StackConfig,
    StackResource, Template,
};
use crate::error::{ConfigError, OrgFormError, Result};
use crate::planner::{BindingAction, DiffEngine};
use crate::state::PersistedState;

use super::references::{collect_references, rewrite_references, ResourceReference};
use super::render::{RenderContext, TemplateRenderer};

/// Physical location of a target within a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey {
    /// Physical account id.
    pub account_id: String,
    /// Region.
    pub region: String,
}

/// A parameter whose value is read from another target's exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossAccountParameter {
    /// Parameter name in the consuming template.
    pub parameter_name: String,
    /// Export published by the producer.
    pub export_name: String,
    /// Producer account id.
    pub account_id: String,
    /// Producer region.
    pub region: String,
}

/// A classified stack target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackBinding {
    /// Configured stack name.
    pub stack_name: String,
    /// Logical account id.
    pub logical_account_id: String,
    /// Physical account id.
    pub account_id: String,
    /// Account name, for rendering.
    pub account_name: String,
    /// Region.
    pub region: String,
    /// Required action.
    pub action: BindingAction,
    /// Hash of the rendered target, absent for deletes.
    pub hash: Option<String>,
    /// Hash committed by the last run, absent for creates.
    pub previous_hash: Option<String>,
    /// Rendered template body, absent for deletes.
    #[serde(skip)]
    pub template_body: Option<Value>,
    /// Configured parameter values.
    pub parameters: BTreeMap<String, Value>,
    /// Parameters resolved from other targets at execution time.
    pub cross_account_parameters: Vec<CrossAccountParameter>,
    /// Targets that must be deployed first.
    pub depends_on: BTreeSet<TargetKey>,
    /// Role assumed in the target account.
    pub role_name: Option<String>,
    /// Termination protection flag.
    pub termination_protection: bool,
}

impl StackBinding {
    /// Location key of the target.
    #[must_use]
    pub fn key(&self) -> TargetKey {
        TargetKey {
            account_id: self.account_id.clone(),
            region: self.region.clone(),
        }
    }

    /// Rendering context of the target.
    #[must_use]
    pub fn render_context(&self) -> RenderContext {
        RenderContext {
            account_id: self.account_id.clone(),
            account_name: self.account_name.clone(),
            logical_account_id: self.logical_account_id.clone(),
            region: self.region.clone(),
            stack_name: self.stack_name.clone(),
        }
    }
}

/// One (logical account, region) expansion being assembled.
#[derive(Debug, Default)]
struct Expansion {
    account_id: String,
    resources: BTreeSet<String>,
    parameters: Map<String, Value>,
    outputs: Map<String, Value>,
    cross_account_parameters: Vec<CrossAccountParameter>,
    depends_on: BTreeSet<TargetKey>,
}

type Placement = (String, String);

/// Binds one stack template to its targets.
pub struct StackBinder<'a> {
    stack: &'a StackConfig,
    template: &'a Template,
    model: &'a OrganizationModel,
    state: &'a PersistedState,
    renderer: &'a dyn TemplateRenderer,
    hasher: ContentHasher,
}

impl std::fmt::Debug for StackBinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackBinder")
            .field("stack", &self.stack.stack_name)
            .finish_non_exhaustive()
    }
}

impl<'a> StackBinder<'a> {
    /// Creates a binder.
    #[must_use]
    pub fn new(
        stack: &'a StackConfig,
        template: &'a Template,
        model: &'a OrganizationModel,
        state: &'a PersistedState,
        renderer: &'a dyn TemplateRenderer,
    ) -> Self {
        Self {
            stack,
            template,
            model,
            state,
            renderer,
            hasher: ContentHasher::new(),
        }
    }

    /// Expands, renders and classifies every target of the stack.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an account cannot be resolved, a
    /// reference is ambiguous or unresolvable, or rendering fails.
    pub fn enum_bindings(&self) -> Result<Vec<StackBinding>> {
        let (placements, locations) = self.place_resources();

        let mut expansions = BTreeMap::new();
        for ((logical_account, region), resources) in placements {
            let expansion = Expansion {
                account_id: self.resolve_account_id(&logical_account)?,
                resources,
                ..Expansion::default()
            };
            expansions.insert((logical_account, region), expansion);
        }

        let mut bodies = BTreeMap::new();
        let keys: Vec<Placement> = expansions.keys().cloned().collect();
        for key in &keys {
            let resources = self.build_resources(key, &locations, &mut expansions)?;
            bodies.insert(key.clone(), resources);
        }

        let mut bindings = Vec::new();
        let mut matched = BTreeSet::new();
        for (key, resources) in bodies {
            let Some(expansion) = expansions.remove(&key) else {
                continue;
            };
            let binding = self.finish(&key, expansion, resources)?;
            matched.insert(binding.key());
            bindings.push(binding);
        }

        for target in self.state.targets_of(&self.stack.stack_name) {
            let key = TargetKey {
                account_id: target.account_id.clone(),
                region: target.region.clone(),
            };
            if matched.contains(&key) {
                continue;
            }
            debug!(
                "{} {}/{}: delete",
                self.stack.stack_name, target.account_id, target.region
            );
            bindings.push(StackBinding {
                stack_name: self.stack.stack_name.clone(),
                logical_account_id: target.logical_account_id.clone(),
                account_id: target.account_id.clone(),
                account_name: self.account_name(&target.logical_account_id),
                region: target.region.clone(),
                action: BindingAction::Delete,
                hash: None,
                previous_hash: Some(target.last_committed_hash.clone()),
                template_body: None,
                parameters: self.stack.parameters.clone(),
                cross_account_parameters: Vec::new(),
                depends_on: BTreeSet::new(),
                role_name: self.stack.role_name.clone(),
                termination_protection: target.termination_protection,
            });
        }

        Ok(bindings)
    }

    /// Resolves an organization binding to logical account ids.
    #[must_use]
    pub fn select_accounts(&self, binding: &OrganizationBinding) -> BTreeSet<String> {
        let mut selected = BTreeSet::new();

        for reference in &binding.accounts {
            if reference.logical_id() == "*" {
                selected.extend(self.model.accounts.keys().cloned());
            } else {
                selected.insert(reference.logical_id().to_string());
            }
        }
        for unit in &binding.organizational_units {
            selected.extend(self.model.accounts_in_unit(unit.logical_id()));
        }
        if let Some(tag) = &binding.accounts_with_tag {
            selected.extend(
                self.model
                    .accounts
                    .iter()
                    .filter(|(_, props)| props.tags.contains_key(tag))
                    .map(|(id, _)| id.clone()),
            );
        }
        if binding.include_master_account {
            if let Some(master) = self.model.master_logical_id() {
                selected.insert(master.to_string());
            }
        }
        for excluded in &binding.exclude_accounts {
            selected.remove(excluded.logical_id());
        }

        selected
    }

    /// Maps each placement to its resources, and each resource to its placements.
    fn place_resources(
        &self,
    ) -> (
        BTreeMap<Placement, BTreeSet<String>>,
        BTreeMap<String, Vec<Placement>>,
    ) {
        let mut placements: BTreeMap<Placement, BTreeSet<String>> = BTreeMap::new();
        let mut locations: BTreeMap<String, Vec<Placement>> = BTreeMap::new();

        for (logical_id, resource) in &self.template.resources {
            let Some(binding) = resource
                .organization_binding
                .as_ref()
                .or(self.template.default_organization_binding.as_ref())
            else {
                warn!(
                    "Resource {logical_id} in stack {} has no organization binding",
                    self.stack.stack_name
                );
                continue;
            };

            for account in self.select_accounts(binding) {
                for region in &binding.regions {
                    let placement = (account.clone(), region.clone());
                    placements
                        .entry(placement.clone())
                        .or_default()
                        .insert(logical_id.clone());
                    locations
                        .entry(logical_id.clone())
                        .or_default()
                        .push(placement);
                }
            }
        }

        (placements, locations)
    }

    /// The master account resolves from state, then from the template.
    fn resolve_account_id(&self, logical_id: &str) -> Result<String> {
        if self.model.master_logical_id() == Some(logical_id) {
            return self
                .state
                .master_account_id
                .clone()
                .or_else(|| {
                    self.state
                        .get_unique_binding(ResourceType::MasterAccount)
                        .map(|b| b.physical_id.clone())
                })
                .or_else(|| self.model.master_account_id().map(str::to_string))
                .ok_or_else(|| {
                    ConfigError::unresolved(ResourceType::MasterAccount.as_str(), logical_id).into()
                });
        }

        self.state
            .physical_id(ResourceType::Account, logical_id)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::unresolved(ResourceType::Account.as_str(), logical_id).into())
    }

    fn account_name(&self, logical_id: &str) -> String {
        self.model
            .account(logical_id)
            .map_or_else(|| logical_id.to_string(), |a| a.account_name.clone())
    }

    /// Builds the `Resources` section of one placement, wiring foreign
    /// references to their producers.
    fn build_resources(
        &self,
        key: &Placement,
        locations: &BTreeMap<String, Vec<Placement>>,
        expansions: &mut BTreeMap<Placement, Expansion>,
    ) -> Result<Map<String, Value>> {
        let local: BTreeSet<String> = expansions
            .get(key)
            .map(|e| e.resources.clone())
            .unwrap_or_default();

        let mut resources = Map::new();
        let mut foreign: Vec<(Placement, ResourceReference)> = Vec::new();

        for logical_id in &local {
            let Some(resource) = self.template.resources.get(logical_id) else {
                continue;
            };

            let mut properties = resource.properties.clone();
            let mut failure: Option<OrgFormError> = None;
            rewrite_references(&mut properties, &mut |reference: &ResourceReference| {
                if failure.is_some()
                    || local.contains(&reference.logical_id)
                    || !self.template.resources.contains_key(&reference.logical_id)
                {
                    return None;
                }
                match self.producer_of(logical_id, reference, locations) {
                    Ok(producer) => {
                        foreign.push((producer, reference.clone()));
                        Some(json!({ "Ref": reference.output_name() }))
                    }
                    Err(e) => {
                        failure = Some(e);
                        None
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }

            resources.insert(
                logical_id.clone(),
                Self::resource_body(resource, properties, &local),
            );
        }

        for (producer, reference) in foreign {
            self.link(key, &producer, &reference, expansions)?;
        }

        Ok(resources)
    }

    fn producer_of(
        &self,
        consumer: &str,
        reference: &ResourceReference,
        locations: &BTreeMap<String, Vec<Placement>>,
    ) -> Result<Placement> {
        let placements = locations
            .get(&reference.logical_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match placements {
            [] => Err(ConfigError::UnresolvedReference {
                resource: consumer.to_string(),
                target: reference.logical_id.clone(),
            }
            .into()),
            [single] => Ok(single.clone()),
            many => Err(ConfigError::MultipleTargets {
                resource: consumer.to_string(),
                target: reference.logical_id.clone(),
                targets: many
                    .iter()
                    .map(|(account, region)| format!("{account}/{region}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
        }
    }

    /// Adds the export to the producer and the parameter to the consumer.
    ///
    /// The export name is resolved in the producer's context, matching what
    /// the rendered producer template publishes.
    fn link(
        &self,
        consumer: &Placement,
        producer: &Placement,
        reference: &ResourceReference,
        expansions: &mut BTreeMap<Placement, Expansion>,
    ) -> Result<()> {
        let output_name = reference.output_name();

        let Some(producer_expansion) = expansions.get_mut(producer) else {
            return Ok(());
        };
        let producer_context = RenderContext {
            account_id: producer_expansion.account_id.clone(),
            account_name: self.account_name(&producer.0),
            logical_account_id: producer.0.clone(),
            region: producer.1.clone(),
            stack_name: self.stack.stack_name.clone(),
        };
        let export_name = self
            .renderer
            .resolve_scalar(&reference.export_name(&self.stack.stack_name), &producer_context)?;

        let mut output = json!({
            "Value": reference.to_value(),
            "Export": { "Name": export_name },
        });
        if let Some(condition) = self
            .template
            .resources
            .get(&reference.logical_id)
            .and_then(|r| r.condition.as_ref())
        {
            output["Condition"] = json!(condition);
        }
        producer_expansion.outputs.insert(output_name.clone(), output);
        let producer_key = TargetKey {
            account_id: producer_expansion.account_id.clone(),
            region: producer.1.clone(),
        };

        let Some(consumer_expansion) = expansions.get_mut(consumer) else {
            return Ok(());
        };
        consumer_expansion.parameters.insert(
            output_name.clone(),
            json!({
                "Type": "String",
                "Description": format!(
                    "{export_name} from {}/{}",
                    producer_key.account_id, producer_key.region
                ),
            }),
        );
        if !consumer_expansion
            .cross_account_parameters
            .iter()
            .any(|p| p.parameter_name == output_name)
        {
            consumer_expansion
                .cross_account_parameters
                .push(CrossAccountParameter {
                    parameter_name: output_name,
                    export_name,
                    account_id: producer_key.account_id.clone(),
                    region: producer_key.region.clone(),
                });
        }
        consumer_expansion.depends_on.insert(producer_key);
        Ok(())
    }

    /// Resource body without the binding, with `DependsOn` limited to local resources.
    fn resource_body(
        resource: &StackResource,
        properties: Value,
        local: &BTreeSet<String>,
    ) -> Value {
        let mut body = Map::new();
        body.insert(String::from("Type"), json!(resource.resource_type));
        if !properties.is_null() {
            body.insert(String::from("Properties"), properties);
        }
        if let Some(condition) = &resource.condition {
            body.insert(String::from("Condition"), json!(condition));
        }
        let depends_on: Vec<&str> = match &resource.depends_on {
            Some(Value::String(one)) => vec![one.as_str()],
            Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let depends_on: Vec<&str> = depends_on
            .into_iter()
            .filter(|d| local.contains(*d))
            .collect();
        if !depends_on.is_empty() {
            body.insert(String::from("DependsOn"), json!(depends_on));
        }
        Value::Object(body)
    }

    /// Assembles, renders, hashes and classifies one target.
    fn finish(
        &self,
        key: &Placement,
        expansion: Expansion,
        resources: Map<String, Value>,
    ) -> Result<StackBinding> {
        let (logical_account_id, region) = key;
        let mut parameters: Map<String, Value> = self
            .template
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        parameters.extend(expansion.parameters);

        let mut outputs = Map::new();
        for (name, output) in &self.template.outputs {
            let complete = collect_references(output)
                .iter()
                .filter(|r| self.template.resources.contains_key(&r.logical_id))
                .all(|r| expansion.resources.contains(&r.logical_id));
            if complete {
                outputs.insert(name.clone(), output.clone());
            }
        }
        outputs.extend(expansion.outputs);

        let mut body = Map::new();
        if let Some(version) = &self.template.format_version {
            body.insert(String::from("AWSTemplateFormatVersion"), json!(version));
        }
        if let Some(description) = &self.template.description {
            body.insert(String::from("Description"), json!(description));
        }
        if !parameters.is_empty() {
            body.insert(String::from("Parameters"), Value::Object(parameters));
        }
        if !self.template.conditions.is_empty() {
            body.insert(String::from("Conditions"), json!(self.template.conditions));
        }
        body.insert(String::from("Resources"), Value::Object(resources));
        if !outputs.is_empty() {
            body.insert(String::from("Outputs"), Value::Object(outputs));
        }

        let mut binding = StackBinding {
            stack_name: self.stack.stack_name.clone(),
            logical_account_id: logical_account_id.clone(),
            account_id: expansion.account_id,
            account_name: self.account_name(logical_account_id),
            region: region.clone(),
            action: BindingAction::None,
            hash: None,
            previous_hash: None,
            template_body: None,
            parameters: self.stack.parameters.clone(),
            cross_account_parameters: expansion.cross_account_parameters,
            depends_on: expansion.depends_on,
            role_name: self.stack.role_name.clone(),
            termination_protection: self.stack.termination_protection,
        };

        let mut rendered = self
            .renderer
            .render(&Value::Object(body), &binding.render_context())?;
        drop_orphaned_outputs(&mut rendered);

        let hash = self.hasher.hash_value(&json!({
            "stack": binding.stack_name,
            "account": binding.account_id,
            "region": binding.region,
            "body": rendered,
            "parameters": binding.parameters,
            "roleName": binding.role_name,
            "terminationProtection": binding.termination_protection,
        }));
        let previous_hash = self
            .state
            .get_target(&binding.stack_name, &binding.account_id, &binding.region)
            .map(|t| t.last_committed_hash.clone());
        binding.action = DiffEngine::action(Some(&hash), previous_hash.as_deref())
            .unwrap_or(BindingAction::None);

        debug!(
            "{} {}/{}: {}",
            binding.stack_name, binding.account_id, binding.region, binding.action
        );

        binding.hash = Some(hash);
        binding.previous_hash = previous_hash;
        binding.template_body = Some(rendered);
        Ok(binding)
    }
}

/// Removes outputs that reference resources missing from the rendered body.
fn drop_orphaned_outputs(body: &mut Value) {
    let present: BTreeSet<String> = body
        .get("Resources")
        .and_then(Value::as_object)
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();
    let parameters: BTreeSet<String> = body
        .get("Parameters")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();

    if let Some(outputs) = body.get_mut("Outputs").and_then(Value::as_object_mut) {
        outputs.retain(|name, output| {
            let keep = collect_references(output).iter().all(|r| {
                present.contains(&r.logical_id)
                    || parameters.contains(&r.logical_id)
                    || r.logical_id.contains("::")
            });
            if !keep {
                debug!("Dropping output {name}: its resource is not rendered");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::stacks::PlaceholderRenderer;
    use crate::state::{Binding, Target};

    const ORGANIZATION: &str = r#"
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
      Tags:
        env: dev
  Prod:
    Type: OC::ORG::Account
    Properties:
      AccountName: Prod
  Workloads:
    Type: OC::ORG::OrganizationalUnit
    Properties:
      OrganizationalUnitName: workloads
      Accounts: [Prod]
"#;

    fn model() -> OrganizationModel {
        OrganizationModel::from_template(
            &ConfigParser::parse_template(ORGANIZATION, None).expect("template"),
        )
    }

    fn state() -> PersistedState {
        let mut state = PersistedState::new();
        state.set_binding(Binding::new(ResourceType::Account, "Dev", "222222222222", "h"));
        state.set_binding(Binding::new(ResourceType::Account, "Prod", "333333333333", "h"));
        state
    }

    fn bind(template: &str, state: &PersistedState) -> Result<Vec<StackBinding>> {
        let template = ConfigParser::parse_template(template, None)?;
        let stack = StackConfig::new("baseline", "baseline.yaml");
        let model = model();
        let renderer = PlaceholderRenderer::new();
        StackBinder::new(&stack, &template, &model, state, &renderer).enum_bindings()
    }

    #[test]
    fn test_select_accounts() {
        let template = Template::default();
        let stack = StackConfig::new("s", "s.yaml");
        let model = model();
        let state = state();
        let renderer = PlaceholderRenderer::new();
        let binder = StackBinder::new(&stack, &template, &model, &state, &renderer);

        let all = binder.select_accounts(&OrganizationBinding {
            accounts: vec![crate::config::Reference::new("*")],
            include_master_account: true,
            exclude_accounts: vec![crate::config::Reference::new("Prod")],
            ..OrganizationBinding::default()
        });
        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec!["Dev", "Master"]);

        let by_unit = binder.select_accounts(&OrganizationBinding {
            organizational_units: vec![crate::config::Reference::new("Workloads")],
            accounts_with_tag: Some(String::from("env")),
            ..OrganizationBinding::default()
        });
        assert_eq!(by_unit.into_iter().collect::<Vec<_>>(), vec!["Dev", "Prod"]);
    }

    #[test]
    fn test_two_accounts_two_regions() {
        let bindings = bind(
            r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: [Dev, Prod]
      Regions: [eu-west-1, eu-central-1]
"#,
            &state(),
        )
        .expect("bindings");

        assert_eq!(bindings.len(), 4);
        let hashes: BTreeSet<_> = bindings.iter().filter_map(|b| b.hash.clone()).collect();
        assert_eq!(hashes.len(), 4);
        assert!(bindings.iter().all(|b| b.action == BindingAction::Create));
    }

    #[test]
    fn test_cross_account_reference() {
        let bindings = bind(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    Condition: IsEnabled
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
"#,
            &state(),
        )
        .expect("bindings");

        let producer = bindings
            .iter()
            .find(|b| b.account_id == "111111111111")
            .expect("producer");
        let consumer = bindings
            .iter()
            .find(|b| b.account_id == "222222222222")
            .expect("consumer");

        let producer_body = producer.template_body.as_ref().expect("body");
        assert_eq!(
            producer_body["Outputs"]["Topic"]["Export"]["Name"],
            json!("baseline-Topic")
        );
        assert_eq!(producer_body["Outputs"]["Topic"]["Condition"], json!("IsEnabled"));

        let consumer_body = consumer.template_body.as_ref().expect("body");
        assert_eq!(consumer_body["Parameters"]["Topic"]["Type"], json!("String"));
        assert_eq!(
            consumer_body["Resources"]["Subscription"]["Properties"]["TopicArn"],
            json!({ "Ref": "Topic" })
        );
        assert_eq!(consumer.cross_account_parameters.len(), 1);
        assert_eq!(consumer.cross_account_parameters[0].export_name, "baseline-Topic");
        assert!(consumer.depends_on.contains(&producer.key()));
    }

    #[test]
    fn test_reference_to_multiple_targets_fails() {
        let err = bind(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    OrganizationBinding:
      Accounts: [Dev, Prod]
      Regions: eu-central-1
  Subscription:
    Type: AWS::SNS::Subscription
    OrganizationBinding:
      IncludeMasterAccount: true
      Regions: eu-west-1
    Properties:
      TopicArn: { Ref: Topic }
"#,
            &state(),
        )
        .expect_err("ambiguous reference");

        assert!(matches!(
            err,
            OrgFormError::Config(ConfigError::MultipleTargets { .. })
        ));
    }

    #[test]
    fn test_unbound_account_is_fatal() {
        let err = bind(
            r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: Dev
      Regions: eu-west-1
"#,
            &PersistedState::new(),
        )
        .expect_err("unbound account");

        assert!(matches!(
            err,
            OrgFormError::Config(ConfigError::UnresolvedLogicalId { .. })
        ));
    }

    #[test]
    fn test_committed_target_is_unchanged_and_stale_target_deleted() {
        let template = r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: Dev
      Regions: eu-west-1
"#;
        let mut state = state();
        let first = bind(template, &state).expect("bindings");
        state.set_target(Target {
            stack_name: String::from("baseline"),
            account_id: String::from("222222222222"),
            region: String::from("eu-west-1"),
            logical_account_id: String::from("Dev"),
            last_committed_hash: first[0].hash.clone().expect("hash"),
            termination_protection: false,
        });
        state.set_target(Target {
            stack_name: String::from("baseline"),
            account_id: String::from("333333333333"),
            region: String::from("eu-west-1"),
            logical_account_id: String::from("Prod"),
            last_committed_hash: String::from("old"),
            termination_protection: false,
        });

        let second = bind(template, &state).expect("bindings");
        let actions: Vec<(&str, BindingAction)> = second
            .iter()
            .map(|b| (b.account_id.as_str(), b.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("222222222222", BindingAction::None),
                ("333333333333", BindingAction::Delete),
            ]
        );
    }

    #[test]
    fn test_role_change_redeploys_target() {
        let template = ConfigParser::parse_template(
            r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: Dev
      Regions: eu-west-1
"#,
            None,
        )
        .expect("template");
        let model = model();
        let renderer = PlaceholderRenderer::new();
        let mut state = state();
        let mut stack = StackConfig::new("baseline", "baseline.yaml");

        let first = StackBinder::new(&stack, &template, &model, &state, &renderer)
            .enum_bindings()
            .expect("bindings");
        state.set_target(Target {
            stack_name: String::from("baseline"),
            account_id: String::from("222222222222"),
            region: String::from("eu-west-1"),
            logical_account_id: String::from("Dev"),
            last_committed_hash: first[0].hash.clone().expect("hash"),
            termination_protection: false,
        });

        stack.role_name = Some(String::from("DeployRole"));
        let second = StackBinder::new(&stack, &template, &model, &state, &renderer)
            .enum_bindings()
            .expect("bindings");
        assert_eq!(second[0].action, BindingAction::Update);
        assert_eq!(second[0].role_name.as_deref(), Some("DeployRole"));
    }

    #[test]
    fn test_template_outputs_follow_their_resources() {
        let bindings = bind(
            r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: Dev
      Regions: eu-west-1
  Queue:
    Type: AWS::SQS::Queue
    OrganizationBinding:
      Accounts: Prod
      Regions: eu-west-1
Outputs:
  BucketName:
    Value: { Ref: Bucket }
"#,
            &state(),
        )
        .expect("bindings");

        for binding in &bindings {
            let body = binding.template_body.as_ref().expect("body");
            let has_output = body.get("Outputs").is_some();
            assert_eq!(has_output, binding.logical_account_id == "Dev");
        }
    }
}
