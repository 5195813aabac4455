//! In-memory provider fakes for end-to-end tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::ServiceControlPolicyProperties;
use crate::error::{ProviderError, Result};
use crate::provider::{
    AccountChanges, NewAccount, OrganizationWriter, RootInfo, StackDefinition, StackDeployer,
    StackLocation,
};

/// Organization writer that records every call and hands out sequential ids.
///
/// Calls starting with a prefix registered through `failing` are recorded
/// and then rejected.
#[derive(Debug)]
pub struct FakeOrganization {
    root: RootInfo,
    next_id: AtomicUsize,
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl FakeOrganization {
    pub fn new(master_account_id: &str) -> Self {
        Self {
            root: RootInfo {
                root_id: String::from("r-root"),
                master_account_id: master_account_id.to_string(),
            },
            next_id: AtomicUsize::new(1),
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
        }
    }

    pub fn failing(mut self, call_prefix: &str) -> Self {
        self.failing.push(call_prefix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let rejected = self.failing.iter().any(|prefix| call.starts_with(prefix.as_str()));
        self.calls.lock().expect("calls lock").push(call.clone());
        if rejected {
            return Err(ProviderError::other(format!("{call} rejected")).into());
        }
        Ok(())
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl OrganizationWriter for FakeOrganization {
    async fn describe_root(&self) -> Result<RootInfo> {
        Ok(self.root.clone())
    }

    async fn create_account(&self, account: &NewAccount) -> Result<String> {
        self.record(format!("create_account {}", account.account_name))?;
        Ok(format!("{:012}", 300_000_000_000 + self.next()))
    }

    async fn update_account(&self, account_id: &str, _changes: &AccountChanges) -> Result<()> {
        self.record(format!("update_account {account_id}"))?;
        Ok(())
    }

    async fn close_account(&self, account_id: &str) -> Result<()> {
        self.record(format!("close_account {account_id}"))?;
        Ok(())
    }

    async fn create_organizational_unit(&self, parent_id: &str, name: &str) -> Result<String> {
        self.record(format!("create_organizational_unit {name} in {parent_id}"))?;
        Ok(format!("ou-{:04}", self.next()))
    }

    async fn update_organizational_unit(&self, unit_id: &str, name: &str) -> Result<()> {
        self.record(format!("update_organizational_unit {unit_id} {name}"))?;
        Ok(())
    }

    async fn delete_organizational_unit(&self, unit_id: &str) -> Result<()> {
        self.record(format!("delete_organizational_unit {unit_id}"))?;
        Ok(())
    }

    async fn create_policy(&self, policy: &ServiceControlPolicyProperties) -> Result<String> {
        self.record(format!("create_policy {}", policy.policy_name))?;
        Ok(format!("p-{:04}", self.next()))
    }

    async fn update_policy(
        &self,
        policy_id: &str,
        _policy: &ServiceControlPolicyProperties,
    ) -> Result<()> {
        self.record(format!("update_policy {policy_id}"))?;
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<()> {
        self.record(format!("delete_policy {policy_id}"))?;
        Ok(())
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> Result<()> {
        self.record(format!("attach_policy {policy_id} {target_id}"))?;
        Ok(())
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> Result<()> {
        self.record(format!("detach_policy {policy_id} {target_id}"))?;
        Ok(())
    }

    async fn move_account(&self, account_id: &str, destination_parent_id: &str) -> Result<()> {
        self.record(format!("move_account {account_id} {destination_parent_id}"))?;
        Ok(())
    }

    async fn move_organizational_unit(
        &self,
        unit_id: &str,
        destination_parent_id: &str,
    ) -> Result<()> {
        self.record(format!("move_organizational_unit {unit_id} {destination_parent_id}"))?;
        Ok(())
    }

    async fn tag_resource(
        &self,
        resource_id: &str,
        _tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(format!("tag_resource {resource_id}"))?;
        Ok(())
    }
}

type StackKey = (String, String, String);

/// Stack deployer that keeps deployed definitions in memory.
///
/// Every export declared in a deployed body is published with the value
/// `exported:<name>`.
#[derive(Debug, Default)]
pub struct FakeStacks {
    deployed: Mutex<BTreeMap<StackKey, StackDefinition>>,
    validated: AtomicUsize,
}

impl FakeStacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deployed(&self) -> BTreeMap<StackKey, StackDefinition> {
        self.deployed.lock().expect("deployed lock").clone()
    }

    pub fn validated(&self) -> usize {
        self.validated.load(Ordering::SeqCst)
    }

    fn key(location: &StackLocation) -> StackKey {
        (
            location.account_id.clone(),
            location.region.clone(),
            location.stack_name.clone(),
        )
    }
}

#[async_trait]
impl StackDeployer for FakeStacks {
    async fn create_or_update_stack(&self, definition: &StackDefinition) -> Result<()> {
        self.deployed
            .lock()
            .expect("deployed lock")
            .insert(Self::key(&definition.location), definition.clone());
        Ok(())
    }

    async fn delete_stack(&self, location: &StackLocation) -> Result<()> {
        self.deployed
            .lock()
            .expect("deployed lock")
            .remove(&Self::key(location))
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(location.to_string()).into())
    }

    async fn validate_template(
        &self,
        _location: &StackLocation,
        template_body: &str,
    ) -> Result<()> {
        serde_json::from_str::<Value>(template_body)
            .map_err(|e| ProviderError::other(format!("invalid template: {e}")))?;
        self.validated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_exports(
        &self,
        account_id: &str,
        region: &str,
        _role_name: Option<String>,
    ) -> Result<BTreeMap<String, String>> {
        let deployed = self.deployed.lock().expect("deployed lock");
        let mut exports = BTreeMap::new();
        for ((account, stack_region, _), definition) in deployed.iter() {
            if account != account_id || stack_region != region {
                continue;
            }
            let body: Value = serde_json::from_str(&definition.template_body)
                .map_err(|e| ProviderError::other(e.to_string()))?;
            let outputs = body.get("Outputs").and_then(Value::as_object);
            for output in outputs.into_iter().flat_map(|o| o.values()) {
                if let Some(name) = output.pointer("/Export/Name").and_then(Value::as_str) {
                    exports.insert(name.to_string(), format!("exported:{name}"));
                }
            }
        }
        Ok(exports)
    }

    async fn describe_stack_failure(
        &self,
        _location: &StackLocation,
        _client_token: &str,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
