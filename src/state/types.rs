//! Persisted state types.
//!
//! The state document records which physical resource each logical
//! organization resource is bound to, which stack instances are deployed
//! where, and the organization template that was last applied in full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResourceType;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of retained history entries.
pub const MAX_HISTORY: usize = 100;

/// A logical organization resource bound to a physical one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Logical id from the template.
    pub logical_id: String,
    /// Physical id assigned by the provider.
    pub physical_id: String,
    /// Partition-level physical id, where the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<String>,
    /// Content hash of the definition that was last committed.
    pub last_committed_hash: String,
}

impl Binding {
    /// Creates a new binding.
    #[must_use]
    pub fn new(
        resource_type: ResourceType,
        logical_id: impl Into<String>,
        physical_id: impl Into<String>,
        last_committed_hash: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            logical_id: logical_id.into(),
            physical_id: physical_id.into(),
            partition_id: None,
            last_committed_hash: last_committed_hash.into(),
        }
    }
}

/// One deployed stack instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Stack name.
    pub stack_name: String,
    /// Physical account id.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Logical id of the account the stack was deployed for.
    pub logical_account_id: String,
    /// Content hash of the body and parameters last deployed.
    pub last_committed_hash: String,
    /// Whether termination protection is enabled.
    #[serde(default)]
    pub termination_protection: bool,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Whether the run completed without failures.
    pub success: bool,
    /// Number of organization tasks that ran.
    pub organization_tasks: usize,
    /// Number of stack tasks that ran.
    pub stack_tasks: usize,
    /// Number of tasks that failed.
    pub failed_tasks: usize,
    /// Hash of the organization template used.
    #[serde(default)]
    pub template_hash: Option<String>,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// The complete persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// State format version.
    pub version: String,
    /// Master account id of the organization this state belongs to.
    #[serde(default)]
    pub master_account_id: Option<String>,
    /// Bindings, by type then logical id.
    #[serde(default)]
    bindings: BTreeMap<ResourceType, BTreeMap<String, Binding>>,
    /// Targets, by stack name, account id, then region.
    #[serde(default)]
    targets: BTreeMap<String, BTreeMap<String, BTreeMap<String, Target>>>,
    /// Text of the organization template last applied without failures.
    #[serde(default)]
    pub previous_template: Option<String>,
    /// Hash of `previous_template`.
    #[serde(default)]
    pub previous_template_hash: Option<String>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistedState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            master_account_id: None,
            bindings: BTreeMap::new(),
            targets: BTreeMap::new(),
            previous_template: None,
            previous_template_hash: None,
            last_updated: Utc::now(),
            history: Vec::new(),
            dirty: false,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
        self.dirty = true;
    }

    /// Returns true if the state changed since it was loaded or saved.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag.
    pub const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Gets a binding.
    #[must_use]
    pub fn get_binding(&self, resource_type: ResourceType, logical_id: &str) -> Option<&Binding> {
        self.bindings
            .get(&resource_type)
            .and_then(|by_id| by_id.get(logical_id))
    }

    /// Gets the single binding of a unique type, whatever its logical id.
    #[must_use]
    pub fn get_unique_binding(&self, resource_type: ResourceType) -> Option<&Binding> {
        self.bindings
            .get(&resource_type)
            .and_then(|by_id| by_id.values().next())
    }

    /// Gets the physical id bound to a logical id.
    ///
    /// Unique types resolve to their single binding when the logical id
    /// was renamed.
    #[must_use]
    pub fn physical_id(&self, resource_type: ResourceType, logical_id: &str) -> Option<&str> {
        self.get_binding(resource_type, logical_id)
            .or_else(|| {
                self.get_unique_binding(resource_type)
                    .filter(|_| resource_type.is_unique())
            })
            .map(|b| b.physical_id.as_str())
    }

    /// Adds or replaces a binding.
    ///
    /// For unique types every other binding of the type is dropped.
    pub fn set_binding(&mut self, binding: Binding) {
        let by_id = self.bindings.entry(binding.resource_type).or_default();
        if binding.resource_type.is_unique() {
            by_id.clear();
        }
        by_id.insert(binding.logical_id.clone(), binding);
        self.touch();
    }

    /// Removes a binding.
    pub fn remove_binding(
        &mut self,
        resource_type: ResourceType,
        logical_id: &str,
    ) -> Option<Binding> {
        let removed = self
            .bindings
            .get_mut(&resource_type)
            .and_then(|by_id| by_id.remove(logical_id));
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Iterates over the bindings of a type.
    pub fn bindings_of(&self, resource_type: ResourceType) -> impl Iterator<Item = &Binding> {
        self.bindings
            .get(&resource_type)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Returns the total number of bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(BTreeMap::len).sum()
    }

    /// Gets a target.
    #[must_use]
    pub fn get_target(&self, stack_name: &str, account_id: &str, region: &str) -> Option<&Target> {
        self.targets
            .get(stack_name)
            .and_then(|by_account| by_account.get(account_id))
            .and_then(|by_region| by_region.get(region))
    }

    /// Adds or replaces a target.
    pub fn set_target(&mut self, target: Target) {
        self.targets
            .entry(target.stack_name.clone())
            .or_default()
            .entry(target.account_id.clone())
            .or_default()
            .insert(target.region.clone(), target);
        self.touch();
    }

    /// Removes a target, pruning empty levels.
    pub fn remove_target(
        &mut self,
        stack_name: &str,
        account_id: &str,
        region: &str,
    ) -> Option<Target> {
        let by_account = self.targets.get_mut(stack_name)?;
        let by_region = by_account.get_mut(account_id)?;
        let removed = by_region.remove(region)?;

        if by_region.is_empty() {
            by_account.remove(account_id);
        }
        if by_account.is_empty() {
            self.targets.remove(stack_name);
        }
        self.touch();
        Some(removed)
    }

    /// Returns every target of a stack.
    #[must_use]
    pub fn targets_of(&self, stack_name: &str) -> Vec<&Target> {
        self.targets
            .get(stack_name)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .collect()
    }

    /// Returns the names of every deployed stack.
    #[must_use]
    pub fn stack_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    /// Returns the total number of targets.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Records the master account id.
    pub fn set_master_account_id(&mut self, account_id: impl Into<String>) {
        let account_id = account_id.into();
        if self.master_account_id.as_deref() != Some(account_id.as_str()) {
            self.master_account_id = Some(account_id);
            self.touch();
        }
    }

    /// Stores the text and hash of the template last applied in full.
    pub fn set_previous_template(&mut self, text: impl Into<String>, hash: impl Into<String>) {
        let hash = hash.into();
        if self.previous_template_hash.as_deref() == Some(hash.as_str()) {
            return;
        }
        self.previous_template = Some(text.into());
        self.previous_template_hash = Some(hash);
        self.touch();
    }

    /// Adds a history entry, keeping the last `MAX_HISTORY`.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.touch();
    }
}

impl RunHistoryEntry {
    /// Creates a history entry stamped with the current time.
    #[must_use]
    pub fn new(
        success: bool,
        organization_tasks: usize,
        stack_tasks: usize,
        failed_tasks: usize,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            success,
            organization_tasks,
            stack_tasks,
            failed_tasks,
            template_hash: None,
            error: None,
        }
    }

    /// Sets the template hash.
    #[must_use]
    pub fn with_template_hash(mut self, hash: Option<String>) -> Self {
        self.template_hash = hash;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(account: &str, region: &str) -> Target {
        Target {
            stack_name: String::from("baseline"),
            account_id: account.to_string(),
            region: region.to_string(),
            logical_account_id: String::from("Dev"),
            last_committed_hash: String::from("h1"),
            termination_protection: false,
        }
    }

    #[test]
    fn test_new_state_is_clean() {
        let state = PersistedState::new();
        assert!(!state.is_dirty());
        assert_eq!(state.binding_count(), 0);
    }

    #[test]
    fn test_set_binding_marks_dirty() {
        let mut state = PersistedState::new();
        state.set_binding(Binding::new(ResourceType::Account, "Dev", "222222222222", "h"));

        assert!(state.is_dirty());
        assert_eq!(
            state.physical_id(ResourceType::Account, "Dev"),
            Some("222222222222")
        );

        state.mark_clean();
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_unique_binding_replaces_previous() {
        let mut state = PersistedState::new();
        state.set_binding(Binding::new(ResourceType::MasterAccount, "Old", "1", "h"));
        state.set_binding(Binding::new(ResourceType::MasterAccount, "New", "1", "h"));

        assert_eq!(state.bindings_of(ResourceType::MasterAccount).count(), 1);
        assert_eq!(
            state
                .get_unique_binding(ResourceType::MasterAccount)
                .map(|b| b.logical_id.as_str()),
            Some("New")
        );
    }

    #[test]
    fn test_targets_keyed_by_stack_account_region() {
        let mut state = PersistedState::new();
        state.set_target(target("111111111111", "eu-west-1"));
        state.set_target(target("111111111111", "eu-central-1"));
        state.set_target(target("222222222222", "eu-west-1"));

        assert_eq!(state.target_count(), 3);
        assert_eq!(state.targets_of("baseline").len(), 3);

        state.remove_target("baseline", "222222222222", "eu-west-1");
        assert_eq!(state.target_count(), 2);

        state.remove_target("baseline", "111111111111", "eu-west-1");
        state.remove_target("baseline", "111111111111", "eu-central-1");
        assert!(state.stack_names().is_empty());
    }

    #[test]
    fn test_previous_template_unchanged_hash_is_clean() {
        let mut state = PersistedState::new();
        state.set_previous_template("Organization: {}", "abc");
        state.mark_clean();

        state.set_previous_template("Organization: {}", "abc");
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = PersistedState::new();
        for _ in 0..(MAX_HISTORY + 5) {
            state.add_history(RunHistoryEntry::new(true, 0, 0, 0));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = PersistedState::new();
        state.set_binding(Binding::new(ResourceType::Account, "Dev", "222222222222", "h"));
        state.set_target(target("222222222222", "eu-west-1"));

        let json = serde_json::to_string(&state).expect("serialize");
        let loaded: PersistedState = serde_json::from_str(&json).expect("deserialize");

        assert!(!loaded.is_dirty());
        assert_eq!(loaded.binding_count(), 1);
        assert_eq!(loaded.target_count(), 1);
    }
}
