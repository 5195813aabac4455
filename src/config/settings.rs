//! Settings types for the orgform engine.
//!
//! This module defines the structs that map to the `orgform.yaml` file: where
//! the organization template lives, how state is persisted, how tasks are
//! scheduled, and which stacks are deployed across the organization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Organization reconciliation settings.
    pub organization: OrganizationSettings,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Scheduler behavior shared by all task families.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Stacks deployed across the organization.
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
}

/// Organization reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationSettings {
    /// Path to the organization template, relative to the settings file.
    pub template: String,
    /// Close accounts removed from the template instead of only forgetting them.
    #[serde(default)]
    pub close_accounts: bool,
    /// Maximum number of organization tasks run concurrently.
    #[serde(default = "default_org_concurrency")]
    pub max_concurrent_tasks: usize,
    /// Number of failed organization tasks tolerated before aborting.
    #[serde(default)]
    pub failure_tolerance: usize,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// What the scheduler does with tasks that depend on a failed task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Failed tasks count as finished; dependents still run unless they
    /// require success.
    #[default]
    Continue,
    /// Dependents of failed or skipped tasks are skipped.
    SkipDependents,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::SkipDependents => write!(f, "skip-dependents"),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExecutionConfig {
    /// Failure policy.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Configuration for one deployed stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack name. May contain placeholders.
    pub stack_name: String,
    /// Path to the stack template, relative to the settings file.
    pub template: String,
    /// Role assumed in target accounts. May contain placeholders.
    #[serde(default)]
    pub role_name: Option<String>,
    /// Enables termination protection on created stacks.
    #[serde(default)]
    pub termination_protection: bool,
    /// Stack parameter values. Strings may contain placeholders.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Maximum number of stack targets deployed concurrently.
    #[serde(default = "default_stack_concurrency")]
    pub max_concurrent_stacks: usize,
    /// Number of failed targets tolerated before aborting.
    #[serde(default)]
    pub failed_stack_tolerance: usize,
}

impl StackConfig {
    /// Creates a stack configuration with default scheduling settings.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            template: template.into(),
            role_name: None,
            termination_protection: false,
            parameters: BTreeMap::new(),
            max_concurrent_stacks: default_stack_concurrency(),
            failed_stack_tolerance: 0,
        }
    }
}

// Default value functions

const fn default_org_concurrency() -> usize {
    1
}

const fn default_stack_concurrency() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r"
organization:
  template: organization.yml
",
        )
        .expect("settings should parse");

        assert_eq!(settings.state.backend, StateBackend::Local);
        assert_eq!(settings.execution.failure_policy, FailurePolicy::Continue);
        assert_eq!(settings.organization.max_concurrent_tasks, 1);
        assert!(!settings.organization.close_accounts);
        assert!(settings.stacks.is_empty());
    }

    #[test]
    fn test_failure_policy_kebab_case() {
        let config: ExecutionConfig =
            serde_yaml::from_str("failure_policy: skip-dependents").expect("should parse");
        assert_eq!(config.failure_policy, FailurePolicy::SkipDependents);
        assert_eq!(config.failure_policy.to_string(), "skip-dependents");
    }
}
