//! Configuration module for the orgform engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `orgform.yaml` settings and organization/stack templates
//! - Validation of settings and templates
//! - Computing content hashes for change detection

mod hash;
mod parser;
mod settings;
mod template;
mod validator;

pub use hash::ContentHasher;
pub use parser::{find_config_file, ConfigParser, LoadedTemplate, CONFIG_ENV_VAR};
pub use settings::{
    ExecutionConfig, FailurePolicy, OrganizationSettings, Settings, StackConfig, StateBackend,
    StateConfig,
};
pub use template::{
    AccountProperties, OrganizationBinding, OrganizationModel, OrganizationResource,
    OrganizationRootProperties, OrganizationalUnitProperties, Reference, ResourceType,
    ServiceControlPolicyProperties, StackResource, Template,
};
pub use validator::{is_valid_account_id, ConfigValidator, ValidationError, ValidationResult};
