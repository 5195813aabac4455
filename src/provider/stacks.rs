//! Interface to the stack deployment service.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Where a stack instance lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackLocation {
    /// Stack name.
    pub stack_name: String,
    /// Physical account id.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Role assumed in the target account.
    pub role_name: Option<String>,
}

impl fmt::Display for StackLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.stack_name, self.account_id, self.region)
    }
}

/// Provider-facing definition of one stack instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDefinition {
    /// Target location.
    pub location: StackLocation,
    /// Rendered template body (JSON).
    pub template_body: String,
    /// Resolved parameter values.
    pub parameters: BTreeMap<String, String>,
    /// Enables termination protection.
    pub termination_protection: bool,
    /// Token correlating provider events with this attempt.
    pub client_token: String,
}

/// Stack deployment operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackDeployer: Send + Sync {
    /// Creates or updates a stack and waits for it to settle.
    ///
    /// A stack stuck in a state that only delete-then-create can fix must
    /// be reported as `ProviderError::NeedsReplacement`.
    async fn create_or_update_stack(&self, definition: &StackDefinition) -> Result<()>;

    /// Deletes a stack. A missing stack is reported as `NotFound`.
    async fn delete_stack(&self, location: &StackLocation) -> Result<()>;

    /// Validates a template body in the target location.
    async fn validate_template(&self, location: &StackLocation, template_body: &str)
    -> Result<()>;

    /// Lists exported values in an account and region.
    async fn list_exports(
        &self,
        account_id: &str,
        region: &str,
        role_name: Option<String>,
    ) -> Result<BTreeMap<String, String>>;

    /// Returns diagnostic lines for the resources that failed in the attempt
    /// identified by `client_token`.
    async fn describe_stack_failure(
        &self,
        location: &StackLocation,
        client_token: &str,
    ) -> Result<Vec<String>>;
}
