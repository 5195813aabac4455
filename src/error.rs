//! Error types for the orgform reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration and template loading, state persistence, provider calls,
//! task scheduling, and the reconciliation itself.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the orgform engine.
#[derive(Debug, Error)]
pub enum OrgFormError {
    /// Configuration and template errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Cloud provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Task scheduling errors.
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and template errors.
///
/// All of these are fatal and are raised before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration or template could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A required field is missing from a template resource.
    #[error("Resource '{resource}' is missing required field '{field}'")]
    MissingField {
        /// Logical id of the resource.
        resource: String,
        /// Name of the missing field.
        field: String,
    },

    /// A logical id could not be resolved to a physical id.
    #[error("Unable to resolve {resource_type} '{logical_id}' to a physical id")]
    UnresolvedLogicalId {
        /// Resource type of the unresolved id.
        resource_type: String,
        /// The logical id.
        logical_id: String,
    },

    /// A stack resource references a resource that is bound nowhere.
    #[error("Resource '{resource}' references '{target}', which is not deployed to any target")]
    UnresolvedReference {
        /// Referencing resource.
        resource: String,
        /// Referenced logical id.
        target: String,
    },

    /// A cross-target reference is ambiguous.
    #[error(
        "Resource '{resource}' references '{target}', which is deployed to multiple targets: {targets}"
    )]
    MultipleTargets {
        /// Referencing resource.
        resource: String,
        /// Referenced logical id.
        target: String,
        /// Targets the referenced resource is deployed to.
        targets: String,
    },

    /// State and template describe different organizations.
    #[error(
        "State belongs to master account {state_master}, but the template declares master account {template_master}"
    )]
    OrganizationMismatch {
        /// Master account id recorded in state.
        state_master: String,
        /// Master account id declared by the template.
        template_master: String,
    },

    /// An expression could not be resolved by the template renderer.
    #[error("Unable to resolve expression '{expression}': {message}")]
    Resolution {
        /// The offending expression.
        expression: String,
        /// Description of the failure.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Filesystem {
        /// Description of the filesystem error.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Cloud provider errors, classified where the provider allows it.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The resource already exists (or the relationship is already in place).
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Resource description.
        resource: String,
    },

    /// The resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource description.
        resource: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("Access denied on {resource}: {message}")]
    AccessDenied {
        /// Resource description.
        resource: String,
        /// Provider message.
        message: String,
    },

    /// The resource is stuck in a state that requires delete-then-create.
    #[error("{resource} is in state {status} and must be replaced")]
    NeedsReplacement {
        /// Resource description.
        resource: String,
        /// Provider status that triggered the classification.
        status: String,
    },

    /// The provider throttled the request.
    #[error("Request throttled, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// A polled operation did not complete within its attempt budget.
    #[error("Timed out waiting for {resource} after {attempts} attempts")]
    Timeout {
        /// Resource description.
        resource: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Any other provider failure.
    #[error("{message}")]
    Other {
        /// Provider message.
        message: String,
    },
}

/// Task scheduling errors. All of them abort the runner invocation.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// A task's dependency predicate matches the task itself.
    #[error("Task {task} depends on itself")]
    SelfDependency {
        /// Identity of the offending task.
        task: String,
    },

    /// No task could be scheduled although tasks remain.
    #[error("Circular dependency between tasks: {}", .tasks.join(", "))]
    CircularDependency {
        /// Identities of the stuck tasks.
        tasks: Vec<String>,
    },

    /// More tasks failed than the configured tolerance allows.
    #[error(
        "{failed} task(s) failed, exceeding tolerance of {tolerance}: {}",
        .tasks.join(", ")
    )]
    ToleranceExceeded {
        /// Number of failed tasks.
        failed: usize,
        /// Configured tolerance.
        tolerance: usize,
        /// Identities of the failed tasks.
        tasks: Vec<String>,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {resource_type} '{name}': {reason}")]
    ResourceReconcileFailed {
        /// Type of resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for orgform operations.
pub type Result<T> = std::result::Result<T, OrgFormError>;

impl OrgFormError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Throttled { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::Throttled { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true if the provider reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }

    /// Returns true if the provider reported the resource as already present.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::AlreadyExists { .. }))
    }

    /// Returns true if the provider requires the resource to be replaced.
    #[must_use]
    pub const fn needs_replacement(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NeedsReplacement { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an unresolved logical id error.
    #[must_use]
    pub fn unresolved(resource_type: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self::UnresolvedLogicalId {
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local filesystem error with the given message.
    #[must_use]
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Creates an unclassified provider error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}
