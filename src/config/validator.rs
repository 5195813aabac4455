//! Validation for settings and templates.
//!
//! Validation runs before any binding is computed. Every problem found is
//! collected; the first error is returned as a `ConfigError` and the full
//! list is available to callers that want to print it.

use crate::error::{ConfigError, OrgFormError, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::settings::{Settings, StateBackend};
use super::template::{OrganizationModel, OrganizationResource, Reference, ResourceType, Template};

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

/// Validator for settings and templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates the settings file.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_settings(&self, settings: &Settings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::check_settings(settings, &mut result);

        result.into_result("Settings")
    }

    /// Validates an organization template.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_organization(&self, template: &Template) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::check_organization(template, &mut result);

        result.into_result("Organization template")
    }

    /// Validates a stack template against the organization it deploys into.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_stack_template(
        &self,
        stack_name: &str,
        template: &Template,
        organization: &OrganizationModel,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::check_stack_template(stack_name, template, organization, &mut result);

        result.into_result("Stack template")
    }

    fn check_settings(settings: &Settings, result: &mut ValidationResult) {
        if settings.organization.template.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("organization.template"),
                message: String::from("Organization template path cannot be empty"),
            });
        }

        if settings.organization.max_concurrent_tasks == 0 {
            result.errors.push(ValidationError {
                field: String::from("organization.max_concurrent_tasks"),
                message: String::from("Concurrency must be at least 1"),
            });
        }

        if settings.organization.close_accounts {
            result.warnings.push(String::from(
                "organization.close_accounts: Accounts removed from the template will be closed",
            ));
        }

        if settings.state.backend == StateBackend::S3
            && settings.state.bucket.as_ref().is_none_or(String::is_empty)
        {
            result.errors.push(ValidationError {
                field: String::from("state.bucket"),
                message: String::from("S3 bucket name is required when using S3 backend"),
            });
        }

        let mut seen_names = HashSet::new();
        for (i, stack) in settings.stacks.iter().enumerate() {
            let prefix = format!("stacks[{i}]");

            if !seen_names.insert(stack.stack_name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.stack_name"),
                    message: format!("Duplicate stack name: {}", stack.stack_name),
                });
            }

            if !is_valid_stack_name(&stack.stack_name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.stack_name"),
                    message: format!(
                        "Stack name '{}' is invalid. Must start with a letter and contain only alphanumerics and hyphens.",
                        stack.stack_name
                    ),
                });
            }

            if stack.template.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.template"),
                    message: String::from("Stack template path cannot be empty"),
                });
            }

            if stack.max_concurrent_stacks == 0 {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.max_concurrent_stacks"),
                    message: String::from("Concurrency must be at least 1"),
                });
            }
        }
    }

    fn check_organization(template: &Template, result: &mut ValidationResult) {
        let mut masters = Vec::new();
        let mut roots = Vec::new();

        for (logical_id, resource) in &template.organization {
            match resource {
                OrganizationResource::MasterAccount(props) => {
                    masters.push(logical_id.as_str());
                    check_account(logical_id, props, true, result);
                }
                OrganizationResource::Account(props) => {
                    check_account(logical_id, props, false, result);
                }
                OrganizationResource::OrganizationRoot(_) => roots.push(logical_id.as_str()),
                OrganizationResource::OrganizationalUnit(props) => {
                    if props.organizational_unit_name.is_empty() {
                        result.errors.push(ValidationError {
                            field: format!("Organization.{logical_id}.OrganizationalUnitName"),
                            message: String::from("Organizational unit name cannot be empty"),
                        });
                    }
                    if props
                        .organizational_units
                        .iter()
                        .any(|r| r.logical_id() == logical_id)
                    {
                        result.errors.push(ValidationError {
                            field: format!("Organization.{logical_id}.OrganizationalUnits"),
                            message: format!(
                                "Organizational unit '{logical_id}' cannot contain itself"
                            ),
                        });
                    }
                }
                OrganizationResource::ServiceControlPolicy(props) => {
                    if props.policy_name.is_empty() {
                        result.errors.push(ValidationError {
                            field: format!("Organization.{logical_id}.PolicyName"),
                            message: String::from("Policy name cannot be empty"),
                        });
                    }
                    if props.policy_document.is_null() {
                        result.errors.push(ValidationError {
                            field: format!("Organization.{logical_id}.PolicyDocument"),
                            message: String::from("Policy document is required"),
                        });
                    }
                }
            }
        }

        match masters.len() {
            0 => result.errors.push(ValidationError {
                field: String::from("Organization"),
                message: String::from("Exactly one OC::ORG::MasterAccount must be declared"),
            }),
            1 => {}
            _ => result.errors.push(ValidationError {
                field: String::from("Organization"),
                message: format!(
                    "Only one OC::ORG::MasterAccount may be declared, found: {}",
                    masters.join(", ")
                ),
            }),
        }

        if roots.len() > 1 {
            result.errors.push(ValidationError {
                field: String::from("Organization"),
                message: format!(
                    "Only one OC::ORG::OrganizationRoot may be declared, found: {}",
                    roots.join(", ")
                ),
            });
        }

        Self::check_references(template, result);
        Self::check_parents(template, result);
    }

    fn check_references(template: &Template, result: &mut ValidationResult) {
        let model = OrganizationModel::from_template(template);
        let expect = |field: String,
                      refs: &[Reference],
                      allowed: &[ResourceType],
                      result: &mut ValidationResult| {
            for reference in refs {
                match model.resource_type_of(reference.logical_id()) {
                    Some(found) if allowed.contains(&found) => {}
                    Some(found) => result.errors.push(ValidationError {
                        field: field.clone(),
                        message: format!(
                            "'{}' is a {found}, expected {}",
                            reference.logical_id(),
                            allowed
                                .iter()
                                .map(|t| t.as_str())
                                .collect::<Vec<_>>()
                                .join(" or ")
                        ),
                    }),
                    None => result.errors.push(ValidationError {
                        field: field.clone(),
                        message: format!("Unknown resource '{}'", reference.logical_id()),
                    }),
                }
            }
        };

        let policy = [ResourceType::ServiceControlPolicy];
        let account = [ResourceType::Account, ResourceType::MasterAccount];
        let unit = [ResourceType::OrganizationalUnit];

        for (logical_id, resource) in &template.organization {
            let field = |name: &str| format!("Organization.{logical_id}.{name}");
            match resource {
                OrganizationResource::OrganizationRoot(props) => {
                    expect(
                        field("ServiceControlPolicies"),
                        &props.service_control_policies,
                        &policy,
                        result,
                    );
                }
                OrganizationResource::MasterAccount(props)
                | OrganizationResource::Account(props) => {
                    expect(
                        field("ServiceControlPolicies"),
                        &props.service_control_policies,
                        &policy,
                        result,
                    );
                }
                OrganizationResource::OrganizationalUnit(props) => {
                    expect(field("Accounts"), &props.accounts, &account, result);
                    expect(
                        field("OrganizationalUnits"),
                        &props.organizational_units,
                        &unit,
                        result,
                    );
                    expect(
                        field("ServiceControlPolicies"),
                        &props.service_control_policies,
                        &policy,
                        result,
                    );
                }
                OrganizationResource::ServiceControlPolicy(_) => {}
            }
        }
    }

    fn check_parents(template: &Template, result: &mut ValidationResult) {
        let mut parents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (logical_id, resource) in &template.organization {
            if let OrganizationResource::OrganizationalUnit(props) = resource {
                for child in props.accounts.iter().chain(&props.organizational_units) {
                    parents
                        .entry(child.logical_id())
                        .or_default()
                        .push(logical_id.as_str());
                }
            }
        }

        for (child, units) in parents {
            if units.len() > 1 {
                result.errors.push(ValidationError {
                    field: format!("Organization.{child}"),
                    message: format!(
                        "'{child}' is listed by more than one organizational unit: {}",
                        units.join(", ")
                    ),
                });
            }
        }
    }

    fn check_stack_template(
        stack_name: &str,
        template: &Template,
        organization: &OrganizationModel,
        result: &mut ValidationResult,
    ) {
        if template.resources.is_empty() {
            result
                .warnings
                .push(format!("{stack_name}: Template declares no resources"));
        }

        if !template.organization.is_empty() {
            result.warnings.push(format!(
                "{stack_name}: Organization section is ignored in stack templates"
            ));
        }

        for (logical_id, resource) in &template.resources {
            let field = format!("{stack_name}.Resources.{logical_id}");

            if resource.resource_type.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{field}.Type"),
                    message: String::from("Resource type cannot be empty"),
                });
            }

            if let Some(condition) = &resource.condition {
                if !template.conditions.contains_key(condition) {
                    result.errors.push(ValidationError {
                        field: format!("{field}.Condition"),
                        message: format!("Unknown condition '{condition}'"),
                    });
                }
            }

            let binding = resource
                .organization_binding
                .as_ref()
                .or(template.default_organization_binding.as_ref());

            let Some(binding) = binding else {
                result.warnings.push(format!(
                    "{field}: No OrganizationBinding, resource is not deployed"
                ));
                continue;
            };

            if binding.regions.is_empty() && !binding.selects_nothing() {
                result.errors.push(ValidationError {
                    field: format!("{field}.OrganizationBinding.Regions"),
                    message: String::from("At least one region is required"),
                });
            }

            for account in binding.accounts.iter().chain(&binding.exclude_accounts) {
                if account.logical_id() != "*" && organization.account(account.logical_id()).is_none()
                {
                    result.errors.push(ValidationError {
                        field: format!("{field}.OrganizationBinding"),
                        message: format!("Unknown account '{}'", account.logical_id()),
                    });
                }
            }

            for unit in &binding.organizational_units {
                if !organization
                    .organizational_units
                    .contains_key(unit.logical_id())
                {
                    result.errors.push(ValidationError {
                        field: format!("{field}.OrganizationBinding.OrganizationalUnits"),
                        message: format!("Unknown organizational unit '{}'", unit.logical_id()),
                    });
                }
            }
        }
    }
}

fn check_account(
    logical_id: &str,
    props: &super::template::AccountProperties,
    is_master: bool,
    result: &mut ValidationResult,
) {
    if props.account_name.is_empty() {
        result.errors.push(ValidationError {
            field: format!("Organization.{logical_id}.AccountName"),
            message: String::from("Account name cannot be empty"),
        });
    }

    match props.account_id.as_deref() {
        Some(id) if !is_valid_account_id(id) => result.errors.push(ValidationError {
            field: format!("Organization.{logical_id}.AccountId"),
            message: format!("Account id '{id}' must be 12 digits"),
        }),
        None if is_master => result.errors.push(ValidationError {
            field: format!("Organization.{logical_id}.AccountId"),
            message: String::from("The master account must declare its AccountId"),
        }),
        None if props.root_email.is_none() => result.errors.push(ValidationError {
            field: format!("Organization.{logical_id}.RootEmail"),
            message: String::from("A new account requires RootEmail"),
        }),
        _ => {}
    }
}

/// Returns true if the value is a 12-digit account id.
#[must_use]
pub fn is_valid_account_id(id: &str) -> bool {
    id.len() == 12 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Validates a stack name. Placeholders (`${...}`) are accepted anywhere.
fn is_valid_stack_name(name: &str) -> bool {
    let mut literal = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                literal.push('x');
                rest = &rest[start + end + 1..];
            }
            None => return false,
        }
    }
    literal.push_str(rest);

    let mut chars = literal.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn into_result(self, what: &str) -> Result<Self> {
        match self.errors.first() {
            None => {
                debug!("{what} validation passed");
                Ok(self)
            }
            Some(first) => Err(OrgFormError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            })),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn template(yaml: &str) -> Template {
        ConfigParser::parse_template(yaml, None).expect("template should parse")
    }

    const ORG: &str = r#"
Organization:
  Master:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountName: management
      AccountId: "111111111111"
  Dev:
    Type: OC::ORG::Account
    Properties:
      AccountName: dev
      RootEmail: dev@example.com
      ServiceControlPolicies: DenyAll
  Workloads:
    Type: OC::ORG::OrganizationalUnit
    Properties:
      OrganizationalUnitName: workloads
      Accounts: Dev
  DenyAll:
    Type: OC::ORG::ServiceControlPolicy
    Properties:
      PolicyName: deny-all
      PolicyDocument: {}
"#;

    #[test]
    fn test_valid_organization() {
        let result = ConfigValidator::new()
            .validate_organization(&template(ORG))
            .expect("should validate");
        assert!(result.is_valid());
    }

    #[test]
    fn test_missing_master() {
        let result = ConfigValidator::new().validate_organization(&template(
            "Organization:\n  Root:\n    Type: OC::ORG::OrganizationRoot\n",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_reference_type() {
        let yaml = ORG.replace("ServiceControlPolicies: DenyAll", "ServiceControlPolicies: Dev");
        let mut result = ValidationResult::default();
        ConfigValidator::check_organization(&template(&yaml), &mut result);

        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("expected OC::ORG::ServiceControlPolicy"));
    }

    #[test]
    fn test_account_with_two_parents() {
        let yaml = format!(
            "{ORG}  Other:\n    Type: OC::ORG::OrganizationalUnit\n    Properties:\n      OrganizationalUnitName: other\n      Accounts: Dev\n"
        );
        let mut result = ValidationResult::default();
        ConfigValidator::check_organization(&template(&yaml), &mut result);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("more than one organizational unit")));
    }

    #[test]
    fn test_stack_template_unknown_account() {
        let model = OrganizationModel::from_template(&template(ORG));
        let stack = template(
            r"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: Missing
      Regions: eu-west-1
",
        );

        let result = ConfigValidator::new().validate_stack_template("baseline", &stack, &model);
        assert!(result.is_err());
    }

    #[test]
    fn test_valid_account_id() {
        assert!(is_valid_account_id("123456789012"));
        assert!(!is_valid_account_id("12345678901"));
        assert!(!is_valid_account_id("12345678901a"));
    }

    #[test]
    fn test_stack_names() {
        assert!(is_valid_stack_name("baseline"));
        assert!(is_valid_stack_name("baseline-${CurrentRegion}"));
        assert!(is_valid_stack_name("${CurrentAccount.LogicalId}-roles"));
        assert!(!is_valid_stack_name("base_line"));
        assert!(!is_valid_stack_name("1baseline"));
        assert!(!is_valid_stack_name("baseline-${Unclosed"));
    }
}
