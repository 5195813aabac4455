//! Template types for organizations and deployable stacks.
//!
//! A template has two halves. The `Organization` section declares the root,
//! master account, member accounts, organizational units and service
//! control policies as typed `OC::ORG::*` resources. The `Resources` section
//! declares stack resources that carry an `OrganizationBinding` telling the
//! stack binder which accounts and regions receive them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Organization resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// The organization root.
    #[serde(rename = "OC::ORG::OrganizationRoot")]
    OrganizationRoot,
    /// The management (master) account.
    #[serde(rename = "OC::ORG::MasterAccount")]
    MasterAccount,
    /// A member account.
    #[serde(rename = "OC::ORG::Account")]
    Account,
    /// An organizational unit.
    #[serde(rename = "OC::ORG::OrganizationalUnit")]
    OrganizationalUnit,
    /// A service control policy.
    #[serde(rename = "OC::ORG::ServiceControlPolicy")]
    ServiceControlPolicy,
}

impl ResourceType {
    /// All organization resource types, in binding order.
    pub const ALL: [Self; 5] = [
        Self::OrganizationRoot,
        Self::MasterAccount,
        Self::Account,
        Self::OrganizationalUnit,
        Self::ServiceControlPolicy,
    ];

    /// Returns the template type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrganizationRoot => "OC::ORG::OrganizationRoot",
            Self::MasterAccount => "OC::ORG::MasterAccount",
            Self::Account => "OC::ORG::Account",
            Self::OrganizationalUnit => "OC::ORG::OrganizationalUnit",
            Self::ServiceControlPolicy => "OC::ORG::ServiceControlPolicy",
        }
    }

    /// Parses a template type name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Returns true if at most one binding of this type may exist.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::OrganizationRoot | Self::MasterAccount)
    }

    /// Returns true if the type is an account.
    #[must_use]
    pub const fn is_account(self) -> bool {
        matches!(self, Self::MasterAccount | Self::Account)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reference to another resource by logical id.
///
/// Accepts either a plain string or a `{ Ref: LogicalId }` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct Reference(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceRepr {
    Plain(String),
    Ref {
        #[serde(rename = "Ref")]
        target: String,
    },
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ReferenceRepr::deserialize(deserializer)? {
            ReferenceRepr::Plain(id) | ReferenceRepr::Ref { target: id } => Self(id),
        })
    }
}

impl Reference {
    /// Creates a reference to the given logical id.
    #[must_use]
    pub fn new(logical_id: impl Into<String>) -> Self {
        Self(logical_id.into())
    }

    /// Returns the referenced logical id.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        &self.0
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.0
    }
}

/// Deserializes either a single item or a list of items.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

/// Properties of an account (member or master).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AccountProperties {
    /// Display name of the account.
    pub account_name: String,
    /// Physical account id, when the account already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Root email address used when creating the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_email: Option<String>,
    /// IAM account alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Account tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Service control policies attached to the account.
    #[serde(default, deserialize_with = "one_or_many")]
    pub service_control_policies: Vec<Reference>,
}

/// Properties of an organizational unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct OrganizationalUnitProperties {
    /// Name of the organizational unit.
    pub organizational_unit_name: String,
    /// Accounts placed in this unit.
    #[serde(default, deserialize_with = "one_or_many")]
    pub accounts: Vec<Reference>,
    /// Child organizational units.
    #[serde(default, deserialize_with = "one_or_many")]
    pub organizational_units: Vec<Reference>,
    /// Service control policies attached to the unit.
    #[serde(default, deserialize_with = "one_or_many")]
    pub service_control_policies: Vec<Reference>,
    /// Unit tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Properties of a service control policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceControlPolicyProperties {
    /// Name of the policy.
    pub policy_name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The policy document.
    #[serde(default)]
    pub policy_document: Value,
    /// Policy tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Properties of the organization root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct OrganizationRootProperties {
    /// Service control policies attached to the root.
    #[serde(default, deserialize_with = "one_or_many")]
    pub service_control_policies: Vec<Reference>,
    /// Role assumed in member accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_organization_access_role_name: Option<String>,
}

/// A typed organization resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "Type", content = "Properties")]
pub enum OrganizationResource {
    /// The organization root.
    #[serde(rename = "OC::ORG::OrganizationRoot")]
    OrganizationRoot(OrganizationRootProperties),
    /// The master account.
    #[serde(rename = "OC::ORG::MasterAccount")]
    MasterAccount(AccountProperties),
    /// A member account.
    #[serde(rename = "OC::ORG::Account")]
    Account(AccountProperties),
    /// An organizational unit.
    #[serde(rename = "OC::ORG::OrganizationalUnit")]
    OrganizationalUnit(OrganizationalUnitProperties),
    /// A service control policy.
    #[serde(rename = "OC::ORG::ServiceControlPolicy")]
    ServiceControlPolicy(ServiceControlPolicyProperties),
}

impl OrganizationResource {
    /// Returns the resource type.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        match self {
            Self::OrganizationRoot(_) => ResourceType::OrganizationRoot,
            Self::MasterAccount(_) => ResourceType::MasterAccount,
            Self::Account(_) => ResourceType::Account,
            Self::OrganizationalUnit(_) => ResourceType::OrganizationalUnit,
            Self::ServiceControlPolicy(_) => ResourceType::ServiceControlPolicy,
        }
    }
}

/// Declares which accounts and regions receive a stack resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct OrganizationBinding {
    /// Accounts, by reference. `"*"` selects every member account.
    #[serde(default, deserialize_with = "one_or_many")]
    pub accounts: Vec<Reference>,
    /// Organizational units whose accounts (recursively) are selected.
    #[serde(default, deserialize_with = "one_or_many")]
    pub organizational_units: Vec<Reference>,
    /// Selects accounts carrying this tag key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts_with_tag: Option<String>,
    /// Accounts removed from the selection.
    #[serde(default, deserialize_with = "one_or_many")]
    pub exclude_accounts: Vec<Reference>,
    /// Adds the master account to the selection.
    #[serde(default)]
    pub include_master_account: bool,
    /// Regions the resource is deployed to.
    #[serde(default, deserialize_with = "one_or_many")]
    pub regions: Vec<String>,
}

impl OrganizationBinding {
    /// Returns true if the binding selects no account at all.
    #[must_use]
    pub fn selects_nothing(&self) -> bool {
        self.accounts.is_empty()
            && self.organizational_units.is_empty()
            && self.accounts_with_tag.is_none()
            && !self.include_master_account
    }
}

/// A deployable stack resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackResource {
    /// Provider resource type (e.g. `AWS::S3::Bucket`).
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    /// Name of the condition gating this resource.
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Explicit dependencies within the same stack.
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Value>,
    /// Where this resource is deployed.
    #[serde(
        rename = "OrganizationBinding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub organization_binding: Option<OrganizationBinding>,
}

/// A full template document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Template {
    /// Template format version.
    #[serde(
        rename = "AWSTemplateFormatVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub format_version: Option<String>,
    /// Template description.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Organization resources, by logical id.
    #[serde(rename = "Organization", default)]
    pub organization: BTreeMap<String, OrganizationResource>,
    /// Binding used by resources that do not declare their own.
    #[serde(
        rename = "DefaultOrganizationBinding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_organization_binding: Option<OrganizationBinding>,
    /// Template parameters.
    #[serde(rename = "Parameters", default)]
    pub parameters: BTreeMap<String, Value>,
    /// Template conditions.
    #[serde(rename = "Conditions", default)]
    pub conditions: BTreeMap<String, Value>,
    /// Stack resources, by logical id.
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, StackResource>,
    /// Template outputs.
    #[serde(rename = "Outputs", default)]
    pub outputs: BTreeMap<String, Value>,
}

/// Typed view over the `Organization` section of a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationModel {
    /// Root, with its logical id.
    pub root: Option<(String, OrganizationRootProperties)>,
    /// Master account, with its logical id.
    pub master_account: Option<(String, AccountProperties)>,
    /// Member accounts.
    pub accounts: BTreeMap<String, AccountProperties>,
    /// Organizational units.
    pub organizational_units: BTreeMap<String, OrganizationalUnitProperties>,
    /// Service control policies.
    pub policies: BTreeMap<String, ServiceControlPolicyProperties>,
    resources: BTreeMap<String, OrganizationResource>,
}

impl OrganizationModel {
    /// Builds the model from a template's organization section.
    ///
    /// When several masters or roots are declared the last one wins; the
    /// validator reports the duplicates.
    #[must_use]
    pub fn from_template(template: &Template) -> Self {
        let mut model = Self {
            resources: template.organization.clone(),
            ..Self::default()
        };

        for (logical_id, resource) in &template.organization {
            match resource {
                OrganizationResource::OrganizationRoot(props) => {
                    model.root = Some((logical_id.clone(), props.clone()));
                }
                OrganizationResource::MasterAccount(props) => {
                    model.master_account = Some((logical_id.clone(), props.clone()));
                }
                OrganizationResource::Account(props) => {
                    model.accounts.insert(logical_id.clone(), props.clone());
                }
                OrganizationResource::OrganizationalUnit(props) => {
                    model
                        .organizational_units
                        .insert(logical_id.clone(), props.clone());
                }
                OrganizationResource::ServiceControlPolicy(props) => {
                    model.policies.insert(logical_id.clone(), props.clone());
                }
            }
        }

        model
    }

    /// Returns a resource definition by logical id.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&OrganizationResource> {
        self.resources.get(logical_id)
    }

    /// Iterates over every resource definition.
    pub fn resources(&self) -> impl Iterator<Item = (&String, &OrganizationResource)> {
        self.resources.iter()
    }

    /// Returns the type of the resource with the given logical id.
    #[must_use]
    pub fn resource_type_of(&self, logical_id: &str) -> Option<ResourceType> {
        self.resources
            .get(logical_id)
            .map(OrganizationResource::resource_type)
    }

    /// Returns the master account's logical id.
    #[must_use]
    pub fn master_logical_id(&self) -> Option<&str> {
        self.master_account.as_ref().map(|(id, _)| id.as_str())
    }

    /// Returns the master account's physical id as declared in the template.
    #[must_use]
    pub fn master_account_id(&self) -> Option<&str> {
        self.master_account
            .as_ref()
            .and_then(|(_, props)| props.account_id.as_deref())
    }

    /// Returns the properties of any account (member or master).
    #[must_use]
    pub fn account(&self, logical_id: &str) -> Option<&AccountProperties> {
        match &self.master_account {
            Some((id, props)) if id == logical_id => Some(props),
            _ => self.accounts.get(logical_id),
        }
    }

    /// Returns every account logical id, including the master.
    #[must_use]
    pub fn all_account_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.accounts.keys().cloned().collect();
        if let Some(master) = self.master_logical_id() {
            ids.insert(master.to_string());
        }
        ids
    }

    /// Returns the accounts of an organizational unit, including nested units.
    #[must_use]
    pub fn accounts_in_unit(&self, logical_id: &str) -> BTreeSet<String> {
        let mut accounts = BTreeSet::new();
        let mut visited = BTreeSet::new();
        self.collect_unit_accounts(logical_id, &mut accounts, &mut visited);
        accounts
    }

    fn collect_unit_accounts(
        &self,
        logical_id: &str,
        accounts: &mut BTreeSet<String>,
        visited: &mut BTreeSet<String>,
    ) {
        if !visited.insert(logical_id.to_string()) {
            return;
        }
        let Some(unit) = self.organizational_units.get(logical_id) else {
            return;
        };
        accounts.extend(unit.accounts.iter().map(|r| r.logical_id().to_string()));
        for child in &unit.organizational_units {
            self.collect_unit_accounts(child.logical_id(), accounts, visited);
        }
    }

    /// Returns the parent unit of an account or unit, if any.
    #[must_use]
    pub fn parent_unit_of(&self, logical_id: &str) -> Option<&str> {
        self.organizational_units
            .iter()
            .find(|(_, unit)| {
                unit.accounts.iter().any(|r| r.logical_id() == logical_id)
                    || unit
                        .organizational_units
                        .iter()
                        .any(|r| r.logical_id() == logical_id)
            })
            .map(|(id, _)| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
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
      Accounts:
        - Ref: Dev
      OrganizationalUnits: [Nested]
  Nested:
    Type: OC::ORG::OrganizationalUnit
    Properties:
      OrganizationalUnitName: nested
      Accounts: Prod
  Prod:
    Type: OC::ORG::Account
    Properties:
      AccountName: prod
  DenyAll:
    Type: OC::ORG::ServiceControlPolicy
    Properties:
      PolicyName: deny-all
      PolicyDocument:
        Version: "2012-10-17"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: "*"
      Regions: eu-west-1
"#;

    fn parse() -> Template {
        serde_yaml::from_str(TEMPLATE).expect("template should parse")
    }

    #[test]
    fn test_parse_organization_resources() {
        let template = parse();
        let model = OrganizationModel::from_template(&template);

        assert_eq!(model.master_logical_id(), Some("Master"));
        assert_eq!(model.master_account_id(), Some("111111111111"));
        assert_eq!(model.accounts.len(), 2);
        assert_eq!(model.organizational_units.len(), 2);
        assert_eq!(model.policies.len(), 1);
        assert_eq!(
            model.accounts["Dev"].service_control_policies,
            vec![Reference::new("DenyAll")]
        );
    }

    #[test]
    fn test_reference_forms() {
        let model = OrganizationModel::from_template(&parse());
        let unit = &model.organizational_units["Workloads"];

        assert_eq!(unit.accounts, vec![Reference::new("Dev")]);
        assert_eq!(unit.organizational_units, vec![Reference::new("Nested")]);
    }

    #[test]
    fn test_accounts_in_unit_recurses() {
        let model = OrganizationModel::from_template(&parse());
        let accounts = model.accounts_in_unit("Workloads");

        assert!(accounts.contains("Dev"));
        assert!(accounts.contains("Prod"));
        assert_eq!(model.parent_unit_of("Prod"), Some("Nested"));
        assert_eq!(model.parent_unit_of("Nested"), Some("Workloads"));
    }

    #[test]
    fn test_binding_one_or_many() {
        let template = parse();
        let binding = template.resources["Bucket"]
            .organization_binding
            .as_ref()
            .expect("binding present");

        assert_eq!(binding.accounts, vec![Reference::new("*")]);
        assert_eq!(binding.regions, vec![String::from("eu-west-1")]);
    }

    #[test]
    fn test_resource_type_names() {
        for resource_type in ResourceType::ALL {
            assert_eq!(ResourceType::parse(resource_type.as_str()), Some(resource_type));
        }
        assert!(ResourceType::MasterAccount.is_unique());
        assert!(!ResourceType::Account.is_unique());
    }
}
