//! Classifies every organization resource against stored bindings.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{
    ConfigParser, ContentHasher, OrganizationModel, OrganizationResource, ResourceType,
};
use crate::error::{ConfigError, Result};
use crate::planner::{BindingAction, DesiredResource, DiffEngine};
use crate::state::{Binding, PersistedState};

/// A classified organization resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceBinding {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Logical id.
    pub logical_id: String,
    /// Required action.
    pub action: BindingAction,
    /// Hash of the desired definition, absent for deletes.
    pub hash: Option<String>,
    /// Hash committed by the last run, absent for creates.
    pub previous_hash: Option<String>,
    /// Bound physical id, if any.
    pub physical_id: Option<String>,
    /// Desired definition, absent for deletes.
    #[serde(skip)]
    pub definition: Option<OrganizationResource>,
}

struct Desired<'a> {
    logical_id: &'a str,
    hash: String,
    definition: &'a OrganizationResource,
}

impl DesiredResource for Desired<'_> {
    fn logical_id(&self) -> &str {
        self.logical_id
    }

    fn content_hash(&self) -> &str {
        &self.hash
    }
}

/// Applies the diff engine to the organization section of a template.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrganizationBinder {
    hasher: ContentHasher,
    diff: DiffEngine,
}

impl OrganizationBinder {
    /// Creates a binder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ContentHasher::new(),
            diff: DiffEngine::new(),
        }
    }

    /// Classifies the root, master account, accounts, units and policies.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationMismatch` when state and template disagree on the
    /// master account, or a serialization error if a definition cannot be
    /// hashed.
    pub fn enum_bindings(
        &self,
        model: &OrganizationModel,
        state: &PersistedState,
    ) -> Result<Vec<ResourceBinding>> {
        if let (Some(state_master), Some(template_master)) =
            (state.master_account_id.as_deref(), model.master_account_id())
        {
            if state_master != template_master {
                return Err(ConfigError::OrganizationMismatch {
                    state_master: state_master.to_string(),
                    template_master: template_master.to_string(),
                }
                .into());
            }
        }

        let mut bindings = Vec::new();
        for resource_type in ResourceType::ALL {
            let desired = self.desired_of(model, resource_type)?;
            let stored: Vec<&Binding> = state.bindings_of(resource_type).collect();

            if resource_type.is_unique() && desired.len() == 1 && stored.len() == 1 {
                bindings.extend(self.bind_unique(&desired[0], stored[0]));
                continue;
            }

            for diff in self.diff.enumerate(&desired, stored.iter().copied()) {
                let definition = desired
                    .iter()
                    .find(|d| d.logical_id == diff.logical_id)
                    .map(|d| d.definition.clone());
                let physical_id = state
                    .physical_id(resource_type, &diff.logical_id)
                    .map(str::to_string);

                bindings.push(ResourceBinding {
                    resource_type,
                    logical_id: diff.logical_id,
                    action: diff.action,
                    hash: diff.hash,
                    previous_hash: diff.previous_hash,
                    physical_id,
                    definition,
                });
            }
        }

        debug!("Classified {} organization bindings", bindings.len());
        Ok(bindings)
    }

    /// Unique types match by type, whatever their logical id.
    ///
    /// A renamed logical id is an update even when the content is equal, so
    /// the commit rebinds it.
    fn bind_unique(&self, desired: &Desired<'_>, stored: &Binding) -> Option<ResourceBinding> {
        let diff = self.diff.diff(Some(desired), Some(stored))?;
        let action = match diff.action {
            BindingAction::None if stored.logical_id != desired.logical_id => {
                debug!(
                    "{} renamed from {} to {}",
                    stored.resource_type, stored.logical_id, desired.logical_id
                );
                BindingAction::Update
            }
            action => action,
        };
        Some(ResourceBinding {
            resource_type: stored.resource_type,
            logical_id: desired.logical_id.to_string(),
            action,
            hash: diff.hash,
            previous_hash: diff.previous_hash,
            physical_id: Some(stored.physical_id.clone()),
            definition: Some(desired.definition.clone()),
        })
    }

    fn desired_of<'a>(
        &self,
        model: &'a OrganizationModel,
        resource_type: ResourceType,
    ) -> Result<Vec<Desired<'a>>> {
        model
            .resources()
            .filter(|(_, resource)| resource.resource_type() == resource_type)
            .map(|(logical_id, definition)| {
                Ok(Desired {
                    logical_id,
                    hash: self.hasher.hash_serializable(definition)?,
                    definition,
                })
            })
            .collect()
    }
}

/// Reloads the previously committed organization from state.
///
/// A missing or unparsable template yields an empty model.
#[must_use]
pub fn load_previous_model(state: &PersistedState) -> OrganizationModel {
    let Some(text) = state.previous_template.as_deref() else {
        return OrganizationModel::default();
    };

    match ConfigParser::parse_template(text, None) {
        Ok(template) => OrganizationModel::from_template(&template),
        Err(e) => {
            warn!("Ignoring stored organization template: {e}");
            OrganizationModel::default()
        }
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
      AccountName: Management
      AccountId: "111111111111"
  Dev:
    Type: OC::ORG::Account
    Properties:
      AccountName: Dev
      RootEmail: dev@example.com
  DenyAll:
    Type: OC::ORG::ServiceControlPolicy
    Properties:
      PolicyName: deny-all
      PolicyDocument:
        Version: "2012-10-17"
"#;

    fn model() -> OrganizationModel {
        let template = ConfigParser::parse_template(TEMPLATE, None).expect("template");
        OrganizationModel::from_template(&template)
    }

    fn commit_all(state: &mut PersistedState, bindings: &[ResourceBinding]) {
        for b in bindings {
            state.set_binding(Binding::new(
                b.resource_type,
                b.logical_id.clone(),
                format!("id-{}", b.logical_id),
                b.hash.clone().expect("hash"),
            ));
        }
    }

    #[test]
    fn test_fresh_state_creates_everything() {
        let bindings = OrganizationBinder::new()
            .enum_bindings(&model(), &PersistedState::new())
            .expect("bindings");

        assert_eq!(bindings.len(), 3);
        assert!(bindings.iter().all(|b| b.action == BindingAction::Create));
        assert!(bindings.iter().all(|b| b.definition.is_some()));
    }

    #[test]
    fn test_committed_state_is_unchanged() {
        let binder = OrganizationBinder::new();
        let model = model();
        let mut state = PersistedState::new();
        let first = binder.enum_bindings(&model, &state).expect("bindings");
        commit_all(&mut state, &first);

        let second = binder.enum_bindings(&model, &state).expect("bindings");
        assert!(second.iter().all(|b| b.action == BindingAction::None));
        assert_eq!(second[0].physical_id.as_deref(), Some("id-Master"));
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let binder = OrganizationBinder::new();
        let mut state = PersistedState::new();
        let first = binder.enum_bindings(&model(), &state).expect("bindings");
        commit_all(&mut state, &first);
        state.set_binding(Binding::new(ResourceType::Account, "Old", "333333333333", "h"));

        let bindings = binder.enum_bindings(&model(), &state).expect("bindings");
        let old = bindings
            .iter()
            .find(|b| b.logical_id == "Old")
            .expect("old binding");
        assert_eq!(old.action, BindingAction::Delete);
        assert_eq!(old.physical_id.as_deref(), Some("333333333333"));
        assert!(old.definition.is_none());
    }

    #[test]
    fn test_unique_type_matches_by_type() {
        let binder = OrganizationBinder::new();
        let mut state = PersistedState::new();
        let first = binder.enum_bindings(&model(), &state).expect("bindings");
        commit_all(&mut state, &first);

        let renamed = TEMPLATE.replace("  Master:\n", "  Management:\n");
        let template = ConfigParser::parse_template(&renamed, None).expect("template");
        let bindings = binder
            .enum_bindings(&OrganizationModel::from_template(&template), &state)
            .expect("bindings");

        let masters: Vec<_> = bindings
            .iter()
            .filter(|b| b.resource_type == ResourceType::MasterAccount)
            .collect();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].logical_id, "Management");
        assert_eq!(masters[0].action, BindingAction::Update);
        assert_eq!(masters[0].physical_id.as_deref(), Some("id-Master"));
        assert_eq!(
            state.physical_id(ResourceType::MasterAccount, "Management"),
            Some("id-Master")
        );
        assert_eq!(state.physical_id(ResourceType::Account, "Management"), None);
    }

    #[test]
    fn test_master_mismatch_fails() {
        let mut state = PersistedState::new();
        state.set_master_account_id("999999999999");

        let err = OrganizationBinder::new()
            .enum_bindings(&model(), &state)
            .expect_err("mismatch");
        assert!(err.to_string().contains("999999999999"));
    }

    #[test]
    fn test_previous_model_falls_back_to_empty() {
        let mut state = PersistedState::new();
        assert!(load_previous_model(&state).accounts.is_empty());

        state.set_previous_template("Organization: [not, a, map", "h");
        assert_eq!(load_previous_model(&state), OrganizationModel::default());

        state.set_previous_template(TEMPLATE, "h2");
        assert!(load_previous_model(&state).accounts.contains_key("Dev"));
    }
}
