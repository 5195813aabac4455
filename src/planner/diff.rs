//! Binding diff engine.
//!
//! Compares one desired resource against one stored binding by content hash.
//! The engine is pure: it never touches state or the provider.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::state::Binding;

/// Action required to bring a stored binding in line with the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingAction {
    /// Nothing stored yet.
    Create,
    /// Stored hash differs from the desired hash.
    Update,
    /// Stored, but no longer desired.
    Delete,
    /// Stored hash equals the desired hash.
    None,
}

impl BindingAction {
    /// Returns true if the action requires work.
    #[must_use]
    pub const fn requires_work(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for BindingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::None => "none",
        };
        write!(f, "{action}")
    }
}

/// A desired resource with a logical id and a content hash.
pub trait DesiredResource {
    /// Logical id.
    fn logical_id(&self) -> &str;

    /// Content hash of the canonical definition.
    fn content_hash(&self) -> &str;
}

/// A stored record with a logical id and the last committed hash.
pub trait StoredRecord {
    /// Logical id.
    fn logical_id(&self) -> &str;

    /// Hash committed by the last successful run.
    fn committed_hash(&self) -> &str;
}

impl StoredRecord for Binding {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn committed_hash(&self) -> &str {
        &self.last_committed_hash
    }
}

/// Result of diffing one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingDiff {
    /// Logical id.
    pub logical_id: String,
    /// Required action.
    pub action: BindingAction,
    /// Hash of the desired definition, absent for deletes.
    pub hash: Option<String>,
    /// Hash stored in state, absent for creates.
    pub previous_hash: Option<String>,
}

/// Engine for computing binding diffs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classifies a pair of hashes.
    ///
    /// Returns `None` when neither side exists.
    #[must_use]
    pub fn action(desired_hash: Option<&str>, stored_hash: Option<&str>) -> Option<BindingAction> {
        match (desired_hash, stored_hash) {
            (None, None) => None,
            (None, Some(_)) => Some(BindingAction::Delete),
            (Some(_), None) => Some(BindingAction::Create),
            (Some(desired), Some(stored)) if desired == stored => Some(BindingAction::None),
            (Some(_), Some(_)) => Some(BindingAction::Update),
        }
    }

    /// Diffs one desired resource against one stored record.
    #[must_use]
    pub fn diff<D, S>(&self, desired: Option<&D>, stored: Option<&S>) -> Option<BindingDiff>
    where
        D: DesiredResource + ?Sized,
        S: StoredRecord + ?Sized,
    {
        let hash = desired.map(DesiredResource::content_hash);
        let previous_hash = stored.map(StoredRecord::committed_hash);
        let action = Self::action(hash, previous_hash)?;
        let logical_id = desired
            .map(DesiredResource::logical_id)
            .or_else(|| stored.map(StoredRecord::logical_id))?;

        debug!("{logical_id}: {action}");

        Some(BindingDiff {
            logical_id: logical_id.to_string(),
            action,
            hash: hash.map(str::to_string),
            previous_hash: previous_hash.map(str::to_string),
        })
    }

    /// Diffs a desired set against a stored set.
    ///
    /// Yields one diff per desired resource, then one `Delete` per stored
    /// record whose logical id is absent from the desired set.
    pub fn enumerate<'a, D, S>(
        &self,
        desired: impl IntoIterator<Item = &'a D>,
        stored: impl IntoIterator<Item = &'a S>,
    ) -> Vec<BindingDiff>
    where
        D: DesiredResource + 'a,
        S: StoredRecord + 'a,
    {
        let stored: Vec<&S> = stored.into_iter().collect();
        let mut seen = BTreeSet::new();
        let mut diffs = Vec::new();

        for resource in desired {
            seen.insert(resource.logical_id().to_string());
            let record = stored
                .iter()
                .copied()
                .find(|s| s.logical_id() == resource.logical_id());
            diffs.extend(self.diff(Some(resource), record));
        }

        for record in stored {
            if !seen.contains(record.logical_id()) {
                diffs.extend(self.diff(None::<&D>, Some(record)));
            }
        }

        diffs
    }
}

/// Counts of diff actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    /// Resources to create.
    pub creates: usize,
    /// Resources to update.
    pub updates: usize,
    /// Resources to delete.
    pub deletes: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

impl DiffSummary {
    /// Adds one action to the summary.
    pub const fn record(&mut self, action: BindingAction) {
        match action {
            BindingAction::Create => self.creates += 1,
            BindingAction::Update => self.updates += 1,
            BindingAction::Delete => self.deletes += 1,
            BindingAction::None => self.unchanged += 1,
        }
    }

    /// Returns true if any change is pending.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates + self.updates + self.deletes > 0
    }
}

impl FromIterator<BindingAction> for DiffSummary {
    fn from_iter<I: IntoIterator<Item = BindingAction>>(iter: I) -> Self {
        let mut summary = Self::default();
        for action in iter {
            summary.record(action);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceType;

    struct Desired {
        id: &'static str,
        hash: &'static str,
    }

    impl DesiredResource for Desired {
        fn logical_id(&self) -> &str {
            self.id
        }

        fn content_hash(&self) -> &str {
            self.hash
        }
    }

    fn stored(id: &str, hash: &str) -> Binding {
        Binding::new(ResourceType::Account, id, "222222222222", hash)
    }

    #[test]
    fn test_action_rules() {
        assert_eq!(DiffEngine::action(None, None), None);
        assert_eq!(DiffEngine::action(None, Some("a")), Some(BindingAction::Delete));
        assert_eq!(DiffEngine::action(Some("a"), None), Some(BindingAction::Create));
        assert_eq!(DiffEngine::action(Some("a"), Some("a")), Some(BindingAction::None));
        assert_eq!(DiffEngine::action(Some("a"), Some("b")), Some(BindingAction::Update));
    }

    #[test]
    fn test_equal_hash_is_none() {
        let engine = DiffEngine::new();
        let diff = engine
            .diff(Some(&Desired { id: "Dev", hash: "h1" }), Some(&stored("Dev", "h1")))
            .expect("diff");

        assert_eq!(diff.action, BindingAction::None);
        assert!(!diff.action.requires_work());
    }

    #[test]
    fn test_stored_without_desired_is_delete() {
        let engine = DiffEngine::new();
        let diff = engine
            .diff(None::<&Desired>, Some(&stored("Gone", "h1")))
            .expect("diff");

        assert_eq!(diff.logical_id, "Gone");
        assert_eq!(diff.action, BindingAction::Delete);
        assert!(diff.hash.is_none());
    }

    #[test]
    fn test_enumerate() {
        let engine = DiffEngine::new();
        let desired = [
            Desired { id: "Same", hash: "h1" },
            Desired { id: "Changed", hash: "h2" },
            Desired { id: "New", hash: "h3" },
        ];
        let state = [stored("Same", "h1"), stored("Changed", "old"), stored("Gone", "h4")];

        let diffs = engine.enumerate(&desired, &state);
        let actions: Vec<(&str, BindingAction)> = diffs
            .iter()
            .map(|d| (d.logical_id.as_str(), d.action))
            .collect();

        assert_eq!(
            actions,
            vec![
                ("Same", BindingAction::None),
                ("Changed", BindingAction::Update),
                ("New", BindingAction::Create),
                ("Gone", BindingAction::Delete),
            ]
        );

        let summary: DiffSummary = diffs.iter().map(|d| d.action).collect();
        assert_eq!(summary.unchanged, 1);
        assert!(summary.has_changes());
    }
}
