//! Shared, mutex-guarded access to the in-memory state.
//!
//! Tasks running concurrently inside one runner round each perform a single
//! read-modify-write through this handle.

use std::sync::{Arc, Mutex, MutexGuard};

use super::types::PersistedState;

/// Cloneable handle to the in-memory state.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<PersistedState>>,
}

impl StateHandle {
    /// Wraps a loaded state.
    #[must_use]
    pub fn new(state: PersistedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        // Every mutation is a single map operation; a poisoned guard is consistent.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Reads from the state.
    pub fn read<T>(&self, f: impl FnOnce(&PersistedState) -> T) -> T {
        f(&self.lock())
    }

    /// Mutates the state.
    pub fn update<T>(&self, f: impl FnOnce(&mut PersistedState) -> T) -> T {
        f(&mut self.lock())
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> PersistedState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceType;
    use crate::state::Binding;

    #[tokio::test]
    async fn test_concurrent_updates() {
        let handle = StateHandle::new(PersistedState::new());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let handle = handle.clone();
            tasks.spawn(async move {
                handle.update(|state| {
                    state.set_binding(Binding::new(
                        ResourceType::Account,
                        format!("Account{i}"),
                        format!("{i:012}"),
                        "h",
                    ));
                });
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(handle.read(PersistedState::binding_count), 16);
        assert!(handle.read(PersistedState::is_dirty));
    }
}
