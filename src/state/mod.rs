//! State management module for the orgform engine.
//!
//! This module provides persistent state storage for bindings, stack
//! targets, the previously applied organization template and run history.

mod local;
mod lock;
mod s3;
mod shared;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, StateLock, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use shared::StateHandle;
pub use store::StateStore;
pub use types::{Binding, PersistedState, RunHistoryEntry, Target, MAX_HISTORY, STATE_VERSION};
