//! Two-tier caching for remote entities.
//!
//! This module provides the local half of the data layer:
//! - Stores canonical entities keyed by type and id, in natural insertion order
//! - Serves reads locally and falls back to the remote source (read-through)
//! - Mirrors accepted writes into the local store (write-through)
//! - Caches whole remote lists and serves them stale when the network is down

mod repository;
mod storage;
mod traits;

pub use repository::Repository;
pub use storage::{CachedEntity, CachedQueryResult, ConstraintMessages, LocalStore, SqliteStorage, StorageError};
pub use traits::{CacheResult, CacheSource, Entity, UNSAVED_ID};
