//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Identifier carried by entities the remote source has not accepted yet.
pub const UNSAVED_ID: i64 = -1;

/// A business object that can be cached locally and exchanged remotely.
///
/// The type itself is the canonical representation and is what the local
/// store persists. `Resource` is the shape used on the wire; for most
/// entities it is `Self`.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Wire representation exchanged with the remote source.
  type Resource: Serialize + DeserializeOwned + Send + Sync + Into<Self>;

  fn id(&self) -> i64;

  /// Entity type name for storage organization (e.g., "product", "shop")
  fn entity_type() -> &'static str;

  /// Collection path on the remote API (e.g., "products")
  fn resource_path() -> &'static str;

  /// Text matched by substring searches.
  fn search_text(&self) -> String;

  /// Value that must be unique among entities of this type, if any.
  fn unique_key(&self) -> Option<String> {
    None
  }

  fn to_resource(&self) -> Self::Resource;

  fn cache_key(&self) -> String {
    self.id().to_string()
  }

  fn is_unsaved(&self) -> bool {
    self.id() == UNSAVED_ID
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the local store
  Cache,
  /// Offline mode - refresh failed, serving stale cached data
  Offline,
}
