//! Remote source: the authoritative HTTP API.

pub mod client;
mod error;
pub mod resources;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::cache::Entity;

pub use client::HttpApi;
pub use error::{FieldErrors, RemoteError, TransportKind};

/// Request/response operations offered by the remote source for one entity type.
#[async_trait]
pub trait RemoteSource<T: Entity>: Send + Sync {
  async fn fetch(&self, id: i64) -> Result<T, RemoteError>;

  async fn create(&self, entity: &T) -> Result<T, RemoteError>;

  async fn update(&self, entity: &T) -> Result<T, RemoteError>;

  async fn delete(&self, id: i64) -> Result<(), RemoteError>;

  async fn list(&self, key: &ListKey) -> Result<Vec<T>, RemoteError>;
}

/// Remote collections whose results are cached as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListKey {
  /// Every entity of one resource type
  All { resource: &'static str },
  /// Products recommended to a customer
  Recommendations { customer_id: i64 },
  /// Items on one shopping list
  ShoppingListItems { list_id: i64 },
}

impl ListKey {
  pub fn all<T: Entity>() -> Self {
    ListKey::All {
      resource: T::resource_path(),
    }
  }

  /// Path relative to the API base URL.
  pub fn path(&self) -> String {
    match self {
      Self::All { resource } => format!("{}/", resource),
      Self::Recommendations { customer_id } => {
        format!("customers/{}/recommendations/", customer_id)
      }
      Self::ShoppingListItems { list_id } => format!("shopping-lists/{}/items/", list_id),
    }
  }

  /// SHA256 of the path, for stable fixed-length cache keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("list:{}", self.path()).as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::All { resource } => format!("all {}", resource),
      Self::Recommendations { customer_id } => {
        format!("recommendations for customer {}", customer_id)
      }
      Self::ShoppingListItems { list_id } => format!("items on shopping list {}", list_id),
    }
  }
}
