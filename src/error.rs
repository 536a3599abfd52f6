//! Errors surfaced by repository operations.

use thiserror::Error;

use crate::api::{FieldErrors, RemoteError};
use crate::cache::StorageError;
use crate::retry;

/// Failure of a repository operation, as surfaced to callers.
#[derive(Debug, Error)]
pub enum RepositoryError {
  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  /// The operation was dropped before it produced a result.
  #[error("operation was cancelled")]
  Cancelled,
}

impl RepositoryError {
  /// Message suitable for showing to a user.
  ///
  /// Known transport failures resolve to their message key; constraint
  /// violations carry the message configured for the violated column.
  pub fn user_message(&self) -> String {
    match self {
      RepositoryError::Remote(err) => retry::message_key(err)
        .map(String::from)
        .unwrap_or_else(|| err.to_string()),
      RepositoryError::Storage(err) => err.to_string(),
      RepositoryError::Cancelled => self.to_string(),
    }
  }

  pub fn field_errors(&self) -> Option<&FieldErrors> {
    match self {
      RepositoryError::Remote(err) => err.field_errors(),
      RepositoryError::Storage(_) | RepositoryError::Cancelled => None,
    }
  }
}
