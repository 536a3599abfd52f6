//! Caller-facing result streams.
//!
//! Every repository operation can be observed as a [`ResourceStream`]: it
//! yields [`Resource::Loading`] first, then exactly one terminal
//! [`Resource::Success`] or [`Resource::Error`], then ends.
//!
//! # Example
//!
//! ```ignore
//! let mut stream = products.observe_get(42);
//! while let Some(resource) = stream.next().await {
//!     match resource {
//!         Resource::Loading => render_spinner(),
//!         Resource::Success(product) => render(product),
//!         Resource::Error(e) => render_error(e.user_message()),
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RepositoryError;

/// The state of an observed operation
#[derive(Debug, Clone)]
pub enum Resource<T> {
  /// Operation is in progress
  Loading,
  /// Operation completed successfully
  Success(T),
  /// Operation failed
  Error(Arc<RepositoryError>),
}

impl<T> Resource<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, Resource::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Resource::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Resource::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Resource::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&RepositoryError> {
    match self {
      Resource::Error(e) => Some(e),
      _ => None,
    }
  }
}

impl<T> From<Result<T, RepositoryError>> for Resource<T> {
  fn from(result: Result<T, RepositoryError>) -> Self {
    match result {
      Ok(data) => Resource::Success(data),
      Err(e) => Resource::Error(Arc::new(e)),
    }
  }
}

/// Stream of [`Resource`] updates for one spawned operation.
///
/// Dropping the stream aborts the operation, including any pending retry
/// wait or in-flight remote call.
pub struct ResourceStream<T> {
  receiver: mpsc::UnboundedReceiver<Resource<T>>,
  task: JoinHandle<()>,
}

impl<T: Send + 'static> ResourceStream<T> {
  /// Spawn `operation` on the current runtime and observe it.
  pub fn spawn<F>(operation: F) -> Self
  where
    F: Future<Output = Result<T, RepositoryError>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    // Queued before the task exists so it is always observed first.
    let _ = tx.send(Resource::Loading);

    let task = tokio::spawn(async move {
      let result = operation.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result.into());
    });

    Self { receiver: rx, task }
  }

  /// Wait for the terminal state, skipping `Loading`.
  pub async fn outcome(mut self) -> Resource<T> {
    while let Some(resource) = self.next().await {
      if !resource.is_loading() {
        return resource;
      }
    }
    // Sender dropped without sending: the task panicked or was aborted.
    Resource::Error(Arc::new(RepositoryError::Cancelled))
  }
}

impl<T> Stream for ResourceStream<T> {
  type Item = Resource<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

impl<T> Drop for ResourceStream<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}

impl<T> std::fmt::Debug for ResourceStream<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceStream")
      .field("finished", &self.task.is_finished())
      .finish_non_exhaustive()
  }
}
