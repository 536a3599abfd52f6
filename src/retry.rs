//! Retry policy for remote calls.
//!
//! A [`RetryState`] is created per logical operation. After every failed
//! attempt the caller awaits [`RetryState::can_retry`], which both decides
//! whether another attempt is allowed and performs the backoff wait.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{RemoteError, TransportKind};

/// Transport failure categories mapped to user-facing message keys.
pub const MESSAGE_KEYS: &[(TransportKind, &str)] = &[
  (TransportKind::ConnectionRefused, "error.connection_refused"),
  (TransportKind::Timeout, "error.read_timeout"),
];

/// Look up the message key for a failure, if the table knows it.
pub fn message_key(error: &RemoteError) -> Option<&'static str> {
  let kind = error.transport_kind()?;
  MESSAGE_KEYS
    .iter()
    .find(|(k, _)| *k == kind)
    .map(|(_, key)| *key)
}

/// Immutable retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff_multiplier: u32,
  pub base_wait_seconds: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff_multiplier: 1,
      base_wait_seconds: 3,
    }
  }
}

impl RetryPolicy {
  /// Start a fresh state for one operation.
  pub fn start(&self) -> RetryState {
    RetryState::new(*self)
  }
}

/// Where a [`RetryState`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
  Attempting(u32),
  Exhausted,
}

/// Mutable per-operation retry state.
#[derive(Debug, Clone)]
pub struct RetryState {
  policy: RetryPolicy,
  current_attempt: u32,
  current_wait_seconds: u64,
}

impl RetryState {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      current_attempt: 1,
      current_wait_seconds: policy.base_wait_seconds,
    }
  }

  pub fn current_attempt(&self) -> u32 {
    self.current_attempt
  }

  pub fn current_wait(&self) -> Duration {
    Duration::from_secs(self.current_wait_seconds)
  }

  pub fn phase(&self) -> RetryPhase {
    if self.current_attempt > self.policy.max_attempts {
      RetryPhase::Exhausted
    } else {
      RetryPhase::Attempting(self.current_attempt)
    }
  }

  /// Wait out the current backoff and report whether a retry may proceed.
  ///
  /// Returns `false` immediately, without waiting, once the attempts are
  /// exhausted. Must be awaited right before re-attempting: it is not a
  /// side-effect free predicate.
  pub async fn can_retry(&mut self) -> bool {
    if self.phase() == RetryPhase::Exhausted {
      return false;
    }

    debug!(
      attempt = self.current_attempt,
      wait_seconds = self.current_wait_seconds,
      "waiting before retry"
    );
    tokio::time::sleep(self.current_wait()).await;

    let growth = self
      .current_wait_seconds
      .saturating_mul(u64::from(self.policy.backoff_multiplier));
    self.current_wait_seconds = self.current_wait_seconds.saturating_add(growth);
    self.current_attempt += 1;

    true
  }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last observed failure is returned in the latter
/// two cases.
pub async fn run<T, F, Fut>(
  policy: &RetryPolicy,
  operation: &str,
  mut attempt: F,
) -> Result<T, RemoteError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, RemoteError>>,
{
  let mut state = policy.start();

  loop {
    match attempt().await {
      Ok(value) => return Ok(value),
      Err(err) if !err.is_retryable() => {
        warn!(operation, error = %err, "remote call rejected");
        return Err(err);
      }
      Err(err) => {
        warn!(
          operation,
          attempt = state.current_attempt(),
          error = %err,
          "remote call failed"
        );
        if !state.can_retry().await {
          warn!(operation, "retries exhausted");
          return Err(err);
        }
      }
    }
  }
}
