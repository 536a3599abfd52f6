//! Failures reported by the remote source.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Transport failure categories that the retry table knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
  ConnectionRefused,
  Timeout,
  Other,
}

impl fmt::Display for TransportKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TransportKind::ConnectionRefused => "connection refused",
      TransportKind::Timeout => "timeout",
      TransportKind::Other => "transport",
    };
    f.write_str(name)
  }
}

/// Error returned by a [`RemoteSource`](super::RemoteSource) call.
#[derive(Debug, Error)]
pub enum RemoteError {
  /// The request never produced a response.
  #[error("{kind} error: {message}")]
  Transport { kind: TransportKind, message: String },

  /// The remote source rejected the input. Never retried.
  #[error("request rejected ({status}): {errors}")]
  Validation { status: u16, errors: FieldErrors },

  #[error("not found: {path}")]
  NotFound { path: String },

  /// Any other non-success status.
  #[error("unexpected status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl RemoteError {
  /// Whether the retry loop may re-attempt after this failure.
  ///
  /// Transport failures and unexpected statuses are counted by the retry
  /// policy. Rejections, missing resources and malformed payloads would fail
  /// the same way on every attempt.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      RemoteError::Transport { .. } | RemoteError::Status { .. }
    )
  }

  pub fn transport_kind(&self) -> Option<TransportKind> {
    match self {
      RemoteError::Transport { kind, .. } => Some(*kind),
      _ => None,
    }
  }

  pub fn field_errors(&self) -> Option<&FieldErrors> {
    match self {
      RemoteError::Validation { errors, .. } => Some(errors),
      _ => None,
    }
  }
}

/// Field-level validation messages keyed by field name.
///
/// Messages that do not belong to a field are kept under
/// [`FieldErrors::NON_FIELD`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
  pub const NON_FIELD: &'static str = "non_field_errors";

  /// Parse a validation body.
  ///
  /// Accepts `{"field": ["msg", ...]}`, `{"field": "msg"}` and the same maps
  /// wrapped in an `"errors"` object. Returns `None` when the body is not a
  /// JSON object.
  pub fn from_body(body: &[u8]) -> Option<Self> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let object = match value {
      Value::Object(mut map) => match map.remove("errors") {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
          map.insert("errors".to_string(), other);
          map
        }
        None => map,
      },
      _ => return None,
    };

    let fields = object
      .into_iter()
      .map(|(field, messages)| (field, flatten_messages(messages)))
      .filter(|(_, messages)| !messages.is_empty())
      .collect();

    Some(Self(fields))
  }

  pub fn non_field(message: impl Into<String>) -> Self {
    let mut map = BTreeMap::new();
    map.insert(Self::NON_FIELD.to_string(), vec![message.into()]);
    Self(map)
  }

  pub fn get(&self, field: &str) -> Option<&[String]> {
    self.0.get(field).map(Vec::as_slice)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }
}

impl fmt::Display for FieldErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (field, messages) in &self.0 {
      if !first {
        f.write_str("; ")?;
      }
      first = false;
      write!(f, "{}: {}", field, messages.join(", "))?;
    }
    Ok(())
  }
}

fn flatten_messages(value: Value) -> Vec<String> {
  match value {
    Value::String(s) => vec![s],
    Value::Array(items) => items.into_iter().flat_map(flatten_messages).collect(),
    Value::Null => Vec::new(),
    Value::Object(map) => map
      .into_iter()
      .flat_map(|(k, v)| {
        flatten_messages(v)
          .into_iter()
          .map(move |m| format!("{}: {}", k, m))
      })
      .collect(),
    other => vec![other.to_string()],
  }
}
