//! Search request descriptor for local lookups.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::Entity;

/// A local search request.
///
/// Identity (`Eq`, `Hash`, [`Query::cache_hash`]) covers `text` and `limit`
/// only. Two queries that differ only in `filters` are the same query for
/// caching and deduplication, even though they can select different rows.
/// Callers that cache by `Query` must not rely on filters to tell entries
/// apart.
#[derive(Debug, Clone, Default)]
pub struct Query {
  pub text: String,
  /// Maximum number of results. Negative means unbounded.
  pub limit: i64,
  pub filters: BTreeMap<String, Value>,
}

impl Query {
  /// Filter key whose value names an entity field that must equal `text`
  /// exactly, replacing the substring match.
  pub const UNIQUE_BY: &'static str = "unique_by";

  pub const UNBOUNDED: i64 = -1;

  pub fn new(text: impl Into<String>, limit: i64) -> Self {
    Self {
      text: text.into(),
      limit,
      filters: BTreeMap::new(),
    }
  }

  pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.filters.insert(key.into(), value.into());
    self
  }

  /// Match `text` exactly against the named field.
  pub fn unique_by(self, field: impl Into<String>) -> Self {
    self.with_filter(Self::UNIQUE_BY, Value::String(field.into()))
  }

  pub fn unique_field(&self) -> Option<&str> {
    self.filters.get(Self::UNIQUE_BY).and_then(Value::as_str)
  }

  /// Lowercased needle for substring matching.
  pub fn needle(&self) -> String {
    self.text.to_lowercase()
  }

  /// Whether `entity` belongs to this query's candidate set.
  pub fn matches<T: Entity>(&self, entity: &T) -> bool {
    let value = match serde_json::to_value(entity) {
      Ok(v) => v,
      Err(_) => return false,
    };

    let selected = match self.unique_field() {
      Some(field) => value
        .get(field)
        .map(|v| value_text(v) == self.text)
        .unwrap_or(false),
      None => entity.search_text().to_lowercase().contains(&self.needle()),
    };

    selected
      && self
        .filters
        .iter()
        .filter(|(key, _)| key.as_str() != Self::UNIQUE_BY)
        .all(|(key, expected)| {
          value
            .get(key)
            .is_some_and(|actual| filter_matches(actual, expected))
        })
  }

  /// Truncate `items` to the limit, keeping their order.
  pub fn apply_limit<T>(&self, mut items: Vec<T>) -> Vec<T> {
    if let Ok(limit) = usize::try_from(self.limit) {
      items.truncate(limit);
    }
    items
  }

  /// Stable key over the identity fields.
  pub fn cache_hash(&self) -> String {
    let input = format!("query:{}:{}", self.text, self.limit);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl PartialEq for Query {
  fn eq(&self, other: &Self) -> bool {
    self.text == other.text && self.limit == other.limit
  }
}

impl Eq for Query {}

impl Hash for Query {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.text.hash(state);
    self.limit.hash(state);
  }
}

/// Exact filter comparison. String fields compare by text, so a value
/// that parsed as a number or bool still matches a field holding its digits.
fn filter_matches(actual: &Value, expected: &Value) -> bool {
  match actual {
    Value::String(s) => *s == value_text(expected),
    other => other == expected,
  }
}

fn value_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
