//! Local store trait and SQLite implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::query::Query;

use super::traits::Entity;

/// Failure raised by the local store.
#[derive(Debug, Error)]
pub enum StorageError {
  /// A schema constraint rejected the write.
  #[error("{message}")]
  Constraint { column: String, message: String },

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to serialize entity: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("failed to parse datetime '{0}'")]
  Timestamp(String),

  #[error("storage lock poisoned")]
  Lock,
}

/// User-facing messages for constraint violations, keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct ConstraintMessages(BTreeMap<String, String>);

impl ConstraintMessages {
  pub fn new(messages: BTreeMap<String, String>) -> Self {
    Self(
      messages
        .into_iter()
        .map(|(column, message)| (column.to_lowercase(), message))
        .collect(),
    )
  }

  pub fn lookup(&self, column: &str) -> Option<&str> {
    self.0.get(&column.to_lowercase()).map(String::as_str)
  }

  /// Turn constraint violations into [`StorageError::Constraint`]; pass other
  /// errors through.
  pub fn map_error(&self, err: rusqlite::Error) -> StorageError {
    let column = match &err {
      rusqlite::Error::SqliteFailure(failure, Some(message))
        if failure.code == ErrorCode::ConstraintViolation =>
      {
        violated_column(message)
      }
      _ => None,
    };

    match column {
      Some(column) => {
        let message = self
          .lookup(&column)
          .map(String::from)
          .unwrap_or_else(|| default_message(&err.to_string(), &column));
        StorageError::Constraint { column, message }
      }
      None => StorageError::Sqlite(err),
    }
  }
}

/// Generic message for a column with nothing configured.
fn default_message(raw: &str, column: &str) -> String {
  let field = column.replace('_', " ");
  if raw.starts_with("UNIQUE") {
    format!("{} is already in use", field)
  } else if raw.starts_with("NOT NULL") {
    format!("{} is required", field)
  } else {
    format!("{} is invalid", field)
  }
}

/// Extract the last column from messages like
/// `UNIQUE constraint failed: entity_cache.entity_type, entity_cache.unique_key`.
fn violated_column(message: &str) -> Option<String> {
  let (_, columns) = message.split_once(':')?;
  let last = columns.split(',').last()?.trim();
  let column = last.rsplit('.').next()?.trim();
  if column.is_empty() {
    None
  } else {
    Some(column.to_string())
  }
}

/// Result of a cached query lookup.
#[derive(Debug, Clone)]
pub struct CachedQueryResult<T> {
  /// The cached entities in order
  pub entities: Vec<T>,
  /// When the query result was cached
  pub cached_at: DateTime<Utc>,
}

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  pub entity: T,
  pub cached_at: DateTime<Utc>,
}

/// Trait for local store backends.
///
/// Upserts are idempotent on `(entity type, id)`; concurrent writers to the
/// same record resolve as last write wins.
pub trait LocalStore: Send + Sync {
  fn get_entity<T: Entity>(&self, id: i64) -> Result<Option<CachedEntity<T>>, StorageError>;

  /// Insert or replace one entity, keeping its original position in
  /// natural order. Other records of the type with the same unique key are
  /// dropped.
  fn upsert_entity<T: Entity>(&self, entity: &T) -> Result<(), StorageError>;

  /// Returns whether a row was removed.
  fn delete_entity<T: Entity>(&self, id: i64) -> Result<bool, StorageError>;

  /// Entities matching `query`, in natural order, truncated to its limit.
  fn search_entities<T: Entity>(&self, query: &Query) -> Result<Vec<T>, StorageError>;

  /// Replace the cached result of a remote list and upsert its entities.
  fn store_query_result<T: Entity>(
    &self,
    key: &str,
    description: &str,
    entities: &[T],
  ) -> Result<(), StorageError>;

  fn get_query_result<T: Entity>(&self, key: &str)
    -> Result<Option<CachedQueryResult<T>>, StorageError>;
}

/// SQLite-based local store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  messages: ConstraintMessages,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path, messages: ConstraintMessages) -> Result<Self, StorageError> {
    let conn = Connection::open(path)?;
    Self::with_connection(conn, messages)
  }

  /// Private in-memory store; nothing outlives the process.
  pub fn open_in_memory(messages: ConstraintMessages) -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?, messages)
  }

  fn with_connection(conn: Connection, messages: ConstraintMessages) -> Result<Self, StorageError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      messages,
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Lock)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Generic entity store (serialized JSON plus indexed lookup columns)
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    search_text TEXT NOT NULL,
    unique_key TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, entity_key)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_cache_unique
    ON entity_cache(entity_type, unique_key);

-- Remote list tracking
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    result_count INTEGER NOT NULL
);

-- Query to entity mapping (preserves order)
CREATE TABLE IF NOT EXISTS query_results (
    query_hash TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (query_hash, entity_key),
    FOREIGN KEY (query_hash) REFERENCES query_cache(query_hash) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_query_results_hash ON query_results(query_hash);
"#;

const UPSERT_ENTITY: &str = "INSERT INTO entity_cache (entity_type, entity_key, data, search_text, unique_key, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
     ON CONFLICT(entity_type, entity_key) DO UPDATE SET
       data = excluded.data,
       search_text = excluded.search_text,
       unique_key = excluded.unique_key,
       cached_at = excluded.cached_at";

/// Rows of the same type holding `unique_key` under another key are stale:
/// the incoming record comes from the remote source and replaces them.
const EVICT_UNIQUE: &str = "DELETE FROM entity_cache
     WHERE entity_type = ?1 AND unique_key = ?2 AND entity_key <> ?3";

/// Write one entity. Callers run this inside a transaction so eviction and
/// upsert land together.
fn upsert_row<T: Entity>(
  conn: &Connection,
  messages: &ConstraintMessages,
  entity: &T,
) -> Result<(), StorageError> {
  let data = serde_json::to_vec(entity)?;
  let key = entity.cache_key();
  let unique_key = entity.unique_key();

  if let Some(unique_key) = &unique_key {
    let evicted = conn.execute(EVICT_UNIQUE, params![T::entity_type(), unique_key, key])?;
    if evicted > 0 {
      debug!(entity = T::entity_type(), key = %key, evicted, "evicted stale rows sharing unique key");
    }
  }

  conn
    .execute(
      UPSERT_ENTITY,
      params![
        T::entity_type(),
        key,
        data,
        entity.search_text().to_lowercase(),
        unique_key,
      ],
    )
    .map_err(|e| messages.map_error(e))?;
  Ok(())
}

impl LocalStore for SqliteStorage {
  fn get_entity<T: Entity>(&self, id: i64) -> Result<Option<CachedEntity<T>>, StorageError> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM entity_cache
         WHERE entity_type = ? AND entity_key = ?",
        params![T::entity_type(), id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((data, cached_at)) => Ok(Some(CachedEntity {
        entity: serde_json::from_slice(&data)?,
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn upsert_entity<T: Entity>(&self, entity: &T) -> Result<(), StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    upsert_row(&tx, &self.messages, entity)?;
    tx.commit()?;
    debug!(entity = T::entity_type(), key = %entity.cache_key(), "stored entity");
    Ok(())
  }

  fn delete_entity<T: Entity>(&self, id: i64) -> Result<bool, StorageError> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM entity_cache WHERE entity_type = ? AND entity_key = ?",
      params![T::entity_type(), id.to_string()],
    )?;
    Ok(removed > 0)
  }

  fn search_entities<T: Entity>(&self, query: &Query) -> Result<Vec<T>, StorageError> {
    let conn = self.lock()?;

    // Exact matches can target any field, so only the substring case can be
    // narrowed in SQL.
    let rows: Vec<Vec<u8>> = if query.unique_field().is_some() {
      let mut stmt = conn.prepare(
        "SELECT data FROM entity_cache WHERE entity_type = ? ORDER BY rowid",
      )?;
      let rows = stmt.query_map(params![T::entity_type()], |row| row.get(0))?;
      rows.collect::<Result<_, _>>()?
    } else {
      let mut stmt = conn.prepare(
        "SELECT data FROM entity_cache
         WHERE entity_type = ? AND instr(search_text, ?) > 0
         ORDER BY rowid",
      )?;
      let rows = stmt.query_map(params![T::entity_type(), query.needle()], |row| row.get(0))?;
      rows.collect::<Result<_, _>>()?
    };

    let mut matches = Vec::new();
    for data in rows {
      let entity: T = serde_json::from_slice(&data)?;
      if query.matches(&entity) {
        matches.push(entity);
      }
    }

    Ok(query.apply_limit(matches))
  }

  fn store_query_result<T: Entity>(
    &self,
    key: &str,
    description: &str,
    entities: &[T],
  ) -> Result<(), StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM query_results WHERE query_hash = ?", params![key])?;

    tx.execute(
      "INSERT OR REPLACE INTO query_cache (query_hash, query_description, entity_type, cached_at, result_count)
       VALUES (?, ?, ?, datetime('now'), ?)",
      params![key, description, T::entity_type(), entities.len()],
    )?;

    for (position, entity) in entities.iter().enumerate() {
      upsert_row(&tx, &self.messages, entity)?;

      tx.execute(
        "INSERT OR REPLACE INTO query_results (query_hash, entity_key, position)
         VALUES (?, ?, ?)",
        params![key, entity.cache_key(), position],
      )?;
    }

    tx.commit()?;
    debug!(key, description, count = entities.len(), "stored query result");
    Ok(())
  }

  fn get_query_result<T: Entity>(
    &self,
    key: &str,
  ) -> Result<Option<CachedQueryResult<T>>, StorageError> {
    let conn = self.lock()?;
    let entity_type = T::entity_type();

    let cached_at: Option<String> = conn
      .query_row(
        "SELECT cached_at FROM query_cache WHERE query_hash = ? AND entity_type = ?",
        params![key, entity_type],
        |row| row.get(0),
      )
      .optional()?;

    let cached_at = match cached_at {
      Some(s) => parse_datetime(&s)?,
      None => return Ok(None),
    };

    let mut stmt = conn.prepare(
      "SELECT ec.data FROM entity_cache ec
       INNER JOIN query_results qr ON ec.entity_type = ? AND ec.entity_key = qr.entity_key
       WHERE qr.query_hash = ?
       ORDER BY qr.position",
    )?;

    let entities = stmt
      .query_map(params![entity_type, key], |row| row.get::<_, Vec<u8>>(0))?
      .collect::<Result<Vec<_>, _>>()?
      .iter()
      .map(|data| serde_json::from_slice(data))
      .collect::<Result<Vec<T>, _>>()?;

    Ok(Some(CachedQueryResult {
      entities,
      cached_at,
    }))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StorageError::Timestamp(s.to_string()))
}
