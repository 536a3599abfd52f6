//! Command-line operations over the repositories.

use std::sync::Arc;

use chrono::Duration;
use clap::{Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{HttpApi, ListKey};
use crate::cache::{CacheResult, Entity, Repository, SqliteStorage};
use crate::config::Config;
use crate::error::RepositoryError;
use crate::model::{Customer, Product, Recommendation, Shop, ShoppingListItem, User};
use crate::query::Query;
use crate::resource::{Resource, ResourceStream};
use crate::retry::RetryPolicy;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show one entity, reading through the local store
  Get {
    kind: EntityKind,
    id: i64,
    /// Skip the local store and fetch from the API
    #[arg(long)]
    refresh: bool,
  },
  /// Create or update an entity from a JSON document (no id, or -1, creates)
  Save { kind: EntityKind, json: String },
  /// Delete an entity remotely and locally
  Delete { kind: EntityKind, id: i64 },
  /// Search the local store
  Search {
    kind: EntityKind,
    text: String,
    /// Maximum number of results (negative for all)
    #[arg(short, long, default_value_t = Query::UNBOUNDED, allow_hyphen_values = true)]
    limit: i64,
    /// Match TEXT exactly against this field instead of by substring
    #[arg(long)]
    unique_by: Option<String>,
    /// Exact field constraint, as key=value (value may be JSON)
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, Value)>,
  },
  /// List every entity of a kind, cached as a whole
  List { kind: EntityKind },
  /// Products recommended to a customer
  Recommendations { customer_id: i64 },
  /// Items on a shopping list
  ListItems { list_id: i64 },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
  Product,
  Shop,
  Customer,
  User,
  ShoppingListItem,
  Recommendation,
}

/// Bind `$T` to the entity type named by `$kind` and evaluate `$body`.
macro_rules! with_entity {
  ($kind:expr, $T:ident => $body:expr) => {
    match $kind {
      EntityKind::Product => {
        type $T = Product;
        $body
      }
      EntityKind::Shop => {
        type $T = Shop;
        $body
      }
      EntityKind::Customer => {
        type $T = Customer;
        $body
      }
      EntityKind::User => {
        type $T = User;
        $body
      }
      EntityKind::ShoppingListItem => {
        type $T = ShoppingListItem;
        $body
      }
      EntityKind::Recommendation => {
        type $T = Recommendation;
        $body
      }
    }
  };
}

/// Parse `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_filter(raw: &str) -> Result<(String, Value), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("empty filter key in '{}'", raw));
  }
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

/// Shared collaborators, assembled once and handed to every repository.
pub struct Services {
  storage: Arc<SqliteStorage>,
  api: Arc<HttpApi>,
  retry: RetryPolicy,
  stale_time: Duration,
}

impl Services {
  pub fn new(config: &Config) -> Result<Self> {
    let messages = config.constraint_messages();

    let storage = if config.cache.enabled {
      let path = config.cache.db_path()?;
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
      SqliteStorage::open(&path, messages)
        .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?
    } else {
      SqliteStorage::open_in_memory(messages)
        .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?
    };

    Ok(Self {
      storage: Arc::new(storage),
      api: Arc::new(HttpApi::new(config)?),
      retry: config.retry,
      stale_time: config.cache.stale_time(),
    })
  }

  pub fn repository<T: Entity>(&self) -> Repository<T, SqliteStorage, HttpApi> {
    Repository::new(
      Arc::clone(&self.storage),
      Arc::clone(&self.api),
      self.retry,
    )
    .with_stale_time(self.stale_time)
  }
}

pub async fn run(command: Command, services: &Services) -> Result<()> {
  match command {
    Command::Get { kind, id, refresh } => {
      with_entity!(kind, T => get::<T>(services, id, refresh).await)
    }
    Command::Save { kind, json } => with_entity!(kind, T => save::<T>(services, &json).await),
    Command::Delete { kind, id } => {
      with_entity!(kind, T => outcome(services.repository::<T>().observe_delete(id)).await)?;
      println!("deleted {:?} {}", kind, id);
      Ok(())
    }
    Command::Search {
      kind,
      text,
      limit,
      unique_by,
      filters,
    } => {
      let mut query = Query::new(text, limit);
      if let Some(field) = unique_by {
        query = query.unique_by(field);
      }
      for (key, value) in filters {
        query = query.with_filter(key, value);
      }
      with_entity!(kind, T => print_json(&outcome(services.repository::<T>().observe_search(query)).await?))
    }
    Command::List { kind } => {
      with_entity!(kind, T => list::<T>(services, ListKey::all::<T>()).await)
    }
    Command::Recommendations { customer_id } => {
      list::<Recommendation>(services, ListKey::Recommendations { customer_id }).await
    }
    Command::ListItems { list_id } => {
      list::<ShoppingListItem>(services, ListKey::ShoppingListItems { list_id }).await
    }
  }
}

async fn get<T: Entity>(services: &Services, id: i64, refresh: bool) -> Result<()> {
  let repo = services.repository::<T>();
  let stream = if refresh {
    ResourceStream::spawn(async move { repo.refresh(id).await })
  } else {
    repo.observe_get(id)
  };
  print_json(&outcome(stream).await?)
}

async fn save<T: Entity>(services: &Services, json: &str) -> Result<()> {
  let entity: T =
    serde_json::from_str(json).map_err(|e| eyre!("Invalid {} document: {}", T::entity_type(), e))?;
  let saved = outcome(services.repository::<T>().observe_save(entity)).await?;
  print_json(&saved)
}

async fn list<T: Entity>(services: &Services, key: ListKey) -> Result<()> {
  let description = key.description();
  let result: CacheResult<Vec<T>> = outcome(services.repository::<T>().observe_list(key)).await?;
  info!(list = %description, source = ?result.source, cached_at = ?result.cached_at, "list loaded");
  print_json(&result.data)
}

/// Drive a stream to its terminal state.
async fn outcome<T>(mut stream: ResourceStream<T>) -> Result<T> {
  while let Some(resource) = stream.next().await {
    match resource {
      Resource::Loading => debug!("loading"),
      Resource::Success(data) => return Ok(data),
      Resource::Error(err) => return Err(eyre!(render_error(&err))),
    }
  }
  Err(eyre!("operation ended without a result"))
}

/// User message followed by one line per invalid field.
fn render_error(err: &RepositoryError) -> String {
  let mut message = err.user_message();
  if let Some(fields) = err.field_errors() {
    for (field, messages) in fields.iter() {
      message.push_str(&format!("\n  {}: {}", field, messages.join(", ")));
    }
  }
  message
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{FieldErrors, RemoteError};
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  #[test]
  fn test_parse_filter() {
    assert_eq!(
      parse_filter("unit=kg").unwrap(),
      ("unit".to_string(), Value::String("kg".to_string()))
    );
    assert_eq!(
      parse_filter("shop_id=4").unwrap(),
      ("shop_id".to_string(), Value::from(4))
    );
    assert!(parse_filter("nonsense").is_err());
    assert!(parse_filter("=x").is_err());
  }

  #[test]
  fn test_search_arguments() {
    let cli = Cli::try_parse_from([
      "stockroom",
      "search",
      "shop",
      "Corner",
      "--limit",
      "-1",
      "--unique-by",
      "name",
      "--filter",
      "address=Main St",
    ])
    .unwrap();

    match cli.command {
      Command::Search {
        kind,
        text,
        limit,
        unique_by,
        filters,
      } => {
        assert_eq!(kind, EntityKind::Shop);
        assert_eq!(text, "Corner");
        assert_eq!(limit, -1);
        assert_eq!(unique_by.as_deref(), Some("name"));
        assert_eq!(filters.len(), 1);
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[test]
  fn test_entity_kind_names() {
    let cli = Cli::try_parse_from(["stockroom", "get", "shopping-list-item", "3"]).unwrap();
    assert!(matches!(
      cli.command,
      Command::Get {
        kind: EntityKind::ShoppingListItem,
        id: 3,
        refresh: false
      }
    ));
  }

  #[test]
  fn test_render_error_lists_fields() {
    let err = RepositoryError::from(RemoteError::Validation {
      status: 400,
      errors: FieldErrors::from_body(br#"{"name": ["required"]}"#).unwrap(),
    });
    let rendered = render_error(&err);
    assert!(rendered.ends_with("\n  name: required"));
  }

  #[tokio::test]
  async fn test_outcome_returns_success() {
    let value = outcome(ResourceStream::spawn(async { Ok(5) })).await.unwrap();
    assert_eq!(value, 5);
  }
}
