use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::ConstraintMessages;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Messages shown when a local constraint fails, keyed by column name
  /// (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_keys")]
  pub constraint_messages: BTreeMap<String, String>,
}

fn deserialize_lowercase_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(m.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the shop API (e.g., "https://shop.example.com/api/")
  pub url: String,
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Keep the local store on disk. When false, an in-memory store is used.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (default: $XDG_DATA_HOME/stockroom/cache.db)
  pub path: Option<PathBuf>,
  /// Minutes before a cached list is refreshed
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      stale_minutes: default_stale_minutes(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_stale_minutes() -> i64 {
  5
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::minutes(self.stale_minutes)
  }

  /// Resolve the database path, falling back to the data directory.
  pub fn db_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("cache.db"))
  }
}

/// Application data directory ($XDG_DATA_HOME/stockroom).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("stockroom"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stockroom.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stockroom/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/stockroom/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stockroom.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stockroom").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn constraint_messages(&self) -> ConstraintMessages {
    ConstraintMessages::new(self.constraint_messages.clone())
  }

  /// Get the API token from environment variables.
  ///
  /// Checks STOCKROOM_API_TOKEN first, then SHOP_API_TOKEN as fallback.
  /// Anonymous access is allowed, so a missing token is not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STOCKROOM_API_TOKEN")
      .or_else(|_| std::env::var("SHOP_API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}
