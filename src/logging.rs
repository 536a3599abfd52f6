//! Log setup: daily rolling file in the data directory.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config;

const LOG_FILE_PREFIX: &str = "stockroom.log";

/// Environment variable overriding the log filter (e.g. `stockroom=trace`).
const LOG_ENV: &str = "STOCKROOM_LOG";

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
  match verbosity {
    0 => LevelFilter::INFO,
    1 => LevelFilter::DEBUG,
    _ => LevelFilter::TRACE,
  }
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered lines on drop and must be held for
/// the life of the program.
pub fn init(verbosity: u8) -> Result<WorkerGuard> {
  let dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::builder()
    .with_default_directive(level_from_verbosity(verbosity).into())
    .with_env_var(LOG_ENV)
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
