use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Environment variable overriding the configured log filter.
pub const LOG_ENV: &str = "ETRIBE_LOG";

/// Default log file: $XDG_DATA_HOME/etribe/etribe.log
fn default_log_file() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("etribe").join("etribe.log"))
}

fn filter(config: &LogConfig) -> Result<EnvFilter> {
  match std::env::var(LOG_ENV) {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
      .map_err(|e| eyre!("Invalid {} filter '{}': {}", LOG_ENV, directives, e)),
    _ => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e)),
  }
}

/// Install the global subscriber. Logs go to a file so stdout stays
/// reserved for command output; keep the guard alive until exit or buffered
/// lines are lost.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let path = match &config.file {
    Some(path) => path.clone(),
    None => default_log_file()?,
  };
  let dir = path.parent().unwrap_or(Path::new("."));
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter(config)?)
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_level_is_used() {
    let config = LogConfig {
      level: "etribe=debug,warn".to_string(),
      file: None,
    };
    if std::env::var(LOG_ENV).is_err() {
      assert!(filter(&config).is_ok());
    }
  }

  #[test]
  fn test_invalid_level_rejected() {
    let config = LogConfig {
      level: "etribe=notalevel".to_string(),
      file: None,
    };
    if std::env::var(LOG_ENV).is_err() {
      assert!(filter(&config).is_err());
    }
  }
}
