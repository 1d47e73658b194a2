use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{PersistMode, PersistPolicy, DEFAULT_TTL_HOURS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Role whose permissions are loaded at login
  pub role_id: Option<u32>,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(alias = "url")]
  pub base_url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// What is mirrored into session storage
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistSetting {
  /// Per resource: large dashboard aggregates as summaries, the rest in full
  #[default]
  Auto,
  Full,
  Summary,
  /// Memory only
  Off,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_hours")]
  pub ttl_hours: i64,
  #[serde(default)]
  pub persist: PersistSetting,
}

fn default_ttl_hours() -> i64 {
  DEFAULT_TTL_HOURS
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_hours: DEFAULT_TTL_HOURS,
      persist: PersistSetting::Auto,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::hours(self.ttl_hours)
  }

  /// Persistence policy, `None` when persistence is switched off.
  pub fn policy(&self) -> Option<PersistPolicy> {
    match self.persist {
      PersistSetting::Auto => Some(PersistPolicy::PerResource),
      PersistSetting::Full => Some(PersistPolicy::Uniform(PersistMode::Full)),
      PersistSetting::Summary => Some(PersistPolicy::Uniform(PersistMode::Summary)),
      PersistSetting::Off => None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive, overridden by `ETRIBE_LOG`
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log file path (default: $XDG_DATA_HOME/etribe/etribe.log)
  pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./etribe.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/etribe/config.yaml
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
        "No configuration file found. Create one at ~/.config/etribe/config.yaml\n\
         See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("etribe.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("etribe").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.api.base_url.trim().is_empty() {
      return Err(eyre!("api.base_url must not be empty"));
    }
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be at least 1"));
    }
    if self.cache.ttl_hours <= 0 {
      return Err(eyre!("cache.ttl_hours must be positive"));
    }
    Ok(())
  }

  /// Get the ETribe API token from environment variables.
  ///
  /// Checks ETRIBE_API_TOKEN first, then ETRIBE_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("ETRIBE_API_TOKEN")
      .or_else(|_| std::env::var("ETRIBE_TOKEN"))
      .map_err(|_| {
        eyre!("ETribe API token not found. Set ETRIBE_API_TOKEN or ETRIBE_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://api.etribe.example/v1\n").unwrap();
    assert_eq!(config.api.timeout(), Duration::from_secs(15));
    assert_eq!(config.cache.ttl_hours, 24);
    assert_eq!(config.cache.policy(), Some(PersistPolicy::PerResource));
    assert_eq!(config.role_id, None);
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: http://localhost:8080
  timeout_secs: 5
cache:
  ttl_hours: 2
  persist: full
role_id: 3
log:
  level: debug
  file: /tmp/etribe.log
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8080");
    assert_eq!(config.cache.ttl(), chrono::Duration::hours(2));
    assert_eq!(
      config.cache.policy(),
      Some(PersistPolicy::Uniform(PersistMode::Full))
    );
    assert_eq!(config.role_id, Some(3));
    assert_eq!(config.log.file, Some(PathBuf::from("/tmp/etribe.log")));
  }

  #[test]
  fn test_persist_off() {
    let config =
      Config::parse("api:\n  base_url: http://x\ncache:\n  persist: 'off'\n").unwrap();
    assert_eq!(config.cache.policy(), None);
  }

  #[test]
  fn test_invalid_values_rejected() {
    assert!(Config::parse("api:\n  base_url: ''\n").is_err());
    assert!(Config::parse("api:\n  base_url: http://x\n  timeout_secs: 0\n").is_err());
    assert!(Config::parse("api:\n  base_url: http://x\ncache:\n  ttl_hours: 0\n").is_err());
    assert!(Config::parse("api:\n  base_url: http://x\ncache:\n  persist: sometimes\n").is_err());
    assert!(Config::parse("role_id: 1\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    assert!(Config::load(Some(Path::new("/nonexistent/etribe.yaml"))).is_err());
  }
}
