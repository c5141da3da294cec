use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_TTL_HOURS;
use crate::queue::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Organization the terminal sells for
  pub tenant: Option<String>,
  /// Location used for stock-scoped product lists and new sales
  pub location: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sales: SalesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_hours")]
  pub ttl_hours: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_hours: DEFAULT_TTL_HOURS,
    }
  }
}

fn default_ttl_hours() -> i64 {
  DEFAULT_TTL_HOURS
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// Drop sales the backend rejects as invalid instead of retrying them
  #[serde(default)]
  pub drop_permanent_failures: bool,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      retry_delay_ms: default_retry_delay_ms(),
      drop_permanent_failures: false,
    }
  }
}

fn default_max_attempts() -> u32 {
  DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
  2000
}

impl QueueConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      drop_permanent_failures: self.drop_permanent_failures,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

fn default_probe_interval_secs() -> u64 {
  5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (defaults to $XDG_DATA_HOME/possync/store.db)
  pub path: Option<PathBuf>,
  /// Keep everything in memory; nothing survives the process
  #[serde(default)]
  pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SalesConfig {
  /// Sent with every sale; the backend decrements stock when set
  #[serde(default = "default_true")]
  pub enable_stock_tracking: bool,
}

impl Default for SalesConfig {
  fn default() -> Self {
    Self {
      enable_stock_tracking: true,
    }
  }
}

fn default_true() -> bool {
  true
}

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_TTL_HOURS: i64 = 24 * 365;
const MAX_RETRY_DELAY_MS: u64 = 3_600_000;
const MAX_PROBE_INTERVAL_SECS: u64 = 86_400;

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./possync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/possync/config.yaml
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
        "No configuration file found. Create one at ~/.config/possync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("possync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("possync").join("config.yaml");
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
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    if !(1..=MAX_TIMEOUT_SECS).contains(&self.api.timeout_secs) {
      return Err(eyre!("api.timeout_secs must be between 1 and {}", MAX_TIMEOUT_SECS));
    }
    if !(1..=MAX_TTL_HOURS).contains(&self.cache.ttl_hours) {
      return Err(eyre!("cache.ttl_hours must be between 1 and {}", MAX_TTL_HOURS));
    }
    if self.queue.max_attempts == 0 {
      return Err(eyre!("queue.max_attempts must be at least 1"));
    }
    if self.queue.retry_delay_ms > MAX_RETRY_DELAY_MS {
      return Err(eyre!("queue.retry_delay_ms must be at most {}", MAX_RETRY_DELAY_MS));
    }
    if !(1..=MAX_PROBE_INTERVAL_SECS).contains(&self.network.probe_interval_secs) {
      return Err(eyre!(
        "network.probe_interval_secs must be between 1 and {}",
        MAX_PROBE_INTERVAL_SECS
      ));
    }
    Ok(())
  }

  /// Apply command-line overrides.
  pub fn with_overrides(mut self, tenant: Option<String>, location: Option<String>) -> Self {
    if tenant.is_some() {
      self.tenant = tenant;
    }
    if location.is_some() {
      self.location = location;
    }
    self
  }

  /// The tenant to act for, which every command needs.
  pub fn require_tenant(&self) -> Result<&str> {
    self
      .tenant
      .as_deref()
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| eyre!("No tenant configured. Set `tenant` in the config file or pass --tenant."))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks POSSYNC_API_TOKEN first, then POS_API_TOKEN as fallback.
  /// Requests are sent unauthenticated when neither is set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("POSSYNC_API_TOKEN")
      .or_else(|_| std::env::var("POS_API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}
