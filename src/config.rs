use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::EndpointFamily;
use crate::breaker::{DEFAULT_COOLDOWN_SECS, DEFAULT_THRESHOLD};
use crate::cache::DEFAULT_FALLBACK_WINDOW_DAYS;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub backend: BackendConfig,
  pub breaker: BreakerConfig,
  pub cache: CacheConfig,
  pub connectivity: ConnectivityConfig,
  /// State database location (defaults to the data directory)
  pub state_path: Option<PathBuf>,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub url: String,
  /// Sending a chat message runs the agent, which can take a while
  pub chat_timeout_secs: u64,
  pub read_timeout_secs: u64,
  pub write_timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:3001".to_string(),
      chat_timeout_secs: 90,
      read_timeout_secs: 15,
      write_timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
  pub threshold: u32,
  pub cooldown_secs: i64,
  /// Per-family overrides, keyed by family name
  pub families: BTreeMap<EndpointFamily, BreakerOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakerOverride {
  pub threshold: Option<u32>,
  pub cooldown_secs: Option<i64>,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      cooldown_secs: DEFAULT_COOLDOWN_SECS,
      families: BTreeMap::new(),
    }
  }
}

impl BreakerConfig {
  /// Threshold and cooldown for one family, after applying overrides.
  pub fn for_family(&self, family: EndpointFamily) -> (u32, Duration) {
    let over = self.families.get(&family);
    let threshold = over.and_then(|o| o.threshold).unwrap_or(self.threshold);
    let cooldown = over
      .and_then(|o| o.cooldown_secs)
      .unwrap_or(self.cooldown_secs);
    (threshold, Duration::seconds(cooldown))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub tools_ttl_secs: i64,
  pub conversations_ttl_secs: i64,
  pub fallback_window_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      tools_ttl_secs: 15 * 60,
      conversations_ttl_secs: 30,
      fallback_window_days: DEFAULT_FALLBACK_WINDOW_DAYS,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: 10,
      probe_timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Directory for log files (defaults to the data directory)
  pub directory: Option<PathBuf>,
  /// tracing filter directive, overridden by RUST_LOG
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./socgate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/socgate/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("socgate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("socgate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let breaker = &self.breaker;
    check_threshold("breaker.threshold", breaker.threshold)?;
    check_at_least("breaker.cooldown_secs", breaker.cooldown_secs, 1)?;
    for (family, over) in &breaker.families {
      if let Some(threshold) = over.threshold {
        check_threshold(&format!("breaker.families.{}.threshold", family.as_str()), threshold)?;
      }
      if let Some(cooldown) = over.cooldown_secs {
        check_at_least(
          &format!("breaker.families.{}.cooldown_secs", family.as_str()),
          cooldown,
          1,
        )?;
      }
    }

    check_at_least("cache.tools_ttl_secs", self.cache.tools_ttl_secs, 0)?;
    check_at_least("cache.conversations_ttl_secs", self.cache.conversations_ttl_secs, 0)?;
    check_at_least("cache.fallback_window_days", self.cache.fallback_window_days, 1)?;
    Ok(())
  }

  /// Get the backend API token from the environment, if set.
  ///
  /// Checks SOCGATE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SOCGATE_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

fn check_threshold(field: &str, value: u32) -> Result<()> {
  if value == 0 {
    return Err(eyre!("{} must be at least 1", field));
  }
  Ok(())
}

fn check_at_least(field: &str, value: i64, min: i64) -> Result<()> {
  if value < min {
    return Err(eyre!("{} must be at least {}, got {}", field, min, value));
  }
  Ok(())
}
