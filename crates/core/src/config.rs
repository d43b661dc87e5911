use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Log level for the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

/// Effective configuration after merging defaults with an optional
/// config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub log_level: LogLevel,
  /// TCP address the daemon binds to. Port 0 picks an ephemeral port.
  pub bind: String,
  /// SQLite database path. `:memory:` for an ephemeral store.
  pub db_path: String,
  /// Claim TTL in seconds when the caller does not supply one.
  pub default_claim_ttl_secs: u64,
  /// Upper bound on caller-supplied claim TTLs.
  pub max_claim_ttl_secs: u64,
  /// Max concurrent active claims per author within a key's scope.
  pub wip_limit: usize,
  /// API-key creation rate limit: window length in seconds.
  pub api_key_window_secs: u64,
  /// API-key creation rate limit: max creations per window.
  pub api_key_max_per_window: usize,
  /// Export-job key lifetime in seconds.
  pub job_ttl_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      bind: "127.0.0.1:7420".to_string(),
      db_path: "relay.db".to_string(),
      default_claim_ttl_secs: 900,
      max_claim_ttl_secs: 3600,
      wip_limit: 2,
      api_key_window_secs: 3600,
      api_key_max_per_window: 5,
      job_ttl_secs: 3600,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("`{field}` must be positive")]
  NonPositive { field: &'static str },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load configuration: defaults, overridden by the file at `path` if it
/// exists.
pub fn load(path: Option<&Path>) -> Result<Config> {
  let mut cfg = Config::default();
  if let Some(path) = path
    && let Ok(s) = fs::read_to_string(path)
  {
    let partial: PartialConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg);
  }
  validate(&cfg)?;
  Ok(cfg)
}

fn validate(cfg: &Config) -> Result<()> {
  if cfg.default_claim_ttl_secs == 0 {
    return Err(ConfigError::NonPositive {
      field: "default_claim_ttl_secs",
    });
  }
  if cfg.max_claim_ttl_secs == 0 {
    return Err(ConfigError::NonPositive {
      field: "max_claim_ttl_secs",
    });
  }
  if cfg.wip_limit == 0 {
    return Err(ConfigError::NonPositive { field: "wip_limit" });
  }
  Ok(())
}

/// Partial form of [`Config`] used for file parsing; every field is
/// optional and merges over the current value.
#[derive(Debug, Clone, Default, Deserialize)]
struct PartialConfig {
  log_level: Option<LogLevel>,
  bind: Option<String>,
  db_path: Option<String>,
  default_claim_ttl_secs: Option<u64>,
  max_claim_ttl_secs: Option<u64>,
  wip_limit: Option<usize>,
  api_key_window_secs: Option<u64>,
  api_key_max_per_window: Option<usize>,
  job_ttl_secs: Option<u64>,
}

impl PartialConfig {
  fn merge_over(self, mut cfg: Config) -> Config {
    if let Some(v) = self.log_level {
      cfg.log_level = v;
    }
    if let Some(v) = self.bind {
      cfg.bind = v;
    }
    if let Some(v) = self.db_path {
      cfg.db_path = v;
    }
    if let Some(v) = self.default_claim_ttl_secs {
      cfg.default_claim_ttl_secs = v;
    }
    if let Some(v) = self.max_claim_ttl_secs {
      cfg.max_claim_ttl_secs = v;
    }
    if let Some(v) = self.wip_limit {
      cfg.wip_limit = v;
    }
    if let Some(v) = self.api_key_window_secs {
      cfg.api_key_window_secs = v;
    }
    if let Some(v) = self.api_key_max_per_window {
      cfg.api_key_max_per_window = v;
    }
    if let Some(v) = self.job_ttl_secs {
      cfg.job_ttl_secs = v;
    }
    cfg
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_when_no_file() {
    let cfg = load(None).unwrap();
    assert_eq!(cfg, Config::default());
  }

  #[test]
  fn file_overrides_defaults_partially() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("relay.toml");
    std::fs::write(&path, "wip_limit = 5\nbind = \"127.0.0.1:0\"\n").unwrap();
    let cfg = load(Some(&path)).unwrap();
    assert_eq!(cfg.wip_limit, 5);
    assert_eq!(cfg.bind, "127.0.0.1:0");
    assert_eq!(cfg.default_claim_ttl_secs, 900, "untouched fields keep defaults");
  }

  #[test]
  fn zero_wip_limit_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("relay.toml");
    std::fs::write(&path, "wip_limit = 0\n").unwrap();
    assert!(matches!(
      load(Some(&path)).unwrap_err(),
      ConfigError::NonPositive { field: "wip_limit" }
    ));
  }
}
