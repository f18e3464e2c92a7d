//! Engine configuration with YAML file loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// What to do with an operation's optimistic cache effect when the
/// operation fails permanently.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPolicy {
  /// Leave the optimistic state in place (default).
  #[default]
  Keep,
  /// Restore the saved pre-images of entries the operation modified.
  /// Optimistic creations and deletions are left as-is.
  Revert,
}

/// Tunables for the feed cache and the mutation queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Cached data older than this is served immediately but triggers a
  /// background refresh.
  pub stale_threshold_secs: u64,
  /// Hard cap on items retained per feed; overflow drops the oldest end.
  pub max_items_per_feed: usize,
  /// Estimated-bytes budget across all cached feeds.
  pub memory_budget_bytes: usize,
  /// Failed mutation attempts before an operation is terminal.
  pub max_retries: u32,
  pub rollback: RollbackPolicy,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      stale_threshold_secs: 5 * 60,
      max_items_per_feed: 500,
      memory_budget_bytes: 10 * 1024 * 1024,
      max_retries: 3,
      rollback: RollbackPolicy::Keep,
    }
  }
}

impl SyncConfig {
  pub fn stale_threshold(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_threshold_secs as i64)
  }

  /// Backoff delay before retry attempt number `retry_count`.
  pub fn backoff_delay(&self, retry_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry_count))
  }

  /// Load configuration from file, falling back to defaults when no
  /// file exists.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
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
    let local = PathBuf::from("feedsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.display().to_string(),
      source: e,
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.display().to_string(),
      source: e,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_constants() {
    let cfg = SyncConfig::default();
    assert_eq!(cfg.stale_threshold_secs, 300);
    assert_eq!(cfg.max_items_per_feed, 500);
    assert_eq!(cfg.memory_budget_bytes, 10 * 1024 * 1024);
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.rollback, RollbackPolicy::Keep);
  }

  #[test]
  fn backoff_doubles_per_retry() {
    let cfg = SyncConfig::default();
    assert_eq!(cfg.backoff_delay(1), Duration::from_secs(2));
    assert_eq!(cfg.backoff_delay(2), Duration::from_secs(4));
  }

  #[test]
  fn partial_yaml_overrides_defaults() {
    let cfg: SyncConfig = serde_yaml::from_str("max_retries: 5\nrollback: revert\n").unwrap();
    assert_eq!(cfg.max_retries, 5);
    assert_eq!(cfg.rollback, RollbackPolicy::Revert);
    assert_eq!(cfg.max_items_per_feed, 500);
  }
}
