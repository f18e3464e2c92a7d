//! Error taxonomy for fetches, mutation execution, and durable storage.

use thiserror::Error;

/// Failure while fetching a feed page from the remote source.
///
/// Always recoverable: either retried later or absorbed by falling back
/// to cached data.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),
  #[error("malformed response: {0}")]
  Malformed(String),
  #[error("server error (status {0})")]
  Server(u16),
  #[error("feed not found")]
  NotFound,
}

/// Failure while executing a pending mutation against the server.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
  #[error("network error: {0}")]
  Network(String),
  /// The server rejected the operation as invalid. Retrying cannot
  /// succeed, so this is terminal without consuming the retry budget.
  #[error("rejected by server: {0}")]
  Validation(String),
  /// The server reports the operation was already applied.
  #[error("conflict: operation already applied")]
  AlreadyApplied,
}

impl ExecutionError {
  /// Whether retrying this error can ever succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ExecutionError::Network(_))
  }
}

/// Failure in the durable operation store.
///
/// Treated as fatal to the enqueue/drain cycle that hit it: losing the
/// durability guarantee is worse than failing the operation.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("could not determine data directory")]
  NoDataDir,
  #[error("store lock poisoned")]
  LockPoisoned,
}

/// Error for loading the engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    source: serde_yaml::Error,
  },
  #[error("config file not found: {0}")]
  NotFound(String),
}

/// Top-level error surfaced by the public engine API.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Storage(#[from] StorageError),
  /// The engine task has shut down and can no longer serve requests.
  #[error("sync engine is closed")]
  EngineClosed,
}
