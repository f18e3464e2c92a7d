//! Durable storage for pending operations.
//!
//! The store is the single source of truth for which operations are
//! pending across process restarts: an operation is written before its
//! optimistic effect is applied and deleted only once it is terminal.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::types::{OperationKind, PendingOperation};

/// Crash-consistent store for pending operations.
///
/// All calls are synchronous from the caller's perspective; a `put`
/// that returns `Ok` must survive an immediate process termination.
pub trait OperationStore: Send + Sync {
  /// Insert or update an operation.
  fn put(&self, op: &PendingOperation) -> Result<(), StorageError>;

  /// Remove a terminal operation.
  fn delete(&self, op_id: &str) -> Result<(), StorageError>;

  /// All persisted operations, oldest first.
  fn list_all(&self) -> Result<Vec<PendingOperation>, StorageError>;
}

/// In-memory store for tests and callers that opt out of durability.
#[derive(Default)]
pub struct MemoryStore {
  ops: Mutex<Vec<PendingOperation>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl OperationStore for MemoryStore {
  fn put(&self, op: &PendingOperation) -> Result<(), StorageError> {
    let mut ops = self.ops.lock().map_err(|_| StorageError::LockPoisoned)?;
    if let Some(existing) = ops.iter_mut().find(|o| o.id == op.id) {
      *existing = op.clone();
    } else {
      ops.push(op.clone());
    }
    Ok(())
  }

  fn delete(&self, op_id: &str) -> Result<(), StorageError> {
    let mut ops = self.ops.lock().map_err(|_| StorageError::LockPoisoned)?;
    ops.retain(|o| o.id != op_id);
    Ok(())
  }

  fn list_all(&self) -> Result<Vec<PendingOperation>, StorageError> {
    let ops = self.ops.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(ops.clone())
  }
}

/// SQLite-backed operation store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the pending-operation table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_operations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_created
    ON pending_operations(created_at);
"#;

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    // Full synchronous mode so a successful put survives a crash.
    conn.pragma_update(None, "synchronous", "FULL")?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StorageError::NoDataDir)?;

    Ok(data_dir.join("feedsync").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
    conn.execute_batch(QUEUE_SCHEMA)?;
    Ok(())
  }
}

impl OperationStore for SqliteStore {
  fn put(&self, op: &PendingOperation) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

    conn.execute(
      "INSERT OR REPLACE INTO pending_operations (id, kind, payload, created_at, retry_count)
       VALUES (?, ?, ?, ?, ?)",
      params![
        op.id,
        op.kind.as_str(),
        op.payload,
        op.created_at.to_rfc3339(),
        op.retry_count,
      ],
    )?;

    Ok(())
  }

  fn delete(&self, op_id: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
    conn.execute(
      "DELETE FROM pending_operations WHERE id = ?",
      params![op_id],
    )?;
    Ok(())
  }

  fn list_all(&self) -> Result<Vec<PendingOperation>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

    let mut stmt = conn.prepare(
      "SELECT id, kind, payload, created_at, retry_count
       FROM pending_operations ORDER BY created_at, id",
    )?;

    let rows = stmt.query_map([], |row| {
      let id: String = row.get(0)?;
      let kind: String = row.get(1)?;
      let payload: String = row.get(2)?;
      let created_at: String = row.get(3)?;
      let retry_count: u32 = row.get(4)?;
      Ok((id, kind, payload, created_at, retry_count))
    })?;

    let mut ops = Vec::new();
    for row in rows {
      let (id, kind, payload, created_at, retry_count) = row?;
      // Skip rows with an unknown kind rather than failing the reload;
      // they can only come from a newer schema version.
      let Some(kind) = OperationKind::parse(&kind) else {
        tracing::warn!(op_id = %id, kind = %kind, "skipping operation with unknown kind");
        continue;
      };
      let created_at = created_at
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| Utc::now());
      ops.push(PendingOperation {
        id,
        kind,
        payload,
        created_at,
        retry_count,
      });
    }

    Ok(ops)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn op(kind: OperationKind, payload: &str) -> PendingOperation {
    PendingOperation::new(kind, payload.to_string())
  }

  #[test]
  fn sqlite_roundtrip_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("queue.db")).unwrap();

    let a = op(OperationKind::ToggleReaction, r#"{"entry_id":"item1"}"#);
    let b = op(OperationKind::Follow, r#"{"user_id":"user9"}"#);
    store.put(&a).unwrap();
    store.put(&b).unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, a.id);
    assert_eq!(all[0].kind, OperationKind::ToggleReaction);
    assert_eq!(all[0].payload, r#"{"entry_id":"item1"}"#);

    store.delete(&a.id).unwrap();
    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, b.id);
  }

  #[test]
  fn sqlite_put_updates_retry_count() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("queue.db")).unwrap();

    let mut a = op(OperationKind::AddComment, r#"{"entry_id":"item1","text":"hi"}"#);
    store.put(&a).unwrap();
    a.retry_count = 2;
    store.put(&a).unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].retry_count, 2);
  }

  #[test]
  fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let a = op(OperationKind::DeleteEntry, r#"{"entry_id":"item3"}"#);
    {
      let store = SqliteStore::open_at(&path).unwrap();
      store.put(&a).unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, a.id);
  }

  #[test]
  fn memory_store_preserves_order() {
    let store = MemoryStore::new();
    let a = op(OperationKind::Follow, r#"{"user_id":"u1"}"#);
    let b = op(OperationKind::Unfollow, r#"{"user_id":"u1"}"#);
    store.put(&a).unwrap();
    store.put(&b).unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all[0].id, a.id);
    assert_eq!(all[1].id, b.id);
  }
}
