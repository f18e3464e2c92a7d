//! Contracts for the external collaborators the engine talks to:
//! the remote feed source, the remote mutation executor, and the
//! connectivity signal.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{ExecutionError, FetchError};
use crate::types::{FeedEntry, FeedKey, FeedPage, PendingOperation};

/// Remote source of feed pages.
///
/// `fetch` must be idempotent for a given `(key, cursor)` pair and have
/// no side effects; timeout policy is the implementor's concern and a
/// timeout simply surfaces as a `FetchError`.
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
  async fn fetch(&self, key: FeedKey, cursor: Option<String>) -> Result<FeedPage, FetchError>;
}

/// Authoritative server state returned by a successful mutation.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
  /// The server's version of the affected entry (server-wins reconcile).
  Entry(FeedEntry),
  /// The entry was deleted server-side.
  Deleted(String),
  /// The operation succeeded but affects no cached entry (follow etc.).
  Acknowledged,
}

/// Executes pending mutations against the server.
///
/// The engine may execute the same operation more than once if a prior
/// success acknowledgment was lost; implementors should be idempotent
/// server-side or accept at-least-once semantics.
#[async_trait]
pub trait MutationExecutor: Send + Sync + 'static {
  async fn execute(&self, op: &PendingOperation) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Source of the device's reachability state.
pub trait Connectivity: Send + Sync + 'static {
  fn is_online(&self) -> bool;
  /// Change notifications; the receiver's value is the current state.
  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// In-process connectivity flag backed by a watch channel.
///
/// Production wires this to the platform reachability callback; tests
/// toggle it directly.
#[derive(Clone)]
pub struct ConnectivityFlag {
  tx: watch::Sender<bool>,
}

impl ConnectivityFlag {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn set_online(&self, online: bool) {
    // send_replace never fails; the sender holds its own receiver slot.
    self.tx.send_replace(online);
  }
}

impl Connectivity for ConnectivityFlag {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}
