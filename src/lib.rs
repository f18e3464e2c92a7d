//! Client-side data synchronization core for a social content app.
//!
//! Two coupled pieces, both owned by a single engine task:
//!
//! - the **feed cache**: per-feed in-memory entry lists with
//!   staleness-triggered background refresh, single-flight fetching,
//!   a per-feed item cap, and a global memory budget that never evicts
//!   the currently selected feed;
//! - the **mutation queue**: durable pending write operations with
//!   optimistic cache updates, exponential-backoff retries, and
//!   drain-on-connectivity.
//!
//! The transport, rendering, and platform connectivity detection are
//! collaborators behind the traits in [`remote`]; durable storage is
//! behind [`store::OperationStore`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod remote;
pub mod store;
pub mod types;

pub use config::{RollbackPolicy, SyncConfig};
pub use engine::{SyncEngine, SyncHandle, SyncNotification};
pub use error::{ExecutionError, FetchError, StorageError, SyncError};
pub use remote::{Connectivity, ConnectivityFlag, ExecutionOutcome, FeedSource, MutationExecutor};
pub use store::{MemoryStore, OperationStore, SqliteStore};
pub use types::{
  CacheMemoryReport, FeedEntry, FeedKey, FeedPage, FeedSnapshot, OperationKind, PendingOperation,
};
