//! Core data types shared by the feed cache and the mutation queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier for one of the app's content streams.
///
/// The set is small and fixed; ordering is declaration order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKey {
  Friends,
  Personal,
  Global,
}

impl FeedKey {
  /// All feed keys, in declaration order.
  pub const ALL: [FeedKey; 3] = [FeedKey::Friends, FeedKey::Personal, FeedKey::Global];

  pub fn as_str(&self) -> &'static str {
    match self {
      FeedKey::Friends => "friends",
      FeedKey::Personal => "personal",
      FeedKey::Global => "global",
    }
  }
}

impl std::fmt::Display for FeedKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One content item in a feed.
///
/// Entries are immutable values; a mutation replaces the whole entry.
/// Equality and uniqueness are by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
  pub id: String,
  pub rating: f64,
  pub text: Option<String>,
  pub media_url: Option<String>,
  pub author_id: String,
  pub subject_id: String,
  pub reaction_count: u32,
  pub comment_count: u32,
  /// Whether the current user has reacted to this entry.
  pub viewer_reacted: bool,
  pub created_at: DateTime<Utc>,
  pub tags: BTreeSet<String>,
}

impl PartialEq for FeedEntry {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for FeedEntry {}

impl std::hash::Hash for FeedEntry {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl FeedEntry {
  /// Rough in-memory footprint used for the global cache budget.
  ///
  /// Counts the owned string data plus a fixed overhead for the struct
  /// itself and the collection headers.
  pub fn estimated_size(&self) -> usize {
    const BASE: usize = 160;

    BASE
      + self.id.len()
      + self.text.as_deref().map_or(0, str::len)
      + self.media_url.as_deref().map_or(0, str::len)
      + self.author_id.len()
      + self.subject_id.len()
      + self.tags.iter().map(|t| t.len() + 16).sum::<usize>()
  }
}

/// One page of feed entries as returned by the remote source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
  pub entries: Vec<FeedEntry>,
  /// Opaque cursor to request the page after this one.
  pub cursor: Option<String>,
  pub has_more: bool,
}

/// Read-only view of one feed's cached state, handed to the UI.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
  pub key: FeedKey,
  pub entries: Vec<FeedEntry>,
  /// When the last successful fetch for this feed completed.
  pub fetched_at: Option<DateTime<Utc>>,
  pub has_more: bool,
  /// Set when the per-feed cap dropped items, so the cursor no longer
  /// re-extends the feed losslessly.
  pub truncated: bool,
  /// Set when the most recent refresh failed but cached data was kept.
  pub last_refresh_failed: bool,
}

/// Read-only snapshot of cache occupancy across all feeds.
#[derive(Debug, Clone)]
pub struct CacheMemoryReport {
  pub total_bytes: usize,
  /// Item count per cached feed, in `FeedKey` declaration order.
  pub feed_counts: Vec<(FeedKey, usize)>,
}

/// Kind of a pending write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  CreateEntry,
  UpdateEntry,
  DeleteEntry,
  ToggleReaction,
  AddComment,
  Follow,
  Unfollow,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::CreateEntry => "create_entry",
      OperationKind::UpdateEntry => "update_entry",
      OperationKind::DeleteEntry => "delete_entry",
      OperationKind::ToggleReaction => "toggle_reaction",
      OperationKind::AddComment => "add_comment",
      OperationKind::Follow => "follow",
      OperationKind::Unfollow => "unfollow",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "create_entry" => Some(OperationKind::CreateEntry),
      "update_entry" => Some(OperationKind::UpdateEntry),
      "delete_entry" => Some(OperationKind::DeleteEntry),
      "toggle_reaction" => Some(OperationKind::ToggleReaction),
      "add_comment" => Some(OperationKind::AddComment),
      "follow" => Some(OperationKind::Follow),
      "unfollow" => Some(OperationKind::Unfollow),
      _ => None,
    }
  }
}

/// A durable write operation waiting to reach the server.
///
/// Persisted from `enqueue` until it either succeeds or exhausts its
/// retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
  pub id: String,
  pub kind: OperationKind,
  /// Serialized payload, one of the `*Payload` types in this module.
  pub payload: String,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
}

static OP_SEQ: AtomicU64 = AtomicU64::new(0);

impl PendingOperation {
  /// Create a fresh operation with a process-unique id.
  pub fn new(kind: OperationKind, payload: String) -> Self {
    let seq = OP_SEQ.fetch_add(1, Ordering::Relaxed);
    Self {
      id: format!("op-{}-{}", Utc::now().timestamp_millis(), seq),
      kind,
      payload,
      created_at: Utc::now(),
      retry_count: 0,
    }
  }

  /// Identity of the entity this operation targets, used to keep
  /// per-entity FIFO ordering while draining.
  pub fn target_id(&self) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(&self.payload).ok()?;
    match self.kind {
      OperationKind::Follow | OperationKind::Unfollow => value
        .get("user_id")
        .and_then(|v| v.as_str())
        .map(String::from),
      OperationKind::CreateEntry => value
        .get("entry")
        .and_then(|e| e.get("id"))
        .and_then(|v| v.as_str())
        .map(String::from),
      _ => value
        .get("entry_id")
        .and_then(|v| v.as_str())
        .map(String::from),
    }
  }
}

// ============================================================================
// Operation payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntryPayload {
  /// Feed the new entry should appear in optimistically.
  pub feed: FeedKey,
  pub entry: FeedEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntryPayload {
  pub entry_id: String,
  pub rating: Option<f64>,
  pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEntryPayload {
  pub entry_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleReactionPayload {
  pub entry_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommentPayload {
  pub entry_id: String,
  pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowPayload {
  pub user_id: String,
}
