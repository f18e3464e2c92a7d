//! Cached state for a single feed.

use chrono::{DateTime, Utc};

use crate::types::{FeedEntry, FeedKey, FeedPage, FeedSnapshot};

/// One feed's cached entries plus fetch metadata.
///
/// Owned exclusively by the cache; snapshots handed out are clones.
/// Insertion order reflects server/display order: refresh puts the
/// newest page at the head, pagination appends at the tail.
#[derive(Debug, Clone)]
pub struct FeedCacheEntry {
  entries: Vec<FeedEntry>,
  pub fetched_at: DateTime<Utc>,
  pub cursor: Option<String>,
  pub has_more: bool,
  /// The per-feed cap dropped items; the cursor is kept but no longer
  /// re-extends the feed losslessly.
  pub truncated: bool,
  pub last_refresh_failed: bool,
  bytes: usize,
}

impl FeedCacheEntry {
  /// Build a fresh entry from a first page.
  pub fn from_page(page: FeedPage, now: DateTime<Utc>) -> Self {
    let mut entry = Self {
      entries: page.entries,
      fetched_at: now,
      cursor: page.cursor,
      has_more: page.has_more,
      truncated: false,
      last_refresh_failed: false,
      bytes: 0,
    };
    entry.dedupe();
    entry.recompute_bytes();
    entry
  }

  /// Replace contents with a fresh first page (refresh).
  pub fn replace_with_page(&mut self, page: FeedPage, now: DateTime<Utc>) {
    self.entries = page.entries;
    self.cursor = page.cursor;
    self.has_more = page.has_more;
    self.fetched_at = now;
    self.truncated = false;
    self.last_refresh_failed = false;
    self.dedupe();
    self.recompute_bytes();
  }

  /// Append the next page at the tail (pagination).
  ///
  /// Incoming entries whose identity is already cached are skipped so
  /// identities stay unique.
  pub fn append_page(&mut self, page: FeedPage, now: DateTime<Utc>) {
    for incoming in page.entries {
      if !self.entries.iter().any(|e| e.id == incoming.id) {
        self.entries.push(incoming);
      }
    }
    self.cursor = page.cursor;
    self.has_more = page.has_more;
    self.fetched_at = now;
    self.last_refresh_failed = false;
    self.recompute_bytes();
  }

  /// Enforce the per-feed item cap, dropping the oldest (head) surplus.
  ///
  /// Returns how many items were dropped. Truncation forfeits lossless
  /// re-extension, so `has_more` is forced off.
  pub fn apply_cap(&mut self, max_items: usize) -> usize {
    if self.entries.len() <= max_items {
      return 0;
    }
    let overflow = self.entries.len() - max_items;
    self.entries.drain(0..overflow);
    self.has_more = false;
    self.truncated = true;
    self.recompute_bytes();
    overflow
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> &[FeedEntry] {
    &self.entries
  }

  /// Identity of the current tail entry, the pagination anchor.
  pub fn tail_id(&self) -> Option<&str> {
    self.entries.last().map(|e| e.id.as_str())
  }

  pub fn estimated_bytes(&self) -> usize {
    self.bytes
  }

  pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    now - self.fetched_at > threshold
  }

  /// Replace the entry with identity `entry_id` in place, preserving
  /// its position. Returns the previous value if found.
  pub fn replace_entry(&mut self, entry_id: &str, new_entry: &FeedEntry) -> Option<FeedEntry> {
    let slot = self.entries.iter_mut().find(|e| e.id == entry_id)?;
    let prior = std::mem::replace(slot, new_entry.clone());
    self.recompute_bytes();
    Some(prior)
  }

  /// Apply `mutate` to the entry with identity `entry_id`, preserving
  /// its position. Returns the pre-image if found.
  pub fn mutate_entry(
    &mut self,
    entry_id: &str,
    mutate: &dyn Fn(&mut FeedEntry),
  ) -> Option<FeedEntry> {
    let slot = self.entries.iter_mut().find(|e| e.id == entry_id)?;
    let prior = slot.clone();
    mutate(slot);
    self.recompute_bytes();
    Some(prior)
  }

  /// Remove the entry with identity `entry_id`. Returns it if found.
  pub fn remove_entry(&mut self, entry_id: &str) -> Option<FeedEntry> {
    let pos = self.entries.iter().position(|e| e.id == entry_id)?;
    let removed = self.entries.remove(pos);
    self.recompute_bytes();
    Some(removed)
  }

  /// Insert a new entry at the head (newest-first display position).
  /// No-op if the identity is already present.
  pub fn insert_head(&mut self, entry: FeedEntry) -> bool {
    if self.entries.iter().any(|e| e.id == entry.id) {
      return false;
    }
    self.entries.insert(0, entry);
    self.recompute_bytes();
    true
  }

  pub fn snapshot(&self, key: FeedKey) -> FeedSnapshot {
    FeedSnapshot {
      key,
      entries: self.entries.clone(),
      fetched_at: Some(self.fetched_at),
      has_more: self.has_more,
      truncated: self.truncated,
      last_refresh_failed: self.last_refresh_failed,
    }
  }

  fn dedupe(&mut self) {
    let mut seen = std::collections::HashSet::new();
    self.entries.retain(|e| seen.insert(e.id.clone()));
  }

  fn recompute_bytes(&mut self) {
    self.bytes = self.entries.iter().map(FeedEntry::estimated_size).sum();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::FeedEntry;
  use std::collections::BTreeSet;

  fn entry(id: &str) -> FeedEntry {
    FeedEntry {
      id: id.to_string(),
      rating: 3.5,
      text: None,
      media_url: None,
      author_id: "author1".to_string(),
      subject_id: "subject1".to_string(),
      reaction_count: 0,
      comment_count: 0,
      viewer_reacted: false,
      created_at: Utc::now(),
      tags: BTreeSet::new(),
    }
  }

  fn page(ids: &[&str], cursor: Option<&str>, has_more: bool) -> FeedPage {
    FeedPage {
      entries: ids.iter().map(|id| entry(id)).collect(),
      cursor: cursor.map(String::from),
      has_more,
    }
  }

  #[test]
  fn append_skips_duplicate_identities() {
    let mut cached = FeedCacheEntry::from_page(page(&["item1", "item2"], Some("c1"), true), Utc::now());
    cached.append_page(page(&["item2", "item3"], Some("c2"), true), Utc::now());

    let ids: Vec<_> = cached.entries().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["item1", "item2", "item3"]);
    assert_eq!(cached.cursor.as_deref(), Some("c2"));
  }

  #[test]
  fn cap_drops_oldest_and_clears_has_more() {
    // 500 cached items item101..item600, then 100 more with no further pages.
    let ids: Vec<String> = (101..=600).map(|i| format!("item{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut cached = FeedCacheEntry::from_page(page(&id_refs, Some("c1"), true), Utc::now());
    assert_eq!(cached.len(), 500);

    let more: Vec<String> = (601..=700).map(|i| format!("item{i}")).collect();
    let more_refs: Vec<&str> = more.iter().map(String::as_str).collect();
    cached.append_page(page(&more_refs, None, false), Utc::now());
    assert_eq!(cached.len(), 600);

    let dropped = cached.apply_cap(500);
    assert_eq!(dropped, 100);
    assert_eq!(cached.len(), 500);
    assert!(!cached.has_more);
    assert!(cached.truncated);
    // Oldest end was dropped: items 101..200 are gone.
    assert_eq!(cached.entries()[0].id, "item201");
    assert_eq!(cached.entries()[499].id, "item700");
  }

  #[test]
  fn cap_is_noop_under_limit() {
    let mut cached = FeedCacheEntry::from_page(page(&["item1"], None, true), Utc::now());
    assert_eq!(cached.apply_cap(500), 0);
    assert!(cached.has_more);
    assert!(!cached.truncated);
  }

  #[test]
  fn replace_preserves_position() {
    let mut cached =
      FeedCacheEntry::from_page(page(&["item1", "item2", "item3"], None, false), Utc::now());
    let mut server = entry("item2");
    server.reaction_count = 42;

    let prior = cached.replace_entry("item2", &server).unwrap();
    assert_eq!(prior.reaction_count, 0);
    assert_eq!(cached.entries()[1].reaction_count, 42);
  }

  #[test]
  fn refresh_clears_failure_and_truncation_flags() {
    let mut cached = FeedCacheEntry::from_page(page(&["item1"], None, false), Utc::now());
    cached.last_refresh_failed = true;
    cached.truncated = true;

    cached.replace_with_page(page(&["item9"], Some("c"), true), Utc::now());
    assert!(!cached.last_refresh_failed);
    assert!(!cached.truncated);
    assert_eq!(cached.entries()[0].id, "item9");
  }

  #[test]
  fn empty_page_reports_zero_bytes() {
    let cached = FeedCacheEntry::from_page(page(&[], None, false), Utc::now());
    assert_eq!(cached.len(), 0);
    assert_eq!(cached.estimated_bytes(), 0);
  }
}
