//! Cache state across all feeds: selection, eviction, optimistic
//! updates, and the memory report.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::entry::FeedCacheEntry;
use crate::types::{CacheMemoryReport, FeedEntry, FeedKey, FeedPage, FeedSnapshot};

/// All per-feed cache entries plus the selection and budget policy.
///
/// A feed key maps to at most one entry. The currently selected feed is
/// pinned against global-memory eviction.
pub struct CacheState {
  feeds: HashMap<FeedKey, FeedCacheEntry>,
  selected: Option<FeedKey>,
  max_items_per_feed: usize,
  memory_budget_bytes: usize,
}

impl CacheState {
  pub fn new(max_items_per_feed: usize, memory_budget_bytes: usize) -> Self {
    Self {
      feeds: HashMap::new(),
      selected: None,
      max_items_per_feed,
      memory_budget_bytes,
    }
  }

  pub fn selected(&self) -> Option<FeedKey> {
    self.selected
  }

  /// Record `key` as the currently selected feed. Returns the
  /// previously selected key if it differs.
  pub fn select(&mut self, key: FeedKey) -> Option<FeedKey> {
    let prev = self.selected;
    self.selected = Some(key);
    prev.filter(|p| *p != key)
  }

  pub fn get(&self, key: FeedKey) -> Option<&FeedCacheEntry> {
    self.feeds.get(&key)
  }

  pub fn is_stale(&self, key: FeedKey, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    self
      .feeds
      .get(&key)
      .map(|e| e.is_stale(now, threshold))
      .unwrap_or(true)
  }

  pub fn snapshot(&self, key: FeedKey) -> Option<FeedSnapshot> {
    self.feeds.get(&key).map(|e| e.snapshot(key))
  }

  /// Commit a first page for `key`, replacing any cached contents, then
  /// re-apply the per-feed cap and the global budget.
  pub fn commit_first_page(&mut self, key: FeedKey, page: FeedPage, now: DateTime<Utc>) {
    match self.feeds.get_mut(&key) {
      Some(entry) => entry.replace_with_page(page, now),
      None => {
        self.feeds.insert(key, FeedCacheEntry::from_page(page, now));
      }
    }
    self.enforce_limits(key);
  }

  /// Append a pagination page for `key`, then re-apply the caps.
  pub fn commit_next_page(&mut self, key: FeedKey, page: FeedPage, now: DateTime<Utc>) {
    if let Some(entry) = self.feeds.get_mut(&key) {
      entry.append_page(page, now);
    }
    self.enforce_limits(key);
  }

  fn enforce_limits(&mut self, key: FeedKey) {
    if let Some(entry) = self.feeds.get_mut(&key) {
      let dropped = entry.apply_cap(self.max_items_per_feed);
      if dropped > 0 {
        tracing::debug!(feed = %key, dropped, "per-feed cap truncated cache");
      }
    }
    self.enforce_budget();
  }

  /// Global-memory eviction: while the estimated total exceeds the
  /// budget, drop the least recently fetched feed other than the
  /// selected one, whole entries at a time. If only the selected feed
  /// remains over budget it is kept anyway.
  pub fn enforce_budget(&mut self) -> Vec<FeedKey> {
    let mut evicted = Vec::new();
    while self.total_bytes() > self.memory_budget_bytes {
      let victim = self
        .feeds
        .iter()
        .filter(|(key, _)| Some(**key) != self.selected)
        .min_by_key(|(_, entry)| entry.fetched_at)
        .map(|(key, _)| *key);

      let Some(victim) = victim else {
        break;
      };
      self.feeds.remove(&victim);
      tracing::debug!(feed = %victim, "evicted feed over memory budget");
      evicted.push(victim);
    }
    evicted
  }

  pub fn total_bytes(&self) -> usize {
    self.feeds.values().map(FeedCacheEntry::estimated_bytes).sum()
  }

  pub fn memory_report(&self) -> CacheMemoryReport {
    CacheMemoryReport {
      total_bytes: self.total_bytes(),
      feed_counts: FeedKey::ALL
        .iter()
        .filter_map(|key| self.feeds.get(key).map(|e| (*key, e.len())))
        .collect(),
    }
  }

  /// Apply `mutate` to the entry with identity `entry_id` in every feed
  /// that caches it, preserving positions. An entity can be visible in
  /// more than one feed at once, so all occurrences are updated.
  ///
  /// Returns the pre-images, one per feed the entry was found in; empty
  /// when the entry is not cached anywhere.
  pub fn apply_optimistic(
    &mut self,
    entry_id: &str,
    mutate: &dyn Fn(&mut FeedEntry),
  ) -> Vec<(FeedKey, FeedEntry)> {
    let mut pre_images = Vec::new();
    for (key, entry) in self.feeds.iter_mut() {
      if let Some(prior) = entry.mutate_entry(entry_id, mutate) {
        pre_images.push((*key, prior));
      }
    }
    pre_images
  }

  /// Server-wins reconcile: replace every cached occurrence of the
  /// entry with the authoritative server state.
  pub fn reconcile_entry(&mut self, server_entry: &FeedEntry) {
    for entry in self.feeds.values_mut() {
      entry.replace_entry(&server_entry.id, server_entry);
    }
  }

  /// Remove the entry from every feed that caches it.
  pub fn remove_everywhere(&mut self, entry_id: &str) -> Vec<(FeedKey, FeedEntry)> {
    let mut removed = Vec::new();
    for (key, entry) in self.feeds.iter_mut() {
      if let Some(prior) = entry.remove_entry(entry_id) {
        removed.push((*key, prior));
      }
    }
    removed
  }

  /// Optimistically place a freshly created entry at the head of the
  /// target feed, if that feed is cached.
  pub fn insert_head(&mut self, key: FeedKey, entry: FeedEntry) -> bool {
    let inserted = self
      .feeds
      .get_mut(&key)
      .map(|cached| cached.insert_head(entry))
      .unwrap_or(false);
    if inserted {
      self.enforce_limits(key);
    }
    inserted
  }

  /// Restore saved pre-images (rollback of an optimistic update). Each
  /// pre-image replaces the current value in its feed if the entry is
  /// still cached there.
  pub fn restore(&mut self, pre_images: &[(FeedKey, FeedEntry)]) {
    for (key, prior) in pre_images {
      if let Some(entry) = self.feeds.get_mut(key) {
        entry.replace_entry(&prior.id, prior);
      }
    }
  }

  pub fn mark_refresh_failed(&mut self, key: FeedKey) {
    if let Some(entry) = self.feeds.get_mut(&key) {
      entry.last_refresh_failed = true;
    }
  }

  pub fn clear(&mut self, key: FeedKey) {
    self.feeds.remove(&key);
  }

  pub fn clear_all(&mut self) {
    self.feeds.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeSet;

  fn entry_sized(id: &str, text_len: usize) -> FeedEntry {
    FeedEntry {
      id: id.to_string(),
      rating: 3.0,
      text: if text_len > 0 { Some("x".repeat(text_len)) } else { None },
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

  fn page_sized(prefix: &str, count: usize, text_len: usize) -> FeedPage {
    FeedPage {
      entries: (0..count)
        .map(|i| entry_sized(&format!("{prefix}{i}"), text_len))
        .collect(),
      cursor: None,
      has_more: false,
    }
  }

  fn now() -> DateTime<Utc> {
    Utc::now()
  }

  #[test]
  fn eviction_spares_the_selected_feed() {
    // Budget fits roughly one feed's worth of data.
    let mut cache = CacheState::new(500, 50_000);
    cache.select(FeedKey::Friends);

    let old = now() - chrono::Duration::minutes(30);
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 100, 200), old);
    cache.commit_first_page(FeedKey::Global, page_sized("g", 100, 200), now());

    // Friends is older but selected, so Global must be the victim.
    assert!(cache.get(FeedKey::Friends).is_some());
    assert!(cache.get(FeedKey::Global).is_none());
    assert!(cache.total_bytes() <= 50_000);
  }

  #[test]
  fn selected_feed_may_exceed_budget_alone() {
    let mut cache = CacheState::new(500, 10_000);
    cache.select(FeedKey::Friends);
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 100, 400), now());

    assert!(cache.total_bytes() > 10_000);
    assert!(cache.get(FeedKey::Friends).is_some());
  }

  #[test]
  fn eviction_picks_least_recently_fetched() {
    let mut cache = CacheState::new(500, 80_000);
    cache.select(FeedKey::Friends);

    cache.commit_first_page(
      FeedKey::Personal,
      page_sized("p", 100, 200),
      now() - chrono::Duration::minutes(60),
    );
    cache.commit_first_page(
      FeedKey::Global,
      page_sized("g", 100, 200),
      now() - chrono::Duration::minutes(10),
    );
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 100, 200), now());

    // Personal is the oldest unselected entry.
    assert!(cache.get(FeedKey::Personal).is_none());
    assert!(cache.get(FeedKey::Global).is_some());
    assert!(cache.get(FeedKey::Friends).is_some());
  }

  #[test]
  fn optimistic_update_reaches_all_feeds() {
    let mut cache = CacheState::new(500, usize::MAX);
    let shared = entry_sized("shared", 0);

    cache.commit_first_page(
      FeedKey::Friends,
      FeedPage {
        entries: vec![shared.clone(), entry_sized("f1", 0)],
        cursor: None,
        has_more: false,
      },
      now(),
    );
    cache.commit_first_page(
      FeedKey::Global,
      FeedPage {
        entries: vec![entry_sized("g1", 0), shared.clone()],
        cursor: None,
        has_more: false,
      },
      now(),
    );

    let pre_images = cache.apply_optimistic("shared", &|e| {
      e.viewer_reacted = true;
      e.reaction_count += 1;
    });
    assert_eq!(pre_images.len(), 2);

    for key in [FeedKey::Friends, FeedKey::Global] {
      let cached = cache.get(key).unwrap();
      let e = cached.entries().iter().find(|e| e.id == "shared").unwrap();
      assert!(e.viewer_reacted);
      assert_eq!(e.reaction_count, 1);
    }
  }

  #[test]
  fn optimistic_update_missing_entry_is_noop() {
    let mut cache = CacheState::new(500, usize::MAX);
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 3, 0), now());

    let pre_images = cache.apply_optimistic("nope", &|e| e.reaction_count += 1);
    assert!(pre_images.is_empty());
  }

  #[test]
  fn restore_reverts_pre_images_in_place() {
    let mut cache = CacheState::new(500, usize::MAX);
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 3, 0), now());

    let pre_images = cache.apply_optimistic("f1", &|e| e.reaction_count = 10);
    assert_eq!(cache.get(FeedKey::Friends).unwrap().entries()[1].reaction_count, 10);

    cache.restore(&pre_images);
    assert_eq!(cache.get(FeedKey::Friends).unwrap().entries()[1].reaction_count, 0);
  }

  #[test]
  fn memory_report_counts_per_feed() {
    let mut cache = CacheState::new(500, usize::MAX);
    cache.commit_first_page(FeedKey::Friends, page_sized("f", 2, 0), now());
    cache.commit_first_page(FeedKey::Global, page_sized("g", 0, 0), now());

    let report = cache.memory_report();
    assert_eq!(report.feed_counts, vec![(FeedKey::Friends, 2), (FeedKey::Global, 0)]);
    assert!(report.total_bytes > 0);

    // The empty feed contributes nothing to the byte total.
    let friends_bytes = cache.get(FeedKey::Friends).unwrap().estimated_bytes();
    assert_eq!(report.total_bytes, friends_bytes);
  }
}
