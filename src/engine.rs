//! The sync engine task: single logical owner of the feed cache and
//! the mutation queue.
//!
//! All mutable state lives on one task. Callers talk to it through a
//! [`SyncHandle`] that sends commands over a channel and awaits oneshot
//! replies; spawned network work delivers its result back into the same
//! channel as an event carrying the generation token it was issued
//! with. A result whose token is no longer current is dropped, which is
//! how background refreshes are cancelled without interrupting the
//! underlying request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::cache::CacheState;
use crate::config::{RollbackPolicy, SyncConfig};
use crate::error::{ExecutionError, FetchError, StorageError, SyncError};
use crate::queue::{QueueState, QueuedOp};
use crate::remote::{Connectivity, ExecutionOutcome, FeedSource, MutationExecutor};
use crate::store::OperationStore;
use crate::types::{
  AddCommentPayload, CacheMemoryReport, CreateEntryPayload, DeleteEntryPayload, FeedKey, FeedPage,
  FeedSnapshot, OperationKind, PendingOperation, ToggleReactionPayload, UpdateEntryPayload,
};

/// User-visible queue events, for "syncing" indicators and failure
/// toasts.
#[derive(Debug, Clone)]
pub enum SyncNotification {
  OperationSynced {
    operation_id: String,
    kind: OperationKind,
  },
  /// The operation failed permanently and was dropped from the queue.
  OperationFailed {
    operation_id: String,
    kind: OperationKind,
  },
  /// A durable-store write failed mid-drain. The drain cycle stops, so
  /// in-memory queue state may disagree with the store until the next
  /// drain trigger (connectivity change or manual sync).
  StorageDegraded {
    operation_id: String,
    error: String,
  },
}

type SnapshotReply = oneshot::Sender<Result<FeedSnapshot, SyncError>>;

enum Command {
  Select {
    key: FeedKey,
    reply: SnapshotReply,
  },
  Refresh {
    key: FeedKey,
    reply: SnapshotReply,
  },
  LoadMore {
    key: FeedKey,
    anchor_id: String,
    reply: SnapshotReply,
  },
  Enqueue {
    kind: OperationKind,
    payload: String,
    reply: oneshot::Sender<Result<String, SyncError>>,
  },
  /// Manual sync / app-foreground drain trigger.
  Sync,
  Snapshot {
    key: FeedKey,
    reply: oneshot::Sender<Option<FeedSnapshot>>,
  },
  MemoryReport {
    reply: oneshot::Sender<CacheMemoryReport>,
  },
  PendingCount {
    reply: oneshot::Sender<usize>,
  },
  Clear {
    key: Option<FeedKey>,
    reply: oneshot::Sender<()>,
  },
}

enum Msg {
  Cmd(Command),
  FetchDone {
    key: FeedKey,
    generation: u64,
    result: Result<FeedPage, FetchError>,
  },
  ExecDone {
    op_id: String,
    result: Result<ExecutionOutcome, ExecutionError>,
  },
  RetryTimer,
  Connectivity(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
  FirstPage,
  NextPage,
}

/// An outstanding fetch for one feed key. At most one exists per key;
/// later callers attach as waiters instead of issuing duplicates.
struct InflightFetch {
  generation: u64,
  kind: FetchKind,
  /// Background refreshes have no waiters and may be cancelled when the
  /// user navigates away or a manual refresh supersedes them.
  background: bool,
  waiters: Vec<SnapshotReply>,
}

/// Cloneable handle to a running sync engine.
#[derive(Clone)]
pub struct SyncHandle {
  tx: mpsc::UnboundedSender<Msg>,
}

impl SyncHandle {
  /// Make `key` the current feed and return its contents.
  ///
  /// Blocks on a first-page fetch only when nothing is cached yet;
  /// stale cached data is returned immediately and refreshed in the
  /// background.
  pub async fn select(&self, key: FeedKey) -> Result<FeedSnapshot, SyncError> {
    self
      .request(|reply| Command::Select { key, reply })
      .await?
  }

  /// Force a first-page fetch for `key`, superseding any background
  /// refresh already running for it.
  pub async fn refresh(&self, key: FeedKey) -> Result<FeedSnapshot, SyncError> {
    self
      .request(|reply| Command::Refresh { key, reply })
      .await?
  }

  /// Fetch the next page for `key` if `anchor_id` is still the cached
  /// tail and no other fetch is outstanding; otherwise returns the
  /// current snapshot unchanged.
  pub async fn load_more(&self, key: FeedKey, anchor_id: &str) -> Result<FeedSnapshot, SyncError> {
    let anchor_id = anchor_id.to_string();
    self
      .request(|reply| Command::LoadMore {
        key,
        anchor_id,
        reply,
      })
      .await?
  }

  /// Durably enqueue a mutation and apply its optimistic effect.
  ///
  /// Returns the operation id once the operation is persisted; the
  /// actual server round trip happens asynchronously.
  pub async fn enqueue<P: Serialize>(
    &self,
    kind: OperationKind,
    payload: &P,
  ) -> Result<String, SyncError> {
    let payload = serde_json::to_string(payload)
      .map_err(|e| SyncError::Storage(StorageError::Serialization(e)))?;
    self
      .request(|reply| Command::Enqueue {
        kind,
        payload,
        reply,
      })
      .await?
  }

  /// Trigger a drain attempt (manual sync or app-foreground).
  pub fn sync(&self) {
    let _ = self.tx.send(Msg::Cmd(Command::Sync));
  }

  /// Current cached snapshot for `key`, without fetching.
  pub async fn snapshot(&self, key: FeedKey) -> Result<Option<FeedSnapshot>, SyncError> {
    self.request(|reply| Command::Snapshot { key, reply }).await
  }

  pub async fn memory_report(&self) -> Result<CacheMemoryReport, SyncError> {
    self.request(|reply| Command::MemoryReport { reply }).await
  }

  /// Number of operations still waiting to reach the server.
  pub async fn pending_count(&self) -> Result<usize, SyncError> {
    self.request(|reply| Command::PendingCount { reply }).await
  }

  pub async fn clear(&self, key: FeedKey) -> Result<(), SyncError> {
    self
      .request(|reply| Command::Clear {
        key: Some(key),
        reply,
      })
      .await
  }

  pub async fn clear_all(&self) -> Result<(), SyncError> {
    self.request(|reply| Command::Clear { key: None, reply }).await
  }

  async fn request<T>(
    &self,
    make: impl FnOnce(oneshot::Sender<T>) -> Command,
  ) -> Result<T, SyncError> {
    let (tx, rx) = oneshot::channel();
    self
      .tx
      .send(Msg::Cmd(make(tx)))
      .map_err(|_| SyncError::EngineClosed)?;
    rx.await.map_err(|_| SyncError::EngineClosed)
  }
}

/// Factory for the engine task.
pub struct SyncEngine;

impl SyncEngine {
  /// Spawn the engine task and return its handle plus the notification
  /// stream.
  ///
  /// Reloads any operations persisted by a previous run and resumes
  /// draining them; the feed cache itself starts empty, so the first
  /// `select` per key always fetches.
  pub fn spawn(
    config: SyncConfig,
    source: Arc<dyn FeedSource>,
    executor: Arc<dyn MutationExecutor>,
    store: Arc<dyn OperationStore>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Result<(SyncHandle, mpsc::UnboundedReceiver<SyncNotification>), StorageError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    let persisted = store.list_all()?;
    if !persisted.is_empty() {
      tracing::info!(count = persisted.len(), "reloaded persisted operations");
    }

    // Forward connectivity transitions into the engine loop. Holds
    // only a weak sender so it cannot keep the engine alive after the
    // last handle is dropped.
    let mut conn_rx = connectivity.subscribe();
    let conn_tx = tx.downgrade();
    tokio::spawn(async move {
      while conn_rx.changed().await.is_ok() {
        let online = *conn_rx.borrow_and_update();
        let Some(conn_tx) = conn_tx.upgrade() else {
          break;
        };
        if conn_tx.send(Msg::Connectivity(online)).is_err() {
          break;
        }
      }
    });

    let mut queue = QueueState::new();
    for op in persisted {
      queue.push(QueuedOp::new(op, Vec::new()));
    }

    let engine = Engine {
      cache: CacheState::new(config.max_items_per_feed, config.memory_budget_bytes),
      queue,
      config,
      source,
      executor,
      store,
      connectivity,
      inflight: HashMap::new(),
      generations: HashMap::new(),
      timer_armed: false,
      tx: tx.downgrade(),
      notify_tx,
    };
    tokio::spawn(engine.run(rx));

    Ok((SyncHandle { tx }, notify_rx))
  }
}

struct Engine {
  cache: CacheState,
  queue: QueueState,
  config: SyncConfig,
  source: Arc<dyn FeedSource>,
  executor: Arc<dyn MutationExecutor>,
  store: Arc<dyn OperationStore>,
  connectivity: Arc<dyn Connectivity>,
  /// At most one outstanding fetch per feed key.
  inflight: HashMap<FeedKey, InflightFetch>,
  /// Current generation token per feed key; only a fetch result issued
  /// at the current generation may commit.
  generations: HashMap<FeedKey, u64>,
  timer_armed: bool,
  /// Self-sender for events posted by spawned work. Weak so in-flight
  /// work cannot keep the engine loop alive once all handles are gone.
  tx: mpsc::WeakUnboundedSender<Msg>,
  notify_tx: mpsc::UnboundedSender<SyncNotification>,
}

impl Engine {
  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
    // Resume draining whatever survived the previous run.
    self.pump();

    while let Some(msg) = rx.recv().await {
      self.handle(msg);
    }
  }

  fn handle(&mut self, msg: Msg) {
    match msg {
      Msg::Cmd(cmd) => self.handle_command(cmd),
      Msg::FetchDone {
        key,
        generation,
        result,
      } => self.handle_fetch_done(key, generation, result),
      Msg::ExecDone { op_id, result } => self.handle_exec_done(op_id, result),
      Msg::RetryTimer => {
        self.timer_armed = false;
        self.pump();
      }
      Msg::Connectivity(online) => {
        if online {
          tracing::info!("connectivity regained, draining queue");
          self.pump();
        } else {
          tracing::info!("connectivity lost");
        }
      }
    }
  }

  fn handle_command(&mut self, cmd: Command) {
    match cmd {
      Command::Select { key, reply } => self.handle_select(key, reply),
      Command::Refresh { key, reply } => self.handle_refresh(key, reply),
      Command::LoadMore {
        key,
        anchor_id,
        reply,
      } => self.handle_load_more(key, &anchor_id, reply),
      Command::Enqueue {
        kind,
        payload,
        reply,
      } => self.handle_enqueue(kind, payload, reply),
      Command::Sync => self.pump(),
      Command::Snapshot { key, reply } => {
        let _ = reply.send(self.cache.snapshot(key));
      }
      Command::MemoryReport { reply } => {
        let _ = reply.send(self.cache.memory_report());
      }
      Command::PendingCount { reply } => {
        let _ = reply.send(self.queue.len());
      }
      Command::Clear { key, reply } => {
        match key {
          Some(key) => self.cache.clear(key),
          None => self.cache.clear_all(),
        }
        let _ = reply.send(());
      }
    }
  }

  // ==========================================================================
  // Feed cache
  // ==========================================================================

  fn handle_select(&mut self, key: FeedKey, reply: SnapshotReply) {
    let prev = self.cache.select(key);
    if let Some(prev_key) = prev {
      self.cancel_background(prev_key);
    }

    match self.cache.snapshot(key) {
      None => {
        // Never fetched (or evicted): block the caller on the first
        // page, joining an outstanding first-page fetch if one exists.
        if let Some(inflight) = self.inflight.get_mut(&key) {
          if inflight.kind == FetchKind::FirstPage {
            inflight.background = false;
            inflight.waiters.push(reply);
            return;
          }
        }
        // A pagination fetch left over from before the feed was evicted
        // cannot produce the first page; replace it and move its
        // waiters onto the fresh fetch.
        let mut waiters = match self.inflight.remove(&key) {
          Some(prev) => prev.waiters,
          None => Vec::new(),
        };
        waiters.push(reply);
        self.start_fetch(key, FetchKind::FirstPage, false, waiters);
      }
      Some(snapshot) => {
        let stale = self
          .cache
          .is_stale(key, Utc::now(), self.config.stale_threshold());
        let _ = reply.send(Ok(snapshot));
        if stale && !self.inflight.contains_key(&key) {
          self.start_fetch(key, FetchKind::FirstPage, true, Vec::new());
        }
      }
    }
  }

  fn handle_refresh(&mut self, key: FeedKey, reply: SnapshotReply) {
    // Single-flight: join an outstanding manual first-page fetch.
    if let Some(inflight) = self.inflight.get_mut(&key) {
      if !inflight.background && inflight.kind == FetchKind::FirstPage {
        inflight.waiters.push(reply);
        return;
      }
    }
    // Anything else in flight (background refresh or pagination) is
    // superseded: a refresh must replace the first page, not resolve
    // with an appended one. Its waiters move onto the fresh fetch.
    let mut waiters = match self.inflight.remove(&key) {
      Some(prev) => {
        tracing::debug!(feed = %key, "manual refresh supersedes in-flight fetch");
        prev.waiters
      }
      None => Vec::new(),
    };
    waiters.push(reply);
    self.start_fetch(key, FetchKind::FirstPage, false, waiters);
  }

  fn handle_load_more(&mut self, key: FeedKey, anchor_id: &str, reply: SnapshotReply) {
    // Redundant pagination triggers from scroll events are no-ops: the
    // anchor must still be the tail and nothing else may be in flight.
    if self.inflight.contains_key(&key) {
      let _ = reply.send(Ok(self.current_or_empty(key)));
      return;
    }
    let anchored = self
      .cache
      .get(key)
      .map(|entry| entry.has_more && entry.tail_id() == Some(anchor_id))
      .unwrap_or(false);
    if !anchored {
      let _ = reply.send(Ok(self.current_or_empty(key)));
      return;
    }

    self.start_fetch(key, FetchKind::NextPage, false, vec![reply]);
  }

  fn start_fetch(
    &mut self,
    key: FeedKey,
    kind: FetchKind,
    background: bool,
    waiters: Vec<SnapshotReply>,
  ) {
    let generation = self.bump_generation(key);
    let cursor = match kind {
      FetchKind::FirstPage => None,
      FetchKind::NextPage => self.cache.get(key).and_then(|e| e.cursor.clone()),
    };

    self.inflight.insert(
      key,
      InflightFetch {
        generation,
        kind,
        background,
        waiters,
      },
    );
    tracing::debug!(feed = %key, generation, ?kind, background, "starting fetch");

    let source = Arc::clone(&self.source);
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let result = source.fetch(key, cursor).await;
      if let Some(tx) = tx.upgrade() {
        let _ = tx.send(Msg::FetchDone {
          key,
          generation,
          result,
        });
      }
    });
  }

  fn handle_fetch_done(
    &mut self,
    key: FeedKey,
    generation: u64,
    result: Result<FeedPage, FetchError>,
  ) {
    let current = self.generations.get(&key).copied().unwrap_or(0);
    if generation != current {
      // A newer fetch for this key was issued after this one started:
      // latest intent wins, the straggler is discarded silently.
      tracing::debug!(feed = %key, generation, current, "dropping superseded fetch result");
      return;
    }
    let Some(inflight) = self.inflight.remove(&key) else {
      return;
    };
    let now = Utc::now();

    match result {
      Ok(page) => {
        match inflight.kind {
          FetchKind::FirstPage => self.cache.commit_first_page(key, page, now),
          FetchKind::NextPage => self.cache.commit_next_page(key, page, now),
        }
        let snapshot = self.current_or_empty(key);
        for waiter in inflight.waiters {
          let _ = waiter.send(Ok(snapshot.clone()));
        }
      }
      Err(err) => {
        if self.cache.get(key).is_some() {
          // Cached data is still usable: absorb the error and flag it.
          tracing::warn!(feed = %key, error = %err, "refresh failed, keeping cached data");
          self.cache.mark_refresh_failed(key);
          let snapshot = self.current_or_empty(key);
          for waiter in inflight.waiters {
            let _ = waiter.send(Ok(snapshot.clone()));
          }
        } else {
          tracing::warn!(feed = %key, error = %err, "fetch failed with no cached fallback");
          for waiter in inflight.waiters {
            let _ = waiter.send(Err(SyncError::Fetch(err.clone())));
          }
        }
      }
    }
  }

  /// Cancel an uncommitted background refresh for `key`, if any, by
  /// advancing the generation past the one its result will carry.
  fn cancel_background(&mut self, key: FeedKey) {
    let is_background = self.inflight.get(&key).map_or(false, |f| f.background);
    if is_background {
      self.inflight.remove(&key);
      self.bump_generation(key);
      tracing::debug!(feed = %key, "cancelled background refresh");
    }
  }

  fn bump_generation(&mut self, key: FeedKey) -> u64 {
    let generation = self.generations.entry(key).or_insert(0);
    *generation += 1;
    *generation
  }

  fn current_or_empty(&self, key: FeedKey) -> FeedSnapshot {
    self.cache.snapshot(key).unwrap_or(FeedSnapshot {
      key,
      entries: Vec::new(),
      fetched_at: None,
      has_more: false,
      truncated: false,
      last_refresh_failed: false,
    })
  }

  // ==========================================================================
  // Mutation queue
  // ==========================================================================

  fn handle_enqueue(
    &mut self,
    kind: OperationKind,
    payload: String,
    reply: oneshot::Sender<Result<String, SyncError>>,
  ) {
    let op = PendingOperation::new(kind, payload);

    // Persist before anything else; losing durability is worse than
    // failing the operation.
    if let Err(e) = self.store.put(&op) {
      tracing::error!(error = %e, "failed to persist operation");
      let _ = reply.send(Err(SyncError::Storage(e)));
      return;
    }

    let pre_images = self.apply_optimistic_effect(&op);
    let op_id = op.id.clone();
    tracing::debug!(op_id = %op_id, kind = %kind.as_str(), "enqueued operation");
    self.queue.push(QueuedOp::new(op, pre_images));
    let _ = reply.send(Ok(op_id));

    if self.connectivity.is_online() {
      self.pump();
    }
  }

  /// Apply the operation's optimistic effect to the cache, returning
  /// the pre-images of modified entries for the rollback policy.
  fn apply_optimistic_effect(
    &mut self,
    op: &PendingOperation,
  ) -> Vec<(FeedKey, crate::types::FeedEntry)> {
    match op.kind {
      OperationKind::ToggleReaction => {
        match serde_json::from_str::<ToggleReactionPayload>(&op.payload) {
          Ok(p) => self.cache.apply_optimistic(&p.entry_id, &|e| {
            if e.viewer_reacted {
              e.viewer_reacted = false;
              e.reaction_count = e.reaction_count.saturating_sub(1);
            } else {
              e.viewer_reacted = true;
              e.reaction_count += 1;
            }
          }),
          Err(e) => {
            tracing::warn!(op_id = %op.id, error = %e, "bad toggle-reaction payload");
            Vec::new()
          }
        }
      }
      OperationKind::AddComment => match serde_json::from_str::<AddCommentPayload>(&op.payload) {
        Ok(p) => self
          .cache
          .apply_optimistic(&p.entry_id, &|e| e.comment_count += 1),
        Err(e) => {
          tracing::warn!(op_id = %op.id, error = %e, "bad add-comment payload");
          Vec::new()
        }
      },
      OperationKind::UpdateEntry => match serde_json::from_str::<UpdateEntryPayload>(&op.payload) {
        Ok(p) => {
          let rating = p.rating;
          let text = p.text.clone();
          self.cache.apply_optimistic(&p.entry_id, &move |e| {
            if let Some(rating) = rating {
              e.rating = rating;
            }
            if let Some(text) = &text {
              e.text = Some(text.clone());
            }
          })
        }
        Err(e) => {
          tracing::warn!(op_id = %op.id, error = %e, "bad update-entry payload");
          Vec::new()
        }
      },
      OperationKind::DeleteEntry => match serde_json::from_str::<DeleteEntryPayload>(&op.payload) {
        Ok(p) => {
          // Deletions are not restorable by the rollback policy.
          self.cache.remove_everywhere(&p.entry_id);
          Vec::new()
        }
        Err(e) => {
          tracing::warn!(op_id = %op.id, error = %e, "bad delete-entry payload");
          Vec::new()
        }
      },
      OperationKind::CreateEntry => match serde_json::from_str::<CreateEntryPayload>(&op.payload) {
        Ok(p) => {
          self.cache.insert_head(p.feed, p.entry);
          Vec::new()
        }
        Err(e) => {
          tracing::warn!(op_id = %op.id, error = %e, "bad create-entry payload");
          Vec::new()
        }
      },
      // Follow state is not part of the feed cache.
      OperationKind::Follow | OperationKind::Unfollow => Vec::new(),
    }
  }

  /// Advance the drain: start executing the next eligible operation,
  /// or arm the retry timer if everything is backing off.
  ///
  /// At most one operation executes at a time, so a second drain
  /// trigger while one is running is a no-op.
  fn pump(&mut self) {
    if !self.connectivity.is_online() || self.queue.in_flight().is_some() {
      return;
    }
    let now = Instant::now();
    let Some(queued) = self.queue.next_eligible(now) else {
      self.arm_retry_timer(now);
      return;
    };

    let op = queued.op.clone();
    self.queue.set_in_flight(&op.id);
    tracing::debug!(op_id = %op.id, attempt = op.retry_count + 1, "executing operation");

    let executor = Arc::clone(&self.executor);
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let result = executor.execute(&op).await;
      if let Some(tx) = tx.upgrade() {
        let _ = tx.send(Msg::ExecDone {
          op_id: op.id,
          result,
        });
      }
    });
  }

  fn arm_retry_timer(&mut self, now: Instant) {
    if self.timer_armed {
      return;
    }
    let Some(wakeup) = self.queue.next_wakeup(now) else {
      return;
    };
    self.timer_armed = true;

    let tx = self.tx.clone();
    tokio::spawn(async move {
      tokio::time::sleep_until(wakeup).await;
      if let Some(tx) = tx.upgrade() {
        let _ = tx.send(Msg::RetryTimer);
      }
    });
  }

  fn handle_exec_done(&mut self, op_id: String, result: Result<ExecutionOutcome, ExecutionError>) {
    self.queue.clear_in_flight();

    let continue_drain = match result {
      Ok(outcome) => self.finish_success(&op_id, outcome),
      Err(ExecutionError::AlreadyApplied) => {
        // The server already has this effect; nothing to reconcile.
        tracing::debug!(op_id = %op_id, "operation was already applied server-side");
        self.finish_success(&op_id, ExecutionOutcome::Acknowledged)
      }
      Err(err) if !err.is_retryable() => {
        // Validation rejections can never succeed; don't burn retries.
        tracing::warn!(op_id = %op_id, error = %err, "operation rejected, dropping");
        self.finish_terminal_failure(&op_id)
      }
      Err(err) => {
        let retry_count = match self.queue.get_mut(&op_id) {
          Some(queued) => {
            queued.op.retry_count += 1;
            queued.op.retry_count
          }
          None => return,
        };

        if retry_count >= self.config.max_retries {
          tracing::warn!(op_id = %op_id, error = %err, "operation exhausted retries");
          self.finish_terminal_failure(&op_id)
        } else {
          let delay = self.config.backoff_delay(retry_count);
          let mut persisted = true;
          if let Some(queued) = self.queue.get_mut(&op_id) {
            queued.not_before = Some(Instant::now() + delay);
            // Persist the bumped counter so a restart keeps the history.
            let op = queued.op.clone();
            if let Err(e) = self.store.put(&op) {
              tracing::error!(op_id = %op_id, error = %e, "failed to persist retry count");
              self.report_storage_degraded(&op_id, &e);
              persisted = false;
            }
          }
          if persisted {
            tracing::debug!(op_id = %op_id, retry_count, ?delay, "scheduled retry");
          }
          persisted
        }
      }
    };

    // Move on to the next pending operation unless storage failed; a
    // broken store makes further progress unsafe until the next
    // external drain trigger.
    if continue_drain {
      self.pump();
    }
  }

  /// Durable storage is the pending queue's source of truth, so a
  /// failed write is fatal to the drain cycle that hit it.
  fn report_storage_degraded(&self, op_id: &str, error: &StorageError) {
    let _ = self.notify_tx.send(SyncNotification::StorageDegraded {
      operation_id: op_id.to_string(),
      error: error.to_string(),
    });
  }

  fn finish_success(&mut self, op_id: &str, outcome: ExecutionOutcome) -> bool {
    // Server-wins: the authoritative state replaces the optimistic one
    // unconditionally, wherever the entry is cached.
    match outcome {
      ExecutionOutcome::Entry(server_entry) => self.cache.reconcile_entry(&server_entry),
      ExecutionOutcome::Deleted(entry_id) => {
        self.cache.remove_everywhere(&entry_id);
      }
      ExecutionOutcome::Acknowledged => {}
    }

    if let Some(queued) = self.queue.remove(op_id) {
      let _ = self.notify_tx.send(SyncNotification::OperationSynced {
        operation_id: op_id.to_string(),
        kind: queued.op.kind,
      });
    }
    if let Err(e) = self.store.delete(op_id) {
      // The op is gone from memory but still persisted; a restart will
      // re-execute it, which executors must tolerate anyway.
      tracing::error!(op_id = %op_id, error = %e, "failed to delete synced operation");
      self.report_storage_degraded(op_id, &e);
      return false;
    }
    true
  }

  fn finish_terminal_failure(&mut self, op_id: &str) -> bool {
    let Some(queued) = self.queue.remove(op_id) else {
      return true;
    };
    if self.config.rollback == RollbackPolicy::Revert {
      self.cache.restore(&queued.pre_images);
    }
    let _ = self.notify_tx.send(SyncNotification::OperationFailed {
      operation_id: op_id.to_string(),
      kind: queued.op.kind,
    });
    if let Err(e) = self.store.delete(op_id) {
      tracing::error!(op_id = %op_id, error = %e, "failed to delete failed operation");
      self.report_storage_degraded(op_id, &e);
      return false;
    }
    true
  }
}
