//! In-memory pending-operation queue state.
//!
//! Bookkeeping only; the engine task owns an instance and drives the
//! actual drain. Operations on the same target entity keep enqueue
//! (FIFO) order; independent targets may be reordered by retry backoff.

use tokio::time::Instant;

use crate::types::{FeedEntry, FeedKey, PendingOperation};

/// A pending operation plus its scheduling state.
#[derive(Debug, Clone)]
pub struct QueuedOp {
  pub op: PendingOperation,
  /// Earliest time the next attempt may run; `None` means immediately.
  pub not_before: Option<Instant>,
  /// Entity identity this operation targets, for per-target ordering.
  pub target: Option<String>,
  /// Saved pre-images of cache entries the optimistic update modified,
  /// kept for the rollback policy.
  pub pre_images: Vec<(FeedKey, FeedEntry)>,
}

impl QueuedOp {
  pub fn new(op: PendingOperation, pre_images: Vec<(FeedKey, FeedEntry)>) -> Self {
    let target = op.target_id();
    Self {
      op,
      not_before: None,
      target,
      pre_images,
    }
  }
}

/// Pending operations in enqueue order, plus the single in-flight slot.
#[derive(Default)]
pub struct QueueState {
  ops: Vec<QueuedOp>,
  in_flight: Option<String>,
}

impl QueueState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, op: QueuedOp) {
    self.ops.push(op);
  }

  pub fn len(&self) -> usize {
    self.ops.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  pub fn in_flight(&self) -> Option<&str> {
    self.in_flight.as_deref()
  }

  pub fn set_in_flight(&mut self, op_id: &str) {
    self.in_flight = Some(op_id.to_string());
  }

  pub fn clear_in_flight(&mut self) {
    self.in_flight = None;
  }

  pub fn get_mut(&mut self, op_id: &str) -> Option<&mut QueuedOp> {
    self.ops.iter_mut().find(|q| q.op.id == op_id)
  }

  pub fn remove(&mut self, op_id: &str) -> Option<QueuedOp> {
    let pos = self.ops.iter().position(|q| q.op.id == op_id)?;
    Some(self.ops.remove(pos))
  }

  /// Next operation that may execute now.
  ///
  /// Walks the queue in enqueue order. An operation is eligible when
  /// its backoff deadline has passed and no earlier operation shares
  /// its target; an earlier same-target operation blocks it even while
  /// that operation is waiting out a backoff.
  pub fn next_eligible(&self, now: Instant) -> Option<&QueuedOp> {
    let mut blocked_targets: Vec<&str> = Vec::new();
    for queued in &self.ops {
      let target_blocked = queued
        .target
        .as_deref()
        .is_some_and(|t| blocked_targets.contains(&t));

      let ready = queued.not_before.map_or(true, |t| t <= now);
      if !target_blocked && ready {
        return Some(queued);
      }

      if let Some(target) = queued.target.as_deref() {
        blocked_targets.push(target);
      }
    }
    None
  }

  /// Earliest backoff deadline still in the future, used to arm the
  /// retry timer when nothing is currently eligible.
  pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
    self
      .ops
      .iter()
      .filter_map(|q| q.not_before)
      .filter(|t| *t > now)
      .min()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::OperationKind;
  use std::time::Duration;

  fn queued(entry_id: &str) -> QueuedOp {
    let payload = format!(r#"{{"entry_id":"{entry_id}"}}"#);
    QueuedOp::new(
      PendingOperation::new(OperationKind::ToggleReaction, payload),
      Vec::new(),
    )
  }

  #[test]
  fn eligible_in_enqueue_order() {
    let mut queue = QueueState::new();
    let a = queued("item1");
    let b = queued("item2");
    let a_id = a.op.id.clone();
    queue.push(a);
    queue.push(b);

    let next = queue.next_eligible(Instant::now()).unwrap();
    assert_eq!(next.op.id, a_id);
  }

  #[test]
  fn backoff_lets_independent_target_run_first() {
    let mut queue = QueueState::new();
    let mut a = queued("item1");
    a.not_before = Some(Instant::now() + Duration::from_secs(60));
    let b = queued("item2");
    let b_id = b.op.id.clone();
    queue.push(a);
    queue.push(b);

    // item1 is backing off, so the independent item2 op runs first.
    let next = queue.next_eligible(Instant::now()).unwrap();
    assert_eq!(next.op.id, b_id);
  }

  #[test]
  fn same_target_stays_fifo_across_backoff() {
    let mut queue = QueueState::new();
    let mut a = queued("item1");
    a.not_before = Some(Instant::now() + Duration::from_secs(60));
    let b = queued("item1");
    queue.push(a);
    queue.push(b);

    // The second op on item1 must wait for the first despite being
    // immediately runnable itself.
    assert!(queue.next_eligible(Instant::now()).is_none());
  }

  #[test]
  fn next_wakeup_is_earliest_future_deadline() {
    let now = Instant::now();
    let mut queue = QueueState::new();
    let mut a = queued("item1");
    a.not_before = Some(now + Duration::from_secs(60));
    let mut b = queued("item2");
    b.not_before = Some(now + Duration::from_secs(5));
    queue.push(a);
    queue.push(b);

    let wakeup = queue.next_wakeup(now).unwrap();
    assert_eq!(wakeup, now + Duration::from_secs(5));
  }

  #[test]
  fn remove_drops_the_right_op() {
    let mut queue = QueueState::new();
    let a = queued("item1");
    let b = queued("item2");
    let a_id = a.op.id.clone();
    let b_id = b.op.id.clone();
    queue.push(a);
    queue.push(b);

    queue.remove(&a_id).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.next_eligible(Instant::now()).unwrap().op.id, b_id);
  }
}
