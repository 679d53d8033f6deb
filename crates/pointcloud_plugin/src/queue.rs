//! Priority queue driving the budget-aware tree expansion.
//!
//! Pop order is strictly descending weight: octree roots and nodes the
//! camera sits inside are pushed at `f64::INFINITY` so they always come
//! out first, everything else by projected screen size. Ties break in
//! whatever order the heap likes; correctness must not depend on it.

use std::collections::BinaryHeap;

use crate::octree::node::SharedNode;

/// One pending traversal step: a node, the cloud it belongs to, the parent
/// it was expanded from, and its importance weight.
pub struct QueueEntry {
  pub cloud_index: usize,
  pub node: SharedNode,
  pub parent: Option<SharedNode>,
  pub weight: f64,
}

impl PartialEq for QueueEntry {
  fn eq(&self, other: &Self) -> bool {
    self.weight.total_cmp(&other.weight) == std::cmp::Ordering::Equal
  }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.weight.total_cmp(&other.weight)
  }
}

/// Max-heap over entry weights. No deduplication: each node is pushed at
/// most once per frame, by its unique parent.
pub struct ImportanceQueue {
  heap: BinaryHeap<QueueEntry>,
}

impl ImportanceQueue {
  pub fn new() -> Self {
    Self {
      heap: BinaryHeap::new(),
    }
  }

  pub fn push(&mut self, entry: QueueEntry) {
    self.heap.push(entry);
  }

  /// Pop the highest-weight entry.
  pub fn pop(&mut self) -> Option<QueueEntry> {
    self.heap.pop()
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }
}

impl Default for ImportanceQueue {
  fn default() -> Self {
    Self::new()
  }
}
