//! Least-recently-used ledger of loaded geometry nodes.
//!
//! `touch` is the only way an entry moves toward the safe (most-recent) end;
//! the scheduler touches every visible node each frame, so whatever the
//! camera stopped looking at drifts toward the eviction end. Eviction
//! granularity is a whole loaded subtree: disposing a stale parent also
//! disposes its loaded descendants in the same pass.
//!
//! The recency order is an intrusive doubly linked list threaded through a
//! hash map by node key, so touch and remove are O(1).

use std::collections::HashMap;

use crate::octree::node::{NodeKey, SharedNode};

struct CacheEntry {
  node: SharedNode,
  /// Count captured at insert time; the running total subtracts exactly
  /// this on removal even if the node reloads with a different count.
  num_points: u64,
  prev: Option<NodeKey>,
  next: Option<NodeKey>,
}

/// LRU cache enforcing a global resident point-count ceiling.
pub struct GeometryCache {
  entries: HashMap<NodeKey, CacheEntry>,
  /// Least recently touched (eviction end).
  first: Option<NodeKey>,
  /// Most recently touched.
  last: Option<NodeKey>,
  num_points: u64,
}

impl GeometryCache {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
      first: None,
      last: None,
      num_points: 0,
    }
  }

  /// Number of resident entries.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Sum of `num_points` over all resident entries.
  pub fn num_points(&self) -> u64 {
    self.num_points
  }

  pub fn contains(&self, key: &NodeKey) -> bool {
    self.entries.contains_key(key)
  }

  /// Keys from least to most recently touched. Test/debug helper.
  pub fn recency_order(&self) -> Vec<NodeKey> {
    let mut order = Vec::with_capacity(self.entries.len());
    let mut cursor = self.first.clone();
    while let Some(key) = cursor {
      cursor = self.entries[&key].next.clone();
      order.push(key);
    }
    order
  }

  /// Mark a node as recently used, inserting it if absent.
  ///
  /// No-op for nodes that are not loaded.
  pub fn touch(&mut self, node: &SharedNode) {
    if !node.is_loaded() {
      return;
    }
    let key = node.key();
    if self.entries.contains_key(&key) {
      self.unlink(&key);
      self.push_back(key);
    } else {
      let num_points = node.num_points();
      self.num_points += num_points;
      self.entries.insert(
        key.clone(),
        CacheEntry {
          node: node.clone(),
          num_points,
          prev: None,
          next: None,
        },
      );
      self.push_back(key);
    }
  }

  /// Remove an entry from the ledger. Safe to call on absent keys.
  pub fn remove(&mut self, key: &NodeKey) {
    if !self.entries.contains_key(key) {
      return;
    }
    self.unlink(key);
    if let Some(entry) = self.entries.remove(key) {
      self.num_points = self.num_points.saturating_sub(entry.num_points);
    }
  }

  /// Evict least-recently-used subtrees until the resident point count is
  /// back under `point_load_limit`.
  ///
  /// No-op while at most one entry is resident, so at least one node stays
  /// warm. Each iteration disposes the head entry's node and all of its
  /// loaded descendants and unlinks every one of them, so the ledger
  /// strictly shrinks and the loop terminates; the ceiling is re-checked
  /// after every cascade.
  pub fn free_memory(&mut self, point_load_limit: u64) {
    while self.num_points > point_load_limit {
      if self.entries.len() <= 1 {
        break;
      }
      let Some(first) = self.first.clone() else {
        break;
      };
      let Some(entry) = self.entries.get(&first) else {
        break;
      };
      let evicted = self.dispose_subtree(entry.node.clone());
      log::debug!(
        "evicted subtree at {} ({} nodes, {} points resident)",
        first,
        evicted,
        self.num_points
      );
    }
  }

  /// Dispose a node and all loaded descendants, unlinking each from the
  /// ledger. Returns the number of nodes visited.
  fn dispose_subtree(&mut self, node: SharedNode) -> usize {
    let mut visited = 0;
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
      current.dispose();
      self.remove(&current.key());
      visited += 1;
      for child in current.children() {
        if child.is_loaded() {
          stack.push(child);
        }
      }
    }
    visited
  }

  /// Unlink an entry from the recency list without removing it from the map.
  fn unlink(&mut self, key: &NodeKey) {
    let (prev, next) = {
      let entry = &self.entries[key];
      (entry.prev.clone(), entry.next.clone())
    };
    match &prev {
      Some(prev_key) => {
        if let Some(prev_entry) = self.entries.get_mut(prev_key) {
          prev_entry.next = next.clone();
        }
      }
      None => self.first = next.clone(),
    }
    match &next {
      Some(next_key) => {
        if let Some(next_entry) = self.entries.get_mut(next_key) {
          next_entry.prev = prev.clone();
        }
      }
      None => self.last = prev.clone(),
    }
    if let Some(entry) = self.entries.get_mut(key) {
      entry.prev = None;
      entry.next = None;
    }
  }

  /// Append an already-inserted entry at the most-recent end.
  fn push_back(&mut self, key: NodeKey) {
    match self.last.take() {
      Some(last_key) => {
        if let Some(last_entry) = self.entries.get_mut(&last_key) {
          last_entry.next = Some(key.clone());
        }
        if let Some(entry) = self.entries.get_mut(&key) {
          entry.prev = Some(last_key);
        }
        self.last = Some(key);
      }
      None => {
        self.first = Some(key.clone());
        self.last = Some(key);
      }
    }
  }
}

impl Default for GeometryCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
