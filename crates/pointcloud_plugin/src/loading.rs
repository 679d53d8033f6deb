//! Asynchronous load plumbing for point payloads.
//!
//! The fetch+decode collaborator is opaque to the core: implement
//! [`PointSource`] over HTTP, local files, a worker pool, whatever. The
//! pipeline dispatches fire-and-forget jobs on rayon's thread pool and
//! routes completions back through a channel that the scheduling thread
//! drains at the start of each frame, so all node mutation stays on one
//! thread without locks.
//!
//! There is no cancellation: once dispatched, a load always completes (or
//! fails) and the node becomes `Loaded`, subject to later eviction like any
//! other. The pipeline only holds a `Weak` handle per in-flight request, so
//! completions for nodes that were dropped meanwhile are discarded.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::DVec3;
use thiserror::Error;

use crate::octree::bounds::DAabb3;
use crate::octree::node::{NodeKey, SharedNode, WeakNode};

/// Decoded point payload; object-space positions are the only attribute
/// the core itself reads (height-field rasterization).
#[derive(Clone, Debug, Default)]
pub struct PointBuffer {
  pub positions: Vec<DVec3>,
}

impl PointBuffer {
  pub fn len(&self) -> usize {
    self.positions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }
}

/// Why a load completion failed. Failures are logged and the node becomes a
/// load candidate again on a future frame; there is no automatic retry.
#[derive(Clone, Debug, Error)]
pub enum LoadError {
  #[error("fetch failed: {0}")]
  Fetch(String),
  #[error("decode failed: {0}")]
  Decode(String),
}

/// Everything a [`PointSource`] needs to locate and decode one node.
#[derive(Clone, Debug)]
pub struct LoadRequest {
  pub key: NodeKey,
  pub bounds: DAabb3,
  pub level: u32,
  pub estimated_points: u64,
}

/// Successful load result.
#[derive(Clone, Debug)]
pub struct LoadedData {
  /// Authoritative point count; overrides the hierarchy estimate.
  pub num_points: u64,
  /// Tight bounding box of the decoded points.
  pub tight_bounds: DAabb3,
  pub buffer: PointBuffer,
}

/// The opaque fetch+decode collaborator.
pub trait PointSource: Send + Sync {
  fn fetch(&self, request: &LoadRequest) -> Result<LoadedData, LoadError>;
}

struct LoadCompletion {
  key: NodeKey,
  result: Result<LoadedData, LoadError>,
}

/// Dispatches loads and drains their completions on the scheduling thread.
pub struct LoadPipeline {
  source: Arc<dyn PointSource>,
  sender: Sender<LoadCompletion>,
  receiver: Receiver<LoadCompletion>,
  pending: HashMap<NodeKey, WeakNode>,
  in_flight: usize,
  max_in_flight: usize,
}

impl LoadPipeline {
  pub fn new(source: Arc<dyn PointSource>, max_in_flight: usize) -> Self {
    let (sender, receiver) = unbounded();
    Self {
      source,
      sender,
      receiver,
      pending: HashMap::new(),
      in_flight: 0,
      max_in_flight,
    }
  }

  /// Number of loads currently dispatched but not yet drained.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// True when the concurrency ceiling rejects new loads.
  pub fn is_saturated(&self) -> bool {
    self.in_flight >= self.max_in_flight
  }

  /// Adjust the in-flight ceiling. Lowering it below the current in-flight
  /// count only blocks new dispatches; running loads still complete.
  pub fn set_max_in_flight(&mut self, max_in_flight: usize) {
    self.max_in_flight = max_in_flight;
  }

  /// Dispatch one load. Returns false (and does nothing) at the ceiling.
  ///
  /// Called by `SpatialNode::load`, which has already checked the node is
  /// `Unloaded` and flips it to `Loading` on success.
  pub(crate) fn begin(&mut self, node: SharedNode, request: LoadRequest) -> bool {
    if self.is_saturated() {
      return false;
    }
    self.pending.insert(request.key.clone(), std::rc::Rc::downgrade(&node));
    self.in_flight += 1;

    let source = Arc::clone(&self.source);
    let sender = self.sender.clone();
    rayon::spawn(move || {
      let result = source.fetch(&request);
      // Ignore send error (pipeline dropped).
      let _ = sender.send(LoadCompletion {
        key: request.key,
        result,
      });
    });
    true
  }

  /// Drain all completions that arrived since the last frame.
  ///
  /// Per-node failures are isolated: they are logged, the counter is
  /// decremented, and the drain continues. Returns the number of nodes
  /// that transitioned to `Loaded`.
  pub fn drain_completions(&mut self) -> usize {
    let mut applied = 0;
    while let Ok(completion) = self.receiver.try_recv() {
      self.in_flight = self.in_flight.saturating_sub(1);
      let node = self
        .pending
        .remove(&completion.key)
        .and_then(|weak| weak.upgrade());
      match (node, completion.result) {
        (Some(node), Ok(data)) => {
          node.apply_loaded(data);
          applied += 1;
        }
        (Some(node), Err(err)) => {
          log::warn!("load failed for node {}: {}", completion.key, err);
          node.mark_load_failed();
        }
        (None, _) => {
          log::debug!("dropping completion for vanished node {}", completion.key);
        }
      }
    }
    applied
  }
}

#[cfg(test)]
#[path = "loading_test.rs"]
mod loading_test;
