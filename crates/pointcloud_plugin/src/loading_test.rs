use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::DVec3;

use super::*;
use crate::cloud::CloudId;
use crate::octree::node::{LoadState, OctreeNode, SpatialNode};

fn test_bounds() -> DAabb3 {
  DAabb3::new(DVec3::ZERO, DVec3::splat(8.0))
}

fn flat_data(num_points: u64) -> LoadedData {
  LoadedData {
    num_points,
    tight_bounds: test_bounds(),
    buffer: PointBuffer {
      positions: vec![DVec3::splat(1.0); num_points as usize],
    },
  }
}

/// Source whose fetches block until the test releases the gate.
struct GatedSource {
  gate: Receiver<()>,
}

impl GatedSource {
  fn new() -> (Self, Sender<()>) {
    let (sender, gate) = unbounded();
    (Self { gate }, sender)
  }
}

impl PointSource for GatedSource {
  fn fetch(&self, request: &LoadRequest) -> Result<LoadedData, LoadError> {
    let _ = self.gate.recv();
    Ok(flat_data(request.estimated_points))
  }
}

/// Source that fails every fetch.
struct FailingSource;

impl PointSource for FailingSource {
  fn fetch(&self, _request: &LoadRequest) -> Result<LoadedData, LoadError> {
    Err(LoadError::Fetch("connection reset".into()))
  }
}

/// Drain until `applied` loads landed or the attempt budget runs out.
fn drain_until(pipeline: &mut LoadPipeline, applied: usize) -> usize {
  let mut total = 0;
  for _ in 0..2000 {
    total += pipeline.drain_completions();
    if total >= applied {
      break;
    }
    std::thread::sleep(std::time::Duration::from_millis(1));
  }
  total
}

#[test]
fn test_load_resolves_on_drain() {
  let (source, gate) = GatedSource::new();
  let mut pipeline = LoadPipeline::new(Arc::new(source), 4);
  let root = OctreeNode::root(CloudId::new(), test_bounds(), 1.0, 100);
  let child = root.add_child(0, 25);

  (child.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(child.state(), LoadState::Loading);
  assert_eq!(pipeline.in_flight(), 1);

  gate.send(()).unwrap();
  assert_eq!(drain_until(&mut pipeline, 1), 1);
  assert_eq!(child.state(), LoadState::Loaded);
  assert_eq!(child.num_points(), 25);
  assert_eq!(pipeline.in_flight(), 0);
}

#[test]
fn test_load_is_idempotent_while_in_flight() {
  let (source, gate) = GatedSource::new();
  let mut pipeline = LoadPipeline::new(Arc::new(source), 4);
  let root = OctreeNode::root(CloudId::new(), test_bounds(), 1.0, 100);
  let child = root.add_child(0, 10);

  // Issuing load twice while in flight: one counter increment, one fetch.
  (child.clone() as SharedNode).load(&mut pipeline);
  (child.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(pipeline.in_flight(), 1);

  gate.send(()).unwrap();
  assert_eq!(drain_until(&mut pipeline, 1), 1);
  assert_eq!(pipeline.in_flight(), 0);
  assert_eq!(child.state(), LoadState::Loaded);

  // Loading an already-loaded node is a no-op.
  (child.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(pipeline.in_flight(), 0);
}

#[test]
fn test_ceiling_backpressure() {
  let (source, gate) = GatedSource::new();
  let mut pipeline = LoadPipeline::new(Arc::new(source), 1);
  let root = OctreeNode::root(CloudId::new(), test_bounds(), 1.0, 100);
  let a = root.add_child(0, 10);
  let b = root.add_child(1, 10);

  (a.clone() as SharedNode).load(&mut pipeline);
  assert!(pipeline.is_saturated());

  // Rejected above the ceiling: no state change, no counter bump.
  (b.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(b.state(), LoadState::Unloaded);
  assert_eq!(pipeline.in_flight(), 1);

  gate.send(()).unwrap();
  drain_until(&mut pipeline, 1);
  assert!(!pipeline.is_saturated());

  // The rejected node is a candidate again afterwards.
  (b.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(b.state(), LoadState::Loading);
}

#[test]
fn test_failed_load_returns_to_unloaded() {
  let mut pipeline = LoadPipeline::new(Arc::new(FailingSource), 4);
  let root = OctreeNode::root(CloudId::new(), test_bounds(), 1.0, 100);
  let child = root.add_child(0, 10);

  (child.clone() as SharedNode).load(&mut pipeline);
  assert_eq!(child.state(), LoadState::Loading);

  // Failure completions decrement the counter but never flip to Loaded.
  for _ in 0..2000 {
    pipeline.drain_completions();
    if pipeline.in_flight() == 0 {
      break;
    }
    std::thread::sleep(std::time::Duration::from_millis(1));
  }
  assert_eq!(pipeline.in_flight(), 0);
  assert_eq!(child.state(), LoadState::Unloaded);
}

#[test]
fn test_completion_for_dropped_node_is_discarded() {
  let (source, gate) = GatedSource::new();
  let mut pipeline = LoadPipeline::new(Arc::new(source), 4);
  let root = OctreeNode::root(CloudId::new(), test_bounds(), 1.0, 100);

  (root.clone() as SharedNode).load(&mut pipeline);
  drop(root);
  gate.send(()).unwrap();

  for _ in 0..2000 {
    pipeline.drain_completions();
    if pipeline.in_flight() == 0 {
      break;
    }
    std::thread::sleep(std::time::Duration::from_millis(1));
  }
  assert_eq!(pipeline.in_flight(), 0);
}

#[test]
fn test_point_buffer_len() {
  let buffer = PointBuffer {
    positions: vec![DVec3::ZERO; 3],
  };
  assert_eq!(buffer.len(), 3);
  assert!(!buffer.is_empty());
  assert!(PointBuffer::default().is_empty());
}
