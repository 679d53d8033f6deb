//! Per-cloud state container.
//!
//! A `PointCloud` owns one hierarchy root, its world transform, its
//! admission knobs, and the per-frame visibility outputs the scheduler
//! writes. Multiple clouds share one scheduler (and its cache and load
//! pipeline) per process.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{DAffine3, DVec3};

use crate::dem::HeightField;
use crate::octree::node::SharedNode;

/// Atomic counter for generating unique CloudIds.
static CLOUD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque cloud identifier.
///
/// Generated atomically - guaranteed unique within process lifetime. Node
/// keys embed it so two clouds with identical hierarchies never collide in
/// the cache or load registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CloudId(u64);

impl CloudId {
  /// Generate a new unique CloudId.
  pub fn new() -> Self {
    Self(CLOUD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  /// Get the raw ID value.
  pub fn raw(&self) -> u64 {
    self.0
  }
}

impl Default for CloudId {
  fn default() -> Self {
    Self::new()
  }
}

/// One streamed point cloud.
pub struct PointCloud {
  pub id: CloudId,

  /// Object-to-world transform.
  pub transform: DAffine3,

  /// Clouds hidden by the host skip scheduling entirely.
  pub visible: bool,

  /// Hierarchy root; `None` until the metadata collaborator initialized
  /// the cloud.
  pub root: Option<SharedNode>,

  /// Per-cloud visible-point ceiling. `f64::INFINITY` = unbounded;
  /// IEEE-754 makes it absorbing in the admission comparison.
  pub point_budget: f64,

  /// Nodes at or beyond this level are never admitted.
  pub max_level: u32,

  /// Perceptual LOD cutoff: children whose projected radius falls below
  /// this many pixels are not even queued (perspective cameras only).
  pub minimum_node_pixel_size: f64,

  /// Opt-in to the incremental height-field accumulator.
  pub generate_dem: bool,
  pub height_field: HeightField,

  /// Frame outputs, rewritten by every scheduler update.
  pub visible_nodes: Vec<SharedNode>,
  pub num_visible_points: u64,
  pub num_visible_nodes: usize,
}

impl PointCloud {
  pub fn new() -> Self {
    Self {
      id: CloudId::new(),
      transform: DAffine3::IDENTITY,
      visible: true,
      root: None,
      point_budget: f64::INFINITY,
      max_level: u32::MAX,
      minimum_node_pixel_size: 50.0,
      generate_dem: false,
      height_field: HeightField::new(),
      visible_nodes: Vec::new(),
      num_visible_points: 0,
      num_visible_nodes: 0,
    }
  }

  /// Cloud with an already-built hierarchy root.
  pub fn with_root(root: SharedNode) -> Self {
    let mut cloud = Self::new();
    cloud.root = Some(root);
    cloud
  }

  /// True once a hierarchy root is attached.
  #[inline]
  pub fn initialized(&self) -> bool {
    self.root.is_some()
  }

  pub fn set_transform(&mut self, transform: DAffine3) {
    self.transform = transform;
  }

  /// Transform a world-space point into this cloud's object space.
  #[inline]
  pub fn world_to_object(&self, world_pos: DVec3) -> DVec3 {
    self.transform.inverse().transform_point3(world_pos)
  }

  /// Transform an object-space point into world space.
  #[inline]
  pub fn object_to_world(&self, object_pos: DVec3) -> DVec3 {
    self.transform.transform_point3(object_pos)
  }
}

impl Default for PointCloud {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::octree::bounds::DAabb3;
  use crate::octree::node::OctreeNode;

  #[test]
  fn test_defaults_are_unbounded() {
    let cloud = PointCloud::new();
    assert!(cloud.visible);
    assert!(!cloud.initialized());
    assert_eq!(cloud.point_budget, f64::INFINITY);
    assert_eq!(cloud.max_level, u32::MAX);
  }

  #[test]
  fn test_transform_roundtrip() {
    let mut cloud = PointCloud::new();
    cloud.set_transform(DAffine3::from_translation(DVec3::new(100.0, 50.0, 200.0)));

    let world = DVec3::new(150.0, 75.0, 250.0);
    let object = cloud.world_to_object(world);
    let back = cloud.object_to_world(object);
    assert!((world - back).length() < 1e-10);
  }

  #[test]
  fn test_with_root_initializes() {
    let root = OctreeNode::root(
      CloudId::new(),
      DAabb3::new(DVec3::ZERO, DVec3::splat(1.0)),
      1.0,
      0,
    );
    let cloud = PointCloud::with_root(root);
    assert!(cloud.initialized());
  }
}
