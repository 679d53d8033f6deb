//! Tree nodes for out-of-core point cloud hierarchies.
//!
//! A node starts life as an on-disk descriptor (bounding box, level and a
//! point-count estimate from hierarchy metadata) and is fleshed out by an
//! asynchronous load. The scheduler and cache only ever see nodes through
//! the [`SpatialNode`] capability trait, so the same algorithm drives both
//! the octree and the k-d tree hierarchy shapes.
//!
//! # Path names
//!
//! A node's name encodes its position in the tree: the root is `"r"` and
//! each level appends one digit: the 3-bit octant index for octrees
//! (bit 0 = Z half, bit 1 = Y half, bit 2 = X half), `0`/`1` for k-d
//! trees. Node identity (cache keys, load completions) is this path string
//! plus the owning cloud id, so box subdivision must stay bit-exact with
//! whatever produced the on-disk hierarchy.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use smallvec::SmallVec;

use super::bounds::{DAabb3, DSphere};
use crate::cloud::CloudId;
use crate::loading::{LoadPipeline, LoadRequest, LoadedData, PointBuffer};

/// Shared handle to a tree node of any hierarchy shape.
pub type SharedNode = Rc<dyn SpatialNode>;
/// Non-owning handle, used for parent links and load completions.
pub type WeakNode = Weak<dyn SpatialNode>;

/// Node identity: owning cloud plus hierarchy path name.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeKey {
  pub cloud: CloudId,
  pub name: Arc<str>,
}

impl std::fmt::Display for NodeKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.cloud.raw(), self.name)
  }
}

/// Load lifecycle of a node's point payload.
///
/// `Unloaded → Loading → Loaded`; `Loaded → Unloaded` only via
/// [`SpatialNode::dispose`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadState {
  Unloaded,
  Loading,
  Loaded,
}

/// Capability surface shared by all hierarchy variants.
///
/// The scheduler must never branch on a concrete node type; everything it
/// needs goes through this trait.
pub trait SpatialNode {
  /// Identity used for cache entries and load completions.
  fn key(&self) -> NodeKey;

  /// Structural bounding box in the owning cloud's object space.
  ///
  /// This is the subdivision box, not the post-load tight box; child boxes
  /// are derived from it, so it never changes after construction.
  fn bounding_box(&self) -> DAabb3;

  /// Bounding sphere derived from the structural box.
  fn bounding_sphere(&self) -> DSphere;

  /// Tight box reported by the load, if any.
  fn tight_bounding_box(&self) -> Option<DAabb3>;

  /// Depth from the root (root = 0).
  fn level(&self) -> u32;

  /// Nominal point separation at this level; halves per level.
  fn spacing(&self) -> f64;

  /// Authoritative once loaded, otherwise the hierarchy-metadata estimate.
  fn num_points(&self) -> u64;

  fn state(&self) -> LoadState;

  #[inline]
  fn is_loaded(&self) -> bool {
    self.state() == LoadState::Loaded
  }

  /// True once the node has been promoted to a live, renderer-attached
  /// representation.
  fn is_tree_node(&self) -> bool;

  /// A node is exactly one of geometry (descriptor) or tree node.
  #[inline]
  fn is_geometry_node(&self) -> bool {
    !self.is_tree_node()
  }

  fn children(&self) -> SmallVec<[SharedNode; 8]>;

  fn parent(&self) -> Option<SharedNode>;

  /// Issue an asynchronous load.
  ///
  /// Silent no-op if the node is already loading or loaded, or if the
  /// pipeline's in-flight ceiling is reached (backpressure, not queueing).
  fn load(self: Rc<Self>, loads: &mut LoadPipeline);

  /// Release the point payload and detach the live representation.
  ///
  /// No-op on roots (they are never disposed) and on non-loaded nodes.
  /// Registered dispose callbacks fire exactly once, then the list is
  /// cleared.
  fn dispose(&self);

  /// Register a one-shot callback invoked on the next dispose.
  fn on_dispose(&self, callback: Box<dyn FnOnce()>);

  /// Promote a loaded geometry node to a live tree node.
  ///
  /// Returns false if the node is not loaded or already promoted. The
  /// caller enforces the no-orphan invariant (parent already live).
  fn promote(&self) -> bool;

  /// Apply a successful load completion.
  fn apply_loaded(&self, data: LoadedData);

  /// Load completion with an error: back to `Unloaded`, never auto-retried.
  fn mark_load_failed(&self);

  /// Point payload, present only while loaded.
  fn point_buffer(&self) -> Option<Rc<PointBuffer>>;

  /// Height-field accumulator version stamp (0 = never rasterized).
  fn dem_version(&self) -> u64;
  fn set_dem_version(&self, version: u64);
}

/// State shared by every hierarchy variant.
struct NodeCore {
  key: NodeKey,
  level: u32,
  spacing: f64,
  bounds: DAabb3,
  tight_bounds: Cell<Option<DAabb3>>,
  num_points: Cell<u64>,
  state: Cell<LoadState>,
  attached: Cell<bool>,
  parent: RefCell<Option<WeakNode>>,
  buffer: RefCell<Option<Rc<PointBuffer>>>,
  dispose_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
  dem_version: Cell<u64>,
}

impl NodeCore {
  fn new(key: NodeKey, level: u32, spacing: f64, bounds: DAabb3, estimated_points: u64) -> Self {
    Self {
      key,
      level,
      spacing,
      bounds,
      tight_bounds: Cell::new(None),
      num_points: Cell::new(estimated_points),
      state: Cell::new(LoadState::Unloaded),
      attached: Cell::new(false),
      parent: RefCell::new(None),
      buffer: RefCell::new(None),
      dispose_callbacks: RefCell::new(Vec::new()),
      dem_version: Cell::new(0),
    }
  }

  fn load(&self, handle: SharedNode, loads: &mut LoadPipeline) {
    if self.state.get() != LoadState::Unloaded {
      return;
    }
    let request = LoadRequest {
      key: self.key.clone(),
      bounds: self.bounds,
      level: self.level,
      estimated_points: self.num_points.get(),
    };
    if !loads.begin(handle, request) {
      return;
    }
    self.state.set(LoadState::Loading);
  }

  fn dispose(&self) {
    // Roots keep their payload warm; the cache still unlinks them.
    if self.parent.borrow().is_none() {
      return;
    }
    if self.state.get() != LoadState::Loaded {
      return;
    }
    self.buffer.borrow_mut().take();
    self.state.set(LoadState::Unloaded);
    self.attached.set(false);
    let callbacks = std::mem::take(&mut *self.dispose_callbacks.borrow_mut());
    for callback in callbacks {
      callback();
    }
  }

  fn promote(&self) -> bool {
    if self.state.get() != LoadState::Loaded || self.attached.get() {
      return false;
    }
    self.attached.set(true);
    true
  }

  fn apply_loaded(&self, data: LoadedData) {
    self.num_points.set(data.num_points);
    self.tight_bounds.set(Some(data.tight_bounds));
    *self.buffer.borrow_mut() = Some(Rc::new(data.buffer));
    self.state.set(LoadState::Loaded);
  }

  fn mark_load_failed(&self) {
    self.state.set(LoadState::Unloaded);
  }

  fn parent(&self) -> Option<SharedNode> {
    self.parent.borrow().as_ref().and_then(Weak::upgrade)
  }
}

/// Delegate the [`SpatialNode`] state machine to an embedded `NodeCore`.
///
/// Variants only differ in child bookkeeping, which they implement by hand.
macro_rules! delegate_core {
  () => {
    fn key(&self) -> NodeKey {
      self.core.key.clone()
    }

    fn bounding_box(&self) -> DAabb3 {
      self.core.bounds
    }

    fn bounding_sphere(&self) -> DSphere {
      self.core.bounds.bounding_sphere()
    }

    fn tight_bounding_box(&self) -> Option<DAabb3> {
      self.core.tight_bounds.get()
    }

    fn level(&self) -> u32 {
      self.core.level
    }

    fn spacing(&self) -> f64 {
      self.core.spacing
    }

    fn num_points(&self) -> u64 {
      self.core.num_points.get()
    }

    fn state(&self) -> LoadState {
      self.core.state.get()
    }

    fn is_tree_node(&self) -> bool {
      self.core.attached.get()
    }

    fn parent(&self) -> Option<SharedNode> {
      self.core.parent()
    }

    fn load(self: Rc<Self>, loads: &mut LoadPipeline) {
      let handle: SharedNode = self.clone();
      self.core.load(handle, loads);
    }

    fn dispose(&self) {
      self.core.dispose();
    }

    fn on_dispose(&self, callback: Box<dyn FnOnce()>) {
      self.core.dispose_callbacks.borrow_mut().push(callback);
    }

    fn promote(&self) -> bool {
      self.core.promote()
    }

    fn apply_loaded(&self, data: LoadedData) {
      self.core.apply_loaded(data);
    }

    fn mark_load_failed(&self) {
      self.core.mark_load_failed();
    }

    fn point_buffer(&self) -> Option<Rc<PointBuffer>> {
      self.core.buffer.borrow().clone()
    }

    fn dem_version(&self) -> u64 {
      self.core.dem_version.get()
    }

    fn set_dem_version(&self, version: u64) {
      self.core.dem_version.set(version);
    }
  };
}

// =============================================================================
// OctreeNode - 8-way subdivision
// =============================================================================

/// Octree hierarchy node: up to 8 children, 3-bit octant subdivision.
pub struct OctreeNode {
  core: NodeCore,
  children: RefCell<SmallVec<[Rc<OctreeNode>; 8]>>,
}

impl OctreeNode {
  /// Create a root node (`"r"`, level 0).
  pub fn root(cloud: CloudId, bounds: DAabb3, spacing: f64, estimated_points: u64) -> Rc<Self> {
    let key = NodeKey {
      cloud,
      name: Arc::from("r"),
    };
    Rc::new(Self {
      core: NodeCore::new(key, 0, spacing, bounds, estimated_points),
      children: RefCell::new(SmallVec::new()),
    })
  }

  /// Create and attach the child at `octant`, halving the box along the
  /// encoded axes and the spacing per level.
  pub fn add_child(self: &Rc<Self>, octant: u8, estimated_points: u64) -> Rc<Self> {
    debug_assert!(octant < 8, "octant index must be 0..8");
    let name: Arc<str> = Arc::from(format!("{}{}", self.core.key.name, octant));
    let key = NodeKey {
      cloud: self.core.key.cloud,
      name,
    };
    // Path names are node identity; a duplicate would collide in the cache
    // and load registry.
    debug_assert!(
      self
        .children
        .borrow()
        .iter()
        .all(|child| child.core.key.name != key.name),
      "child {} already exists",
      key.name
    );
    let child = Rc::new(Self {
      core: NodeCore::new(
        key,
        self.core.level + 1,
        self.core.spacing * 0.5,
        self.core.bounds.child_octant(octant),
        estimated_points,
      ),
      children: RefCell::new(SmallVec::new()),
    });
    let parent: WeakNode = Rc::<Self>::downgrade(self);
    *child.core.parent.borrow_mut() = Some(parent);
    self.children.borrow_mut().push(child.clone());
    child
  }
}

impl SpatialNode for OctreeNode {
  delegate_core!();

  fn children(&self) -> SmallVec<[SharedNode; 8]> {
    self
      .children
      .borrow()
      .iter()
      .map(|child| child.clone() as SharedNode)
      .collect()
  }
}

// =============================================================================
// KdNode - binary subdivision, alternating axes
// =============================================================================

/// K-d tree hierarchy node: up to 2 children, halving along `level % 3`.
pub struct KdNode {
  core: NodeCore,
  children: RefCell<SmallVec<[Rc<KdNode>; 2]>>,
}

impl KdNode {
  /// Create a root node (`"r"`, level 0).
  pub fn root(cloud: CloudId, bounds: DAabb3, spacing: f64, estimated_points: u64) -> Rc<Self> {
    let key = NodeKey {
      cloud,
      name: Arc::from("r"),
    };
    Rc::new(Self {
      core: NodeCore::new(key, 0, spacing, bounds, estimated_points),
      children: RefCell::new(SmallVec::new()),
    })
  }

  /// Split axis for this node's children.
  #[inline]
  pub fn split_axis(&self) -> usize {
    (self.core.level % 3) as usize
  }

  /// Create and attach the lower (`0`) or upper (`1`) half child.
  pub fn add_child(self: &Rc<Self>, index: u8, estimated_points: u64) -> Rc<Self> {
    debug_assert!(index < 2, "kd child index must be 0 or 1");
    let name: Arc<str> = Arc::from(format!("{}{}", self.core.key.name, index));
    let key = NodeKey {
      cloud: self.core.key.cloud,
      name,
    };
    debug_assert!(
      self
        .children
        .borrow()
        .iter()
        .all(|child| child.core.key.name != key.name),
      "child {} already exists",
      key.name
    );
    let child = Rc::new(Self {
      core: NodeCore::new(
        key,
        self.core.level + 1,
        self.core.spacing * 0.5,
        self.core.bounds.child_half(self.split_axis(), index),
        estimated_points,
      ),
      children: RefCell::new(SmallVec::new()),
    });
    let parent: WeakNode = Rc::<Self>::downgrade(self);
    *child.core.parent.borrow_mut() = Some(parent);
    self.children.borrow_mut().push(child.clone());
    child
  }
}

impl SpatialNode for KdNode {
  delegate_core!();

  fn children(&self) -> SmallVec<[SharedNode; 8]> {
    self
      .children
      .borrow()
      .iter()
      .map(|child| child.clone() as SharedNode)
      .collect()
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
