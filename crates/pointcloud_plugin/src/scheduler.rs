//! Per-frame visibility scheduling.
//!
//! Each frame the scheduler walks every visible cloud's hierarchy in
//! priority order and decides which nodes are resident and visible:
//!
//! 1. **Setup**: drain load completions, build one object-space frustum and
//!    camera position per cloud, reset per-frame outputs, seed the queue
//!    with every root at infinite weight.
//! 2. **Drain**: pop the highest-weight node, admit it if it passes the
//!    frustum test, the global and per-cloud point budgets, and the level
//!    cap. Rejected nodes prune their entire subtree - that is the
//!    budget-enforcing mechanism. Admitted nodes touch the LRU, get
//!    promoted to live tree nodes under the per-frame GPU quota (parents
//!    first - no orphan live nodes), and expand their children into the
//!    queue with projected-screen-size weights.
//! 3. **Dispatch**: issue loads for the most important unloaded nodes, up
//!    to the per-frame cap.
//! 4. **Consumers**: advance opted-in height fields, then run one global
//!    eviction pass over the LRU.
//!
//! The only durable state across frames is the cache and the node load
//! states; everything else is recomputed per call.

use std::sync::Arc;

use glam::{DMat4, DVec3};
use web_time::Instant;

use crate::cache::GeometryCache;
use crate::camera::{Camera, Frustum, Viewport};
use crate::cloud::PointCloud;
use crate::loading::{LoadPipeline, PointSource};
use crate::octree::node::{SharedNode, SpatialNode};
use crate::queue::{ImportanceQueue, QueueEntry};

/// Process-wide resource knobs, passed explicitly so the core stays
/// testable and reentrant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
  /// Resident point ceiling enforced by the LRU eviction pass.
  pub point_load_limit: u64,
  /// In-flight load ceiling; `load()` calls above it are rejected
  /// (backpressure, not queueing).
  pub max_loads_in_flight: usize,
  /// How many already-loaded geometry nodes may be promoted to live tree
  /// nodes in one frame (amortizes GPU upload cost).
  pub max_node_promotions_per_frame: usize,
  /// How many new loads may be issued in one frame (amortizes decode
  /// pipeline pressure), independent of the in-flight ceiling.
  pub max_load_dispatches_per_frame: usize,
}

impl ResourceLimits {
  /// Default limits for interactive streaming.
  pub const DEFAULT: Self = Self {
    point_load_limit: 2_000_000,
    max_loads_in_flight: 4,
    max_node_promotions_per_frame: 2,
    max_load_dispatches_per_frame: 4,
  };

  /// Unlimited everything, for tests and offline processing.
  pub const UNLIMITED: Self = Self {
    point_load_limit: u64::MAX,
    max_loads_in_flight: usize::MAX,
    max_node_promotions_per_frame: usize::MAX,
    max_load_dispatches_per_frame: usize::MAX,
  };
}

impl Default for ResourceLimits {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Counters from one scheduler update.
#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
  /// Nodes popped from the queue, admitted or not.
  pub popped_nodes: usize,
  /// Nodes that passed all admission tests.
  pub admitted_nodes: usize,
  /// Sum of `num_points` over admitted nodes, all clouds.
  pub num_visible_points: u64,
  /// Minimum spacing over all popped nodes (side channel for the renderer
  /// to size near/far planes); infinity when nothing was popped.
  pub lowest_spacing: f64,
  pub nodes_promoted: usize,
  /// Loads actually issued this frame (after the in-flight ceiling).
  pub loads_dispatched: usize,
  /// Wall time of the whole update in microseconds.
  pub drain_us: u64,
}

impl Default for FrameStats {
  fn default() -> Self {
    Self {
      popped_nodes: 0,
      admitted_nodes: 0,
      num_visible_points: 0,
      lowest_spacing: f64::INFINITY,
      nodes_promoted: 0,
      loads_dispatched: 0,
      drain_us: 0,
    }
  }
}

/// Result of one scheduler update. Per-cloud visible-node lists are
/// written into each [`PointCloud`] directly.
pub struct FrameOutput {
  pub stats: FrameStats,
  /// Nodes promoted to live tree nodes this frame, for the rendering
  /// collaborator to attach; detach goes through node dispose callbacks.
  pub promotions: Vec<(usize, SharedNode)>,
}

/// Frustum and camera position in one cloud's object space.
struct CloudFrame {
  frustum: Frustum,
  camera_obj_pos: DVec3,
}

/// The per-frame orchestrator: owns the LRU cache and the load pipeline
/// shared by all clouds.
pub struct Scheduler {
  pub limits: ResourceLimits,
  cache: GeometryCache,
  loads: LoadPipeline,
}

impl Scheduler {
  pub fn new(source: Arc<dyn PointSource>, limits: ResourceLimits) -> Self {
    Self {
      limits,
      cache: GeometryCache::new(),
      loads: LoadPipeline::new(source, limits.max_loads_in_flight),
    }
  }

  pub fn cache(&self) -> &GeometryCache {
    &self.cache
  }

  pub fn loads(&self) -> &LoadPipeline {
    &self.loads
  }

  /// Compute this frame's visible set across all clouds.
  ///
  /// `total_point_budget` caps the sum of admitted points over all clouds
  /// together; `f64::INFINITY` disables it.
  #[cfg_attr(
    feature = "tracing",
    tracing::instrument(skip_all, name = "scheduler::update")
  )]
  pub fn update(
    &mut self,
    clouds: &mut [PointCloud],
    camera: &Camera,
    viewport: Viewport,
    total_point_budget: f64,
  ) -> FrameOutput {
    let start = Instant::now();
    // Limits are public and may change between frames; re-sync the ceiling
    // the pipeline enforces.
    self.loads.set_max_in_flight(self.limits.max_loads_in_flight);
    self.loads.drain_completions();

    let mut queue = ImportanceQueue::new();
    let mut frames: Vec<Option<CloudFrame>> = Vec::with_capacity(clouds.len());

    for (cloud_index, cloud) in clouds.iter_mut().enumerate() {
      cloud.visible_nodes.clear();
      cloud.num_visible_points = 0;
      cloud.num_visible_nodes = 0;

      let root = match (&cloud.root, cloud.visible) {
        (Some(root), true) => root.clone(),
        _ => {
          frames.push(None);
          continue;
        }
      };

      // One frustum per cloud, in the cloud's object space: transforming
      // six planes once instead of every node box into world space.
      let world = DMat4::from(cloud.transform);
      let matrix = camera.culling_projection(&viewport) * camera.view() * world;
      frames.push(Some(CloudFrame {
        frustum: Frustum::from_matrix(&matrix),
        camera_obj_pos: cloud.world_to_object(camera.position()),
      }));

      queue.push(QueueEntry {
        cloud_index,
        node: root,
        parent: None,
        weight: f64::INFINITY,
      });
    }

    let mut stats = FrameStats::default();
    let mut promotions: Vec<(usize, SharedNode)> = Vec::new();
    let mut unloaded_wanted: Vec<SharedNode> = Vec::new();
    let mut global_points: u64 = 0;

    while let Some(entry) = queue.pop() {
      let QueueEntry {
        cloud_index,
        node,
        parent,
        ..
      } = entry;
      let Some(frame) = frames[cloud_index].as_ref() else {
        continue;
      };
      let cloud = &mut clouds[cloud_index];

      stats.popped_nodes += 1;
      // Computed for rejected nodes too.
      stats.lowest_spacing = stats.lowest_spacing.min(node.spacing());

      let num_points = node.num_points();
      let visible = frame.frustum.intersects_aabb(&node.bounding_box())
        && (global_points + num_points) as f64 <= total_point_budget
        && (cloud.num_visible_points + num_points) as f64 <= cloud.point_budget
        && node.level() < cloud.max_level;

      if !visible {
        // Rejected subtrees are pruned entirely; this is what enforces
        // the budgets.
        continue;
      }

      global_points += num_points;
      cloud.num_visible_points += num_points;
      cloud.num_visible_nodes += 1;
      stats.admitted_nodes += 1;

      // Promote loaded geometry under the per-frame quota; a node only
      // goes live after its parent did (no orphan live nodes).
      let parent_is_live = parent.as_ref().map_or(true, |p| p.is_tree_node());
      if node.is_geometry_node() && parent_is_live {
        if node.is_loaded() && stats.nodes_promoted < self.limits.max_node_promotions_per_frame {
          if node.promote() {
            stats.nodes_promoted += 1;
            promotions.push((cloud_index, node.clone()));
          }
        } else {
          unloaded_wanted.push(node.clone());
        }
      }

      if node.is_tree_node() {
        self.cache.touch(&node);
        cloud.visible_nodes.push(node.clone());
      }

      for child in node.children() {
        let Some(weight) = node_weight(
          camera,
          &viewport,
          frame.camera_obj_pos,
          child.as_ref(),
          cloud.minimum_node_pixel_size,
        ) else {
          continue;
        };
        queue.push(QueueEntry {
          cloud_index,
          node: child,
          parent: Some(node.clone()),
          weight,
        });
      }
    }

    stats.num_visible_points = global_points;

    // Dispatch loads in priority order (the wanted list was filled from a
    // priority-ordered drain), capped per frame.
    let in_flight_before = self.loads.in_flight();
    for node in unloaded_wanted
      .into_iter()
      .take(self.limits.max_load_dispatches_per_frame)
    {
      node.load(&mut self.loads);
    }
    stats.loads_dispatched = self.loads.in_flight() - in_flight_before;

    // Auxiliary consumer: height fields read this frame's visible sets.
    for cloud in clouds.iter_mut() {
      if !cloud.generate_dem || !cloud.visible {
        continue;
      }
      let Some(root_bounds) = cloud.root.as_ref().map(|root| root.bounding_box()) else {
        continue;
      };
      let transform = cloud.transform;
      cloud
        .height_field
        .update(transform, root_bounds, &cloud.visible_nodes);
    }

    // One global eviction pass, strictly after all clouds were scheduled.
    self.cache.free_memory(self.limits.point_load_limit);

    stats.drain_us = start.elapsed().as_micros() as u64;
    FrameOutput { stats, promotions }
  }
}

/// Importance weight for a child node, or `None` when the child falls
/// below the perceptual pixel-size cutoff and is skipped outright.
///
/// Perspective: projected on-screen radius in pixels, infinite when the
/// camera is inside the child's bounding sphere (nodes the camera is
/// embedded in must never pop). Orthographic: box diagonal over distance,
/// with no pixel cutoff - a known asymmetry kept from the reference
/// behavior.
fn node_weight(
  camera: &Camera,
  viewport: &Viewport,
  camera_obj_pos: DVec3,
  child: &dyn SpatialNode,
  minimum_node_pixel_size: f64,
) -> Option<f64> {
  match camera {
    Camera::Perspective(cam) => {
      let sphere = child.bounding_sphere();
      let distance = sphere.center.distance(camera_obj_pos);
      let slope = (cam.fov_y * 0.5).tan();
      let proj_factor = (0.5 * viewport.height) / (slope * distance);
      let screen_pixel_radius = sphere.radius * proj_factor;
      if screen_pixel_radius < minimum_node_pixel_size {
        return None;
      }
      if distance - sphere.radius < 0.0 {
        Some(f64::INFINITY)
      } else {
        Some(screen_pixel_radius)
      }
    }
    Camera::Orthographic(_) => {
      let distance = child.bounding_sphere().center.distance(camera_obj_pos);
      Some(child.bounding_box().diagonal() / distance)
    }
  }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;
