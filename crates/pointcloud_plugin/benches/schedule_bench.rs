//! Benchmark the per-frame scheduler drain over synthetic octrees.

use std::rc::Rc;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{DMat4, DVec3};
use pointcloud_plugin::{
  Camera, CloudId, DAabb3, ImportanceQueue, LoadError, LoadRequest, LoadedData, OctreeNode,
  PerspectiveCamera, PointBuffer, PointCloud, PointSource, QueueEntry, ResourceLimits, Scheduler,
  SharedNode, SpatialNode, Viewport,
};

/// Never-called source; every benchmark node is pre-loaded.
struct NullSource;

impl PointSource for NullSource {
  fn fetch(&self, _request: &LoadRequest) -> Result<LoadedData, LoadError> {
    Ok(LoadedData {
      num_points: 0,
      tight_bounds: DAabb3::new(DVec3::ZERO, DVec3::ONE),
      buffer: PointBuffer::default(),
    })
  }
}

fn cloud_bounds() -> DAabb3 {
  DAabb3::new(DVec3::ZERO, DVec3::splat(100.0))
}

fn camera_at_cloud() -> Camera {
  let position = DVec3::new(50.0, 50.0, 400.0);
  Camera::Perspective(PerspectiveCamera {
    position,
    view: DMat4::look_at_rh(position, DVec3::new(50.0, 50.0, 50.0), DVec3::Y),
    fov_y: 60f64.to_radians(),
    near: 0.1,
    far: 10_000.0,
  })
}

fn camera_facing_away() -> Camera {
  let position = DVec3::new(50.0, 50.0, 400.0);
  Camera::Perspective(PerspectiveCamera {
    position,
    view: DMat4::look_at_rh(position, DVec3::new(50.0, 50.0, 1000.0), DVec3::Y),
    fov_y: 60f64.to_radians(),
    near: 0.1,
    far: 10_000.0,
  })
}

fn mark_resident(node: &Rc<OctreeNode>) {
  node.apply_loaded(LoadedData {
    num_points: 1_000,
    tight_bounds: node.bounding_box(),
    buffer: PointBuffer::default(),
  });
  node.promote();
}

fn add_levels(parent: &Rc<OctreeNode>, depth: u32) {
  if depth == 0 {
    return;
  }
  for octant in 0..8 {
    let child = parent.add_child(octant, 1_000);
    mark_resident(&child);
    add_levels(&child, depth - 1);
  }
}

/// Full octree of `depth` levels below the root, everything resident.
fn build_cloud(depth: u32) -> PointCloud {
  let root = OctreeNode::root(CloudId::new(), cloud_bounds(), 1.0, 1_000);
  mark_resident(&root);
  add_levels(&root, depth);
  let mut cloud = PointCloud::with_root(root);
  cloud.minimum_node_pixel_size = 0.0;
  cloud
}

/// Steady-state frame: every node already live, the drain only culls,
/// weighs, and touches the cache.
fn bench_full_update(c: &mut Criterion) {
  let mut group = c.benchmark_group("scheduler_update");
  let viewport = Viewport::new(1920.0, 1080.0);
  let camera = camera_at_cloud();

  for depth in [2u32, 3, 4] {
    let mut clouds = vec![build_cloud(depth)];
    let mut scheduler = Scheduler::new(Arc::new(NullSource), ResourceLimits::UNLIMITED);

    group.bench_with_input(
      BenchmarkId::new("full_octree", format!("depth={}", depth)),
      &depth,
      |b, _| {
        b.iter(|| {
          let out = scheduler.update(black_box(&mut clouds), &camera, viewport, f64::INFINITY);
          black_box(out.stats.admitted_nodes)
        })
      },
    );
  }

  group.finish();
}

/// Worst-case cheap frame: the root fails the frustum test and the whole
/// tree is pruned in one pop.
fn bench_culled_update(c: &mut Criterion) {
  let mut clouds = vec![build_cloud(4)];
  let mut scheduler = Scheduler::new(Arc::new(NullSource), ResourceLimits::UNLIMITED);
  let viewport = Viewport::new(1920.0, 1080.0);
  let camera = camera_facing_away();

  c.bench_function("scheduler_update/culled depth=4", |b| {
    b.iter(|| {
      let out = scheduler.update(black_box(&mut clouds), &camera, viewport, f64::INFINITY);
      black_box(out.stats.popped_nodes)
    })
  });
}

/// Raw queue churn at frame scale.
fn bench_queue(c: &mut Criterion) {
  let root = OctreeNode::root(CloudId::new(), cloud_bounds(), 1.0, 1_000);
  let node: SharedNode = root;

  c.bench_function("importance_queue push+pop 10k", |b| {
    b.iter(|| {
      let mut queue = ImportanceQueue::new();
      for i in 0..10_000u32 {
        queue.push(QueueEntry {
          cloud_index: 0,
          node: node.clone(),
          parent: None,
          weight: f64::from(i % 997),
        });
      }
      while let Some(entry) = queue.pop() {
        black_box(entry.weight);
      }
    })
  });
}

criterion_group!(benches, bench_full_update, bench_culled_update, bench_queue);
criterion_main!(benches);
