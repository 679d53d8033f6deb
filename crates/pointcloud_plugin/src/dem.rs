//! Incremental digital elevation model built from streamed nodes.
//!
//! The accumulator piggybacks on whatever the scheduler happens to make
//! visible: each `update` call advances exactly one not-yet-rasterized
//! node, dispatching its reduction to a heightmap on rayon's pool. Only
//! one rasterization may be in flight; further update requests while busy
//! are dropped, not deferred. A cloud transform change invalidates the
//! whole quadtree via a version bump and a from-scratch root rebuild.
//!
//! Tiles form a quadtree over the cloud's top-down (X/Y) footprint, each
//! holding a 64x64 height raster (NaN = unset) plus a mip pyramid for
//! coarse queries.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use glam::{DAffine3, DVec2, DVec3};

use crate::octree::bounds::{DAabb2, DAabb3};
use crate::octree::node::SharedNode;

/// Cells per tile edge.
pub const DEM_TILE_SIZE: usize = 64;

/// Pyramid depth: 64, 32, 16, 8, 4, 2, 1.
const DEM_MIP_LEVELS: usize = 7;

struct RasterResult {
  footprint: DAabb2,
  grid: Vec<f32>,
}

/// One quadtree tile of the height field.
struct DemTile {
  footprint: DAabb2,
  level: u32,
  /// `mips[0]` is the full-resolution raster; each further level halves.
  mips: Vec<Vec<f32>>,
  children: [Option<Box<DemTile>>; 4],
}

impl DemTile {
  fn new(footprint: DAabb2, level: u32) -> Self {
    let mips = (0..DEM_MIP_LEVELS)
      .map(|level| {
        let n = DEM_TILE_SIZE >> level;
        vec![f32::NAN; n * n]
      })
      .collect();
    Self {
      footprint,
      level,
      mips,
      children: [None, None, None, None],
    }
  }

  /// Copy samples from a completed raster into this tile's grid.
  ///
  /// Cell centers outside the raster's footprint are skipped; unset raster
  /// cells never overwrite existing samples.
  fn write_samples(&mut self, result: &RasterResult) {
    let n = DEM_TILE_SIZE;
    let size = self.footprint.size();
    for y in 0..n {
      for x in 0..n {
        let center = self.footprint.min
          + DVec2::new(
            size.x * (x as f64 + 0.5) / n as f64,
            size.y * (y as f64 + 0.5) / n as f64,
          );
        if !result.footprint.contains_point(center) {
          continue;
        }
        if let Some(height) =
          bilinear_sample(&result.grid, DEM_TILE_SIZE, &result.footprint, center)
        {
          self.mips[0][y * n + x] = height as f32;
        }
      }
    }
  }

  /// Rebuild the pyramid bottom-up, averaging 2x2 blocks of finite cells;
  /// a fully unset block stays unset.
  fn rebuild_mips(&mut self) {
    for level in 1..self.mips.len() {
      let n = DEM_TILE_SIZE >> level;
      let prev_n = n * 2;
      let (finer, coarser) = self.mips.split_at_mut(level);
      let prev = &finer[level - 1];
      let current = &mut coarser[0];
      for y in 0..n {
        for x in 0..n {
          let mut sum = 0.0f32;
          let mut count = 0u32;
          for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let value = prev[(y * 2 + dy) * prev_n + (x * 2 + dx)];
            if value.is_finite() {
              sum += value;
              count += 1;
            }
          }
          current[y * n + x] = if count > 0 {
            sum / count as f32
          } else {
            f32::NAN
          };
        }
      }
    }
  }

  /// Best available sample at `position`: scan mips finest to coarsest and
  /// return the first finite interpolated value.
  fn sample_at(&self, position: DVec2) -> Option<f64> {
    if !self.footprint.contains_point(position) {
      return None;
    }
    for (level, grid) in self.mips.iter().enumerate() {
      let n = DEM_TILE_SIZE >> level;
      if let Some(height) = bilinear_sample(grid, n, &self.footprint, position) {
        return Some(height);
      }
    }
    None
  }
}

/// Bilinear interpolation over an `n`x`n` grid covering `footprint`,
/// skipping unset cells and renormalizing; `None` if every contributing
/// cell is unset.
fn bilinear_sample(grid: &[f32], n: usize, footprint: &DAabb2, position: DVec2) -> Option<f64> {
  let size = footprint.size().max(DVec2::splat(f64::EPSILON));
  let u = ((position.x - footprint.min.x) / size.x) * n as f64 - 0.5;
  let v = ((position.y - footprint.min.y) / size.y) * n as f64 - 0.5;
  let x0 = u.floor().clamp(0.0, (n - 1) as f64) as usize;
  let y0 = v.floor().clamp(0.0, (n - 1) as f64) as usize;
  let x1 = (x0 + 1).min(n - 1);
  let y1 = (y0 + 1).min(n - 1);
  let fx = (u - u.floor()).clamp(0.0, 1.0);
  let fy = (v - v.floor()).clamp(0.0, 1.0);

  let samples = [
    (grid[y0 * n + x0], (1.0 - fx) * (1.0 - fy)),
    (grid[y0 * n + x1], fx * (1.0 - fy)),
    (grid[y1 * n + x0], (1.0 - fx) * fy),
    (grid[y1 * n + x1], fx * fy),
  ];
  let mut sum = 0.0;
  let mut weight_sum = 0.0;
  for (value, weight) in samples {
    if value.is_finite() {
      sum += value as f64 * weight;
      weight_sum += weight;
    }
  }
  if weight_sum > 0.0 {
    Some(sum / weight_sum)
  } else {
    None
  }
}

/// Reduce raw points to a full-resolution heightmap over `footprint`,
/// keeping the maximum height per cell.
fn rasterize(positions: &[DVec3], footprint: DAabb2) -> Vec<f32> {
  let n = DEM_TILE_SIZE;
  let mut grid = vec![f32::NAN; n * n];
  let size = footprint.size().max(DVec2::splat(f64::EPSILON));
  for position in positions {
    let planar = DVec2::new(position.x, position.y);
    if !footprint.contains_point(planar) {
      continue;
    }
    let x = (((planar.x - footprint.min.x) / size.x) * n as f64) as usize;
    let y = (((planar.y - footprint.min.y) / size.y) * n as f64) as usize;
    let index = y.min(n - 1) * n + x.min(n - 1);
    let height = position.z as f32;
    if !grid[index].is_finite() || height > grid[index] {
      grid[index] = height;
    }
  }
  grid
}

/// Find or create all tiles overlapping `footprint` down to `target_level`,
/// collecting their paths (quadrant digits from the root).
fn expand_tiles(
  tile: &mut DemTile,
  footprint: &DAabb2,
  target_level: u32,
  path: String,
  targets: &mut Vec<String>,
) {
  if !tile.footprint.overlaps(footprint) {
    return;
  }
  targets.push(path.clone());
  if tile.level >= target_level {
    return;
  }
  for quadrant in 0..4u8 {
    let quad_footprint = tile.footprint.child_quadrant(quadrant);
    if !quad_footprint.overlaps(footprint) {
      continue;
    }
    let level = tile.level + 1;
    let child = tile.children[quadrant as usize]
      .get_or_insert_with(|| Box::new(DemTile::new(quad_footprint, level)));
    let mut child_path = path.clone();
    child_path.push(char::from(b'0' + quadrant));
    expand_tiles(child, footprint, target_level, child_path, targets);
  }
}

fn find_tile_mut<'a>(root: &'a mut DemTile, path: &str) -> Option<&'a mut DemTile> {
  let mut tile = root;
  for digit in path.bytes() {
    let index = (digit - b'0') as usize;
    tile = tile.children.get_mut(index)?.as_deref_mut()?;
  }
  Some(tile)
}

/// On-demand height field over one point cloud.
pub struct HeightField {
  version: u64,
  transform: DAffine3,
  root: Option<Box<DemTile>>,
  /// Receiver for the single in-flight rasterization, if any.
  receiver: Option<Receiver<RasterResult>>,
  pending_targets: Vec<String>,
}

impl HeightField {
  pub fn new() -> Self {
    Self {
      version: 0,
      transform: DAffine3::IDENTITY,
      root: None,
      receiver: None,
      pending_targets: Vec::new(),
    }
  }

  /// Monotonic version; bumps whenever the owning cloud's transform
  /// changes and stale tiles are discarded.
  pub fn version(&self) -> u64 {
    self.version
  }

  /// True while a rasterization job is in flight.
  pub fn is_busy(&self) -> bool {
    self.receiver.is_some()
  }

  /// Advance the accumulator by at most one node.
  ///
  /// No-op while a rasterization is in flight (requests are dropped, not
  /// queued) and when every visible node is already rasterized at the
  /// current version.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "dem::update"))]
  pub fn update(&mut self, transform: DAffine3, root_bounds: DAabb3, visible_nodes: &[SharedNode]) {
    self.poll_job();
    if self.is_busy() {
      return;
    }

    if self.root.is_none() || transform != self.transform {
      self.transform = transform;
      self.version += 1;
      self.root = Some(Box::new(DemTile::new(root_bounds.footprint(), 0)));
    }

    let version = self.version;
    let Some(node) = visible_nodes
      .iter()
      .find(|node| node.dem_version() < version && node.point_buffer().is_some())
    else {
      return;
    };
    let Some(buffer) = node.point_buffer() else {
      return;
    };
    let Some(root) = self.root.as_mut() else {
      return;
    };

    let footprint = node.bounding_box().footprint();
    let mut targets = Vec::new();
    expand_tiles(root, &footprint, node.level(), String::new(), &mut targets);
    node.set_dem_version(version);
    if targets.is_empty() {
      return;
    }

    let positions = buffer.positions.clone();
    let (sender, receiver) = bounded(1);
    self.receiver = Some(receiver);
    self.pending_targets = targets;
    rayon::spawn(move || {
      let grid = rasterize(&positions, footprint);
      // Ignore send error (height field rebuilt or dropped).
      let _ = sender.send(RasterResult { footprint, grid });
    });
  }

  /// Height at an object-space X/Y position, plus the cloud's world Z
  /// offset. Walks the quadtree down, keeping the finest finite sample.
  pub fn height(&self, position: DVec2) -> Option<f64> {
    let mut best = None;
    let mut cursor = self.root.as_deref();
    while let Some(tile) = cursor {
      if let Some(sample) = tile.sample_at(position) {
        best = Some(sample);
      }
      cursor = tile
        .children
        .iter()
        .flatten()
        .find(|child| child.footprint.contains_point(position))
        .map(|child| child.as_ref());
    }
    best.map(|height| height + self.transform.translation.z)
  }

  fn poll_job(&mut self) {
    let Some(receiver) = &self.receiver else {
      return;
    };
    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.apply_raster(&result);
      }
      Err(TryRecvError::Empty) => {}
      Err(TryRecvError::Disconnected) => {
        self.receiver = None;
        self.pending_targets.clear();
      }
    }
  }

  fn apply_raster(&mut self, result: &RasterResult) {
    let targets = std::mem::take(&mut self.pending_targets);
    let Some(root) = self.root.as_deref_mut() else {
      return;
    };
    for path in &targets {
      if let Some(tile) = find_tile_mut(root, path) {
        tile.write_samples(result);
        tile.rebuild_mips();
      }
    }
  }
}

impl Default for HeightField {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
#[path = "dem_test.rs"]
mod dem_test;
