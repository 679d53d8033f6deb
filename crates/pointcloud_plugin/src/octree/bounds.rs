//! Double-precision bounding primitives for huge point clouds.
//!
//! All geometry lives in the owning cloud's object space; the scheduler
//! transforms the camera into object space instead of transforming every
//! node's box into world space.

use glam::{DVec2, DVec3};

/// Double-precision axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DAabb3 {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
}

impl DAabb3 {
  /// Create a new AABB from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "AABB min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Check if this AABB contains a point.
  #[inline]
  pub fn contains_point(&self, point: DVec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Check if this AABB fully contains another.
  #[inline]
  pub fn contains(&self, other: &DAabb3) -> bool {
    self.contains_point(other.min) && self.contains_point(other.max)
  }

  /// Get the size of the AABB (max - min).
  #[inline]
  pub fn size(&self) -> DVec3 {
    self.max - self.min
  }

  /// Get the center of the AABB.
  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  /// Length of the box diagonal.
  #[inline]
  pub fn diagonal(&self) -> f64 {
    self.size().length()
  }

  /// Smallest sphere enclosing the box.
  #[inline]
  pub fn bounding_sphere(&self) -> DSphere {
    let center = self.center();
    DSphere {
      center,
      radius: (self.max - center).length(),
    }
  }

  /// Box of the child octant selected by a 3-bit index.
  ///
  /// Bit layout matches the on-disk hierarchy path convention:
  /// bit 0 selects the upper Z half, bit 1 the upper Y half, bit 2 the
  /// upper X half. Child boxes are derived by halving along the encoded
  /// axes, so path names stay bit-exact with the hierarchy metadata.
  pub fn child_octant(&self, index: u8) -> DAabb3 {
    debug_assert!(index < 8, "octant index must be 0..8");
    let mut min = self.min;
    let mut max = self.max;
    let half = self.size() * 0.5;
    if index & 0b001 != 0 {
      min.z += half.z;
    } else {
      max.z -= half.z;
    }
    if index & 0b010 != 0 {
      min.y += half.y;
    } else {
      max.y -= half.y;
    }
    if index & 0b100 != 0 {
      min.x += half.x;
    } else {
      max.x -= half.x;
    }
    DAabb3 { min, max }
  }

  /// Box of one binary half along `axis` (0 = X, 1 = Y, 2 = Z).
  ///
  /// Used by the k-d tree variant; `index` 0 keeps the lower half,
  /// 1 the upper half.
  pub fn child_half(&self, axis: usize, index: u8) -> DAabb3 {
    debug_assert!(axis < 3 && index < 2);
    let mut min = self.min;
    let mut max = self.max;
    let mid = (self.min[axis] + self.max[axis]) * 0.5;
    if index == 0 {
      max[axis] = mid;
    } else {
      min[axis] = mid;
    }
    DAabb3 { min, max }
  }

  /// Top-down (X/Y) footprint of the box.
  #[inline]
  pub fn footprint(&self) -> DAabb2 {
    DAabb2 {
      min: DVec2::new(self.min.x, self.min.y),
      max: DVec2::new(self.max.x, self.max.y),
    }
  }
}

/// Bounding sphere, derived from a node's box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DSphere {
  pub center: DVec3,
  pub radius: f64,
}

impl DSphere {
  /// Check if a point lies inside (or on) the sphere.
  #[inline]
  pub fn contains_point(&self, point: DVec3) -> bool {
    self.center.distance_squared(point) <= self.radius * self.radius
  }
}

/// Double-precision 2D box, used for height-field tile footprints.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DAabb2 {
  pub min: DVec2,
  pub max: DVec2,
}

impl DAabb2 {
  pub fn new(min: DVec2, max: DVec2) -> Self {
    debug_assert!(min.x <= max.x && min.y <= max.y);
    Self { min, max }
  }

  #[inline]
  pub fn size(&self) -> DVec2 {
    self.max - self.min
  }

  #[inline]
  pub fn contains_point(&self, point: DVec2) -> bool {
    point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
  }

  #[inline]
  pub fn overlaps(&self, other: &DAabb2) -> bool {
    self.min.x <= other.max.x
      && self.max.x >= other.min.x
      && self.min.y <= other.max.y
      && self.max.y >= other.min.y
  }

  /// Box of the child quadrant selected by a 2-bit index
  /// (bit 0 = upper X half, bit 1 = upper Y half).
  pub fn child_quadrant(&self, index: u8) -> DAabb2 {
    debug_assert!(index < 4);
    let mut min = self.min;
    let mut max = self.max;
    let half = self.size() * 0.5;
    if index & 0b01 != 0 {
      min.x += half.x;
    } else {
      max.x -= half.x;
    }
    if index & 0b10 != 0 {
      min.y += half.y;
    } else {
      max.y -= half.y;
    }
    DAabb2 { min, max }
  }
}
