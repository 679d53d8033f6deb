//! Camera model and object-space frustum culling.
//!
//! Per cloud, the scheduler builds one frustum from
//! `projection * view * world` so every node box can be tested in the
//! cloud's own object space; transforming six planes once beats
//! transforming millions of node boxes into world space.

use glam::{DMat4, DVec3, DVec4};

use crate::octree::bounds::DAabb3;

/// Near plane used for culling only, distinct from the camera's real near
/// plane. Large nodes straddling the camera must not get culled by the
/// render near plane.
pub const FRUSTUM_NEAR: f64 = 0.1;

/// Render target size in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
  pub width: f64,
  pub height: f64,
}

impl Viewport {
  pub fn new(width: f64, height: f64) -> Self {
    Self { width, height }
  }

  #[inline]
  pub fn aspect(&self) -> f64 {
    self.width / self.height
  }
}

/// Perspective camera state the scheduler reads.
#[derive(Clone, Copy, Debug)]
pub struct PerspectiveCamera {
  /// World-space position.
  pub position: DVec3,
  /// World-to-view matrix.
  pub view: DMat4,
  /// Vertical field of view in radians.
  pub fov_y: f64,
  pub near: f64,
  pub far: f64,
}

/// Orthographic camera state the scheduler reads.
#[derive(Clone, Copy, Debug)]
pub struct OrthographicCamera {
  /// World-space position.
  pub position: DVec3,
  /// World-to-view matrix.
  pub view: DMat4,
  /// Half of the vertical view extent in world units.
  pub half_height: f64,
  pub near: f64,
  pub far: f64,
}

/// The two projection kinds the scheduler weights nodes for.
#[derive(Clone, Copy, Debug)]
pub enum Camera {
  Perspective(PerspectiveCamera),
  Orthographic(OrthographicCamera),
}

impl Camera {
  /// World-space camera position.
  #[inline]
  pub fn position(&self) -> DVec3 {
    match self {
      Camera::Perspective(cam) => cam.position,
      Camera::Orthographic(cam) => cam.position,
    }
  }

  /// World-to-view matrix.
  #[inline]
  pub fn view(&self) -> DMat4 {
    match self {
      Camera::Perspective(cam) => cam.view,
      Camera::Orthographic(cam) => cam.view,
    }
  }

  /// Projection matrix for culling, near plane clamped to [`FRUSTUM_NEAR`].
  pub fn culling_projection(&self, viewport: &Viewport) -> DMat4 {
    match self {
      Camera::Perspective(cam) => DMat4::perspective_rh(
        cam.fov_y,
        viewport.aspect(),
        cam.near.min(FRUSTUM_NEAR),
        cam.far,
      ),
      Camera::Orthographic(cam) => {
        let half_width = cam.half_height * viewport.aspect();
        DMat4::orthographic_rh(
          -half_width,
          half_width,
          -cam.half_height,
          cam.half_height,
          cam.near.min(FRUSTUM_NEAR),
          cam.far,
        )
      }
    }
  }
}

/// Six-plane view frustum; planes point inward.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
  planes: [DVec4; 6],
}

impl Frustum {
  /// Extract planes from a combined `projection * view * world` matrix
  /// (Gribb/Hartmann). Projection uses 0..1 clip depth, so the near plane
  /// is row 2 alone.
  pub fn from_matrix(matrix: &DMat4) -> Self {
    let r0 = matrix.row(0);
    let r1 = matrix.row(1);
    let r2 = matrix.row(2);
    let r3 = matrix.row(3);
    let planes = [
      normalize_plane(r3 + r0), // left
      normalize_plane(r3 - r0), // right
      normalize_plane(r3 + r1), // bottom
      normalize_plane(r3 - r1), // top
      normalize_plane(r2),      // near
      normalize_plane(r3 - r2), // far
    ];
    Self { planes }
  }

  /// Conservative box-vs-frustum test via the positive vertex: the box is
  /// rejected only if entirely outside some plane.
  pub fn intersects_aabb(&self, aabb: &DAabb3) -> bool {
    for plane in &self.planes {
      let p_vertex = DVec3::new(
        if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
        if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
        if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
      );
      if plane.truncate().dot(p_vertex) + plane.w < 0.0 {
        return false;
      }
    }
    true
  }
}

fn normalize_plane(plane: DVec4) -> DVec4 {
  let length = plane.truncate().length();
  if length > 0.0 {
    plane / length
  } else {
    plane
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn look_down_neg_z() -> Camera {
    let position = DVec3::ZERO;
    Camera::Perspective(PerspectiveCamera {
      position,
      view: DMat4::look_at_rh(position, position + DVec3::NEG_Z, DVec3::Y),
      fov_y: std::f64::consts::FRAC_PI_3,
      near: 0.5,
      far: 10_000.0,
    })
  }

  fn frustum_for(camera: &Camera) -> Frustum {
    let viewport = Viewport::new(1920.0, 1080.0);
    let matrix = camera.culling_projection(&viewport) * camera.view();
    Frustum::from_matrix(&matrix)
  }

  #[test]
  fn test_box_ahead_intersects() {
    let frustum = frustum_for(&look_down_neg_z());
    let ahead = DAabb3::new(DVec3::new(-1.0, -1.0, -10.0), DVec3::new(1.0, 1.0, -5.0));
    assert!(frustum.intersects_aabb(&ahead));
  }

  #[test]
  fn test_box_behind_is_culled() {
    let frustum = frustum_for(&look_down_neg_z());
    let behind = DAabb3::new(DVec3::new(-1.0, -1.0, 5.0), DVec3::new(1.0, 1.0, 10.0));
    assert!(!frustum.intersects_aabb(&behind));
  }

  #[test]
  fn test_box_far_off_axis_is_culled() {
    let frustum = frustum_for(&look_down_neg_z());
    let sideways = DAabb3::new(
      DVec3::new(1000.0, -1.0, -10.0),
      DVec3::new(1001.0, 1.0, -5.0),
    );
    assert!(!frustum.intersects_aabb(&sideways));
  }

  #[test]
  fn test_straddling_box_intersects() {
    // A large node the camera sits inside must survive culling even though
    // the render near plane would clip it; this is what the clamped
    // culling near plane is for.
    let frustum = frustum_for(&look_down_neg_z());
    let straddling = DAabb3::new(DVec3::splat(-100.0), DVec3::splat(100.0));
    assert!(frustum.intersects_aabb(&straddling));
  }

  #[test]
  fn test_orthographic_frustum() {
    let camera = Camera::Orthographic(OrthographicCamera {
      position: DVec3::ZERO,
      view: DMat4::look_at_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y),
      half_height: 10.0,
      near: 0.5,
      far: 100.0,
    });
    let frustum = frustum_for(&camera);
    let inside = DAabb3::new(DVec3::new(-1.0, -1.0, -20.0), DVec3::new(1.0, 1.0, -10.0));
    let outside = DAabb3::new(DVec3::new(-1.0, 50.0, -20.0), DVec3::new(1.0, 60.0, -10.0));
    assert!(frustum.intersects_aabb(&inside));
    assert!(!frustum.intersects_aabb(&outside));
  }
}
