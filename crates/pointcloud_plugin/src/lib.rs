//! pointcloud_plugin - Framework/engine independent point cloud streaming
//!
//! This crate provides the out-of-core scheduling core for massive octree
//! point clouds: each frame it decides which hierarchy nodes are visible,
//! which to fetch, and which resident payloads to evict, under explicit
//! point budgets. Rendering, fetching and decoding are collaborators behind
//! small traits; the core owns no GPU and no I/O.
//!
//! # Features
//!
//! - **Priority refinement**: coarse-to-fine traversal ordered by projected
//!   screen size, with frustum culling and global plus per-cloud budgets
//! - **LRU geometry cache**: point-count-bounded eviction with cascading
//!   subtree disposal
//! - **Async loading**: fire-and-forget fetch jobs with single-threaded
//!   completion draining and in-flight backpressure
//! - **Height fields**: incremental ground rasterization of visible nodes
//!   into a mip-mapped quadtree, one node per frame
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pointcloud_plugin::{
//!   Camera, PerspectiveCamera, PointCloud, ResourceLimits, Scheduler, Viewport,
//! };
//!
//! let mut scheduler = Scheduler::new(Arc::new(source), ResourceLimits::DEFAULT);
//! let mut clouds = vec![PointCloud::with_root(root)];
//!
//! // Per frame:
//! let out = scheduler.update(&mut clouds, &camera, viewport, 4_000_000.0);
//! for (cloud_index, node) in out.promotions {
//!   // upload node.point_buffer() and attach it to cloud `cloud_index`
//! }
//! ```

pub mod octree;

// Re-export commonly used items
pub use octree::{
  DAabb2, DAabb3, DSphere, KdNode, LoadState, NodeKey, OctreeNode, SharedNode, SpatialNode,
};

// Point payload loading pipeline
pub mod loading;
pub use loading::{LoadError, LoadPipeline, LoadRequest, LoadedData, PointBuffer, PointSource};

// LRU residency ledger
pub mod cache;
pub use cache::GeometryCache;

// Priority queue for refinement order
pub mod queue;
pub use queue::{ImportanceQueue, QueueEntry};

// Camera state and frustum culling
pub mod camera;
pub use camera::{Camera, Frustum, OrthographicCamera, PerspectiveCamera, Viewport, FRUSTUM_NEAR};

// Per-cloud state
pub mod cloud;
pub use cloud::{CloudId, PointCloud};

// Per-frame visibility scheduling
pub mod scheduler;
pub use scheduler::{FrameOutput, FrameStats, ResourceLimits, Scheduler};

// Height field accumulation from visible nodes
pub mod dem;
pub use dem::{HeightField, DEM_TILE_SIZE};
