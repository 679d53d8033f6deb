//! Spatial hierarchy for out-of-core point clouds.
//!
//! Nodes are explicit reference-counted objects with load state; the
//! structure (bounds, level, spacing, name) is fixed at construction and
//! only the payload changes over a node's lifetime.
//!
//! # Module Structure
//!
//! - [`bounds`]: double-precision boxes and spheres plus the octant and
//!   half-split subdivision math
//! - [`node`]: the [`SpatialNode`](node::SpatialNode) trait, its octree
//!   and k-d variants, and node identity

pub mod bounds;
pub mod node;

// Re-exports
pub use bounds::{DAabb2, DAabb3, DSphere};
pub use node::{KdNode, LoadState, NodeKey, OctreeNode, SharedNode, SpatialNode, WeakNode};
