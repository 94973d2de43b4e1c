// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # OctSurf Octree
//!
//! Probabilistic voxel octree for reconstructing building interiors from
//! scans.
//!
//! Each leaf carries a [`VoxelData`] accumulator of weighted occupancy
//! samples. Nodes live in a slot map arena and refer to each other by
//! [`NodeKey`]; the [`OctreeTopology`] built on top records which leaves
//! share a face, which is what boundary extraction and outlier removal
//! walk over.
//!
//! ```no_run
//! use octsurf_octree::{Octree, OctreeTopology};
//!
//! let tree = Octree::load("scan.oct")?;
//! let topo = OctreeTopology::build(&tree)?;
//! topo.verify(&tree)?;
//! # Ok::<(), octsurf_octree::Error>(())
//! ```

pub mod data;
pub mod error;
pub mod face;
pub mod io;
pub mod keys;
pub mod node;
pub mod progress;
pub mod shape;
pub mod synth;
pub mod topology;
pub mod tree;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point2, Point3, Vector3};

pub use data::VoxelData;
pub use error::{Error, Result};
pub use face::{CubeFace, NUM_FACES_PER_CUBE};
pub use keys::NodeKey;
pub use node::{OctNode, CHILDREN_PER_NODE};
pub use progress::{NoProgress, ProgressSink};
pub use shape::{BoundingBox, ExtrudedPoly, InsertMode, LineSegment, Shape};
pub use synth::carve_box_room;
pub use topology::{NodeNeighbors, OctreeTopology};
pub use tree::Octree;
