// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # OctSurf Surface
//!
//! Watertight planar meshes from probabilistic voxel octrees.
//!
//! The reconstruction walks the faces between interior and exterior leaves
//! ([`NodeBoundary`]), groups them into planar regions that are merged
//! greedily by plane-fit error ([`PlanarRegionGraph`]), solves one position
//! per corner shared by several regions ([`RegionMesher`]) and triangulates
//! each region against those shared corners.
//!
//! ```no_run
//! use octsurf_octree::{NoProgress, Octree};
//! use octsurf_surface::{export, Pipeline, Settings};
//!
//! let mut tree = Octree::load("scan.oct")?;
//! let out = Pipeline::new(Settings::default()).run(&mut tree, &mut NoProgress)?;
//! let mut file = std::fs::File::create("scan.obj")?;
//! export::write_mesh_obj(&out.mesh, &mut file)?;
//! # Ok::<(), octsurf_surface::Error>(())
//! ```

pub mod boundary;
pub mod corner;
pub mod error;
pub mod export;
pub mod mesh;
pub mod mesher;
pub mod pipeline;
pub mod plane;
pub mod region;
pub mod region_graph;
pub mod settings;
pub mod triangulation;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point2, Point3, Vector3};

pub use boundary::{FaceSides, NodeBoundary, NodeFace, SegmentationScheme};
pub use corner::{CornerLattice, CornerMap, NodeCorner};
pub use error::{Error, Result};
pub use export::TreeInfo;
pub use mesh::Mesh;
pub use mesher::{
    solve_vertex, FaceTriangulator, OutlineTriangulator, RegionContext, RegionMesher,
    RegionTriangulator, TriangulationMode, Vertex,
};
pub use pipeline::{Pipeline, PipelineOutput, PipelineStats};
pub use plane::Plane;
pub use region::PlanarRegion;
pub use region_graph::{PlanarRegionGraph, PlanePair, RegionInfo};
pub use settings::Settings;
pub use triangulation::{triangulate_polygon, triangulate_polygon_with_holes};
