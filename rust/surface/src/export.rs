// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wavefront OBJ writers for meshes and the intermediate structures.
//!
//! Colors use the common `v x y z r g b` extension. All writers take any
//! [`Write`]; wrap files in a `BufWriter`.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::io::Write;

use nalgebra::Point3;
use octsurf_octree::Octree;
use rustc_hash::FxHasher;
use serde::Serialize;

use crate::boundary::{NodeBoundary, NodeFace};
use crate::corner::{CornerMap, NodeCorner};
use crate::error::Result;
use crate::mesh::Mesh;
use crate::region_graph::PlanarRegionGraph;

/// Writes a triangle mesh with per-vertex normals.
pub fn write_mesh_obj<W: Write>(mesh: &Mesh, w: &mut W) -> Result<()> {
    writeln!(w, "# octsurf mesh")?;
    writeln!(w, "# {} vertices, {} triangles", mesh.vertex_count(), mesh.triangle_count())?;
    for p in mesh.positions.chunks_exact(3) {
        writeln!(w, "v {:.6} {:.6} {:.6}", p[0], p[1], p[2])?;
    }
    for n in mesh.normals.chunks_exact(3) {
        writeln!(w, "vn {:.6} {:.6} {:.6}", n[0], n[1], n[2])?;
    }
    for t in mesh.indices.chunks_exact(3) {
        let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
        writeln!(w, "f {a}//{a} {b}//{b} {c}//{c}")?;
    }
    Ok(())
}

/// Stable pseudo-random color for a region seed.
pub fn region_color(seed: &NodeFace) -> [u8; 3] {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    let h = hasher.finish();
    // keep colors away from black so regions stay visible
    [(h & 0xff) as u8, ((h >> 8) & 0xff) as u8, ((h >> 16) & 0xff) as u8].map(|c| 64 + c / 2)
}

fn write_colored_vertex<W: Write>(w: &mut W, p: &Point3<f64>, rgb: [u8; 3]) -> Result<()> {
    writeln!(w, "v {:.6} {:.6} {:.6} {} {} {}", p.x, p.y, p.z, rgb[0], rgb[1], rgb[2])?;
    Ok(())
}

/// Writes every face of every region as a quad colored by region, with the
/// corners projected onto the region plane when `project` is set.
pub fn write_regions_obj<W: Write>(
    tree: &Octree,
    graph: &PlanarRegionGraph,
    project: bool,
    w: &mut W,
) -> Result<()> {
    writeln!(w, "# octsurf regions: {}", graph.len())?;
    let mut next = 1usize;
    for (seed, region) in graph.regions() {
        let rgb = region_color(seed);
        for face in region.faces() {
            let corners = face.corners(tree)?;
            for p in corners.iter().rev() {
                let p = if project { region.plane().project(p) } else { *p };
                write_colored_vertex(w, &p, rgb)?;
            }
            writeln!(w, "f {} {} {} {}", next, next + 1, next + 2, next + 3)?;
            next += 4;
        }
    }
    Ok(())
}

/// Writes the boundary faces as quads over shared corner vertices.
pub fn write_node_faces_obj<W: Write>(
    tree: &Octree,
    boundary: &NodeBoundary,
    corner_map: &CornerMap,
    w: &mut W,
) -> Result<()> {
    writeln!(w, "# octsurf boundary faces: {}", boundary.len())?;
    let mut index: BTreeMap<NodeCorner, usize> = BTreeMap::new();
    let mut quads = Vec::with_capacity(boundary.len());
    for face in boundary.faces() {
        let mut quad = [0usize; 4];
        for (k, p) in face.corners(tree)?.iter().rev().enumerate() {
            let key = corner_map.key(p);
            let n = index.len() + 1;
            let i = *index.entry(key).or_insert_with(|| n);
            if i == n {
                writeln!(w, "v {:.6} {:.6} {:.6}", p.x, p.y, p.z)?;
            }
            quad[k] = i;
        }
        quads.push(quad);
    }
    for q in quads {
        writeln!(w, "f {} {} {} {}", q[0], q[1], q[2], q[3])?;
    }
    Ok(())
}

/// Writes one colored point per observed leaf: red for likely interior,
/// blue for likely exterior.
pub fn write_leafs_obj<W: Write>(tree: &Octree, w: &mut W) -> Result<()> {
    writeln!(w, "# octsurf leaves")?;
    for (_, leaf) in tree.leaves() {
        let Some(data) = leaf.data.as_ref() else {
            continue;
        };
        let p = data.probability();
        let rgb = [(255.0 * p).round() as u8, 0, (255.0 * (1.0 - p)).round() as u8];
        write_colored_vertex(w, &leaf.center, rgb)?;
    }
    Ok(())
}

/// Summary statistics of a tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeInfo {
    pub resolution: f64,
    pub max_depth: u32,
    pub nodes: usize,
    pub leaves: usize,
    pub observed_leaves: usize,
    pub interior_leaves: usize,
    pub object_leaves: usize,
    pub room_leaves: usize,
    pub bounds_min: [f64; 3],
    pub bounds_max: [f64; 3],
    pub interior_volume: f64,
}

impl TreeInfo {
    pub fn from_tree(tree: &Octree) -> Self {
        let root = tree.root_node();
        let (lo, hi) = root.bounds();
        let mut info = TreeInfo {
            resolution: tree.resolution(),
            max_depth: tree.max_depth(),
            nodes: tree.num_nodes(),
            leaves: 0,
            observed_leaves: 0,
            interior_leaves: 0,
            object_leaves: 0,
            room_leaves: 0,
            bounds_min: [lo.x, lo.y, lo.z],
            bounds_max: [hi.x, hi.y, hi.z],
            interior_volume: 0.0,
        };
        for (_, leaf) in tree.leaves() {
            info.leaves += 1;
            let Some(data) = leaf.data.as_ref() else {
                continue;
            };
            info.observed_leaves += 1;
            if data.is_interior() {
                info.interior_leaves += 1;
                info.interior_volume += (2.0 * leaf.halfwidth).powi(3);
            }
            if data.is_object() {
                info.object_leaves += 1;
            }
            if data.room().is_some() {
                info.room_leaves += 1;
            }
        }
        info
    }
}

/// Writes [`TreeInfo`] as aligned `key: value` lines.
pub fn write_tree_info<W: Write>(tree: &Octree, w: &mut W) -> Result<()> {
    let info = TreeInfo::from_tree(tree);
    writeln!(w, "resolution:      {}", info.resolution)?;
    writeln!(w, "max depth:       {}", info.max_depth)?;
    writeln!(w, "nodes:           {}", info.nodes)?;
    writeln!(w, "leaves:          {}", info.leaves)?;
    writeln!(w, "observed leaves: {}", info.observed_leaves)?;
    writeln!(w, "interior leaves: {}", info.interior_leaves)?;
    writeln!(w, "object leaves:   {}", info.object_leaves)?;
    writeln!(w, "room leaves:     {}", info.room_leaves)?;
    writeln!(
        w,
        "bounds:          [{:.3}, {:.3}, {:.3}] - [{:.3}, {:.3}, {:.3}]",
        info.bounds_min[0], info.bounds_min[1], info.bounds_min[2], info.bounds_max[0], info.bounds_max[1], info.bounds_max[2]
    )?;
    writeln!(w, "interior volume: {:.3}", info.interior_volume)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::SegmentationScheme;
    use nalgebra::Vector3;
    use octsurf_octree::{BoundingBox, OctreeTopology, Shape, VoxelData};

    struct Fill(BoundingBox);

    impl Shape for Fill {
        fn num_verts(&self) -> usize {
            8
        }
        fn vertex(&self, i: usize) -> Point3<f64> {
            self.0.vertex(i)
        }
        fn intersects(&self, c: &Point3<f64>, hw: f64) -> bool {
            self.0.intersects(c, hw)
        }
        fn apply_to_leaf(&mut self, c: &Point3<f64>, _: f64, _: Option<&VoxelData>) -> Option<VoxelData> {
            let prob = if c.x < 1.0 && c.y < 1.0 && c.z < 1.0 { 0.8 } else { 0.2 };
            Some(VoxelData::from_sample(1.0, prob, 0.0, 0.0, 1.0))
        }
    }

    /// One interior voxel in the corner of a 2^3 block.
    fn block() -> Octree {
        let mut tree = Octree::new(1.0).unwrap();
        tree.include_in_domain(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        let bbox = BoundingBox::new(Point3::new(0.1, 0.1, 0.1), Point3::new(1.9, 1.9, 1.9));
        tree.insert(&mut Fill(bbox)).unwrap();
        tree
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn mesh_obj_is_one_based() {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Point3::new(0.0, 0.0, 0.0), Vector3::z());
        mesh.add_vertex(Point3::new(1.0, 0.0, 0.0), Vector3::z());
        mesh.add_vertex(Point3::new(0.0, 1.0, 0.0), Vector3::z());
        mesh.add_triangle(0, 1, 2);

        let mut buf = Vec::new();
        write_mesh_obj(&mesh, &mut buf).unwrap();
        let out = text(buf);
        assert_eq!(out.lines().filter(|l| l.starts_with("v ")).count(), 3);
        assert_eq!(out.lines().filter(|l| l.starts_with("vn ")).count(), 3);
        assert!(out.contains("f 1//1 2//2 3//3"));
    }

    #[test]
    fn node_faces_share_corners() {
        let tree = block();
        let topo = OctreeTopology::build(&tree).unwrap();
        let boundary = NodeBoundary::build(&tree, &topo, SegmentationScheme::All).unwrap();
        let corners = CornerMap::build(&tree, &boundary).unwrap();
        assert_eq!(boundary.len(), 6);

        let mut buf = Vec::new();
        write_node_faces_obj(&tree, &boundary, &corners, &mut buf).unwrap();
        let out = text(buf);
        assert_eq!(out.lines().filter(|l| l.starts_with("v ")).count(), 8);
        assert_eq!(out.lines().filter(|l| l.starts_with("f ")).count(), 6);
    }

    #[test]
    fn regions_and_leaves() {
        let tree = block();
        let topo = OctreeTopology::build(&tree).unwrap();
        let boundary = NodeBoundary::build(&tree, &topo, SegmentationScheme::All).unwrap();
        let mut graph = PlanarRegionGraph::new();
        graph.populate(&tree, &boundary).unwrap();

        let mut buf = Vec::new();
        write_regions_obj(&tree, &graph, true, &mut buf).unwrap();
        let out = text(buf);
        assert_eq!(out.lines().filter(|l| l.starts_with("v ")).count(), 24);
        assert!(out.lines().any(|l| l == "f 21 22 23 24"));

        let mut buf = Vec::new();
        write_leafs_obj(&tree, &mut buf).unwrap();
        let out = text(buf);
        let points: Vec<&str> = out.lines().filter(|l| l.starts_with("v ")).collect();
        assert_eq!(points.len(), 8);
        assert_eq!(points.iter().filter(|l| l.ends_with(" 204 0 51")).count(), 1);
    }

    #[test]
    fn region_colors_are_stable() {
        let tree = block();
        let topo = OctreeTopology::build(&tree).unwrap();
        let boundary = NodeBoundary::build(&tree, &topo, SegmentationScheme::All).unwrap();
        let face = boundary.faces().next().unwrap();
        let copy = *face;
        assert_eq!(region_color(face), region_color(&copy));
        assert!(region_color(face).iter().all(|&c| c >= 64));
    }

    #[test]
    fn tree_info_counts() {
        let tree = block();
        let info = TreeInfo::from_tree(&tree);
        assert_eq!(info.leaves, 8);
        assert_eq!(info.observed_leaves, 8);
        assert_eq!(info.interior_leaves, 1);
        assert_eq!(info.object_leaves, 1);
        assert!((info.interior_volume - 1.0).abs() < 1e-12);

        let mut buf = Vec::new();
        write_tree_info(&tree, &mut buf).unwrap();
        assert!(text(buf).contains("interior leaves: 1"));
    }
}
