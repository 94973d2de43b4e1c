// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region mesher: solves vertex positions where planar regions meet and
//! triangulates every region into one mesh.
//!
//! A corner touched by two or more regions becomes a [`Vertex`]. Its
//! position is the least-squares intersection of the touching region
//! planes, restricted to the directions those planes actually constrain.
//! Corners inside a single region are projected onto that region's plane.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use nalgebra::{DMatrix, DVector, Point3, Vector3};
use octsurf_octree::Octree;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::boundary::NodeFace;
use crate::corner::{CornerMap, NodeCorner};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::plane::Plane;
use crate::region::PlanarRegion;
use crate::region_graph::PlanarRegionGraph;
use crate::triangulation::{
    plane_basis, project_to_2d_with_basis, signed_area2, triangulate_polygon_with_holes,
};

/// A corner shared by at least two regions.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: Point3<f64>,
    /// Seeds of the touching regions.
    pub regions: BTreeSet<NodeFace>,
}

/// Position where `planes` meet, starting from `origin`.
///
/// Normals are stacked into a matrix and decomposed with an SVD. Directions
/// whose singular value exceeds `min_singular_value` times the largest one
/// are solved in the least-squares sense; along the remaining directions
/// `origin` is kept. One plane snaps `origin` onto it, two planes onto their
/// line, three or more to their point. A plane whose normal is within
/// `max_colinearity` (absolute cosine) of an earlier one is ignored.
pub fn solve_vertex(
    origin: &Point3<f64>,
    planes: &[Plane],
    min_singular_value: f64,
    max_colinearity: f64,
) -> Point3<f64> {
    let mut kept: SmallVec<[&Plane; 4]> = SmallVec::new();
    for plane in planes {
        if kept
            .iter()
            .all(|k| k.normal.dot(&plane.normal).abs() <= max_colinearity)
        {
            kept.push(plane);
        }
    }
    if kept.is_empty() {
        return *origin;
    }

    let rows = kept.len();
    let a = DMatrix::from_fn(rows, 3, |r, c| kept[r].normal[c]);
    let b = DVector::from_fn(rows, |r, _| kept[r].normal.dot(&kept[r].point.coords));
    let residual = b - &a * DVector::from_column_slice(origin.coords.as_slice());

    let svd = a.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return *origin;
    };
    let s_max = svd.singular_values.max();
    if s_max <= 0.0 {
        return *origin;
    }

    let mut pos = *origin;
    for (i, &s) in svd.singular_values.iter().enumerate() {
        if s <= min_singular_value * s_max {
            continue;
        }
        let coeff = u.column(i).dot(&residual) / s;
        let dir = Vector3::new(v_t[(i, 0)], v_t[(i, 1)], v_t[(i, 2)]);
        pos += dir * coeff;
    }
    pos
}

/// Everything a triangulator may look at for one region.
pub struct RegionContext<'a> {
    pub tree: &'a Octree,
    pub corner_map: &'a CornerMap,
    pub mesher: &'a RegionMesher,
    pub seed: NodeFace,
    pub region: &'a PlanarRegion,
}

impl RegionContext<'_> {
    /// Final position of a corner as seen from this region.
    pub fn position(&self, c: &NodeCorner) -> Point3<f64> {
        self.mesher.corner_position(c, self.region.plane(), self.corner_map)
    }
}

/// Splits one region into triangles over corner keys.
///
/// Triangles must face the interior side of the boundary, against the
/// face normals, and must use the same corners along edges shared with
/// neighboring regions so the result stays closed.
pub trait RegionTriangulator {
    fn triangulate(&self, ctx: &RegionContext<'_>) -> Result<Vec<[NodeCorner; 3]>>;
}

/// Two triangles per plain face; faces with hanging corners are fanned
/// around their center.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceTriangulator;

impl RegionTriangulator for FaceTriangulator {
    fn triangulate(&self, ctx: &RegionContext<'_>) -> Result<Vec<[NodeCorner; 3]>> {
        let mut tris = Vec::with_capacity(2 * ctx.region.len());
        for face in ctx.region.faces() {
            let lp = ctx.corner_map.face_loop(face, ctx.tree)?;
            if lp.len() == 4 {
                tris.push([lp[0], lp[2], lp[1]]);
                tris.push([lp[0], lp[3], lp[2]]);
                continue;
            }
            let center = ctx.corner_map.key(&face.center(ctx.tree)?);
            for i in 0..lp.len() {
                tris.push([center, lp[(i + 1) % lp.len()], lp[i]]);
            }
        }
        Ok(tris)
    }
}

/// Triangulates the outline of a whole region in its plane with earcut,
/// dropping the corners inside the region.
///
/// Falls back to [`FaceTriangulator`] for a region whose outline is not one
/// outer loop plus holes, or when earcut skips an outline corner.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineTriangulator;

impl OutlineTriangulator {
    /// Closed boundary loops of the region, each counter-clockwise around
    /// the face normals. `None` when two loops pinch at a corner.
    fn outline(ctx: &RegionContext<'_>) -> Result<Option<Vec<Vec<NodeCorner>>>> {
        let mut edges = BTreeSet::new();
        for face in ctx.region.faces() {
            let lp = ctx.corner_map.face_loop(face, ctx.tree)?;
            for i in 0..lp.len() {
                edges.insert((lp[i], lp[(i + 1) % lp.len()]));
            }
        }

        let mut next = BTreeMap::new();
        for &(a, b) in &edges {
            if edges.contains(&(b, a)) {
                continue;
            }
            if next.insert(a, b).is_some() {
                return Ok(None);
            }
        }

        let mut loops = Vec::new();
        while let Some((&start, _)) = next.first_key_value() {
            let mut lp = vec![start];
            let mut cur = start;
            loop {
                let Some(n) = next.remove(&cur) else {
                    return Ok(None);
                };
                if n == start {
                    break;
                }
                lp.push(n);
                cur = n;
            }
            loops.push(lp);
        }
        Ok(Some(loops))
    }

    fn try_outline(ctx: &RegionContext<'_>) -> Result<Option<Vec<[NodeCorner; 3]>>> {
        let Some(loops) = Self::outline(ctx)? else {
            return Ok(None);
        };

        let plane = ctx.region.plane();
        let (u, v) = plane_basis(&plane.normal);
        let mut outer = None;
        let mut holes = Vec::new();
        for lp in loops {
            let pts: Vec<Point3<f64>> = lp.iter().map(|c| ctx.position(c)).collect();
            let flat = project_to_2d_with_basis(&pts, &u, &v, &plane.point);
            if signed_area2(&flat) > 0.0 {
                if outer.is_some() {
                    return Ok(None);
                }
                outer = Some((lp, flat));
            } else {
                holes.push((lp, flat));
            }
        }
        let Some((outer_keys, outer_flat)) = outer else {
            return Ok(None);
        };

        let hole_flat: Vec<_> = holes.iter().map(|(_, f)| f.clone()).collect();
        let Ok(indices) = triangulate_polygon_with_holes(&outer_flat, &hole_flat) else {
            return Ok(None);
        };

        let mut keys = outer_keys;
        let mut flat = outer_flat;
        for (k, f) in holes {
            keys.extend(k);
            flat.extend(f);
        }
        let expected = keys.len() + 2 * hole_flat.len() - 2;
        if indices.len() != 3 * expected {
            return Ok(None);
        }

        let mut tris = Vec::with_capacity(expected);
        for t in indices.chunks_exact(3) {
            let area = signed_area2(&[flat[t[0]], flat[t[1]], flat[t[2]]]);
            // clockwise around the plane normal
            if area > 0.0 {
                tris.push([keys[t[0]], keys[t[2]], keys[t[1]]]);
            } else {
                tris.push([keys[t[0]], keys[t[1]], keys[t[2]]]);
            }
        }
        Ok(Some(tris))
    }
}

impl RegionTriangulator for OutlineTriangulator {
    fn triangulate(&self, ctx: &RegionContext<'_>) -> Result<Vec<[NodeCorner; 3]>> {
        match Self::try_outline(ctx)? {
            Some(tris) => Ok(tris),
            None => {
                tracing::debug!(seed = ?ctx.seed, faces = ctx.region.len(), "outline rejected, meshing faces");
                FaceTriangulator.triangulate(ctx)
            }
        }
    }
}

/// Which [`RegionTriangulator`] the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriangulationMode {
    /// [`FaceTriangulator`]
    #[default]
    Faces,
    /// [`OutlineTriangulator`]
    Outline,
}

impl TriangulationMode {
    pub fn triangulator(self) -> &'static dyn RegionTriangulator {
        match self {
            TriangulationMode::Faces => &FaceTriangulator,
            TriangulationMode::Outline => &OutlineTriangulator,
        }
    }
}

impl FromStr for TriangulationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "faces" => Ok(TriangulationMode::Faces),
            "outline" => Ok(TriangulationMode::Outline),
            other => Err(Error::Settings(format!("unknown triangulation mode '{other}'"))),
        }
    }
}

/// Vertices shared between regions and the regions' boundary corners.
#[derive(Debug, Clone)]
pub struct RegionMesher {
    vertices: BTreeMap<NodeCorner, Vertex>,
    region_vertices: BTreeMap<NodeFace, BTreeSet<NodeCorner>>,
    min_singular_value: f64,
    max_colinearity: f64,
}

impl Default for RegionMesher {
    fn default() -> Self {
        Self::new(0.1, 0.99)
    }
}

impl RegionMesher {
    pub fn new(min_singular_value: f64, max_colinearity: f64) -> Self {
        Self {
            vertices: BTreeMap::new(),
            region_vertices: BTreeMap::new(),
            min_singular_value,
            max_colinearity,
        }
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.region_vertices.clear();
    }

    /// Finds every corner touched by two or more regions and registers it
    /// as a vertex on each of them, positioned at the raw corner.
    pub fn init(&mut self, tree: &Octree, graph: &PlanarRegionGraph, corner_map: &CornerMap) -> Result<()> {
        self.clear();

        for (seed, region) in graph.regions() {
            self.region_vertices.entry(*seed).or_default();
            for face in region.faces() {
                // hanging corners are own corners of some smaller face
                for p in face.corners(tree)? {
                    let c = corner_map.key(&p);
                    if self.vertices.contains_key(&c) {
                        continue;
                    }

                    let mut touching = BTreeSet::new();
                    for f in corner_map.faces_for(&c) {
                        let s = graph
                            .seed_of(f)
                            .ok_or_else(|| Error::Invariant(format!("face {f:?} belongs to no region")))?;
                        touching.insert(s);
                    }
                    if touching.len() < 2 {
                        continue;
                    }

                    for s in &touching {
                        self.region_vertices.entry(*s).or_default().insert(c);
                    }
                    self.vertices.insert(
                        c,
                        Vertex {
                            position: corner_map.position(&c),
                            regions: touching,
                        },
                    );
                }
            }
        }

        tracing::debug!(
            vertices = self.vertices.len(),
            regions = self.region_vertices.len(),
            "initialized region mesher"
        );
        Ok(())
    }

    /// Solved position of the vertex at `corner` from its regions' planes.
    pub fn compute_vertex_pos(&self, graph: &PlanarRegionGraph, corner: &NodeCorner) -> Result<Point3<f64>> {
        let vertex = self
            .vertices
            .get(corner)
            .ok_or_else(|| Error::Invariant(format!("no vertex at {corner:?}")))?;

        let mut planes = Vec::with_capacity(vertex.regions.len());
        for seed in &vertex.regions {
            let region = graph
                .region(seed)
                .ok_or_else(|| Error::Invariant(format!("no region seeded at {seed:?}")))?;
            planes.push(*region.plane());
        }
        Ok(solve_vertex(
            &vertex.position,
            &planes,
            self.min_singular_value,
            self.max_colinearity,
        ))
    }

    /// Solves and stores every vertex position.
    pub fn compute_all_vertex_positions(&mut self, graph: &PlanarRegionGraph) -> Result<()> {
        let mut solved = Vec::with_capacity(self.vertices.len());
        for c in self.vertices.keys() {
            solved.push((*c, self.compute_vertex_pos(graph, c)?));
        }
        for (c, p) in solved {
            if let Some(v) = self.vertices.get_mut(&c) {
                v.position = p;
            }
        }
        Ok(())
    }

    /// Position of `c`: the vertex position when `c` is shared, else the
    /// raw corner projected onto `plane`.
    pub fn corner_position(&self, c: &NodeCorner, plane: &Plane, corner_map: &CornerMap) -> Point3<f64> {
        match self.vertices.get(c) {
            Some(v) => v.position,
            None => plane.project(&corner_map.position(c)),
        }
    }

    /// Triangulates every region and joins the pieces into one mesh.
    ///
    /// Mesh vertices are numbered in order of first use, regions in seed
    /// order, so the output is deterministic. Normals are recomputed from
    /// the triangles.
    pub fn compute_mesh(
        &self,
        tree: &Octree,
        graph: &PlanarRegionGraph,
        corner_map: &CornerMap,
        triangulator: &dyn RegionTriangulator,
    ) -> Result<Mesh> {
        let mut mesh = Mesh::new();
        let mut index: BTreeMap<NodeCorner, u32> = BTreeMap::new();

        for (seed, region) in graph.regions() {
            let ctx = RegionContext {
                tree,
                corner_map,
                mesher: self,
                seed: *seed,
                region,
            };
            for tri in triangulator.triangulate(&ctx)? {
                let mut ids = [0u32; 3];
                for (k, c) in tri.iter().enumerate() {
                    ids[k] = match index.get(c) {
                        Some(&i) => i,
                        None => {
                            let i = u32::try_from(mesh.vertex_count())
                                .map_err(|_| Error::Invariant("mesh exceeds u32 vertex indices".into()))?;
                            mesh.add_vertex(ctx.position(c), Vector3::zeros());
                            index.insert(*c, i);
                            i
                        }
                    };
                }
                mesh.add_triangle(ids[0], ids[1], ids[2]);
            }
        }

        mesh.compute_normals();
        tracing::debug!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "computed region mesh"
        );
        Ok(mesh)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, c: &NodeCorner) -> Option<&Vertex> {
        self.vertices.get(c)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (&NodeCorner, &Vertex)> + '_ {
        self.vertices.iter()
    }

    /// Shared corners on the boundary of the region seeded at `seed`.
    pub fn region_vertices(&self, seed: &NodeFace) -> impl Iterator<Item = &NodeCorner> + '_ {
        self.region_vertices.get(seed).into_iter().flatten()
    }

    pub fn min_singular_value(&self) -> f64 {
        self.min_singular_value
    }

    pub fn max_colinearity(&self) -> f64 {
        self.max_colinearity
    }
}
