// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary faces between interior and exterior leaves.
//!
//! A [`NodeFace`] is the square shared by an interior leaf and one exterior
//! leaf across one of the interior leaf's faces. When a face borders space
//! the tree does not cover, the exterior is `None`. A large interior leaf
//! next to several small exterior leaves contributes one face per exterior
//! leaf, so a face is always as small as the smaller of its two nodes.
//!
//! [`NodeBoundary`] collects every such face and links faces that share an
//! edge, which is the adjacency the region flood fill walks.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use octsurf_octree::data::{MAXIMUM_VARIANCE, UNOBSERVED_PROBABILITY};
use octsurf_octree::{CubeFace, NodeKey, OctNode, Octree, OctreeTopology, VoxelData};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Tolerance for the coplanarity and edge-sharing tests.
pub const APPROX_ZERO: f64 = 1e-9;

/// Smallest variance reported for a face position.
pub const MIN_POSITION_VARIANCE: f64 = 1e-12;

/// Cube corners (see [`OctNode::corner`]) of each face, indexed by
/// [`CubeFace::index`], counter-clockwise around the outward normal.
pub const FACE_CORNERS: [[usize; 4]; 6] = [
    [7, 6, 5, 4],
    [3, 2, 6, 7],
    [2, 1, 5, 6],
    [0, 3, 7, 4],
    [1, 0, 4, 5],
    [0, 1, 2, 3],
];

/// Decides which leaves count as interior when extracting the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationScheme {
    /// Every leaf more likely open than not.
    #[default]
    All,
    /// Interior leaves that belong to a floorplan room. Unlabelled leaves
    /// count as exterior, so objects outside the rooms are cut away.
    Objects,
    /// Room-labelled leaves, plus everything interior.
    Room,
}

impl SegmentationScheme {
    /// Leaves without data are always exterior.
    pub fn is_interior(self, data: Option<&VoxelData>) -> bool {
        let Some(d) = data else { return false };
        match self {
            SegmentationScheme::All => d.is_interior(),
            SegmentationScheme::Objects => d.is_interior() && d.room().is_some(),
            SegmentationScheme::Room => d.room().is_some() || d.is_interior(),
        }
    }
}

impl FromStr for SegmentationScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(SegmentationScheme::All),
            "objects" => Ok(SegmentationScheme::Objects),
            "room" => Ok(SegmentationScheme::Room),
            other => Err(Error::Settings(format!("unknown segmentation scheme '{other}'"))),
        }
    }
}

/// One square of the interior/exterior boundary.
///
/// Ordered by interior key, then exterior, then direction, which is the
/// deterministic iteration order of every face collection in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeFace {
    pub interior: NodeKey,
    pub exterior: Option<NodeKey>,
    /// Face of the interior leaf this square lies on.
    pub direction: CubeFace,
}

impl NodeFace {
    pub fn new(interior: NodeKey, exterior: Option<NodeKey>, direction: CubeFace) -> Self {
        Self {
            interior,
            exterior,
            direction,
        }
    }

    /// Outward normal of the interior leaf, pointing into exterior space.
    #[inline]
    pub fn normal(&self) -> Vector3<f64> {
        self.direction.normal()
    }

    fn nodes<'a>(&self, tree: &'a Octree) -> Result<(&'a OctNode, Option<&'a OctNode>)> {
        let interior = tree.get(self.interior)?;
        let exterior = match self.exterior {
            Some(e) => Some(tree.get(e)?),
            None => None,
        };
        Ok((interior, exterior))
    }

    /// The smaller of the two nodes, and the side of it the face is on.
    fn owner<'a>(&self, tree: &'a Octree) -> Result<(&'a OctNode, CubeFace, bool)> {
        let (interior, exterior) = self.nodes(tree)?;
        match exterior {
            Some(e) if e.halfwidth < interior.halfwidth => Ok((e, self.direction.opposite(), true)),
            _ => Ok((interior, self.direction, false)),
        }
    }

    /// Half the edge length of the square.
    pub fn halfwidth(&self, tree: &Octree) -> Result<f64> {
        let (interior, exterior) = self.nodes(tree)?;
        Ok(exterior.map_or(interior.halfwidth, |e| e.halfwidth.min(interior.halfwidth)))
    }

    /// Area of the square.
    pub fn area(&self, tree: &Octree) -> Result<f64> {
        let hw = self.halfwidth(tree)?;
        Ok(4.0 * hw * hw)
    }

    /// Center of the square on the octree grid.
    pub fn center(&self, tree: &Octree) -> Result<Point3<f64>> {
        let (node, face, _) = self.owner(tree)?;
        Ok(node.center + face.normal() * node.halfwidth)
    }

    /// The four corners of the square, counter-clockwise around
    /// [`NodeFace::normal`].
    pub fn corners(&self, tree: &Octree) -> Result<[Point3<f64>; 4]> {
        let (node, face, flipped) = self.owner(tree)?;
        let idx = FACE_CORNERS[face.index()];
        let mut corners = idx.map(|i| node.corner(i));
        if flipped {
            // the exterior's table winds around the opposite normal
            corners.reverse();
        }
        Ok(corners)
    }

    /// True if the two squares touch along an edge.
    ///
    /// Same-direction faces must be coplanar and abut in the plane.
    /// Orthogonal faces must meet at a common edge line, bending either
    /// inward or outward, and overlap along it. Opposing faces never share
    /// an edge.
    pub fn shares_edge_with(&self, other: &NodeFace, tree: &Octree) -> Result<bool> {
        if self.direction.opposite() == other.direction {
            return Ok(false);
        }

        let hw = self.halfwidth(tree)?;
        let ohw = other.halfwidth(tree)?;
        let c = self.center(tree)?;
        let oc = other.center(tree)?;

        if self.direction == other.direction {
            let n = self.normal();
            if n.dot(&(c - oc)).abs() > APPROX_ZERO {
                return Ok(false);
            }
            let (u, v) = self.direction.plane_axes();
            let a = [(c[u] - hw, c[u] + hw), (c[v] - hw, c[v] + hw)];
            let b = [(oc[u] - ohw, oc[u] + ohw), (oc[v] - ohw, oc[v] + ohw)];
            return Ok(aabb_pair_abut(a, b, APPROX_ZERO));
        }

        let n = self.normal();
        let on = other.normal();
        let disp = c - oc;
        let axis = n.cross(&on);
        let disp_a = axis * disp.dot(&axis);
        let disp_perp = disp - disp_a;

        // displacement expected if the faces meet at an edge
        let manhat = n * ohw - on * hw;
        if (manhat - disp_perp).norm_squared() > APPROX_ZERO
            && (manhat + disp_perp).norm_squared() > APPROX_ZERO
        {
            return Ok(false);
        }
        Ok(disp_a.norm() < hw.max(ohw))
    }

    /// Both sides of the face, resolved against the tree.
    pub fn sides(&self, tree: &Octree) -> Result<FaceSides> {
        let (interior, exterior) = self.nodes(tree)?;
        let di = interior.data.unwrap_or_default();
        let mu_i = di.probability();
        let planar_i = di.planar_prob();

        let (hw_e, mu_e, var_e, planar_e, occupied_e) = match exterior {
            Some(e) => {
                let de = e.data.unwrap_or_default();
                (e.halfwidth, de.probability(), de.uncertainty(), de.planar_prob(), de.is_interior())
            }
            None => (0.0, UNOBSERVED_PROBABILITY, MAXIMUM_VARIANCE, planar_i, false),
        };

        Ok(FaceSides {
            center: self.center(tree)?,
            normal: self.normal(),
            interior_center: interior.center,
            hw_i: interior.halfwidth,
            hw_e,
            mu_i,
            mu_e,
            var_i: di.uncertainty(),
            var_e,
            planar_i,
            planar_e,
            occupied_i: di.is_interior(),
            occupied_e,
        })
    }

    /// Face center moved onto the estimated occupancy isosurface.
    pub fn isosurface_pos(&self, tree: &Octree) -> Result<Point3<f64>> {
        Ok(self.sides(tree)?.isosurface_pos())
    }

    /// Planarity estimate in `[0, 1]`.
    pub fn planarity(&self, tree: &Octree) -> Result<f64> {
        Ok(self.sides(tree)?.planarity())
    }

    /// Variance of the face position along its normal.
    pub fn pos_variance(&self, tree: &Octree) -> Result<f64> {
        Ok(self.sides(tree)?.pos_variance())
    }
}

/// Two axis-aligned rectangles `[(x0, x1), (y0, y1)]` abut when they touch
/// along one axis and overlap with positive length along the other.
fn aabb_pair_abut(a: [(f64, f64); 2], b: [(f64, f64); 2], tol: f64) -> bool {
    let touch = |k: usize| (a[k].1 - b[k].0).abs() <= tol || (b[k].1 - a[k].0).abs() <= tol;
    let overlap = |k: usize| a[k].1.min(b[k].1) - a[k].0.max(b[k].0) > tol;
    (touch(0) && overlap(1)) || (touch(1) && overlap(0))
}

/// Statistics of the two leaves on either side of a [`NodeFace`].
///
/// A missing exterior behaves like an unobserved leaf of zero size whose
/// planarity matches the interior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSides {
    /// Grid center of the face.
    pub center: Point3<f64>,
    pub normal: Vector3<f64>,
    pub interior_center: Point3<f64>,
    pub hw_i: f64,
    pub hw_e: f64,
    pub mu_i: f64,
    pub mu_e: f64,
    pub var_i: f64,
    pub var_e: f64,
    pub planar_i: f64,
    pub planar_e: f64,
    pub occupied_i: bool,
    pub occupied_e: bool,
}

impl FaceSides {
    /// True when the two leaves are classified differently, i.e. the face
    /// is a real surface crossing rather than a hidden segmentation seam.
    #[inline]
    pub fn disagree(&self) -> bool {
        self.occupied_i != self.occupied_e
    }

    /// Fraction of the way from the interior center to the exterior center
    /// at which the occupancy crosses 0.5, when the sides disagree.
    pub fn crossing(&self) -> Option<f64> {
        if !self.disagree() {
            return None;
        }
        let denom = self.mu_i - self.mu_e;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        Some(((self.mu_i - 0.5) / denom).clamp(0.0, 1.0))
    }

    fn area_weights(&self) -> (f64, f64) {
        (self.hw_i * self.hw_i, self.hw_e * self.hw_e)
    }

    /// Offset along the normal from the interior center.
    fn offset(&self) -> Option<f64> {
        let span = self.hw_i + self.hw_e;
        if self.disagree() {
            return self.crossing().map(|s| s * span);
        }
        let (wi, we) = self.area_weights();
        if wi + we <= 0.0 {
            return None;
        }
        Some(we / (wi + we) * span)
    }

    pub fn isosurface_pos(&self) -> Point3<f64> {
        let Some(t) = self.offset() else {
            return self.center;
        };
        let n = self.normal;
        let base = n.dot(&(self.interior_center - self.center));
        self.center + n * (base + t)
    }

    pub fn planarity(&self) -> f64 {
        let p = match self.crossing() {
            Some(s) => (1.0 - s) * self.planar_i + s * self.planar_e,
            None => {
                let (wi, we) = self.area_weights();
                if wi + we > 0.0 {
                    (wi * self.planar_i + we * self.planar_e) / (wi + we)
                } else {
                    self.planar_i
                }
            }
        };
        p.clamp(0.0, 1.0)
    }

    /// First-order propagation of the occupancy variances through the
    /// crossing interpolation. Hidden faces are uniformly uncertain over
    /// the span between the two centers.
    pub fn pos_variance(&self) -> f64 {
        let span = self.hw_i + self.hw_e;
        let var = match self.crossing() {
            Some(s) => span * span * ((1.0 - s) * (1.0 - s) * self.var_i + s * s * self.var_e),
            None => span * span / 12.0,
        };
        var.max(MIN_POSITION_VARIANCE)
    }
}

/// All boundary faces of a tree and the edge adjacency between them.
#[derive(Debug, Clone, Default)]
pub struct NodeBoundary {
    faces: BTreeMap<NodeFace, BTreeSet<NodeFace>>,
    node_face_map: FxHashMap<NodeKey, SmallVec<[NodeFace; 6]>>,
    scheme: SegmentationScheme,
}

impl NodeBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the boundary of `tree` under `scheme` in one step.
    pub fn build(tree: &Octree, topo: &OctreeTopology, scheme: SegmentationScheme) -> Result<Self> {
        let mut boundary = Self::new();
        boundary.populate(tree, topo, scheme)?;
        Ok(boundary)
    }

    pub fn clear(&mut self) {
        self.faces.clear();
        self.node_face_map.clear();
    }

    /// Finds every boundary face, then links faces that share an edge.
    pub fn populate(
        &mut self,
        tree: &Octree,
        topo: &OctreeTopology,
        scheme: SegmentationScheme,
    ) -> Result<()> {
        self.clear();
        self.scheme = scheme;
        self.populate_faces(tree, topo)?;
        self.populate_face_linkages(tree, topo)?;
        tracing::debug!(
            faces = self.faces.len(),
            linkages = self.num_linkages(),
            ?scheme,
            "populated node boundary"
        );
        Ok(())
    }

    fn populate_faces(&mut self, tree: &Octree, topo: &OctreeTopology) -> Result<()> {
        for key in topo.sorted_keys() {
            let node = tree.get(key)?;
            if !self.scheme.is_interior(node.data.as_ref()) {
                continue;
            }
            let nn = topo.get(key).ok_or(octsurf_octree::Error::NodeNotFound(key))?;

            for direction in CubeFace::ALL {
                let neighs = nn.sorted(direction);
                let exteriors: Vec<Option<NodeKey>> = if neighs.is_empty() {
                    // uncovered space counts as exterior
                    vec![None]
                } else {
                    let mut out = Vec::new();
                    for n in neighs {
                        if !self.scheme.is_interior(tree.get(n)?.data.as_ref()) {
                            out.push(Some(n));
                        }
                    }
                    out
                };

                for exterior in exteriors {
                    let face = NodeFace::new(key, exterior, direction);
                    if self.faces.insert(face, BTreeSet::new()).is_some() {
                        return Err(Error::Invariant(format!("boundary face {face:?} created twice")));
                    }
                    self.node_face_map.entry(key).or_default().push(face);
                    if let Some(e) = exterior {
                        self.node_face_map.entry(e).or_default().push(face);
                    }
                }
            }
        }
        Ok(())
    }

    /// Faces touching `node` or any topology neighbor of it.
    fn nearby_faces(
        &self,
        topo: &OctreeTopology,
        node: Option<NodeKey>,
        out: &mut BTreeSet<NodeFace>,
    ) -> Result<()> {
        let Some(node) = node else { return Ok(()) };
        out.extend(self.faces_for_node(node).iter().copied());
        let nn = topo.get(node).ok_or(octsurf_octree::Error::NodeNotFound(node))?;
        for (_, n) in nn.iter() {
            out.extend(self.faces_for_node(n).iter().copied());
        }
        Ok(())
    }

    /// Links every pair of faces that share an edge. Links are symmetric
    /// and a face never links to itself.
    pub fn populate_face_linkages(&mut self, tree: &Octree, topo: &OctreeTopology) -> Result<()> {
        let faces: Vec<NodeFace> = self.faces.keys().copied().collect();
        let mut links: Vec<(NodeFace, NodeFace)> = Vec::new();
        let mut nearby = BTreeSet::new();

        for face in &faces {
            nearby.clear();
            self.nearby_faces(topo, Some(face.interior), &mut nearby)?;
            self.nearby_faces(topo, face.exterior, &mut nearby)?;

            for other in &nearby {
                // each unordered pair once
                if other <= face {
                    continue;
                }
                if should_link(face, other, tree, topo)? {
                    links.push((*face, *other));
                }
            }
        }

        for (a, b) in links {
            if let Some(s) = self.faces.get_mut(&a) {
                s.insert(b);
            }
            if let Some(s) = self.faces.get_mut(&b) {
                s.insert(a);
            }
        }
        Ok(())
    }

    pub fn scheme(&self) -> SegmentationScheme {
        self.scheme
    }

    /// All faces in order.
    pub fn faces(&self) -> impl Iterator<Item = &NodeFace> + '_ {
        self.faces.keys()
    }

    pub fn contains(&self, face: &NodeFace) -> bool {
        self.faces.contains_key(face)
    }

    /// Faces sharing an edge with `face`. Empty for unknown faces.
    pub fn neighbors(&self, face: &NodeFace) -> impl Iterator<Item = &NodeFace> + '_ {
        self.faces.get(face).into_iter().flatten()
    }

    /// Faces with `node` on either side.
    pub fn faces_for_node(&self, node: NodeKey) -> &[NodeFace] {
        match self.node_face_map.get(&node) {
            Some(faces) => faces.as_slice(),
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Number of undirected links.
    pub fn num_linkages(&self) -> usize {
        self.faces.values().map(BTreeSet::len).sum::<usize>() / 2
    }
}

fn should_link(a: &NodeFace, b: &NodeFace, tree: &Octree, topo: &OctreeTopology) -> Result<bool> {
    if a == b {
        return Ok(false);
    }

    if a.interior == b.interior {
        if let (Some(x), Some(y)) = (a.exterior, b.exterior) {
            if topo.are_neighbors(x, y)? {
                return Ok(true);
            }
        }
        return a.shares_edge_with(b, tree);
    }

    // two uncovered exteriors count as the same exterior
    if a.exterior == b.exterior {
        if topo.are_neighbors(a.interior, b.interior)? {
            return Ok(true);
        }
        return a.shares_edge_with(b, tree);
    }

    let (Some(x), Some(y)) = (a.exterior, b.exterior) else {
        return Ok(false);
    };
    if a.direction != b.direction
        || !topo.are_neighbors(a.interior, b.interior)?
        || !topo.are_neighbors(x, y)?
    {
        return Ok(false);
    }
    let gap = a.normal().dot(&(a.center(tree)? - b.center(tree)?));
    Ok(gap.abs() <= APPROX_ZERO)
}
