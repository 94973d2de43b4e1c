// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Face corners on the octree lattice.
//!
//! Every corner of every leaf lies on a lattice with spacing of half the
//! tree resolution, anchored at the root center. [`NodeCorner`] is the
//! integer coordinate of such a point, so the same geometric corner gets
//! the same key no matter which face produced it.
//!
//! [`CornerMap`] records which boundary faces touch each corner. Besides a
//! face's own four corners this includes "hanging" corners: corners of
//! smaller neighboring faces that fall on the edge of a larger face. They
//! are what keeps the mesh closed where leaf sizes change.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Point3, Vector3};
use octsurf_octree::Octree;
use rustc_hash::FxHashMap;

use crate::boundary::{NodeBoundary, NodeFace};
use crate::error::Result;

/// Integer lattice coordinate of a leaf corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeCorner {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl NodeCorner {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    fn coord(&self, axis: usize) -> i64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

/// Mapping between world positions and [`NodeCorner`] keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerLattice {
    pub origin: Point3<f64>,
    pub step: f64,
}

impl Default for CornerLattice {
    fn default() -> Self {
        Self {
            origin: Point3::origin(),
            step: 1.0,
        }
    }
}

impl CornerLattice {
    /// Lattice of `tree`: root center, half the resolution.
    pub fn for_tree(tree: &Octree) -> Self {
        Self {
            origin: tree.root_node().center,
            step: tree.resolution() / 2.0,
        }
    }

    pub fn key(&self, p: &Point3<f64>) -> NodeCorner {
        let q = (p - self.origin) / self.step;
        NodeCorner::new(q.x.round() as i64, q.y.round() as i64, q.z.round() as i64)
    }

    pub fn position(&self, c: &NodeCorner) -> Point3<f64> {
        self.origin + Vector3::new(c.x as f64, c.y as f64, c.z as f64) * self.step
    }
}

/// Corner to face incidence for a [`NodeBoundary`].
#[derive(Debug, Clone, Default)]
pub struct CornerMap {
    lattice: CornerLattice,
    corners: BTreeMap<NodeCorner, BTreeSet<NodeFace>>,
    face_corners: FxHashMap<NodeFace, BTreeSet<NodeCorner>>,
}

impl CornerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map for every face of `boundary` in one step.
    pub fn build(tree: &Octree, boundary: &NodeBoundary) -> Result<Self> {
        let mut map = Self::new();
        map.add(tree, boundary)?;
        Ok(map)
    }

    pub fn clear(&mut self) {
        self.corners.clear();
        self.face_corners.clear();
    }

    /// Records the corners of every face in `boundary`, hanging corners
    /// included.
    pub fn add(&mut self, tree: &Octree, boundary: &NodeBoundary) -> Result<()> {
        self.lattice = CornerLattice::for_tree(tree);

        for face in boundary.faces() {
            for p in face.corners(tree)? {
                let key = self.lattice.key(&p);
                self.insert(key, *face);
            }
        }

        // corners of smaller linked faces that land on a larger face
        let mut hanging = Vec::new();
        for face in boundary.faces() {
            let hw = face.halfwidth(tree)?;
            let (lo, hi) = self.key_bounds(face, tree)?;
            for other in boundary.neighbors(face) {
                if other.halfwidth(tree)? >= hw {
                    continue;
                }
                for p in other.corners(tree)? {
                    let key = self.lattice.key(&p);
                    if (0..3).all(|a| lo.coord(a) <= key.coord(a) && key.coord(a) <= hi.coord(a)) {
                        hanging.push((key, *face));
                    }
                }
            }
        }
        let num_hanging = hanging.len();
        for (key, face) in hanging {
            self.insert(key, face);
        }

        tracing::debug!(
            corners = self.corners.len(),
            hanging = num_hanging,
            "populated corner map"
        );
        Ok(())
    }

    fn insert(&mut self, key: NodeCorner, face: NodeFace) {
        self.corners.entry(key).or_default().insert(face);
        self.face_corners.entry(face).or_default().insert(key);
    }

    /// Componentwise lattice bounds of a face.
    fn key_bounds(&self, face: &NodeFace, tree: &Octree) -> Result<(NodeCorner, NodeCorner)> {
        let keys = face.corners(tree)?.map(|p| self.lattice.key(&p));
        let mut lo = keys[0];
        let mut hi = keys[0];
        for k in &keys[1..] {
            lo = NodeCorner::new(lo.x.min(k.x), lo.y.min(k.y), lo.z.min(k.z));
            hi = NodeCorner::new(hi.x.max(k.x), hi.y.max(k.y), hi.z.max(k.z));
        }
        Ok((lo, hi))
    }

    pub fn lattice(&self) -> &CornerLattice {
        &self.lattice
    }

    pub fn key(&self, p: &Point3<f64>) -> NodeCorner {
        self.lattice.key(p)
    }

    /// World position of a corner.
    pub fn position(&self, c: &NodeCorner) -> Point3<f64> {
        self.lattice.position(c)
    }

    /// Faces touching `c`. Empty for unknown corners.
    pub fn faces_for(&self, c: &NodeCorner) -> impl Iterator<Item = &NodeFace> + '_ {
        self.corners.get(c).into_iter().flatten()
    }

    /// All corners on `face`, its own and hanging ones.
    pub fn corners_of(&self, face: &NodeFace) -> impl Iterator<Item = &NodeCorner> + '_ {
        self.face_corners.get(face).into_iter().flatten()
    }

    /// The closed corner loop of `face`: its four corners counter-clockwise
    /// around the face normal, with hanging corners inserted in order
    /// along each edge.
    pub fn face_loop(&self, face: &NodeFace, tree: &Octree) -> Result<Vec<NodeCorner>> {
        let own = face.corners(tree)?.map(|p| self.lattice.key(&p));
        let extra: Vec<NodeCorner> = self
            .corners_of(face)
            .filter(|c| !own.contains(c))
            .copied()
            .collect();

        let mut out = Vec::with_capacity(4 + extra.len());
        for i in 0..4 {
            let a = own[i];
            let b = own[(i + 1) % 4];
            out.push(a);
            if extra.is_empty() {
                continue;
            }

            let Some(axis) = (0..3).find(|&k| a.coord(k) != b.coord(k)) else {
                continue;
            };
            let (lo, hi) = (a.coord(axis).min(b.coord(axis)), a.coord(axis).max(b.coord(axis)));
            let mut on_edge: Vec<NodeCorner> = extra
                .iter()
                .filter(|c| {
                    (0..3).all(|k| k == axis || c.coord(k) == a.coord(k))
                        && lo < c.coord(axis)
                        && c.coord(axis) < hi
                })
                .copied()
                .collect();
            on_edge.sort_by_key(|c| (c.coord(axis) - a.coord(axis)).abs());
            out.extend(on_edge);
        }
        Ok(out)
    }

    /// Number of distinct corners.
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeCorner, &BTreeSet<NodeFace>)> + '_ {
        self.corners.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::SegmentationScheme;
    use approx::assert_relative_eq;
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
        fn apply_to_leaf(&mut self, _: &Point3<f64>, _: f64, _: Option<&VoxelData>) -> Option<VoxelData> {
            Some(VoxelData::from_sample(1.0, 0.1, 0.0, 0.0, 1.0))
        }
    }

    /// Exterior unit voxels over `[0, n]^3`.
    /// Root spans exactly [0, n]^3 for a power of two `n`.
    fn unit_grid(n: f64) -> Octree {
        let mut tree = Octree::new(1.0).unwrap();
        let mut c = 0.5;
        while c < n {
            tree.include_in_domain(&Point3::new(c, c, c)).unwrap();
            c = 2.0 * c + 0.5;
        }
        let bbox = BoundingBox::new(Point3::new(0.1, 0.1, 0.1), Point3::new(n - 0.1, n - 0.1, n - 0.1));
        tree.insert(&mut Fill(bbox)).unwrap();
        tree
    }

    fn set(tree: &mut Octree, p: Point3<f64>, prob: f64) {
        let key = tree.find(&p).unwrap();
        tree.get_mut(key).unwrap().data = Some(VoxelData::from_sample(1.0, prob, 0.0, 0.0, 1.0));
    }

    fn build(tree: &Octree) -> (NodeBoundary, CornerMap) {
        let topo = OctreeTopology::build(tree).unwrap();
        let boundary = NodeBoundary::build(tree, &topo, SegmentationScheme::All).unwrap();
        let corners = CornerMap::build(tree, &boundary).unwrap();
        (boundary, corners)
    }

    #[test]
    fn lattice_round_trip() {
        let lattice = CornerLattice {
            origin: Point3::new(0.25, -1.0, 3.0),
            step: 0.5,
        };
        let p = Point3::new(1.25, 0.5, 2.0);
        let k = lattice.key(&p);
        assert_eq!(k, NodeCorner::new(2, 3, -2));
        assert_relative_eq!(lattice.position(&k), p);
        // tiny noise lands on the same key
        assert_eq!(lattice.key(&(p + Vector3::repeat(1e-7))), k);
    }

    #[test]
    fn cube_has_eight_corners_of_three_faces() {
        let mut tree = unit_grid(4.0);
        set(&mut tree, Point3::new(1.5, 1.5, 1.5), 0.9);
        let (boundary, corners) = build(&tree);

        assert_eq!(boundary.len(), 6);
        assert_eq!(corners.len(), 8);
        for (_, faces) in corners.iter() {
            assert_eq!(faces.len(), 3);
        }
        for face in boundary.faces() {
            assert_eq!(corners.corners_of(face).count(), 4);
            assert_eq!(corners.face_loop(face, &tree).unwrap().len(), 4);
        }
    }

    #[test]
    fn hanging_corners_join_the_larger_face() {
        // one coarse interior leaf next to a block of fine interior leaves
        let mut tree = unit_grid(4.0);
        for x in [0.5, 1.5] {
            for y in [0.5, 1.5] {
                for z in [0.5, 1.5] {
                    set(&mut tree, Point3::new(x, y, z), 0.9);
                    set(&mut tree, Point3::new(x + 2.0, y, z), if x < 1.0 { 0.8 } else { 0.6 });
                }
            }
        }
        assert_eq!(tree.simplify().unwrap(), 56);
        let coarse = tree.find(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        assert_relative_eq!(tree.get(coarse).unwrap().halfwidth, 1.0);
        let fine = tree.find(&Point3::new(2.5, 0.5, 0.5)).unwrap();
        assert_relative_eq!(tree.get(fine).unwrap().halfwidth, 0.5);

        let (boundary, corners) = build(&tree);
        let top = boundary
            .faces()
            .find(|f| f.interior == coarse && f.direction == octsurf_octree::CubeFace::ZPlus)
            .copied()
            .unwrap();

        // the fine block's top edge puts one corner in the middle of the
        // coarse face's +x edge
        let mid = corners.key(&Point3::new(2.0, 1.0, 2.0));
        assert!(corners.corners_of(&top).any(|c| *c == mid));
        assert!(corners.faces_for(&mid).any(|f| *f == top));

        let ring = corners.face_loop(&top, &tree).unwrap();
        assert_eq!(ring.len(), 5);
        let i = ring.iter().position(|c| *c == mid).unwrap();
        let prev = corners.position(&ring[(i + 4) % 5]);
        let next = corners.position(&ring[(i + 1) % 5]);
        assert_relative_eq!(prev.x, 2.0);
        assert_relative_eq!(next.x, 2.0);
    }
}
