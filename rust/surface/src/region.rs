// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planar regions: connected sets of boundary faces that share a plane.

use std::collections::{BTreeSet, VecDeque};

use nalgebra::{Point3, Vector3};
use octsurf_octree::Octree;
use rustc_hash::FxHashSet;

use crate::boundary::{NodeBoundary, NodeFace};
use crate::error::Result;
use crate::plane::Plane;

/// A set of boundary faces approximated by one plane.
#[derive(Debug, Clone, Default)]
pub struct PlanarRegion {
    faces: BTreeSet<NodeFace>,
    plane: Plane,
}

impl PlanarRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows a region from `seed` by breadth-first search over linked faces
    /// with the seed's direction and planarity at least `planarity_threshold`.
    ///
    /// Accepted faces are added to `blacklist` and blacklisted faces are
    /// never accepted, so repeated fills over all faces partition them. A
    /// seed below the threshold forms a region on its own.
    pub fn floodfill(
        &mut self,
        seed: &NodeFace,
        tree: &Octree,
        boundary: &NodeBoundary,
        blacklist: &mut FxHashSet<NodeFace>,
        planarity_threshold: f64,
    ) -> Result<()> {
        self.clear();
        if !blacklist.insert(*seed) {
            return Ok(());
        }
        self.faces.insert(*seed);
        self.plane = Plane::new(seed.center(tree)?, seed.normal());

        if seed.planarity(tree)? < planarity_threshold {
            return Ok(());
        }

        let mut queue = VecDeque::from([*seed]);
        while let Some(face) = queue.pop_front() {
            for n in boundary.neighbors(&face) {
                if n.direction != seed.direction || blacklist.contains(n) {
                    continue;
                }
                if n.planarity(tree)? < planarity_threshold {
                    continue;
                }
                blacklist.insert(*n);
                self.faces.insert(*n);
                queue.push_back(*n);
            }
        }
        Ok(())
    }

    pub fn add(&mut self, face: NodeFace) -> bool {
        self.faces.insert(face)
    }

    /// Moves every face of `other` into this region.
    pub fn absorb(&mut self, other: PlanarRegion) {
        self.faces.extend(other.faces);
    }

    pub fn clear(&mut self) {
        self.faces.clear();
        self.plane = Plane::default();
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn contains(&self, face: &NodeFace) -> bool {
        self.faces.contains(face)
    }

    pub fn faces(&self) -> impl Iterator<Item = &NodeFace> + '_ {
        self.faces.iter()
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    pub fn set_plane(&mut self, plane: Plane) {
        self.plane = plane;
    }

    /// Sum of face areas.
    pub fn surface_area(&self, tree: &Octree) -> Result<f64> {
        let mut area = 0.0;
        for f in &self.faces {
            area += f.area(tree)?;
        }
        Ok(area)
    }

    /// Face positions, on the isosurface or on the grid.
    pub fn face_centers(&self, tree: &Octree, use_isosurface: bool) -> Result<Vec<Point3<f64>>> {
        self.faces
            .iter()
            .map(|f| if use_isosurface { f.isosurface_pos(tree) } else { f.center(tree) })
            .collect()
    }

    /// Area-weighted mean of the face normals, unnormalized.
    pub fn mean_normal(&self, tree: &Octree) -> Result<Vector3<f64>> {
        let mut n = Vector3::zeros();
        for f in &self.faces {
            n += f.normal() * f.area(tree)?;
        }
        Ok(n)
    }

    /// Flips the plane if its normal disagrees with the faces' normals.
    pub fn orient_normal(&mut self, tree: &Octree) -> Result<()> {
        if self.plane.normal.dot(&self.mean_normal(tree)?) < 0.0 {
            self.plane = self.plane.flipped();
        }
        Ok(())
    }

    /// The largest face; the first in order among equals.
    pub fn dominant_face(&self, tree: &Octree) -> Result<Option<NodeFace>> {
        let mut best: Option<(NodeFace, f64)> = None;
        for f in &self.faces {
            let hw = f.halfwidth(tree)?;
            if best.map_or(true, |(_, b)| hw > b) {
                best = Some((*f, hw));
            }
        }
        Ok(best.map(|(f, _)| f))
    }

    /// Axis-aligned bounds of all face corners, `None` when empty.
    pub fn bounding_box(&self, tree: &Octree) -> Result<Option<(Point3<f64>, Point3<f64>)>> {
        let mut bounds: Option<(Point3<f64>, Point3<f64>)> = None;
        for f in &self.faces {
            for p in f.corners(tree)? {
                bounds = Some(match bounds {
                    None => (p, p),
                    Some((lo, hi)) => (lo.inf(&p), hi.sup(&p)),
                });
            }
        }
        Ok(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::SegmentationScheme;
    use approx::assert_relative_eq;
    use octsurf_octree::{BoundingBox, CubeFace, NodeKey, OctreeTopology, Shape, VoxelData};

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

    /// A 3x3x1 slab of interior voxels in an exterior 6x6x6 grid; the
    /// middle top voxel gets low planarity.
    fn slab() -> (Octree, NodeBoundary, NodeKey) {
        let mut tree = Octree::new(1.0).unwrap();
        tree.include_in_domain(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        let bbox = BoundingBox::new(Point3::new(0.1, 0.1, 0.1), Point3::new(5.9, 5.9, 5.9));
        tree.insert(&mut Fill(bbox)).unwrap();

        let mut rough = None;
        for x in 1..4 {
            for y in 1..4 {
                let key = tree.find(&Point3::new(x as f64 + 0.5, y as f64 + 0.5, 2.5)).unwrap();
                let planar = if x == 2 && y == 2 { 0.0 } else { 1.0 };
                tree.get_mut(key).unwrap().data = Some(VoxelData::from_sample(1.0, 0.9, 0.0, 0.0, planar));
                if planar == 0.0 {
                    rough = Some(key);
                }
            }
        }
        let topo = OctreeTopology::build(&tree).unwrap();
        let boundary = NodeBoundary::build(&tree, &topo, SegmentationScheme::All).unwrap();
        (tree, boundary, rough.unwrap())
    }

    fn top_of(boundary: &NodeBoundary, key: NodeKey) -> NodeFace {
        boundary
            .faces()
            .find(|f| f.interior == key && f.direction == CubeFace::ZPlus)
            .copied()
            .unwrap()
    }

    #[test]
    fn floodfill_stays_on_one_side() {
        let (tree, boundary, rough) = slab();
        let seed = top_of(&boundary, rough);
        let mut blacklist = FxHashSet::default();
        let mut region = PlanarRegion::new();
        region.floodfill(&seed, &tree, &boundary, &mut blacklist, 0.0).unwrap();

        assert_eq!(region.len(), 9);
        assert!(region.faces().all(|f| f.direction == CubeFace::ZPlus));
        assert_eq!(blacklist.len(), 9);
        assert_relative_eq!(region.surface_area(&tree).unwrap(), 9.0);

        let (lo, hi) = region.bounding_box(&tree).unwrap().unwrap();
        assert_relative_eq!(lo, Point3::new(1.0, 1.0, 3.0));
        assert_relative_eq!(hi, Point3::new(4.0, 4.0, 3.0));

        // a second fill from a claimed face yields nothing
        let mut again = PlanarRegion::new();
        again.floodfill(&seed, &tree, &boundary, &mut blacklist, 0.0).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn low_planarity_faces_are_left_out() {
        let (tree, boundary, rough) = slab();
        let rough_top = top_of(&boundary, rough);

        let seed = boundary
            .faces()
            .find(|f| f.direction == CubeFace::ZPlus && f.interior != rough)
            .copied()
            .unwrap();
        let mut blacklist = FxHashSet::default();
        let mut region = PlanarRegion::new();
        region.floodfill(&seed, &tree, &boundary, &mut blacklist, 0.6).unwrap();
        assert_eq!(region.len(), 8);
        assert!(!region.contains(&rough_top));

        let mut single = PlanarRegion::new();
        single.floodfill(&rough_top, &tree, &boundary, &mut blacklist, 0.6).unwrap();
        assert_eq!(single.len(), 1);
        assert!(single.contains(&rough_top));
    }

    #[test]
    fn plane_orientation_and_helpers() {
        let (tree, boundary, rough) = slab();
        let seed = top_of(&boundary, rough);
        let mut region = PlanarRegion::new();
        region
            .floodfill(&seed, &tree, &boundary, &mut FxHashSet::default(), 0.0)
            .unwrap();

        region.set_plane(Plane::new(Point3::new(0.0, 0.0, 3.0), -Vector3::z()));
        region.orient_normal(&tree).unwrap();
        assert_relative_eq!(region.plane().normal, Vector3::z());

        let centers = region.face_centers(&tree, false).unwrap();
        assert_eq!(centers.len(), 9);
        assert!(centers.iter().all(|c| (c.z - 3.0).abs() < 1e-12));
        assert!(region.dominant_face(&tree).unwrap().is_some());
    }
}
