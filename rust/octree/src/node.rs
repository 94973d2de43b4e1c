// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Octree nodes and the fixed octant layout.

use nalgebra::{Point3, Vector3};

use crate::data::VoxelData;
use crate::keys::NodeKey;

/// Number of children of an internal node.
pub const CHILDREN_PER_NODE: usize = 8;

/// Sign of each octant along x, y and z, indexed by child index.
const OCTANT_SIGNS: [[f64; 3]; CHILDREN_PER_NODE] = [
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
];

/// Direction from a parent's center to the center of child `i`, with unit
/// components. Scaled by the child halfwidth this gives the child center.
#[inline]
pub fn relative_child_pos(i: usize) -> Vector3<f64> {
    let s = OCTANT_SIGNS[i % CHILDREN_PER_NODE];
    Vector3::new(s[0], s[1], s[2])
}

/// Child index for an octant given by the signs of its offset.
/// Non-negative components select the plus side.
#[inline]
pub fn child_index_for_offset(offset: &Vector3<f64>) -> usize {
    let px = offset.x >= 0.0;
    let py = offset.y >= 0.0;
    let pz = offset.z >= 0.0;
    let base = if pz { 0 } else { 4 };
    base + match (px, py) {
        (true, true) => 0,
        (false, true) => 1,
        (false, false) => 2,
        (true, false) => 3,
    }
}

/// Index of the sibling mirrored across `axis`.
#[inline]
pub fn mirrored_child(i: usize, axis: usize) -> usize {
    let mut offset = relative_child_pos(i);
    offset[axis] = -offset[axis];
    child_index_for_offset(&offset)
}

/// A cube of space. Leaves may own [`VoxelData`]; internal nodes own up to
/// eight children, stored by key in the tree's arena.
#[derive(Debug, Clone, PartialEq)]
pub struct OctNode {
    pub center: Point3<f64>,
    pub halfwidth: f64,
    pub parent: Option<NodeKey>,
    pub children: [Option<NodeKey>; CHILDREN_PER_NODE],
    pub data: Option<VoxelData>,
}

impl OctNode {
    /// Creates a childless node with no data.
    pub fn new(center: Point3<f64>, halfwidth: f64) -> Self {
        Self {
            center,
            halfwidth,
            parent: None,
            children: [None; CHILDREN_PER_NODE],
            data: None,
        }
    }

    /// A node with at least one child is never a leaf.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    /// Iterator over the present children.
    pub fn child_keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.children.iter().flatten().copied()
    }

    /// Center of child slot `i`, whether or not it exists.
    #[inline]
    pub fn child_center(&self, i: usize) -> Point3<f64> {
        self.center + relative_child_pos(i) * (self.halfwidth / 2.0)
    }

    /// True if `p` lies in the closed cube of this node.
    #[inline]
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (p - self.center).amax() <= self.halfwidth
    }

    /// Child slot that would hold `p`, or `None` if `p` is outside the node.
    pub fn child_index_of(&self, p: &Point3<f64>) -> Option<usize> {
        if !self.contains(p) {
            return None;
        }
        Some(child_index_for_offset(&(p - self.center)))
    }

    /// Minimum and maximum corners.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let h = Vector3::repeat(self.halfwidth);
        (self.center - h, self.center + h)
    }

    /// Position of cube corner `i`, using the octant layout.
    #[inline]
    pub fn corner(&self, i: usize) -> Point3<f64> {
        self.center + relative_child_pos(i) * self.halfwidth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn octant_layout() {
        assert_eq!(relative_child_pos(0), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(relative_child_pos(2), Vector3::new(-1.0, -1.0, 1.0));
        assert_eq!(relative_child_pos(6), Vector3::new(-1.0, -1.0, -1.0));
        for i in 0..CHILDREN_PER_NODE {
            assert_eq!(child_index_for_offset(&relative_child_pos(i)), i);
        }
    }

    #[test]
    fn mirrored_children() {
        assert_eq!(mirrored_child(0, 0), 1);
        assert_eq!(mirrored_child(0, 1), 3);
        assert_eq!(mirrored_child(0, 2), 4);
        assert_eq!(mirrored_child(6, 2), 2);
        for i in 0..CHILDREN_PER_NODE {
            for axis in 0..3 {
                assert_eq!(mirrored_child(mirrored_child(i, axis), axis), i);
            }
        }
    }

    #[test]
    fn child_geometry() {
        let n = OctNode::new(Point3::new(1.0, 1.0, 1.0), 2.0);
        let c = n.child_center(6);
        assert_relative_eq!(c, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(n.child_index_of(&Point3::new(0.5, 0.5, 0.5)), Some(6));
        assert_eq!(n.child_index_of(&Point3::new(2.5, 0.5, 0.5)), Some(7));
        assert_eq!(n.child_index_of(&Point3::new(3.5, 1.0, 1.0)), None);
        assert!(n.contains(&Point3::new(3.0, -1.0, 3.0)));
    }

    #[test]
    fn new_node_is_leaf() {
        let n = OctNode::new(Point3::origin(), 1.0);
        assert!(n.is_leaf());
        assert_eq!(n.child_keys().count(), 0);
        let (lo, hi) = n.bounds();
        assert_eq!(lo, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(hi, Point3::new(1.0, 1.0, 1.0));
    }
}
