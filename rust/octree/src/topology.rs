// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Face-neighbor topology of octree leaves.
//!
//! [`OctreeTopology`] maps every leaf to six sets of touching leaves, one per
//! cube face. The map holds only [`NodeKey`]s and never owns nodes, so it can
//! be rebuilt from the tree at any time.
//!
//! ## Construction
//!
//! Neighbors are derived top-down. A child's face that points into its
//! parent touches a sibling; a face that points out of the parent touches
//! a child of the parent's neighbor on that face (a "cousin" under an
//! "uncle"). If the uncle is a leaf the child touches the uncle itself, and
//! if the uncle lacks the facing child there is nothing there. Internal
//! nodes are pruned at the end and their references re-homed onto leaves.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::face::{CubeFace, NUM_FACES_PER_CUBE};
use crate::keys::NodeKey;
use crate::node::{mirrored_child, relative_child_pos};
use crate::tree::Octree;

/// Allowed error when checking that two neighbors actually touch.
pub const ADJACENCY_TOLERANCE: f64 = 1e-7;

/// Neighbor sets for the six faces of one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeNeighbors {
    faces: [FxHashSet<NodeKey>; NUM_FACES_PER_CUBE],
}

impl NodeNeighbors {
    /// Neighbors touching `face`.
    #[inline]
    pub fn get(&self, face: CubeFace) -> &FxHashSet<NodeKey> {
        &self.faces[face.index()]
    }

    #[inline]
    fn get_mut(&mut self, face: CubeFace) -> &mut FxHashSet<NodeKey> {
        &mut self.faces[face.index()]
    }

    /// Neighbors touching `face`, sorted by key.
    pub fn sorted(&self, face: CubeFace) -> Vec<NodeKey> {
        let mut v: Vec<NodeKey> = self.get(face).iter().copied().collect();
        v.sort_unstable();
        v
    }

    /// Every `(face, neighbor)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (CubeFace, NodeKey)> + '_ {
        CubeFace::ALL
            .into_iter()
            .flat_map(move |f| self.get(f).iter().map(move |n| (f, *n)))
    }

    /// Total number of neighbor entries over all faces.
    pub fn len(&self) -> usize {
        self.faces.iter().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.iter().all(FxHashSet::is_empty)
    }

    /// Face on which `other` is listed, if any.
    pub fn face_of(&self, other: NodeKey) -> Option<CubeFace> {
        CubeFace::ALL.into_iter().find(|f| self.get(*f).contains(&other))
    }
}

/// Leaf-to-neighbors map derived from an [`Octree`].
#[derive(Debug, Clone, Default)]
pub struct OctreeTopology {
    pub(crate) neighs: FxHashMap<NodeKey, NodeNeighbors>,
    strict: bool,
}

impl OctreeTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the topology for `tree` in one step.
    pub fn build(tree: &Octree) -> Result<Self> {
        let mut topo = Self::new();
        topo.init(tree)?;
        Ok(topo)
    }

    /// When strict, [`OctreeTopology::are_neighbors`] treats a one-sided
    /// neighbor relation as an error instead of logging it.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Rebuilds the topology from scratch.
    pub fn init(&mut self, tree: &Octree) -> Result<()> {
        self.neighs.clear();
        self.neighs.insert(tree.root(), NodeNeighbors::default());

        let mut stack = vec![tree.root()];
        while let Some(key) = stack.pop() {
            self.init_children(tree, key)?;
            stack.extend(tree.get(key)?.child_keys());
        }

        self.remove_nonleafs(tree)?;
        tracing::debug!(leaves = self.neighs.len(), "initialized octree topology");
        Ok(())
    }

    /// Derives neighbor sets for the children of `key` from the sets of
    /// `key` itself.
    fn init_children(&mut self, tree: &Octree, key: NodeKey) -> Result<()> {
        let node = tree.get(key)?;
        if node.is_leaf() {
            return Ok(());
        }
        let parent = self
            .neighs
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("no neighbor entry for internal node {key:?}")))?;

        for (i, child) in node.children.iter().enumerate() {
            let Some(child) = *child else { continue };
            let rel = relative_child_pos(i);
            let mut nn = NodeNeighbors::default();

            for face in CubeFace::ALL {
                let axis = face.axis();
                let facing = mirrored_child(i, axis);

                if rel[axis] * face.sign() < 0.0 {
                    // face points into the parent: sibling
                    if let Some(sibling) = node.children[facing] {
                        nn.get_mut(face).insert(sibling);
                    }
                    continue;
                }

                for uncle in parent.get(face) {
                    let u = tree.get(*uncle)?;
                    if u.is_leaf() {
                        nn.get_mut(face).insert(*uncle);
                    } else if let Some(cousin) = u.children[facing] {
                        nn.get_mut(face).insert(cousin);
                    }
                }
            }

            self.neighs.insert(child, nn);
        }
        Ok(())
    }

    /// Moves all references onto leaves and drops internal-node entries.
    fn remove_nonleafs(&mut self, tree: &Octree) -> Result<()> {
        let mut keys: Vec<NodeKey> = self.neighs.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            let is_leaf = tree.get(key)?.is_leaf();
            let nn = match self.neighs.get(&key) {
                Some(nn) => nn.clone(),
                None => continue,
            };

            for (face, n) in nn.iter() {
                let other = self.neighs.get_mut(&n).ok_or_else(|| {
                    Error::Invariant(format!("neighbor {n:?} of {key:?} has no topology entry"))
                })?;
                let back = other.get_mut(face.opposite());
                if is_leaf {
                    back.insert(key);
                } else {
                    back.remove(&key);
                }
            }
        }

        self.neighs
            .retain(|k, _| tree.node(*k).is_some_and(|n| n.is_leaf()));
        Ok(())
    }

    /// Number of leaves in the map.
    pub fn len(&self) -> usize {
        self.neighs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighs.is_empty()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.neighs.contains_key(&key)
    }

    /// All six neighbor sets of `key`.
    pub fn get(&self, key: NodeKey) -> Option<&NodeNeighbors> {
        self.neighs.get(&key)
    }

    /// Neighbors of `key` across `face`.
    pub fn neighbors(&self, key: NodeKey, face: CubeFace) -> Option<&FxHashSet<NodeKey>> {
        self.neighs.get(&key).map(|nn| nn.get(face))
    }

    /// All leaves in the map, sorted by key.
    pub fn sorted_keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.neighs.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &NodeNeighbors)> + '_ {
        self.neighs.iter().map(|(k, v)| (*k, v))
    }

    /// True if `a` and `b` share a face.
    ///
    /// If only one of the two lists the other, a warning is logged and they
    /// are still reported as neighbors, unless the topology is strict, in
    /// which case this is an [`Error::Invariant`].
    pub fn are_neighbors(&self, a: NodeKey, b: NodeKey) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        let (Some(na), Some(nb)) = (self.neighs.get(&a), self.neighs.get(&b)) else {
            return Ok(false);
        };

        let forward = na.face_of(b);
        let backward = nb.face_of(a);
        match (forward, backward) {
            (None, None) => Ok(false),
            (Some(f), Some(g)) if g == f.opposite() => Ok(true),
            _ => {
                if self.strict {
                    return Err(Error::Invariant(format!(
                        "asymmetric neighbors {a:?} ({forward:?}) and {b:?} ({backward:?})"
                    )));
                }
                tracing::warn!(?a, ?b, ?forward, ?backward, "asymmetric octree neighbors");
                Ok(true)
            }
        }
    }

    /// Checks symmetry and geometric adjacency of every relation.
    pub fn verify(&self, tree: &Octree) -> Result<()> {
        for key in self.sorted_keys() {
            let node = tree
                .node(key)
                .ok_or_else(|| Error::Invariant(format!("topology lists {key:?}, which is not in the tree")))?;
            let nn = &self.neighs[&key];

            for face in CubeFace::ALL {
                let set = nn.get(face);
                if !node.is_leaf() && set.len() > 1 {
                    return Err(Error::Invariant(format!(
                        "internal node {key:?} has {} neighbors on {face:?}",
                        set.len()
                    )));
                }

                for n in set {
                    let n = *n;
                    if n == key {
                        return Err(Error::Invariant(format!("{key:?} is its own neighbor")));
                    }
                    let other = self
                        .neighs
                        .get(&n)
                        .ok_or_else(|| Error::Invariant(format!("neighbor {n:?} of {key:?} has no entry")))?;
                    if !other.get(face.opposite()).contains(&key) {
                        return Err(Error::Invariant(format!(
                            "{key:?} lists {n:?} on {face:?} but not the reverse"
                        )));
                    }

                    let on = tree.get(n)?;
                    let axis = face.axis();
                    let offset = (on.center[axis] - node.center[axis]) * face.sign();
                    if (offset - (node.halfwidth + on.halfwidth)).abs() > ADJACENCY_TOLERANCE {
                        return Err(Error::Invariant(format!(
                            "{key:?} and {n:?} do not touch across {face:?} (offset {offset})"
                        )));
                    }
                    if set.len() > 1 && on.halfwidth >= node.halfwidth {
                        return Err(Error::Invariant(format!(
                            "{key:?} has several neighbors on {face:?} but {n:?} is not smaller"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Flips isolated leaves whose label disagrees with most of their
    /// surroundings.
    ///
    /// A leaf is flipped when the fraction of its surface area bordered by
    /// neighbors of the opposite label reaches `threshold`. Interior leaves
    /// are processed to exhaustion first, then exterior ones. Flipping a leaf
    /// queues the neighbors that used to agree with it, since they may now be
    /// outliers themselves. Each leaf flips at most once per call, which
    /// bounds the work. Leaves without data never flip but count as exterior
    /// when they border another leaf.
    ///
    /// Does nothing unless `0.5 < threshold <= 1`. Returns the number of
    /// flipped leaves.
    pub fn remove_outliers(&self, tree: &mut Octree, threshold: f64) -> Result<usize> {
        if !(threshold > 0.5 && threshold <= 1.0) {
            tracing::debug!(threshold, "outlier removal disabled");
            return Ok(0);
        }

        let mut interior = VecDeque::new();
        let mut exterior = VecDeque::new();
        for key in self.sorted_keys() {
            if let Some(d) = tree.get(key)?.data {
                if d.is_interior() {
                    interior.push_back(key);
                } else {
                    exterior.push_back(key);
                }
            }
        }

        let mut flipped: FxHashSet<NodeKey> = FxHashSet::default();
        for (label, mut queue) in [(true, interior), (false, exterior)] {
            while let Some(key) = queue.pop_front() {
                if flipped.contains(&key) {
                    continue;
                }
                let node = tree.get(key)?;
                let Some(data) = node.data else { continue };
                if data.is_interior() != label {
                    continue;
                }

                let hw = node.halfwidth;
                let nn = self.neighs.get(&key).ok_or(Error::NodeNotFound(key))?;
                let mut disagree = 0.0;
                let mut agreeing = Vec::new();
                for (_, n) in nn.iter() {
                    let on = tree.get(n)?;
                    let m = hw.min(on.halfwidth);
                    let n_label = on.data.is_some_and(|d| d.is_interior());
                    if n_label == label {
                        if on.data.is_some() {
                            agreeing.push(n);
                        }
                    } else {
                        disagree += 4.0 * m * m;
                    }
                }

                let fraction = disagree / (24.0 * hw * hw);
                if fraction < threshold {
                    continue;
                }

                if let Some(d) = tree.get_mut(key)?.data.as_mut() {
                    d.flip();
                }
                flipped.insert(key);
                agreeing.sort_unstable();
                queue.extend(agreeing.into_iter().filter(|n| !flipped.contains(n)));
            }
        }

        tracing::debug!(flipped = flipped.len(), threshold, "removed outliers");
        Ok(flipped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VoxelData;
    use crate::shape::{BoundingBox, Shape};
    use nalgebra::Point3;

    struct Sampler {
        bbox: BoundingBox,
        prob: f64,
    }

    impl Shape for Sampler {
        fn num_verts(&self) -> usize {
            8
        }
        fn vertex(&self, i: usize) -> Point3<f64> {
            self.bbox.vertex(i)
        }
        fn intersects(&self, c: &Point3<f64>, hw: f64) -> bool {
            self.bbox.intersects(c, hw)
        }
        fn apply_to_leaf(&mut self, _: &Point3<f64>, _: f64, _: Option<&VoxelData>) -> Option<VoxelData> {
            Some(VoxelData::from_sample(1.0, self.prob, 0.0, 0.0, 0.0))
        }
    }

    /// 4x4x4 unit voxels over [0,4]^3, all exterior. The root is grown
    /// diagonally first so it spans exactly the block and each 2^3 octant
    /// has a single parent.
    fn block() -> Octree {
        let mut tree = Octree::new(1.0).unwrap();
        for c in [0.5, 1.5, 3.5] {
            tree.include_in_domain(&Point3::new(c, c, c)).unwrap();
        }
        let bbox = BoundingBox::new(Point3::new(0.1, 0.1, 0.1), Point3::new(3.9, 3.9, 3.9));
        tree.insert(&mut Sampler { bbox, prob: 0.0 }).unwrap();
        tree
    }

    fn set_prob(tree: &mut Octree, p: Point3<f64>, prob: f64) -> NodeKey {
        let key = tree.find(&p).unwrap();
        tree.get_mut(key).unwrap().data = Some(VoxelData::from_sample(1.0, prob, 0.0, 0.0, 0.0));
        key
    }

    #[test]
    fn uniform_grid_neighbors() {
        let tree = block();
        let topo = OctreeTopology::build(&tree).unwrap();
        assert_eq!(topo.len(), 64);
        assert_eq!(tree.root_node().center, Point3::new(2.0, 2.0, 2.0));
        topo.verify(&tree).unwrap();

        let inner = tree.find(&Point3::new(1.5, 1.5, 1.5)).unwrap();
        let nn = topo.get(inner).unwrap();
        assert_eq!(nn.len(), 6);
        for face in CubeFace::ALL {
            assert_eq!(nn.get(face).len(), 1);
        }

        let corner = tree.find(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        let nn = topo.get(corner).unwrap();
        assert_eq!(nn.len(), 3);
        assert!(nn.get(CubeFace::XMinus).is_empty());
        assert!(nn.get(CubeFace::ZMinus).is_empty());
    }

    #[test]
    fn neighbor_lookup_is_symmetric() {
        let tree = block();
        let topo = OctreeTopology::build(&tree).unwrap();
        let a = tree.find(&Point3::new(1.5, 1.5, 1.5)).unwrap();
        let b = tree.find(&Point3::new(2.5, 1.5, 1.5)).unwrap();
        let c = tree.find(&Point3::new(2.5, 2.5, 1.5)).unwrap();
        assert!(topo.are_neighbors(a, b).unwrap());
        assert!(topo.are_neighbors(b, a).unwrap());
        assert!(!topo.are_neighbors(a, c).unwrap());
        assert!(!topo.are_neighbors(a, a).unwrap());
        assert_eq!(topo.get(a).unwrap().face_of(b), Some(CubeFace::XPlus));
    }

    #[test]
    fn mixed_sizes_after_simplify() {
        let mut tree = block();
        set_prob(&mut tree, Point3::new(3.5, 3.5, 3.5), 0.9);
        // every octant except the one holding the odd voxel collapses
        assert_eq!(tree.simplify().unwrap(), 56);

        let topo = OctreeTopology::build(&tree).unwrap();
        assert_eq!(topo.len(), 7 + 8);
        topo.verify(&tree).unwrap();

        let coarse = tree.find(&Point3::new(3.0, 3.0, 1.0)).unwrap();
        assert_eq!(tree.get(coarse).unwrap().halfwidth, 1.0);
        let above = topo.neighbors(coarse, CubeFace::ZPlus).unwrap();
        assert_eq!(above.len(), 4);
        for fine in above {
            assert_eq!(tree.get(*fine).unwrap().halfwidth, 0.5);
            let back = topo.neighbors(*fine, CubeFace::ZMinus).unwrap();
            assert_eq!(back.len(), 1);
            assert!(back.contains(&coarse));
        }
    }

    #[test]
    fn verify_detects_asymmetry() {
        let tree = block();
        let mut topo = OctreeTopology::build(&tree).unwrap();
        let a = tree.find(&Point3::new(1.5, 1.5, 1.5)).unwrap();
        let b = tree.find(&Point3::new(2.5, 1.5, 1.5)).unwrap();
        topo.neighs
            .get_mut(&b)
            .unwrap()
            .get_mut(CubeFace::XMinus)
            .remove(&a);

        assert!(matches!(topo.verify(&tree), Err(Error::Invariant(_))));
        // lenient lookup still reports adjacency
        assert!(topo.are_neighbors(a, b).unwrap());
        topo.set_strict(true);
        assert!(topo.are_neighbors(a, b).is_err());
    }

    #[test]
    fn verify_detects_non_touching_pair() {
        let tree = block();
        let mut topo = OctreeTopology::build(&tree).unwrap();
        let a = tree.find(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        let far = tree.find(&Point3::new(3.5, 0.5, 0.5)).unwrap();
        topo.neighs.get_mut(&a).unwrap().get_mut(CubeFace::XPlus).insert(far);
        topo.neighs.get_mut(&far).unwrap().get_mut(CubeFace::XMinus).insert(a);
        assert!(topo.verify(&tree).is_err());
    }

    #[test]
    fn isolated_voxel_is_flipped() {
        let mut tree = block();
        let lone = set_prob(&mut tree, Point3::new(1.5, 1.5, 1.5), 0.9);
        let topo = OctreeTopology::build(&tree).unwrap();

        assert_eq!(topo.remove_outliers(&mut tree, 1.0).unwrap(), 1);
        assert!(!tree.get(lone).unwrap().data.unwrap().is_interior());
    }

    #[test]
    fn supported_voxels_are_kept() {
        let mut tree = block();
        for x in [1.5, 2.5] {
            for y in [1.5, 2.5] {
                for z in [1.5, 2.5] {
                    set_prob(&mut tree, Point3::new(x, y, z), 0.9);
                }
            }
        }
        let topo = OctreeTopology::build(&tree).unwrap();
        assert_eq!(topo.remove_outliers(&mut tree, 0.9).unwrap(), 0);
        let k = tree.find(&Point3::new(1.5, 1.5, 1.5)).unwrap();
        assert!(tree.get(k).unwrap().data.unwrap().is_interior());
    }

    #[test]
    fn out_of_range_threshold_is_noop() {
        let mut tree = block();
        set_prob(&mut tree, Point3::new(1.5, 1.5, 1.5), 0.9);
        let topo = OctreeTopology::build(&tree).unwrap();
        assert_eq!(topo.remove_outliers(&mut tree, 0.5).unwrap(), 0);
        assert_eq!(topo.remove_outliers(&mut tree, 1.5).unwrap(), 0);
    }
}
