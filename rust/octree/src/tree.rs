// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The octree itself.
//!
//! Nodes live in a [`SlotMap`] arena. Parents hold child keys, children
//! hold a parent key, and nothing else owns a node, so the structure is a
//! strict tree without reference cycles. The root is re-created only by
//! [`Octree::set_resolution`] and [`Octree::clear`]; growing the domain
//! wraps the existing root instead of replacing it.

use nalgebra::{Point3, Vector3};
use slotmap::SlotMap;

use crate::data::VoxelData;
use crate::error::{Error, Result};
use crate::keys::NodeKey;
use crate::node::{child_index_for_offset, relative_child_pos, OctNode, CHILDREN_PER_NODE};
use crate::shape::{InsertMode, LineSegment, Shape};

/// Children of a simplified node may differ in probability by at most this.
pub const SIMPLIFY_PROB_TOLERANCE: f64 = 0.1;

/// Relative tolerance for geometric checks in [`Octree::verify`].
const GEOMETRY_TOLERANCE: f64 = 1e-9;

/// Spatial index of [`VoxelData`] with a fixed minimum voxel size.
#[derive(Debug, Clone)]
pub struct Octree {
    pub(crate) nodes: SlotMap<NodeKey, OctNode>,
    pub(crate) root: NodeKey,
    pub(crate) max_depth: u32,
    /// False until the first point has been placed; an empty tree moves its
    /// single voxel to that point instead of growing.
    pub(crate) anchored: bool,
}

impl Octree {
    /// Creates an empty tree whose smallest voxels have edge length
    /// `resolution`. The root starts as a single voxel at the origin.
    pub fn new(resolution: f64) -> Result<Self> {
        check_resolution(resolution)?;
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(OctNode::new(Point3::origin(), resolution / 2.0));
        Ok(Self {
            nodes,
            root,
            max_depth: 0,
            anchored: false,
        })
    }

    /// Rebuilds the tree from parsed parts. Used by the file reader.
    pub(crate) fn from_parts(nodes: SlotMap<NodeKey, OctNode>, root: NodeKey, max_depth: u32) -> Self {
        Self {
            nodes,
            root,
            max_depth,
            anchored: true,
        }
    }

    /// Discards all nodes and data and starts over at a new resolution.
    pub fn set_resolution(&mut self, resolution: f64) -> Result<()> {
        check_resolution(resolution)?;
        self.nodes.clear();
        self.root = self
            .nodes
            .insert(OctNode::new(Point3::origin(), resolution / 2.0));
        self.max_depth = 0;
        self.anchored = false;
        Ok(())
    }

    /// Discards all nodes and data, keeping the resolution.
    pub fn clear(&mut self) {
        let resolution = self.resolution();
        self.nodes.clear();
        self.root = self
            .nodes
            .insert(OctNode::new(Point3::origin(), resolution / 2.0));
        self.max_depth = 0;
        self.anchored = false;
    }

    /// Edge length of the smallest voxel.
    pub fn resolution(&self) -> f64 {
        let hw = self.nodes.get(self.root).map_or(0.0, |n| n.halfwidth);
        2.0 * hw / 2f64.powi(self.max_depth as i32)
    }

    /// Depth of the finest leaves below the root.
    #[inline]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[inline]
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// The root node.
    pub fn root_node(&self) -> &OctNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, key: NodeKey) -> Option<&OctNode> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut OctNode> {
        self.nodes.get_mut(key)
    }

    /// Like [`Octree::node`], but a missing key is an error.
    pub fn get(&self, key: NodeKey) -> Result<&OctNode> {
        self.nodes.get(key).ok_or(Error::NodeNotFound(key))
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Result<&mut OctNode> {
        self.nodes.get_mut(key).ok_or(Error::NodeNotFound(key))
    }

    /// Total number of nodes, internal and leaf.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.values().filter(|n| n.is_leaf()).count()
    }

    /// Iterator over all leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = (NodeKey, &OctNode)> + '_ {
        self.nodes.iter().filter(|(_, n)| n.is_leaf())
    }

    /// Iterator over all nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &OctNode)> + '_ {
        self.nodes.iter()
    }

    /// Deepest existing node containing `p`, or `None` if `p` is outside
    /// the domain.
    pub fn find(&self, p: &Point3<f64>) -> Option<NodeKey> {
        let mut key = self.root;
        loop {
            let node = self.nodes.get(key)?;
            let i = node.child_index_of(p)?;
            match node.children[i] {
                Some(child) => key = child,
                None => return Some(key),
            }
        }
    }

    /// Grows the domain until `p` lies inside the root.
    ///
    /// The first point placed in an empty single-voxel tree just moves that
    /// voxel so it is centered on `p`. Otherwise the root
    /// is wrapped in a parent twice its size, offset toward `p`, until `p`
    /// is covered. Existing nodes and data are never discarded.
    pub fn include_in_domain(&mut self, p: &Point3<f64>) -> Result<()> {
        check_resolution(self.resolution())?;
        if !p.coords.iter().all(|c| c.is_finite()) {
            return Err(Error::NonFinitePoint(p.x, p.y, p.z));
        }

        let fresh = !self.anchored && self.max_depth == 0;
        self.anchored = true;
        let root = self.get_mut(self.root)?;
        if fresh && root.data.is_none() && root.is_leaf() {
            root.center = *p;
            return Ok(());
        }

        while !self.root_node().contains(p) {
            let old_root = self.root;
            let (center, hw) = {
                let node = self.root_node();
                (node.center, node.halfwidth)
            };

            let toward = Vector3::from_fn(|i, _| if p[i] >= center[i] { 1.0 } else { -1.0 });
            let mut wrapper = OctNode::new(center + toward * hw, 2.0 * hw);
            wrapper.children[child_index_for_offset(&-toward)] = Some(old_root);

            let new_root = self.nodes.insert(wrapper);
            self.get_mut(old_root)?.parent = Some(new_root);
            self.root = new_root;
            self.max_depth += 1;
        }

        tracing::trace!(
            max_depth = self.max_depth,
            halfwidth = self.root_node().halfwidth,
            "grew octree domain"
        );
        Ok(())
    }

    /// All leaves whose cubes intersect the segment from `a` to `b`.
    /// Read-only: nothing is created.
    pub fn raytrace(&self, a: &Point3<f64>, b: &Point3<f64>) -> Vec<NodeKey> {
        let seg = LineSegment::new(*a, *b);
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];

        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            if !seg.intersects(&node.center, node.halfwidth) {
                continue;
            }
            if node.is_leaf() {
                leaves.push(key);
                continue;
            }
            stack.extend(node.children.iter().rev().flatten().copied());
        }

        leaves
    }

    /// Grows the domain to cover both endpoints, then creates nodes down to
    /// the maximum depth along the segment and returns every leaf it
    /// touches. Leaves that already hold data are returned as they are,
    /// even if they are coarser than the maximum depth.
    pub fn raycarve(&mut self, a: &Point3<f64>, b: &Point3<f64>) -> Result<Vec<NodeKey>> {
        self.include_in_domain(a)?;
        self.include_in_domain(b)?;

        let seg = LineSegment::new(*a, *b);
        let mut leaves = Vec::new();
        let root = self.root_node();
        if seg.intersects(&root.center, root.halfwidth) {
            self.carve_recur(self.root, self.max_depth, &seg, &mut leaves)?;
        }
        Ok(leaves)
    }

    fn carve_recur(
        &mut self,
        key: NodeKey,
        depth: u32,
        seg: &LineSegment,
        leaves: &mut Vec<NodeKey>,
    ) -> Result<()> {
        let node = self.get(key)?;
        if depth == 0 || node.data.is_some() {
            leaves.push(key);
            return Ok(());
        }

        let chw = node.halfwidth / 2.0;
        for i in 0..CHILDREN_PER_NODE {
            let node = self.get(key)?;
            let child_center = node.child_center(i);
            if !seg.intersects(&child_center, chw) {
                continue;
            }
            let child = match node.children[i] {
                Some(child) => child,
                None => self.add_child(key, i)?,
            };
            self.carve_recur(child, depth - 1, seg, leaves)?;
        }
        Ok(())
    }

    /// Creates child slot `i` of `parent` if absent and returns its key.
    fn add_child(&mut self, parent: NodeKey, i: usize) -> Result<NodeKey> {
        let node = self.get(parent)?;
        if let Some(existing) = node.children[i] {
            return Ok(existing);
        }

        let mut child = OctNode::new(node.child_center(i), node.halfwidth / 2.0);
        child.parent = Some(parent);
        let key = self.nodes.insert(child);
        self.get_mut(parent)?.children[i] = Some(key);
        Ok(key)
    }

    /// Grows the domain to the shape's vertices and creates every node down
    /// to the maximum depth that the shape intersects.
    ///
    /// A data-carrying leaf that must be refined hands an equal share of its
    /// data (see [`VoxelData::subdivide`]) to each of its eight new children.
    pub fn subdivide(&mut self, shape: &dyn Shape) -> Result<()> {
        for i in 0..shape.num_verts() {
            self.include_in_domain(&shape.vertex(i))?;
        }

        let root = self.root_node();
        if shape.intersects(&root.center, root.halfwidth) {
            self.subdivide_recur(self.root, self.max_depth, shape)?;
        }
        Ok(())
    }

    fn subdivide_recur(&mut self, key: NodeKey, depth: u32, shape: &dyn Shape) -> Result<()> {
        let node = self.get(key)?;
        if depth == 0 {
            return Ok(());
        }
        if shape.mode() == InsertMode::Hollow && shape.contains_box(&node.center, node.halfwidth) {
            return Ok(());
        }

        if node.is_leaf() {
            if let Some(mut data) = node.data {
                // push the data down so no volume loses its samples
                data.subdivide(CHILDREN_PER_NODE as u32);
                for i in 0..CHILDREN_PER_NODE {
                    let child = self.add_child(key, i)?;
                    self.get_mut(child)?.data = Some(data);
                }
                self.get_mut(key)?.data = None;
            }
        }

        let chw = self.get(key)?.halfwidth / 2.0;
        for i in 0..CHILDREN_PER_NODE {
            let node = self.get(key)?;
            let child_center = node.child_center(i);
            if !shape.intersects(&child_center, chw) {
                continue;
            }
            let child = match node.children[i] {
                Some(child) => child,
                None => self.add_child(key, i)?,
            };
            self.subdivide_recur(child, depth - 1, shape)?;
        }
        Ok(())
    }

    /// Subdivides for the shape, then offers every intersected leaf to
    /// [`Shape::apply_to_leaf`] and merges the returned data into the leaf.
    /// Returns the number of leaves that received data.
    pub fn insert(&mut self, shape: &mut dyn Shape) -> Result<usize> {
        self.subdivide(&*shape)?;

        let mut touched = Vec::new();
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            let node = self.get(key)?;
            if !shape.intersects(&node.center, node.halfwidth) {
                continue;
            }
            if node.is_leaf() {
                touched.push(key);
            } else {
                stack.extend(node.children.iter().rev().flatten().copied());
            }
        }

        let mut applied = 0;
        for key in touched {
            let node = self.get(key)?;
            let contribution = shape.apply_to_leaf(&node.center, node.halfwidth, node.data.as_ref());
            if let Some(contribution) = contribution {
                let node = self.get_mut(key)?;
                match node.data.as_mut() {
                    Some(existing) => existing.merge(&contribution),
                    None => node.data = Some(contribution),
                }
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Collapses subtrees below `key` whose eight children are all leaves
    /// with data that agree on classification, room and carving, and whose
    /// probabilities lie within [`SIMPLIFY_PROB_TOLERANCE`] of each other.
    /// The children's data are merged into the parent.
    ///
    /// Works bottom-up, so a collapse can enable a collapse further up.
    /// Returns the number of nodes removed.
    pub fn simplify_recur(&mut self, key: NodeKey) -> Result<usize> {
        let children: Vec<NodeKey> = self.get(key)?.child_keys().collect();
        let mut removed = 0;
        for child in &children {
            removed += self.simplify_recur(*child)?;
        }

        if children.len() != CHILDREN_PER_NODE {
            return Ok(removed);
        }

        let mut datas = Vec::with_capacity(CHILDREN_PER_NODE);
        for child in &children {
            let node = self.get(*child)?;
            match (node.is_leaf(), node.data) {
                (true, Some(d)) => datas.push(d),
                _ => return Ok(removed),
            }
        }

        if !children_agree(&datas) {
            return Ok(removed);
        }

        let mut merged = datas[0];
        for d in &datas[1..] {
            merged.merge(d);
        }

        for child in children {
            self.nodes.remove(child);
        }
        let node = self.get_mut(key)?;
        node.children = [None; CHILDREN_PER_NODE];
        node.data = Some(merged);
        Ok(removed + CHILDREN_PER_NODE)
    }

    /// Simplifies the whole tree. See [`Octree::simplify_recur`].
    pub fn simplify(&mut self) -> Result<usize> {
        self.simplify_recur(self.root)
    }

    /// Checks that the tree is well formed: children sit at their octant
    /// with half the parent's size, back-pointers match, and only leaves
    /// carry data.
    pub fn verify(&self) -> Result<()> {
        let mut stack = vec![(self.root, 0u32)];
        let mut seen = 0usize;

        while let Some((key, depth)) = stack.pop() {
            let node = self.get(key)?;
            seen += 1;

            if node.halfwidth.is_nan() || node.halfwidth <= 0.0 {
                return Err(Error::Invariant(format!("node {key:?} has halfwidth {}", node.halfwidth)));
            }
            if depth > self.max_depth {
                return Err(Error::Invariant(format!(
                    "node {key:?} at depth {depth} exceeds max depth {}",
                    self.max_depth
                )));
            }
            if !node.is_leaf() && node.data.is_some() {
                return Err(Error::Invariant(format!("internal node {key:?} carries data")));
            }

            for (i, child) in node.children.iter().enumerate() {
                let Some(child) = *child else { continue };
                let c = self.get(child)?;
                if c.parent != Some(key) {
                    return Err(Error::Invariant(format!("child {child:?} does not point back to {key:?}")));
                }
                let tol = GEOMETRY_TOLERANCE * node.halfwidth.max(1.0);
                let expected = node.center + relative_child_pos(i) * (node.halfwidth / 2.0);
                if (c.halfwidth - node.halfwidth / 2.0).abs() > tol || (c.center - expected).amax() > tol {
                    return Err(Error::Invariant(format!("child {child:?} is misplaced in octant {i}")));
                }
                stack.push((child, depth + 1));
            }
        }

        if seen != self.nodes.len() {
            return Err(Error::Invariant(format!(
                "{} nodes reachable from the root, {} in the arena",
                seen,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

fn check_resolution(resolution: f64) -> Result<()> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidResolution(resolution))
    }
}

fn children_agree(datas: &[VoxelData]) -> bool {
    let Some(first) = datas.first() else {
        return false;
    };

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for d in datas {
        if d.is_interior() != first.is_interior()
            || d.is_object() != first.is_object()
            || d.fp_room != first.fp_room
            || d.is_carved != first.is_carved
        {
            return false;
        }
        let p = d.probability();
        lo = lo.min(p);
        hi = hi.max(p);
    }
    hi - lo <= SIMPLIFY_PROB_TOLERANCE
}
