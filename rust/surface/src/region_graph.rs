// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adjacency graph of planar regions and greedy region coalescing.
//!
//! Regions are keyed by their seed face. After flood filling, neighboring
//! regions are merged cheapest-first: the cost of a pair is the largest
//! residual, in standard deviations, of a plane fitted through both
//! regions' sample points. Merging stops once the cheapest pair exceeds
//! the distance threshold.
//!
//! Each face contributes five samples to a fit, its position and its four
//! corners moved by the same offset, all with the face's position variance.
//! The corners keep small regions from fitting any plane through two or
//! three face centers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use nalgebra::{Point3, Vector3};
use octsurf_octree::Octree;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::boundary::{NodeBoundary, NodeFace};
use crate::error::{Error, Result};
use crate::plane::Plane;
use crate::region::PlanarRegion;

/// A region plus what coalescing needs to know about it.
#[derive(Debug, Clone, Default)]
pub struct RegionInfo {
    pub region: PlanarRegion,
    /// Seeds of the regions sharing an edge with this one.
    pub neighbor_seeds: BTreeSet<NodeFace>,
    points: Vec<Point3<f64>>,
    variances: Vec<f64>,
    planarities: Vec<f64>,
    normal_sum: Vector3<f64>,
}

impl RegionInfo {
    fn new(region: PlanarRegion) -> Self {
        Self {
            region,
            ..Self::default()
        }
    }

    /// Caches fit samples and planarity for every face.
    fn cache(&mut self, tree: &Octree, use_isosurface_pos: bool) -> Result<()> {
        self.points.clear();
        self.variances.clear();
        self.planarities.clear();
        self.normal_sum = Vector3::zeros();

        for f in self.region.faces() {
            let sides = f.sides(tree)?;
            let pos = if use_isosurface_pos {
                sides.isosurface_pos()
            } else {
                sides.center
            };
            let shift = pos - sides.center;
            let var = sides.pos_variance();

            self.points.push(pos);
            self.variances.push(var);
            for c in f.corners(tree)? {
                self.points.push(c + shift);
                self.variances.push(var);
            }
            self.planarities.push(sides.planarity());
            self.normal_sum += f.normal() * f.area(tree)?;
        }
        Ok(())
    }

    fn absorb(&mut self, other: RegionInfo) {
        self.region.absorb(other.region);
        self.points.extend(other.points);
        self.variances.extend(other.variances);
        self.planarities.extend(other.planarities);
        self.normal_sum += other.normal_sum;
    }

    /// Plane through this region's samples alone.
    fn fit(&self) -> Plane {
        Plane::fit_weighted(&self.points, &self.variances, &self.normal_sum)
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Mean face planarity.
    pub fn planarity(&self) -> f64 {
        if self.planarities.is_empty() {
            return 0.0;
        }
        self.planarities.iter().sum::<f64>() / self.planarities.len() as f64
    }
}

/// Candidate merge of two neighboring regions.
///
/// Ordered for a min-heap: smallest error first, then fewer faces, then
/// by seeds so the order is total.
#[derive(Debug, Clone)]
pub struct PlanePair {
    pub a: NodeFace,
    pub b: NodeFace,
    pub plane: Plane,
    pub error: f64,
    /// Combined face count when the pair was scored.
    pub num_faces: usize,
}

impl PartialEq for PlanePair {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PlanePair {}

impl PartialOrd for PlanePair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlanePair {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .error
            .partial_cmp(&self.error)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.num_faces.cmp(&self.num_faces))
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

/// Planar regions of a boundary and their adjacency.
#[derive(Debug, Clone)]
pub struct PlanarRegionGraph {
    regions: BTreeMap<NodeFace, RegionInfo>,
    seeds: FxHashMap<NodeFace, NodeFace>,
    planarity_threshold: f64,
    distance_threshold: f64,
    use_isosurface_pos: bool,
}

impl Default for PlanarRegionGraph {
    fn default() -> Self {
        Self {
            regions: BTreeMap::new(),
            seeds: FxHashMap::default(),
            planarity_threshold: 0.0,
            distance_threshold: 2.0,
            use_isosurface_pos: false,
        }
    }
}

impl PlanarRegionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the thresholds used by later calls.
    pub fn init(&mut self, planarity_threshold: f64, distance_threshold: f64, use_isosurface_pos: bool) {
        self.planarity_threshold = planarity_threshold;
        self.distance_threshold = distance_threshold;
        self.use_isosurface_pos = use_isosurface_pos;
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.seeds.clear();
    }

    /// Partitions all faces of `boundary` into flood-filled regions and
    /// records which regions touch.
    pub fn populate(&mut self, tree: &Octree, boundary: &NodeBoundary) -> Result<()> {
        self.clear();

        let mut blacklist: FxHashSet<NodeFace> = FxHashSet::default();
        for face in boundary.faces() {
            if blacklist.contains(face) {
                continue;
            }
            let mut region = PlanarRegion::new();
            region.floodfill(face, tree, boundary, &mut blacklist, self.planarity_threshold)?;
            for f in region.faces() {
                self.seeds.insert(*f, *face);
            }
            self.regions.insert(*face, RegionInfo::new(region));
        }

        let mut links = Vec::new();
        for (seed, info) in &self.regions {
            for f in info.region.faces() {
                for n in boundary.neighbors(f) {
                    let other = self
                        .seeds
                        .get(n)
                        .ok_or_else(|| Error::Invariant(format!("face {n:?} belongs to no region")))?;
                    if other != seed {
                        links.push((*seed, *other));
                    }
                }
            }
        }
        for (a, b) in links {
            if let Some(info) = self.regions.get_mut(&a) {
                info.neighbor_seeds.insert(b);
            }
            if let Some(info) = self.regions.get_mut(&b) {
                info.neighbor_seeds.insert(a);
            }
        }

        for info in self.regions.values_mut() {
            info.cache(tree, self.use_isosurface_pos)?;
            let plane = info.fit();
            info.region.set_plane(plane);
        }

        tracing::debug!(
            regions = self.regions.len(),
            faces = self.seeds.len(),
            "populated planar regions"
        );
        Ok(())
    }

    /// Scores merging the regions seeded at `a` and `b`.
    pub fn plane_pair(&self, a: &NodeFace, b: &NodeFace) -> Result<PlanePair> {
        let ra = self.region_info(a)?;
        let rb = self.region_info(b)?;

        let mut points = Vec::with_capacity(ra.points.len() + rb.points.len());
        points.extend_from_slice(&ra.points);
        points.extend_from_slice(&rb.points);
        let mut variances = Vec::with_capacity(points.len());
        variances.extend_from_slice(&ra.variances);
        variances.extend_from_slice(&rb.variances);

        let hint = ra.normal_sum + rb.normal_sum;
        let plane = Plane::fit_weighted(&points, &variances, &hint);
        let error = plane.max_normalized_residual(&points, &variances);
        Ok(PlanePair {
            a: *a,
            b: *b,
            plane,
            error,
            num_faces: ra.len() + rb.len(),
        })
    }

    fn region_info(&self, seed: &NodeFace) -> Result<&RegionInfo> {
        self.regions
            .get(seed)
            .ok_or_else(|| Error::Invariant(format!("no region seeded at {seed:?}")))
    }

    /// Greedily merges neighboring regions, cheapest pair first, until the
    /// cheapest remaining pair costs more than the distance threshold.
    /// Returns the number of merges.
    pub fn coalesce_regions(&mut self) -> Result<usize> {
        let mut heap = BinaryHeap::new();
        for (seed, info) in &self.regions {
            for n in info.neighbor_seeds.range(seed..) {
                if n != seed {
                    heap.push(self.plane_pair(seed, n)?);
                }
            }
        }

        let before = self.regions.len();
        let mut merges = 0;
        while let Some(pair) = heap.pop() {
            if pair.error > self.distance_threshold {
                break;
            }
            let (Some(ra), Some(rb)) = (self.regions.get(&pair.a), self.regions.get(&pair.b)) else {
                continue;
            };
            if ra.len() + rb.len() != pair.num_faces {
                // one side grew since this pair was scored
                heap.push(self.plane_pair(&pair.a, &pair.b)?);
                continue;
            }

            let (keep, gone) = if ra.len() >= rb.len() {
                (pair.a, pair.b)
            } else {
                (pair.b, pair.a)
            };
            self.merge(&keep, &gone, pair.plane)?;
            merges += 1;

            let info = self.region_info(&keep)?;
            for n in &info.neighbor_seeds {
                heap.push(self.plane_pair(&keep, n)?);
            }
        }

        tracing::debug!(
            before,
            after = self.regions.len(),
            merges,
            threshold = self.distance_threshold,
            "coalesced planar regions"
        );
        Ok(merges)
    }

    /// Moves region `gone` into region `keep`.
    fn merge(&mut self, keep: &NodeFace, gone: &NodeFace, plane: Plane) -> Result<()> {
        let absorbed = self
            .regions
            .remove(gone)
            .ok_or_else(|| Error::Invariant(format!("no region seeded at {gone:?}")))?;

        for f in absorbed.region.faces() {
            self.seeds.insert(*f, *keep);
        }
        let moved: Vec<NodeFace> = absorbed
            .neighbor_seeds
            .iter()
            .filter(|n| *n != keep)
            .copied()
            .collect();
        for n in &moved {
            if let Some(info) = self.regions.get_mut(n) {
                info.neighbor_seeds.remove(gone);
                info.neighbor_seeds.insert(*keep);
            }
        }

        let info = self
            .regions
            .get_mut(keep)
            .ok_or_else(|| Error::Invariant(format!("no region seeded at {keep:?}")))?;
        info.neighbor_seeds.remove(gone);
        info.neighbor_seeds.extend(moved);
        info.absorb(absorbed);
        info.region.set_plane(plane);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region(&self, seed: &NodeFace) -> Option<&PlanarRegion> {
        self.regions.get(seed).map(|info| &info.region)
    }

    pub fn region_info_for(&self, seed: &NodeFace) -> Option<&RegionInfo> {
        self.regions.get(seed)
    }

    /// Seed of the region holding `face`.
    pub fn seed_of(&self, face: &NodeFace) -> Option<NodeFace> {
        self.seeds.get(face).copied()
    }

    /// All regions in seed order.
    pub fn regions(&self) -> impl Iterator<Item = (&NodeFace, &PlanarRegion)> + '_ {
        self.regions.iter().map(|(s, info)| (s, &info.region))
    }

    /// Seeds of the regions touching the region seeded at `seed`.
    pub fn neighbors_of(&self, seed: &NodeFace) -> impl Iterator<Item = &NodeFace> + '_ {
        self.regions
            .get(seed)
            .into_iter()
            .flat_map(|info| info.neighbor_seeds.iter())
    }

    /// Mean face planarity of a region.
    pub fn compute_planarity(&self, seed: &NodeFace) -> Option<f64> {
        self.regions.get(seed).map(RegionInfo::planarity)
    }

    pub fn planarity_threshold(&self) -> f64 {
        self.planarity_threshold
    }

    pub fn distance_threshold(&self) -> f64 {
        self.distance_threshold
    }

    pub fn use_isosurface_pos(&self) -> bool {
        self.use_isosurface_pos
    }
}
