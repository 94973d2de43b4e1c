// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-leaf statistical accumulator.
//!
//! [`VoxelData`] stores weighted running sums instead of means so that two
//! accumulators for the same volume can be combined exactly with
//! [`VoxelData::merge`], and split back with [`VoxelData::subdivide`].

/// Probability reported by a voxel that has never been observed.
pub const UNOBSERVED_PROBABILITY: f64 = 0.5;

/// Largest possible variance of a value in `[0, 1]`, reported whenever
/// fewer than two samples exist.
pub const MAXIMUM_VARIANCE: f64 = 1.0;

/// Room index meaning "not associated with any room".
pub const NO_ROOM: i32 = -1;

/// Weighted occupancy, surface, corner and planarity statistics for a voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelData {
    /// Number of observed samples.
    pub count: u32,
    /// Sum of sample weights.
    pub total_weight: f64,
    /// Weighted sum of occupancy samples.
    pub prob_sum: f64,
    /// Weighted sum of squared occupancy samples.
    pub prob_sum_sq: f64,
    /// Weighted sum of surface-likelihood samples.
    pub surface_sum: f64,
    /// Weighted sum of corner-likelihood samples.
    pub corner_sum: f64,
    /// Weighted sum of planarity samples.
    pub planar_sum: f64,
    /// Floorplan room index, negative for none.
    pub fp_room: i32,
    /// Set when the voxel was carved deterministically (e.g. from a floorplan).
    pub is_carved: bool,
}

impl Default for VoxelData {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelData {
    /// An unobserved voxel.
    pub fn new() -> Self {
        Self {
            count: 0,
            total_weight: 0.0,
            prob_sum: 0.0,
            prob_sum_sq: 0.0,
            surface_sum: 0.0,
            corner_sum: 0.0,
            planar_sum: 0.0,
            fp_room: NO_ROOM,
            is_carved: false,
        }
    }

    /// A voxel holding exactly one weighted sample.
    pub fn from_sample(weight: f64, prob: f64, surface: f64, corner: f64, planar: f64) -> Self {
        let mut data = Self::new();
        data.add_sample(weight, prob, surface, corner, planar);
        data
    }

    /// Accumulates one weighted observation.
    pub fn add_sample(&mut self, weight: f64, prob: f64, surface: f64, corner: f64, planar: f64) {
        self.count += 1;
        self.total_weight += weight;
        self.prob_sum += weight * prob;
        self.prob_sum_sq += weight * prob * prob;
        self.surface_sum += weight * surface;
        self.corner_sum += weight * corner;
        self.planar_sum += weight * planar;
    }

    /// Combines another accumulator for the same volume into this one.
    ///
    /// Commutative and associative: all sums add, the larger room index
    /// wins and the carved flag is or-ed.
    pub fn merge(&mut self, other: &VoxelData) {
        self.count += other.count;
        self.total_weight += other.total_weight;
        self.prob_sum += other.prob_sum;
        self.prob_sum_sq += other.prob_sum_sq;
        self.surface_sum += other.surface_sum;
        self.corner_sum += other.corner_sum;
        self.planar_sum += other.planar_sum;
        self.fp_room = self.fp_room.max(other.fp_room);
        self.is_carved |= other.is_carved;
    }

    /// Returns the merge of `self` and `other` without modifying either.
    pub fn merged(&self, other: &VoxelData) -> VoxelData {
        let mut out = *self;
        out.merge(other);
        out
    }

    /// Scales the accumulator down to represent one of `n` equal parts.
    ///
    /// Every weighted sum is multiplied by `1/n`; the sample count is
    /// divided but never drops below one. Means are unchanged.
    pub fn subdivide(&mut self, n: u32) {
        if n <= 1 || self.count == 0 {
            return;
        }

        let ratio = 1.0 / f64::from(n);
        self.count = (self.count / n).max(1);
        self.total_weight *= ratio;
        self.prob_sum *= ratio;
        self.prob_sum_sq *= ratio;
        self.surface_sum *= ratio;
        self.corner_sum *= ratio;
        self.planar_sum *= ratio;
    }

    /// Mirrors the occupancy estimate about 0.5 and resets the uncertainty
    /// to its maximum.
    pub fn flip(&mut self) {
        let w = self.total_weight;
        let old_sum = self.prob_sum;
        // sum w(1-p)^2 = W - 2 sum wp + sum wp^2
        self.prob_sum_sq = w - 2.0 * old_sum + self.prob_sum_sq;
        self.prob_sum = w - old_sum;
        self.count = self.count.min(1);
    }

    /// Returns true if no sample has been accumulated.
    #[inline]
    pub fn is_unobserved(&self) -> bool {
        self.count == 0 || self.total_weight <= 0.0
    }

    /// Weighted mean occupancy probability, 0.5 when unobserved.
    pub fn probability(&self) -> f64 {
        if self.is_unobserved() {
            return UNOBSERVED_PROBABILITY;
        }
        (self.prob_sum / self.total_weight).clamp(0.0, 1.0)
    }

    /// Weighted sample variance of the occupancy probability.
    pub fn uncertainty(&self) -> f64 {
        if self.count < 2 || self.total_weight <= 0.0 {
            return MAXIMUM_VARIANCE;
        }

        let mean = self.prob_sum / self.total_weight;
        let mean_sq = self.prob_sum_sq / self.total_weight;
        let n = f64::from(self.count);
        let var = (mean_sq - mean * mean) * n / (n - 1.0);
        var.clamp(0.0, MAXIMUM_VARIANCE)
    }

    fn weighted_mean(&self, sum: f64) -> f64 {
        if self.is_unobserved() {
            return 0.0;
        }
        (sum / self.total_weight).clamp(0.0, 1.0)
    }

    /// Weighted mean likelihood that the voxel holds a surface.
    pub fn surface_prob(&self) -> f64 {
        self.weighted_mean(self.surface_sum)
    }

    /// Weighted mean likelihood that the voxel holds a corner.
    pub fn corner_prob(&self) -> f64 {
        self.weighted_mean(self.corner_sum)
    }

    /// Weighted mean planarity estimate.
    pub fn planar_prob(&self) -> f64 {
        self.weighted_mean(self.planar_sum)
    }

    /// True when the voxel is more likely interior (open building space)
    /// than not. Exactly 0.5 is not interior.
    #[inline]
    pub fn is_interior(&self) -> bool {
        self.probability() > 0.5
    }

    /// True for interior voxels not claimed by any floorplan room, which
    /// is how furniture and other objects show up.
    #[inline]
    pub fn is_object(&self) -> bool {
        self.is_interior() && self.room().is_none()
    }

    /// Associated floorplan room, if any.
    pub fn room(&self) -> Option<u32> {
        u32::try_from(self.fp_room).ok()
    }

    pub fn set_room(&mut self, room: Option<u32>) {
        self.fp_room = room
            .and_then(|r| i32::try_from(r).ok())
            .unwrap_or(NO_ROOM);
    }

    pub fn set_carved(&mut self, carved: bool) {
        self.is_carved = carved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_a() -> VoxelData {
        let mut d = VoxelData::from_sample(1.0, 0.9, 0.2, 0.1, 0.7);
        d.add_sample(0.5, 0.6, 0.4, 0.0, 0.9);
        d.fp_room = 3;
        d
    }

    fn sample_b() -> VoxelData {
        let mut d = VoxelData::from_sample(2.0, 0.1, 0.8, 0.3, 0.2);
        d.is_carved = true;
        d
    }

    #[test]
    fn unobserved_is_half() {
        let d = VoxelData::new();
        assert_eq!(d.probability(), 0.5);
        assert!(!d.is_interior());
        assert_eq!(d.uncertainty(), MAXIMUM_VARIANCE);
        assert_eq!(d.room(), None);
    }

    #[test]
    fn interior_is_strict() {
        let d = VoxelData::from_sample(1.0, 0.5, 0.0, 0.0, 0.0);
        assert_eq!(d.probability(), 0.5);
        assert!(!d.is_interior());

        let d = VoxelData::from_sample(1.0, 0.51, 0.0, 0.0, 0.0);
        assert!(d.is_interior());
    }

    #[test]
    fn weighted_means() {
        let d = sample_a();
        assert_relative_eq!(d.probability(), (0.9 + 0.5 * 0.6) / 1.5, epsilon = 1e-12);
        assert_relative_eq!(d.planar_prob(), (0.7 + 0.5 * 0.9) / 1.5, epsilon = 1e-12);
        assert_relative_eq!(d.surface_prob(), (0.2 + 0.5 * 0.4) / 1.5, epsilon = 1e-12);
        assert_relative_eq!(d.corner_prob(), 0.1 / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn merge_is_commutative() {
        let ab = sample_a().merged(&sample_b());
        let ba = sample_b().merged(&sample_a());
        assert_eq!(ab.count, ba.count);
        assert_relative_eq!(ab.total_weight, ba.total_weight);
        assert_relative_eq!(ab.prob_sum, ba.prob_sum);
        assert_relative_eq!(ab.prob_sum_sq, ba.prob_sum_sq);
        assert_relative_eq!(ab.planar_sum, ba.planar_sum);
        assert_eq!(ab.fp_room, 3);
        assert_eq!(ba.fp_room, 3);
        assert!(ab.is_carved && ba.is_carved);
    }

    #[test]
    fn merge_is_associative() {
        let c = VoxelData::from_sample(0.3, 0.4, 0.0, 0.5, 0.5);
        let left = sample_a().merged(&sample_b()).merged(&c);
        let right = sample_a().merged(&sample_b().merged(&c));
        assert_eq!(left.count, right.count);
        assert_relative_eq!(left.prob_sum, right.prob_sum, epsilon = 1e-12);
        assert_relative_eq!(left.corner_sum, right.corner_sum, epsilon = 1e-12);
    }

    #[test]
    fn subdivide_inverts_self_merge() {
        let a = sample_a();
        let mut doubled = a.merged(&a);
        doubled.subdivide(2);
        assert_eq!(doubled.count, a.count);
        assert_relative_eq!(doubled.total_weight, a.total_weight, epsilon = 1e-12);
        assert_relative_eq!(doubled.prob_sum, a.prob_sum, epsilon = 1e-12);
        assert_relative_eq!(doubled.prob_sum_sq, a.prob_sum_sq, epsilon = 1e-12);
        assert_relative_eq!(doubled.surface_sum, a.surface_sum, epsilon = 1e-12);
        assert_relative_eq!(doubled.planar_sum, a.planar_sum, epsilon = 1e-12);
        assert_relative_eq!(doubled.probability(), a.probability(), epsilon = 1e-12);
    }

    #[test]
    fn subdivide_keeps_at_least_one_sample() {
        let mut d = VoxelData::from_sample(1.0, 0.8, 0.0, 0.0, 0.0);
        d.subdivide(8);
        assert_eq!(d.count, 1);
        assert_relative_eq!(d.probability(), 0.8, epsilon = 1e-12);

        let mut empty = VoxelData::new();
        empty.subdivide(8);
        assert_eq!(empty, VoxelData::new());
    }

    #[test]
    fn flip_mirrors_probability() {
        let mut d = sample_a();
        let p = d.probability();
        d.flip();
        assert_relative_eq!(d.probability(), 1.0 - p, epsilon = 1e-12);
        assert_eq!(d.uncertainty(), MAXIMUM_VARIANCE);
        assert!(!d.is_interior());
        d.flip();
        assert!(d.is_interior());
    }

    #[test]
    fn uncertainty_of_identical_samples_is_zero() {
        let mut d = VoxelData::from_sample(1.0, 0.8, 0.0, 0.0, 0.0);
        d.add_sample(1.0, 0.8, 0.0, 0.0, 0.0);
        assert_relative_eq!(d.uncertainty(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn uncertainty_of_spread_samples() {
        let mut d = VoxelData::from_sample(1.0, 0.0, 0.0, 0.0, 0.0);
        d.add_sample(1.0, 1.0, 0.0, 0.0, 0.0);
        // population variance 0.25, corrected by n/(n-1) = 2
        assert_relative_eq!(d.uncertainty(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn object_and_room_labels() {
        let mut d = VoxelData::from_sample(1.0, 0.9, 0.0, 0.0, 0.0);
        assert!(d.is_object());
        d.set_room(Some(2));
        assert_eq!(d.room(), Some(2));
        assert!(!d.is_object());
        d.set_room(None);
        assert_eq!(d.fp_room, NO_ROOM);
    }
}
