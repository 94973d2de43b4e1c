// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic scans for demos and tests.

use nalgebra::Point3;

use crate::data::VoxelData;
use crate::error::{Error, Result};
use crate::tree::Octree;

/// Occupancy samples given to every carved leaf.
const INTERIOR_SAMPLES: [f64; 2] = [0.88, 0.92];

/// Simulates a scanner at the center of the axis-aligned room `[min, max]`.
///
/// Rays are carved from the center to a grid of wall points spaced half a
/// voxel apart and inset a quarter voxel from the walls, so every voxel
/// inside the room is crossed and none outside it. Carved leaves get two
/// interior samples; everything else stays unobserved. The voxel grid is
/// aligned to `min`, so walls fall on voxel boundaries when the room size
/// is a multiple of `resolution`.
pub fn carve_box_room(min: Point3<f64>, max: Point3<f64>, resolution: f64) -> Result<Octree> {
    let mut tree = Octree::new(resolution)?;
    if (0..3).any(|i| !(max[i] - min[i] >= resolution)) {
        return Err(Error::InvalidShape(format!(
            "room {min:?}..{max:?} is smaller than one voxel of {resolution}"
        )));
    }

    let half = resolution / 2.0;
    tree.include_in_domain(&(min + nalgebra::Vector3::repeat(half)))?;
    let origin = nalgebra::center(&min, &max);
    let inset = resolution / 4.0;

    let mut rays = 0usize;
    for axis in 0..3 {
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        for wall in [min[axis] + inset, max[axis] - inset] {
            for a in grid(min[u] + inset, max[u] - inset, half) {
                for b in grid(min[v] + inset, max[v] - inset, half) {
                    let mut hit = Point3::origin();
                    hit[axis] = wall;
                    hit[u] = a;
                    hit[v] = b;
                    for key in tree.raycarve(&origin, &hit)? {
                        let node = tree.get_mut(key)?;
                        if node.data.is_none() {
                            let mut d = VoxelData::new();
                            for p in INTERIOR_SAMPLES {
                                d.add_sample(1.0, p, 0.0, 0.0, 1.0);
                            }
                            node.data = Some(d);
                        }
                    }
                    rays += 1;
                }
            }
        }
    }

    tracing::debug!(rays, leaves = tree.num_leaves(), "carved synthetic room");
    Ok(tree)
}

/// `start, start + step, ...` up to and including `end`.
fn grid(start: f64, end: f64, step: f64) -> impl Iterator<Item = f64> {
    let n = ((end - start) / step + 1e-9).floor().max(0.0) as usize;
    (0..=n).map(move |i| start + i as f64 * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carves_every_voxel_of_the_room() {
        let min = Point3::new(0.0, 0.0, 0.0);
        let max = Point3::new(2.0, 1.5, 1.0);
        let tree = carve_box_room(min, max, 0.25).unwrap();
        tree.verify().unwrap();

        let carved: Vec<_> = tree.leaves().filter(|(_, n)| n.data.is_some()).collect();
        assert_eq!(carved.len(), 8 * 6 * 4);
        for (_, node) in carved {
            let c = node.center;
            assert!((0..3).all(|i| c[i] > min[i] && c[i] < max[i]));
            assert!(node.data.unwrap().is_interior());
            assert!((node.halfwidth - 0.125).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_rooms_smaller_than_a_voxel() {
        let err = carve_box_room(Point3::origin(), Point3::new(1.0, 0.1, 1.0), 0.25).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn grid_includes_end() {
        let v: Vec<f64> = grid(0.125, 0.875, 0.25).collect();
        assert_eq!(v, vec![0.125, 0.375, 0.625, 0.875]);
    }
}
