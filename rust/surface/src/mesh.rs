// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flat triangle buffers produced by the mesher.
//!
//! Coordinates are stored as `f32` triples so the buffers can be written out
//! or uploaded without conversion. Triangles wind counter-clockwise when
//! seen from the interior of the reconstructed volume.

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// xyz per vertex
    pub positions: Vec<f32>,
    /// xyz per vertex, unit length or zero
    pub normals: Vec<f32>,
    /// three vertex indices per triangle
    pub indices: Vec<u32>,
}

fn narrow(x: f64, y: f64, z: f64) -> [f32; 3] {
    [x as f32, y as f32, z as f32]
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for `vertices` vertices and `triangles` triangles.
    pub fn with_capacity(vertices: usize, triangles: usize) -> Self {
        Self {
            positions: Vec::with_capacity(3 * vertices),
            normals: Vec::with_capacity(3 * vertices),
            indices: Vec::with_capacity(3 * triangles),
        }
    }

    #[inline]
    pub fn add_vertex(&mut self, position: Point3<f64>, normal: Vector3<f64>) {
        self.positions
            .extend(narrow(position.x, position.y, position.z));
        self.normals.extend(narrow(normal.x, normal.y, normal.z));
    }

    #[inline]
    pub fn add_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend([a, b, c]);
    }

    /// Appends `other`, shifting its indices past this mesh's vertices.
    pub fn merge(&mut self, other: &Mesh) {
        let base = self.vertex_count() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.indices.extend(other.indices.iter().map(|i| base + i));
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn vertex(&self, i: usize) -> Point3<f32> {
        Point3::from_slice(&self.positions[3 * i..3 * i + 3])
    }

    fn vertices(&self) -> impl Iterator<Item = Point3<f32>> + '_ {
        self.positions.chunks_exact(3).map(Point3::from_slice)
    }

    /// Axis-aligned `(min, max)`; both at the origin when empty.
    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        let mut points = self.vertices();
        let Some(first) = points.next() else {
            return (Point3::origin(), Point3::origin());
        };
        points.fold((first, first), |(lo, hi), p| (lo.inf(&p), hi.sup(&p)))
    }

    /// Replaces the normals with area-weighted averages of the adjacent
    /// triangle normals.
    pub fn compute_normals(&mut self) {
        let mut acc = vec![Vector3::<f64>::zeros(); self.vertex_count()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| self.vertex(i as usize).cast::<f64>());
            let n = (b - a).cross(&(c - a));
            for &i in tri {
                acc[i as usize] += n;
            }
        }

        self.normals = acc
            .into_iter()
            .flat_map(|n| {
                let n = n.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros);
                narrow(n.x, n.y, n.z)
            })
            .collect();
    }

    /// Counts of edges used by one triangle and by more than two.
    ///
    /// A closed manifold mesh has both counts zero.
    pub fn edge_defects(&self) -> (usize, usize) {
        let mut uses: FxHashMap<(u32, u32), usize> = FxHashMap::default();
        for tri in self.indices.chunks_exact(3) {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                *uses.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        let open = uses.values().filter(|&&n| n == 1).count();
        let over = uses.values().filter(|&&n| n > 2).count();
        (open, over)
    }
}
