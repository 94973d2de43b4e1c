// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shapes that drive subdivision and insertion.
//!
//! The tree knows nothing about what a shape means. It asks the shape which
//! cubes it touches, subdivides those, and hands every reached leaf to
//! [`Shape::apply_to_leaf`]. Whatever the shape returns is merged into the
//! leaf's [`VoxelData`].

use nalgebra::{Point2, Point3, Vector3};

use crate::data::VoxelData;

/// Slack used by the intersection tests.
const APPROX_ZERO: f64 = 1e-9;

/// How a shape is inserted into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Every intersected cube is refined to the maximum depth.
    #[default]
    Solid,
    /// Cubes wholly inside the shape are not refined further; only the
    /// shape's boundary is carried to the maximum depth.
    Hollow,
}

/// A region of space that can be stamped into an [`Octree`](crate::Octree).
pub trait Shape {
    /// Number of vertices that bound the shape.
    fn num_verts(&self) -> usize;

    /// Vertex `i`. The tree grows its domain to include every vertex.
    fn vertex(&self, i: usize) -> Point3<f64>;

    /// True if the shape touches the cube at `center` with `halfwidth`.
    fn intersects(&self, center: &Point3<f64>, halfwidth: f64) -> bool;

    /// True if the cube lies entirely inside the shape. Only consulted in
    /// [`InsertMode::Hollow`].
    fn contains_box(&self, _center: &Point3<f64>, _halfwidth: f64) -> bool {
        false
    }

    fn mode(&self) -> InsertMode {
        InsertMode::Solid
    }

    /// Returns the contribution for a leaf reached during insertion, given
    /// its current data. The tree merges the result into the leaf.
    fn apply_to_leaf(
        &mut self,
        _center: &Point3<f64>,
        _halfwidth: f64,
        _current: Option<&VoxelData>,
    ) -> Option<VoxelData> {
        None
    }
}

/// Directed segment from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
}

impl LineSegment {
    pub fn new(start: Point3<f64>, end: Point3<f64>) -> Self {
        Self { start, end }
    }

    pub fn direction(&self) -> Vector3<f64> {
        self.end - self.start
    }

    pub fn length(&self) -> f64 {
        self.direction().norm()
    }

    /// Slab test against an axis-aligned box.
    pub fn intersects_box(&self, min: &Point3<f64>, max: &Point3<f64>) -> bool {
        let dir = self.direction();
        let mut tmin = f64::NEG_INFINITY;
        let mut tmax = f64::INFINITY;

        for axis in 0..3 {
            let a = self.start[axis];
            if dir[axis].abs() < f64::EPSILON {
                // parallel to this slab
                if a < min[axis] || a > max[axis] {
                    return false;
                }
                continue;
            }

            let inv = 1.0 / dir[axis];
            let t1 = (min[axis] - a) * inv;
            let t2 = (max[axis] - a) * inv;
            tmin = tmin.max(t1.min(t2));
            tmax = tmax.min(t1.max(t2));
        }

        !(tmin > tmax || tmin > 1.0 || tmax < 0.0)
    }
}

impl Shape for LineSegment {
    fn num_verts(&self) -> usize {
        2
    }

    fn vertex(&self, i: usize) -> Point3<f64> {
        if i == 0 {
            self.start
        } else {
            self.end
        }
    }

    fn intersects(&self, center: &Point3<f64>, halfwidth: f64) -> bool {
        let h = Vector3::repeat(halfwidth);
        self.intersects_box(&(center - h), &(center + h))
    }
}

/// Axis-aligned box. Overlap is tested on open intervals, so boxes that
/// only share a face do not intersect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
    pub mode: InsertMode,
}

impl BoundingBox {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self {
            min,
            max,
            mode: InsertMode::Solid,
        }
    }

    pub fn with_mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

impl Shape for BoundingBox {
    fn num_verts(&self) -> usize {
        8
    }

    fn vertex(&self, i: usize) -> Point3<f64> {
        Point3::new(
            if i & 1 == 0 { self.min.x } else { self.max.x },
            if i & 2 == 0 { self.min.y } else { self.max.y },
            if i & 4 == 0 { self.min.z } else { self.max.z },
        )
    }

    fn intersects(&self, center: &Point3<f64>, halfwidth: f64) -> bool {
        (0..3).all(|i| {
            center[i] - halfwidth < self.max[i] - APPROX_ZERO
                && center[i] + halfwidth > self.min[i] + APPROX_ZERO
        })
    }

    fn contains_box(&self, center: &Point3<f64>, halfwidth: f64) -> bool {
        (0..3).all(|i| {
            center[i] - halfwidth >= self.min[i] && center[i] + halfwidth <= self.max[i]
        })
    }

    fn mode(&self) -> InsertMode {
        self.mode
    }
}

/// A floorplan room: a simple polygon in the xy-plane extruded between a
/// floor and a ceiling height. Inserting it labels the leaves it covers
/// with the room index.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtrudedPoly {
    pub polygon: Vec<Point2<f64>>,
    pub floor_height: f64,
    pub ceiling_height: f64,
    pub room: u32,
    pub mode: InsertMode,
}

impl ExtrudedPoly {
    pub fn new(polygon: Vec<Point2<f64>>, floor_height: f64, ceiling_height: f64, room: u32) -> Self {
        Self {
            polygon,
            floor_height,
            ceiling_height,
            room,
            mode: InsertMode::Solid,
        }
    }

    pub fn with_mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    fn edges(&self) -> impl Iterator<Item = (&Point2<f64>, &Point2<f64>)> + '_ {
        let n = self.polygon.len();
        (0..n).map(move |i| (&self.polygon[i], &self.polygon[(i + 1) % n]))
    }

    /// Even-odd point-in-polygon test in the xy-plane.
    pub fn contains_xy(&self, p: &Point2<f64>) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn square_hit_by_edge(&self, min: &Point2<f64>, max: &Point2<f64>) -> bool {
        self.edges().any(|(a, b)| segment_hits_rect(a, b, min, max))
    }
}

impl Shape for ExtrudedPoly {
    fn num_verts(&self) -> usize {
        2 * self.polygon.len()
    }

    fn vertex(&self, i: usize) -> Point3<f64> {
        let n = self.polygon.len().max(1);
        let p = self.polygon.get(i % n).copied().unwrap_or_else(Point2::origin);
        let z = if i >= n {
            self.ceiling_height
        } else {
            self.floor_height
        };
        Point3::new(p.x, p.y, z)
    }

    fn intersects(&self, center: &Point3<f64>, halfwidth: f64) -> bool {
        if center.z - halfwidth > self.ceiling_height || center.z + halfwidth < self.floor_height {
            return false;
        }

        let min = Point2::new(center.x - halfwidth, center.y - halfwidth);
        let max = Point2::new(center.x + halfwidth, center.y + halfwidth);
        let in_square =
            |p: &Point2<f64>| p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y;

        self.polygon.iter().any(in_square)
            || self.square_hit_by_edge(&min, &max)
            || self.contains_xy(&Point2::new(center.x, center.y))
    }

    fn contains_box(&self, center: &Point3<f64>, halfwidth: f64) -> bool {
        if center.z - halfwidth < self.floor_height || center.z + halfwidth > self.ceiling_height {
            return false;
        }

        let min = Point2::new(center.x - halfwidth, center.y - halfwidth);
        let max = Point2::new(center.x + halfwidth, center.y + halfwidth);
        let corners = [
            min,
            Point2::new(max.x, min.y),
            max,
            Point2::new(min.x, max.y),
        ];
        corners.iter().all(|c| self.contains_xy(c)) && !self.square_hit_by_edge(&min, &max)
    }

    fn mode(&self) -> InsertMode {
        self.mode
    }

    fn apply_to_leaf(
        &mut self,
        _center: &Point3<f64>,
        _halfwidth: f64,
        _current: Option<&VoxelData>,
    ) -> Option<VoxelData> {
        let mut label = VoxelData::new();
        label.set_room(Some(self.room));
        Some(label)
    }
}

/// Liang-Barsky clip of segment `a`-`b` against a closed rectangle.
fn segment_hits_rect(a: &Point2<f64>, b: &Point2<f64>, min: &Point2<f64>, max: &Point2<f64>) -> bool {
    let d = b - a;
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;

    for axis in 0..2 {
        let (lo, hi) = (min[axis], max[axis]);
        if d[axis].abs() < f64::EPSILON {
            if a[axis] < lo || a[axis] > hi {
                return false;
            }
            continue;
        }
        let ta = (lo - a[axis]) / d[axis];
        let tb = (hi - a[axis]) / d[axis];
        t0 = t0.max(ta.min(tb));
        t1 = t1.min(ta.max(tb));
        if t0 > t1 {
            return false;
        }
    }
    true
}
