// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Polygon triangulation in a region's plane.
//!
//! Outlines are projected into 2D with [`plane_basis`], triangulated with
//! earcutr, and the indices mapped back to corner keys by the caller.

use nalgebra::{Point2, Point3, Vector3};

use crate::error::{Error, Result};

const TURN_EPSILON: f64 = 1e-10;

/// Signed turn at `b` when walking `a -> b -> c`; positive turns left.
#[inline]
fn turn(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b - a).perp(&(c - b))
}

/// Turns at every vertex of a closed polygon.
fn turns(points: &[Point2<f64>]) -> impl Iterator<Item = f64> + '_ {
    let n = points.len();
    (0..n).map(move |i| turn(&points[i], &points[(i + 1) % n], &points[(i + 2) % n]))
}

/// No two non-zero turns disagree in sign. Straight runs are allowed.
fn is_convex(points: &[Point2<f64>]) -> bool {
    let significant = turns(points).filter(|t| t.abs() > TURN_EPSILON);
    let (mut left, mut right) = (false, false);
    for t in significant {
        left |= t > 0.0;
        right |= t < 0.0;
    }
    !(left && right)
}

/// Convex with a real turn at every vertex, so a fan has no slivers.
fn is_strictly_convex(points: &[Point2<f64>]) -> bool {
    is_convex(points) && turns(points).all(|t| t.abs() > TURN_EPSILON)
}

fn flatten(rings: &[&[Point2<f64>]]) -> Vec<f64> {
    rings
        .iter()
        .flat_map(|ring| ring.iter())
        .flat_map(|p| [p.x, p.y])
        .collect()
}

fn earcut(coords: &[f64], hole_starts: &[usize]) -> Result<Vec<usize>> {
    earcutr::earcut(coords, hole_starts, 2).map_err(|e| Error::Triangulation(format!("{:?}", e)))
}

/// Triangulates a simple polygon and returns indices into `points`.
///
/// Triangles, convex quads and small strictly convex polygons are fanned
/// directly. Anything else goes through earcut, which may drop collinear
/// points; callers that need every point must check the triangle count.
pub fn triangulate_polygon(points: &[Point2<f64>]) -> Result<Vec<usize>> {
    let n = points.len();
    if n < 3 {
        return Err(Error::Triangulation(format!(
            "polygon needs at least 3 points, got {n}"
        )));
    }

    if n == 3 || (n == 4 && is_convex(points)) || (n <= 8 && is_strictly_convex(points)) {
        return Ok((1..n - 1).flat_map(|i| [0, i, i + 1]).collect());
    }

    earcut(&flatten(&[points]), &[])
}

/// Triangulates `outer` minus `holes`. Indices refer to the outer points
/// followed by each hole's points in order.
pub fn triangulate_polygon_with_holes(
    outer: &[Point2<f64>],
    holes: &[Vec<Point2<f64>>],
) -> Result<Vec<usize>> {
    if outer.len() < 3 || holes.iter().any(|h| h.len() < 3) {
        return Err(Error::Triangulation(
            "every ring needs at least 3 points".to_string(),
        ));
    }
    if holes.is_empty() {
        return triangulate_polygon(outer);
    }

    let mut rings: Vec<&[Point2<f64>]> = Vec::with_capacity(holes.len() + 1);
    rings.push(outer);
    let mut hole_starts = Vec::with_capacity(holes.len());
    let mut start = outer.len();
    for hole in holes {
        hole_starts.push(start);
        start += hole.len();
        rings.push(hole);
    }
    earcut(&flatten(&rings), &hole_starts)
}

/// Right-handed orthonormal axes `(u, v)` spanning the plane with `normal`,
/// so that `u x v = normal`.
pub fn plane_basis(normal: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let n = normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z);

    // cross with the axis least aligned with n for stability
    let a = n.abs();
    let helper = if a.x <= a.y && a.x <= a.z {
        Vector3::x()
    } else if a.y <= a.z {
        Vector3::y()
    } else {
        Vector3::z()
    };

    let u = helper.cross(&n).normalize();
    let v = n.cross(&u);
    (u, v)
}

/// Coordinates of `points` in the `(u, v)` frame centered at `origin`.
pub fn project_to_2d_with_basis(
    points: &[Point3<f64>],
    u: &Vector3<f64>,
    v: &Vector3<f64>,
    origin: &Point3<f64>,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| {
            let d = p - origin;
            Point2::new(d.dot(u), d.dot(v))
        })
        .collect()
}

/// Twice the signed area of a closed 2D polygon, positive when
/// counter-clockwise.
pub fn signed_area2(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| points[i].coords.perp(&points[(i + 1) % n].coords))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(lo: f64, hi: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(lo, lo),
            Point2::new(hi, lo),
            Point2::new(hi, hi),
            Point2::new(lo, hi),
        ]
    }

    fn area(points: &[Point2<f64>], indices: &[usize]) -> f64 {
        indices
            .chunks_exact(3)
            .map(|t| signed_area2(&[points[t[0]], points[t[1]], points[t[2]]]).abs() / 2.0)
            .sum()
    }

    #[test]
    fn square_is_two_triangles() {
        let indices = triangulate_polygon(&square(0.0, 1.0)).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn triangle_passes_through() {
        let points = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.5, 1.0)];
        assert_eq!(triangulate_polygon(&points).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn too_few_points() {
        let points = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert!(matches!(triangulate_polygon(&points), Err(Error::Triangulation(_))));
    }

    #[test]
    fn l_shape_covers_its_area() {
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        assert!(!is_convex(&points));

        let indices = triangulate_polygon(&points).unwrap();
        assert_eq!(indices.len(), 12);
        assert_relative_eq!(area(&points, &indices), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn square_with_hole() {
        let outer = square(0.0, 10.0);
        let mut hole = square(3.0, 7.0);
        hole.reverse();

        let indices = triangulate_polygon_with_holes(&outer, &[hole.clone()]).unwrap();
        assert!(indices.len() > 6);
        assert_eq!(indices.len() % 3, 0);

        let all: Vec<_> = outer.iter().chain(hole.iter()).copied().collect();
        assert_relative_eq!(area(&all, &indices), 84.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_hole_rejected() {
        let outer = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        let hole = vec![Point2::new(0.1, 0.1), Point2::new(0.2, 0.1)];
        assert!(triangulate_polygon_with_holes(&outer, &[hole]).is_err());
    }

    #[test]
    fn collinear_points_are_not_strictly_convex() {
        let mut points = square(0.0, 2.0);
        points.insert(1, Point2::new(1.0, 0.0));
        assert!(is_convex(&points));
        assert!(!is_strictly_convex(&points));
    }

    #[test]
    fn plane_basis_is_right_handed() {
        for n in [Vector3::x(), -Vector3::y(), Vector3::new(1.0, 2.0, -3.0).normalize()] {
            let (u, v) = plane_basis(&n);
            assert_relative_eq!(u.cross(&v), n, epsilon = 1e-12);
            assert_relative_eq!(u.dot(&v), 0.0, epsilon = 1e-12);
            assert_relative_eq!(u.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn projection_keeps_orientation() {
        let points: Vec<_> = square(0.0, 1.0)
            .iter()
            .map(|p| Point3::new(p.x, p.y, 5.0))
            .collect();
        let (u, v) = plane_basis(&Vector3::z());
        let flat = project_to_2d_with_basis(&points, &u, &v, &points[0]);
        assert_relative_eq!(signed_area2(&flat), 2.0, epsilon = 1e-12);

        let (u, v) = plane_basis(&-Vector3::z());
        let flat = project_to_2d_with_basis(&points, &u, &v, &points[0]);
        assert_relative_eq!(signed_area2(&flat), -2.0, epsilon = 1e-12);
    }
}
