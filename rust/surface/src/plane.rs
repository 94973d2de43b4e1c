// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planes and weighted plane fitting.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};

/// Variances are floored at this before being inverted into weights.
pub const MIN_FIT_VARIANCE: f64 = 1e-12;

/// Relative eigenvalue below which a point spread is treated as flat along
/// that direction.
const DEGENERATE_SPREAD: f64 = 1e-12;

/// An oriented plane through `point` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub point: Point3<f64>,
    pub normal: Vector3<f64>,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            point: Point3::origin(),
            normal: Vector3::z(),
        }
    }
}

impl Plane {
    /// Normalizes `normal`; a zero normal becomes +z.
    pub fn new(point: Point3<f64>, normal: Vector3<f64>) -> Self {
        let normal = normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z);
        Self { point, normal }
    }

    /// Signed distance from the plane, positive on the normal side.
    #[inline]
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&(p - self.point))
    }

    /// Closest point on the plane.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        p - self.normal * self.distance(p)
    }

    /// The same plane with the opposite orientation.
    pub fn flipped(&self) -> Plane {
        Plane {
            point: self.point,
            normal: -self.normal,
        }
    }

    /// Weighted least-squares plane through `points`.
    ///
    /// Each point is weighted by the inverse of its variance. The plane
    /// passes through the weighted centroid with the normal along the
    /// direction of least weighted spread. When the points do not span a
    /// plane (fewer than three, or all on a line) the normal is `hint`,
    /// made perpendicular to the line if there is one. The returned normal
    /// always points to the same side as `hint`.
    pub fn fit_weighted(points: &[Point3<f64>], variances: &[f64], hint: &Vector3<f64>) -> Plane {
        let hint = hint.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z);
        let weight = |i: usize| 1.0 / variances.get(i).copied().unwrap_or(1.0).max(MIN_FIT_VARIANCE);

        let mut total = 0.0;
        let mut sum = Vector3::zeros();
        for (i, p) in points.iter().enumerate() {
            let w = weight(i);
            total += w;
            sum += p.coords * w;
        }
        if points.is_empty() || total <= 0.0 {
            return Plane::new(Point3::origin(), hint);
        }
        let centroid = Point3::from(sum / total);

        let mut cov = Matrix3::zeros();
        for (i, p) in points.iter().enumerate() {
            let d = p - centroid;
            cov += d * d.transpose() * weight(i);
        }
        cov /= total;

        let eigen = SymmetricEigen::new(cov);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[a]
                .partial_cmp(&eigen.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let largest = eigen.eigenvalues[order[2]].max(0.0);
        let middle = eigen.eigenvalues[order[1]].max(0.0);

        let normal = if points.len() < 3 || middle <= DEGENERATE_SPREAD * largest.max(f64::MIN_POSITIVE) {
            let dir: Vector3<f64> = eigen.eigenvectors.column(order[2]).into_owned();
            let along = if largest > 0.0 { dir * hint.dot(&dir) } else { Vector3::zeros() };
            (hint - along).try_normalize(f64::EPSILON).unwrap_or(hint)
        } else {
            eigen.eigenvectors.column(order[0]).into_owned()
        };

        let normal = if normal.dot(&hint) < 0.0 { -normal } else { normal };
        Plane::new(centroid, normal)
    }

    /// Largest distance from the plane in units of each point's standard
    /// deviation.
    pub fn max_normalized_residual(&self, points: &[Point3<f64>], variances: &[f64]) -> f64 {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let var = variances.get(i).copied().unwrap_or(1.0).max(MIN_FIT_VARIANCE);
                self.distance(p).abs() / var.sqrt()
            })
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn distance_and_projection() {
        let plane = Plane::new(Point3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 3.0));
        assert_relative_eq!(plane.normal, Vector3::z());
        assert_relative_eq!(plane.distance(&Point3::new(5.0, -1.0, 3.5)), 1.5);
        assert_relative_eq!(plane.project(&Point3::new(5.0, -1.0, 3.5)), Point3::new(5.0, -1.0, 2.0));
        assert_relative_eq!(plane.flipped().distance(&Point3::new(0.0, 0.0, 3.0)), -1.0);
    }

    #[test]
    fn fits_tilted_plane() {
        let n = Vector3::new(1.0, 2.0, 2.0).normalize();
        let base = Point3::new(1.0, 1.0, 1.0);
        let u = Vector3::new(2.0, -1.0, 0.0).normalize();
        let v = n.cross(&u);
        let points: Vec<_> = (0..5)
            .flat_map(|i| (0..5).map(move |j| base + u * i as f64 + v * (j as f64 * 0.5)))
            .collect();
        let vars = vec![0.01; points.len()];

        let plane = Plane::fit_weighted(&points, &vars, &Vector3::z());
        assert_relative_eq!(plane.normal, n, epsilon = 1e-9);
        assert!(plane.max_normalized_residual(&points, &vars) < 1e-6);
    }

    #[test]
    fn normal_follows_hint() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let vars = vec![1.0; 4];
        let down = Plane::fit_weighted(&points, &vars, &-Vector3::z());
        assert_relative_eq!(down.normal, -Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(down.point, Point3::new(0.5, 0.5, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_points_use_hint() {
        let line = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0), Point3::new(2.0, 2.0, 0.0)];
        let plane = Plane::fit_weighted(&line, &[1.0; 3], &Vector3::new(1.0, 0.0, 0.0));
        // hint made perpendicular to the line
        assert_relative_eq!(plane.normal.dot(&Vector3::new(1.0, 1.0, 0.0)), 0.0, epsilon = 1e-9);
        assert!(plane.normal.x > 0.0);

        let single = Plane::fit_weighted(&[Point3::new(3.0, 3.0, 3.0)], &[1.0], &Vector3::y());
        assert_relative_eq!(single.normal, Vector3::y());
        assert_relative_eq!(single.point, Point3::new(3.0, 3.0, 3.0));

        let empty = Plane::fit_weighted(&[], &[], &Vector3::zeros());
        assert_relative_eq!(empty.normal, Vector3::z());
    }

    #[test]
    fn low_variance_points_dominate() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let vars = vec![1e-4, 1e-4, 1e-4, 1e-4, 1e4];
        let plane = Plane::fit_weighted(&points, &vars, &Vector3::z());
        assert!(plane.normal.z > 0.999);
        assert!(plane.point.z < 1e-3);
    }
}
