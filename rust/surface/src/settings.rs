// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconstruction thresholds.
//!
//! Settings are read from JSON. Every field is optional; missing fields keep
//! their defaults, and an empty object yields [`Settings::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::boundary::SegmentationScheme;
use crate::error::{Error, Result};
use crate::mesher::TriangulationMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Fraction of a leaf's surface that must disagree with it before it is
    /// flipped. `None` skips outlier removal; values outside `(0.5, 1]` make
    /// it a no-op.
    pub node_outlier_threshold: Option<f64>,
    /// Largest normalized plane-fit residual at which two regions merge.
    pub coalesce_distance_threshold: f64,
    /// Minimum face planarity for a face to join a flood-filled region.
    pub coalesce_plane_threshold: f64,
    /// Place faces at their interpolated isosurface position instead of the
    /// grid position.
    pub use_isosurface_pos: bool,
    /// Fraction of the largest singular value below which a direction is
    /// treated as unconstrained when solving vertex positions.
    pub min_singular_value: f64,
    /// Region normals more parallel than this (absolute cosine) count as
    /// one constraint.
    pub max_colinearity: f64,
    /// Which leaves count as interior.
    pub segmentation: SegmentationScheme,
    /// How regions are split into triangles.
    pub triangulation: TriangulationMode,
    /// Treat one-sided neighbor relations as errors.
    pub strict_neighbors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_outlier_threshold: None,
            coalesce_distance_threshold: 2.0,
            coalesce_plane_threshold: 0.0,
            use_isosurface_pos: false,
            min_singular_value: 0.1,
            max_colinearity: 0.99,
            segmentation: SegmentationScheme::All,
            triangulation: TriangulationMode::Faces,
            strict_neighbors: false,
        }
    }
}

impl Settings {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(s).map_err(|e| Error::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Settings(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Rejects values no stage can work with. Out-of-range outlier
    /// thresholds are allowed; they switch the stage off.
    pub fn validate(&self) -> Result<()> {
        let d = self.coalesce_distance_threshold;
        if d.is_nan() || d < 0.0 {
            return Err(Error::Settings(format!(
                "coalesce_distance_threshold must be non-negative, got {}",
                self.coalesce_distance_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.min_singular_value) {
            return Err(Error::Settings(format!(
                "min_singular_value must be in [0, 1), got {}",
                self.min_singular_value
            )));
        }
        if !(0.0..=1.0).contains(&self.max_colinearity) {
            return Err(Error::Settings(format!(
                "max_colinearity must be in [0, 1], got {}",
                self.max_colinearity
            )));
        }
        if self.node_outlier_threshold.is_some_and(f64::is_nan) || self.coalesce_plane_threshold.is_nan() {
            return Err(Error::Settings("thresholds must not be NaN".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let s = Settings::from_json_str("{}").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.node_outlier_threshold, None);
        assert_eq!(s.coalesce_distance_threshold, 2.0);
        assert!(!s.use_isosurface_pos);
    }

    #[test]
    fn partial_override() {
        let s = Settings::from_json_str(
            r#"{ "use_isosurface_pos": true, "segmentation": "objects", "max_colinearity": 0.9 }"#,
        )
        .unwrap();
        assert!(s.use_isosurface_pos);
        assert_eq!(s.segmentation, SegmentationScheme::Objects);
        assert_eq!(s.max_colinearity, 0.9);
        assert_eq!(s.min_singular_value, 0.1);
        assert_eq!(s.triangulation, TriangulationMode::Faces);

        let s = Settings::from_json_str(r#"{ "triangulation": "outline" }"#).unwrap();
        assert_eq!(s.triangulation, TriangulationMode::Outline);
        assert!(Settings::from_json_str(r#"{ "triangulation": "isostuff" }"#).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Settings::from_json_str(r#"{ "min_singular_value": 1.5 }"#),
            Err(Error::Settings(_))
        ));
        assert!(matches!(
            Settings::from_json_str(r#"{ "coalesce_distance_threshold": -1 }"#),
            Err(Error::Settings(_))
        ));
        assert!(Settings::from_json_str("not json").is_err());
    }

    #[test]
    fn outlier_removal_is_opt_in() {
        assert_eq!(Settings::default().node_outlier_threshold, None);
        let s = Settings::from_json_str(r#"{ "node_outlier_threshold": 0.9 }"#).unwrap();
        assert_eq!(s.node_outlier_threshold, Some(0.9));
        let s = Settings::from_json_str(r#"{ "node_outlier_threshold": null }"#).unwrap();
        assert_eq!(s.node_outlier_threshold, None);
    }

    #[test]
    fn json_round_trip() {
        let mut s = Settings::default();
        s.node_outlier_threshold = Some(0.8);
        let back = Settings::from_json_str(&s.to_json().unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
