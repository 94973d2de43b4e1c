// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end reconstruction: octree in, watertight region mesh out.
//!
//! Stages run strictly in order and every failure is reported with the name
//! of the stage that produced it. Nothing is written anywhere; callers decide
//! what to export from [`PipelineOutput`] once the whole run has succeeded.

use std::time::Instant;

use octsurf_octree::{Octree, OctreeTopology, ProgressSink};
use serde::Serialize;

use crate::boundary::NodeBoundary;
use crate::corner::CornerMap;
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::mesher::RegionMesher;
use crate::region_graph::PlanarRegionGraph;
use crate::settings::Settings;

const STAGES: [&str; 9] = [
    "topology",
    "outlier removal",
    "boundary",
    "corner map",
    "regions",
    "coalesce",
    "mesher",
    "vertex positions",
    "mesh",
];

/// Counts gathered while running the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub leaves: usize,
    pub flipped_leaves: usize,
    pub boundary_faces: usize,
    pub corners: usize,
    pub initial_regions: usize,
    pub merges: usize,
    pub final_regions: usize,
    pub vertices: usize,
    pub mesh_vertices: usize,
    pub triangles: usize,
    pub total_time_ms: u64,
}

/// Everything the pipeline built, kept for export.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub mesh: Mesh,
    pub topology: OctreeTopology,
    pub boundary: NodeBoundary,
    pub corner_map: CornerMap,
    pub graph: PlanarRegionGraph,
    pub mesher: RegionMesher,
    pub stats: PipelineStats,
}

pub struct Pipeline {
    settings: Settings,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs every stage on `tree`. Outlier removal modifies the tree in
    /// place; nothing else does.
    pub fn run(&self, tree: &mut Octree, progress: &mut dyn ProgressSink) -> Result<PipelineOutput> {
        let s = &self.settings;
        s.validate()?;
        let start = Instant::now();
        let mut stats = PipelineStats::default();
        let mut step = Steps { progress };

        step.begin(0);
        let mut topology = OctreeTopology::new();
        topology.set_strict(s.strict_neighbors);
        topology.init(tree).map_err(|e| Error::from(e).in_stage(STAGES[0]))?;
        stats.leaves = topology.len();

        step.begin(1);
        if let Some(threshold) = s.node_outlier_threshold {
            stats.flipped_leaves = topology
                .remove_outliers(tree, threshold)
                .map_err(|e| Error::from(e).in_stage(STAGES[1]))?;
        }
        if stats.flipped_leaves > 0 {
            topology.init(tree).map_err(|e| Error::from(e).in_stage(STAGES[1]))?;
        }

        step.begin(2);
        let boundary = NodeBoundary::build(tree, &topology, s.segmentation)
            .map_err(|e| e.in_stage(STAGES[2]))?;
        stats.boundary_faces = boundary.len();

        step.begin(3);
        let corner_map = CornerMap::build(tree, &boundary).map_err(|e| e.in_stage(STAGES[3]))?;
        stats.corners = corner_map.len();

        step.begin(4);
        let mut graph = PlanarRegionGraph::new();
        graph.init(
            s.coalesce_plane_threshold,
            s.coalesce_distance_threshold,
            s.use_isosurface_pos,
        );
        graph.populate(tree, &boundary).map_err(|e| e.in_stage(STAGES[4]))?;
        stats.initial_regions = graph.len();

        step.begin(5);
        stats.merges = graph.coalesce_regions().map_err(|e| e.in_stage(STAGES[5]))?;
        stats.final_regions = graph.len();

        step.begin(6);
        let mut mesher = RegionMesher::new(s.min_singular_value, s.max_colinearity);
        mesher
            .init(tree, &graph, &corner_map)
            .map_err(|e| e.in_stage(STAGES[6]))?;
        stats.vertices = mesher.num_vertices();

        step.begin(7);
        mesher
            .compute_all_vertex_positions(&graph)
            .map_err(|e| e.in_stage(STAGES[7]))?;

        step.begin(8);
        let mesh = mesher
            .compute_mesh(tree, &graph, &corner_map, s.triangulation.triangulator())
            .map_err(|e| e.in_stage(STAGES[8]))?;
        stats.mesh_vertices = mesh.vertex_count();
        stats.triangles = mesh.triangle_count();
        step.finish();

        stats.total_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            leaves = stats.leaves,
            flipped = stats.flipped_leaves,
            faces = stats.boundary_faces,
            regions = stats.final_regions,
            merges = stats.merges,
            triangles = stats.triangles,
            total_time_ms = stats.total_time_ms,
            "reconstruction complete"
        );

        Ok(PipelineOutput {
            mesh,
            topology,
            boundary,
            corner_map,
            graph,
            mesher,
            stats,
        })
    }
}

/// Forwards stage starts and completed-stage counts to the sink.
struct Steps<'a> {
    progress: &'a mut dyn ProgressSink,
}

impl Steps<'_> {
    fn begin(&mut self, i: usize) {
        if i > 0 {
            self.progress.progress(i, STAGES.len());
        }
        tracing::debug!(stage = STAGES[i], "starting stage");
        self.progress.stage(STAGES[i]);
    }

    fn finish(&mut self) {
        self.progress.progress(STAGES.len(), STAGES.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use octsurf_octree::{BoundingBox, NoProgress, Shape, VoxelData};

    struct Fill(BoundingBox);

    impl Shape for Fill {
        fn num_verts(&self) -> usize {
            8
        }
        fn vertex(&self, i: usize) -> Point3<f64> {
            self.0.vertex(i)
        }
        fn intersects(&self, c: &Point3<f64>, hw: f64) -> bool {
            self.0.intersects(c, hw)
        }
        fn apply_to_leaf(&mut self, c: &Point3<f64>, _: f64, _: Option<&VoxelData>) -> Option<VoxelData> {
            let inside = [c.x, c.y, c.z].iter().all(|v| (2.0..6.0).contains(v));
            let p = if inside { 0.9 } else { 0.1 };
            let mut d = VoxelData::from_sample(1.0, p, 0.0, 0.0, 1.0);
            d.add_sample(1.0, p + 0.01, 0.0, 0.0, 1.0);
            Some(d)
        }
    }

    /// Interior block [2, 6]^3 in an 8^3 exterior grid.
    fn box_room() -> Octree {
        let mut tree = Octree::new(1.0).unwrap();
        tree.include_in_domain(&Point3::new(0.5, 0.5, 0.5)).unwrap();
        let bbox = BoundingBox::new(Point3::new(0.1, 0.1, 0.1), Point3::new(7.9, 7.9, 7.9));
        tree.insert(&mut Fill(bbox)).unwrap();
        tree
    }

    #[derive(Default)]
    struct Recorder {
        stages: Vec<String>,
        last: (usize, usize),
    }

    impl ProgressSink for Recorder {
        fn stage(&mut self, name: &str) {
            self.stages.push(name.to_string());
        }

        fn progress(&mut self, done: usize, total: usize) {
            self.last = (done, total);
        }
    }

    #[test]
    fn box_room_gives_closed_box() {
        let mut tree = box_room();
        let out = Pipeline::new(Settings::default()).run(&mut tree, &mut NoProgress).unwrap();

        assert_eq!(out.stats.boundary_faces, 6 * 16);
        assert_eq!(out.stats.final_regions, 6);
        // 8 box corners plus 3 inner corners on each of the 12 edges
        assert_eq!(out.stats.vertices, 44);
        assert_eq!(out.mesh.edge_defects(), (0, 0));
        assert!(out.stats.merges <= out.stats.initial_regions);

        let (min, max) = out.mesh.bounds();
        assert!((min.x - 2.0).abs() < 1e-4 && (max.z - 6.0).abs() < 1e-4);
    }

    #[test]
    fn reports_every_stage() {
        let mut tree = box_room();
        let mut rec = Recorder::default();
        Pipeline::new(Settings::default()).run(&mut tree, &mut rec).unwrap();
        assert_eq!(rec.stages, STAGES.map(String::from).to_vec());
        assert_eq!(rec.last, (9, 9));
    }

    #[test]
    fn invalid_settings_fail_before_any_stage() {
        let mut tree = box_room();
        let mut settings = Settings::default();
        settings.min_singular_value = 2.0;
        let mut rec = Recorder::default();
        let err = Pipeline::new(settings).run(&mut tree, &mut rec).unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
        assert!(rec.stages.is_empty());
    }

    #[test]
    fn empty_tree_gives_empty_mesh() {
        let mut tree = Octree::new(1.0).unwrap();
        let out = Pipeline::new(Settings::default()).run(&mut tree, &mut NoProgress).unwrap();
        assert!(out.mesh.is_empty());
        assert_eq!(out.stats.final_regions, 0);
    }
}
