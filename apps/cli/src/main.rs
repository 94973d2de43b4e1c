// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `octsurf` - reconstruct planar meshes from voxel octree files.
//!
//! # Commands
//!
//! - `mesh` - Run the full reconstruction and write the mesh as OBJ
//! - `regions` - Write the coalesced planar regions as colored quads
//! - `faces` - Write the node boundary faces
//! - `leafs` - Write leaf centers colored by probability
//! - `info` - Print tree statistics
//! - `synth-room` - Carve a synthetic box room into a new tree file
//!
//! Output files are only created once all processing has succeeded.

mod config;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use octsurf_octree::{carve_box_room, Octree, OctreeTopology, Point3, ProgressSink};
use octsurf_surface::{
    export, CornerMap, NodeBoundary, Pipeline, PipelineOutput, SegmentationScheme, Settings,
    TreeInfo, TriangulationMode,
};

use config::Config;

/// Planar surface reconstruction from probabilistic voxel octrees.
#[derive(Parser, Debug)]
#[command(name = "octsurf", version)]
#[command(about = "Reconstructs watertight planar meshes from voxel octrees")]
struct Args {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct the surface and write it as OBJ.
    Mesh {
        tree: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// JSON settings file (overrides OCTSURF_SETTINGS).
        #[arg(short, long)]
        settings: Option<PathBuf>,
        /// Overrides the triangulation from the settings.
        #[arg(long)]
        triangulation: Option<TriangulationMode>,
        /// Also write the run statistics as JSON.
        #[arg(long)]
        stats: Option<PathBuf>,
    },
    /// Write the planar regions as colored quads.
    Regions {
        tree: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        settings: Option<PathBuf>,
        /// Project faces onto their region plane.
        #[arg(long)]
        project: bool,
    },
    /// Write the boundary faces between interior and exterior leaves.
    Faces {
        tree: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "all")]
        scheme: SegmentationScheme,
    },
    /// Write leaf centers colored by interior probability.
    Leafs {
        tree: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print statistics about a tree.
    Info {
        tree: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Carve a synthetic box room with one corner at the origin.
    SynthRoom {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [4.0, 3.0, 2.5])]
        size: Vec<f64>,
        #[arg(long, default_value_t = 0.1)]
        resolution: f64,
    },
}

/// Reports pipeline stages through tracing.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn stage(&mut self, name: &str) {
        tracing::info!(stage = name, "Stage started");
    }

    fn progress(&mut self, done: usize, total: usize) {
        tracing::debug!(done, total, "Stages complete");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env();

    let filter = if args.verbose {
        "debug".to_string()
    } else {
        config.log_filter.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Mesh {
            tree,
            output,
            settings,
            triangulation,
            stats,
        } => {
            let mut settings = config.settings(settings.as_deref())?;
            if let Some(mode) = triangulation {
                settings.triangulation = mode;
            }
            let out = reconstruct(&tree, settings)?;
            write_file(&output, |w| export::write_mesh_obj(&out.mesh, w))?;
            if let Some(path) = stats {
                let json = serde_json::to_string_pretty(&out.stats)?;
                std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            }
            tracing::info!(
                vertices = out.mesh.vertex_count(),
                triangles = out.mesh.triangle_count(),
                output = %output.display(),
                "Wrote mesh"
            );
        }
        Command::Regions {
            tree,
            output,
            settings,
            project,
        } => {
            let settings = config.settings(settings.as_deref())?;
            let mut octree = load(&tree)?;
            let out = Pipeline::new(settings)
                .run(&mut octree, &mut LogProgress)
                .context("Reconstruction failed")?;
            write_file(&output, |w| {
                export::write_regions_obj(&octree, &out.graph, project, w)
            })?;
            tracing::info!(regions = out.graph.len(), output = %output.display(), "Wrote regions");
        }
        Command::Faces { tree, output, scheme } => {
            let settings = config.settings(None)?;
            let octree = load(&tree)?;
            let mut topo = OctreeTopology::new();
            topo.set_strict(settings.strict_neighbors);
            topo.init(&octree).context("Failed to build topology")?;
            let boundary = NodeBoundary::build(&octree, &topo, scheme).context("Failed to build boundary")?;
            let corners = CornerMap::build(&octree, &boundary).context("Failed to build corner map")?;
            write_file(&output, |w| {
                export::write_node_faces_obj(&octree, &boundary, &corners, w)
            })?;
            tracing::info!(faces = boundary.len(), output = %output.display(), "Wrote boundary faces");
        }
        Command::Leafs { tree, output } => {
            let octree = load(&tree)?;
            write_file(&output, |w| export::write_leafs_obj(&octree, w))?;
            tracing::info!(leaves = octree.num_leaves(), output = %output.display(), "Wrote leaves");
        }
        Command::Info { tree, json } => {
            let octree = load(&tree)?;
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut lock, &TreeInfo::from_tree(&octree))?;
                writeln!(lock)?;
            } else {
                export::write_tree_info(&octree, &mut lock)?;
            }
        }
        Command::SynthRoom {
            output,
            size,
            resolution,
        } => {
            let max = Point3::new(size[0], size[1], size[2]);
            let tree = carve_box_room(Point3::origin(), max, resolution).context("Failed to carve room")?;
            tree.save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!(
                leaves = tree.num_leaves(),
                output = %output.display(),
                "Wrote synthetic room"
            );
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Octree> {
    let tree = Octree::load(path).with_context(|| format!("Failed to load octree {}", path.display()))?;
    tracing::debug!(
        leaves = tree.num_leaves(),
        resolution = tree.resolution(),
        "Loaded octree"
    );
    Ok(tree)
}

fn reconstruct(path: &Path, settings: Settings) -> Result<PipelineOutput> {
    let mut tree = load(path)?;
    Pipeline::new(settings)
        .run(&mut tree, &mut LogProgress)
        .context("Reconstruction failed")
}

/// Creates `path` and writes it through a buffer.
fn write_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> octsurf_surface::Result<()>,
{
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write(&mut w).with_context(|| format!("Failed to write {}", path.display()))?;
    w.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
