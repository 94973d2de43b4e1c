// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary octree files.
//!
//! Layout (little-endian):
//!
//! | Field | Type |
//! |-------|------|
//! | magic | `b"octfile\0"` |
//! | version | `u32` |
//! | resolution | `f64` (version 3 and later) |
//! | max depth | `i32` |
//! | node count | `u32` |
//! | root | node record |
//!
//! A node record is `center: 3 x f64`, `halfwidth: f64`, a `u8` data flag
//! followed by the voxel fields when set, then eight `u8` child flags, each
//! followed by the child's record when set. Voxel fields are
//! `count: u32`, `total_weight: f64` (absent in version 1), `prob_sum`,
//! `prob_sum_sq`, `surface_sum`, `corner_sum`, `planar_sum` (`f64`),
//! `fp_room: i32` and, from version 3, `is_carved: u8`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::Point3;
use slotmap::SlotMap;

use crate::data::VoxelData;
use crate::error::{Error, Result};
use crate::keys::NodeKey;
use crate::node::{OctNode, CHILDREN_PER_NODE};
use crate::tree::Octree;

/// Magic number at the start of every octree file.
pub const OCTFILE_MAGIC: &[u8; 8] = b"octfile\0";

/// Version written by [`Octree::serialize`].
pub const CURRENT_VERSION: u32 = 3;

/// Oldest version [`Octree::parse`] understands.
pub const OLDEST_VERSION: u32 = 1;

/// Deepest tree [`Octree::parse`] accepts. Halving a halfwidth this many
/// times exhausts `f64` precision for any sensible domain.
pub const MAX_FILE_DEPTH: u32 = 64;

// --- Primitive writers ---

fn put_u8(w: &mut impl Write, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

fn put_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn put_i32(w: &mut impl Write, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn put_f64(w: &mut impl Write, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

// --- Primitive readers ---

fn read_exact<const N: usize>(r: &mut impl Read, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::Parse(format!("truncated file while reading {what}")),
        _ => Error::Io(e),
    })?;
    Ok(buf)
}

fn get_u8(r: &mut impl Read, what: &str) -> Result<u8> {
    Ok(read_exact::<1>(r, what)?[0])
}

fn get_u32(r: &mut impl Read, what: &str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_exact(r, what)?))
}

fn get_i32(r: &mut impl Read, what: &str) -> Result<i32> {
    Ok(i32::from_le_bytes(read_exact(r, what)?))
}

fn get_f64(r: &mut impl Read, what: &str) -> Result<f64> {
    Ok(f64::from_le_bytes(read_exact(r, what)?))
}

fn get_flag(r: &mut impl Read, what: &str) -> Result<bool> {
    match get_u8(r, what)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Parse(format!("invalid {what} flag: {other}"))),
    }
}

// --- Voxel data ---

fn write_data(w: &mut impl Write, d: &VoxelData) -> Result<()> {
    put_u32(w, d.count)?;
    put_f64(w, d.total_weight)?;
    put_f64(w, d.prob_sum)?;
    put_f64(w, d.prob_sum_sq)?;
    put_f64(w, d.surface_sum)?;
    put_f64(w, d.corner_sum)?;
    put_f64(w, d.planar_sum)?;
    put_i32(w, d.fp_room)?;
    put_u8(w, u8::from(d.is_carved))
}

fn read_data(r: &mut impl Read, version: u32) -> Result<VoxelData> {
    let count = get_u32(r, "sample count")?;
    let total_weight = if version >= 2 {
        get_f64(r, "total weight")?
    } else {
        // every legacy sample had unit weight
        f64::from(count)
    };

    let mut d = VoxelData {
        count,
        total_weight,
        prob_sum: get_f64(r, "probability sum")?,
        prob_sum_sq: get_f64(r, "squared probability sum")?,
        surface_sum: get_f64(r, "surface sum")?,
        corner_sum: get_f64(r, "corner sum")?,
        planar_sum: get_f64(r, "planarity sum")?,
        fp_room: get_i32(r, "room index")?,
        is_carved: false,
    };
    if version >= 3 {
        d.is_carved = get_flag(r, "carved")?;
    }
    Ok(d)
}

// --- Nodes ---

fn write_node(w: &mut impl Write, tree: &Octree, key: NodeKey) -> Result<()> {
    let node = tree.get(key)?;
    put_f64(w, node.center.x)?;
    put_f64(w, node.center.y)?;
    put_f64(w, node.center.z)?;
    put_f64(w, node.halfwidth)?;

    match &node.data {
        Some(d) => {
            put_u8(w, 1)?;
            write_data(w, d)?;
        }
        None => put_u8(w, 0)?,
    }

    for child in node.children {
        match child {
            Some(child) => {
                put_u8(w, 1)?;
                write_node(w, tree, child)?;
            }
            None => put_u8(w, 0)?,
        }
    }
    Ok(())
}

/// Nodes may sit at most `depth_left` levels below this one.
fn read_node(
    r: &mut impl Read,
    version: u32,
    nodes: &mut SlotMap<NodeKey, OctNode>,
    parent: Option<NodeKey>,
    depth_left: u32,
) -> Result<NodeKey> {
    let x = get_f64(r, "node center")?;
    let y = get_f64(r, "node center")?;
    let z = get_f64(r, "node center")?;
    let halfwidth = get_f64(r, "node halfwidth")?;
    if !(halfwidth.is_finite() && halfwidth > 0.0) {
        return Err(Error::Parse(format!("invalid node halfwidth {halfwidth}")));
    }

    let mut node = OctNode::new(Point3::new(x, y, z), halfwidth);
    node.parent = parent;
    if get_flag(r, "node data")? {
        node.data = Some(read_data(r, version)?);
    }
    let key = nodes.insert(node);

    for i in 0..CHILDREN_PER_NODE {
        if get_flag(r, "child")? {
            let Some(below) = depth_left.checked_sub(1) else {
                return Err(Error::Parse("node nested deeper than the declared max depth".into()));
            };
            let child = read_node(r, version, nodes, Some(key), below)?;
            nodes[key].children[i] = Some(child);
        }
    }
    Ok(key)
}

impl Octree {
    /// Writes the tree in the current file format.
    pub fn serialize(&self, w: &mut impl Write) -> Result<()> {
        let max_depth = i32::try_from(self.max_depth)
            .map_err(|_| Error::Invariant(format!("max depth {} too large to store", self.max_depth)))?;
        let count = u32::try_from(self.num_nodes())
            .map_err(|_| Error::Invariant(format!("{} nodes too many to store", self.num_nodes())))?;

        w.write_all(OCTFILE_MAGIC)?;
        put_u32(w, CURRENT_VERSION)?;
        put_f64(w, self.resolution())?;
        put_i32(w, max_depth)?;
        put_u32(w, count)?;
        write_node(w, self, self.root)
    }

    /// Reads a tree written by any supported version.
    pub fn parse(r: &mut impl Read) -> Result<Octree> {
        let magic: [u8; 8] = read_exact(r, "magic number")?;
        if &magic != OCTFILE_MAGIC {
            return Err(Error::BadMagic);
        }

        let version = get_u32(r, "version")?;
        if !(OLDEST_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let stored_resolution = if version >= 3 {
            Some(get_f64(r, "resolution")?)
        } else {
            None
        };
        let max_depth = get_i32(r, "max depth")?;
        let max_depth = u32::try_from(max_depth)
            .map_err(|_| Error::Parse(format!("negative max depth {max_depth}")))?;
        if max_depth > MAX_FILE_DEPTH {
            return Err(Error::Parse(format!(
                "max depth {max_depth} exceeds the supported {MAX_FILE_DEPTH}"
            )));
        }
        let count = get_u32(r, "node count")?;

        let mut nodes = SlotMap::with_capacity_and_key((count as usize).min(1 << 20));
        let root = read_node(r, version, &mut nodes, None, max_depth)?;
        if nodes.len() != count as usize {
            return Err(Error::Parse(format!(
                "header declares {count} nodes but {} were read",
                nodes.len()
            )));
        }

        let tree = Octree::from_parts(nodes, root, max_depth);
        if let Some(res) = stored_resolution {
            let derived = tree.resolution();
            if (res - derived).abs() > 1e-9 * res.abs().max(1.0) {
                return Err(Error::Parse(format!(
                    "stored resolution {res} disagrees with tree geometry ({derived})"
                )));
            }
        }

        tracing::debug!(version, max_depth, nodes = count, "parsed octree");
        Ok(tree)
    }

    /// Writes the tree to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.serialize(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Reads a tree from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Octree> {
        let mut r = BufReader::new(File::open(path)?);
        Octree::parse(&mut r)
    }
}
