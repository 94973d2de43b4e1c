// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for octree operations.

use crate::keys::NodeKey;

/// Result type alias for octree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, querying or persisting an octree.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying file or stream failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not start with the octree magic number.
    #[error("not an octree file (bad magic number)")]
    BadMagic,

    /// The file declares a format version this reader does not understand.
    #[error("unsupported octree file version: {0}")]
    UnsupportedVersion(u32),

    /// Malformed or truncated octree file contents.
    #[error("parse error: {0}")]
    Parse(String),

    /// The tree resolution must be finite and strictly positive.
    #[error("invalid resolution: {0}")]
    InvalidResolution(f64),

    /// A point with NaN or infinite coordinates cannot be placed in the tree.
    #[error("point is not finite: ({0}, {1}, {2})")]
    NonFinitePoint(f64, f64, f64),

    /// Shape parameters that describe no volume.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A node key was not present in the arena.
    #[error("octree node not found: {0:?}")]
    NodeNotFound(NodeKey),

    /// A structural invariant (tree shape, topology symmetry) was violated.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
