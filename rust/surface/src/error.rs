// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for surface reconstruction
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during surface reconstruction
#[derive(Error, Debug)]
pub enum Error {
    #[error("Octree error: {0}")]
    Octree(#[from] octsurf_octree::Error),

    #[error("Triangulation failed: {0}")]
    Triangulation(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    /// A structural invariant between boundary, regions and mesher was violated.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline stage failed; `stage` names it.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `self` with the name of the pipeline stage that produced it.
    pub fn in_stage(self, stage: &'static str) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }
}
