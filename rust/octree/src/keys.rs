// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node keys for arena-based storage.
//!
//! Every octree node gets a type-safe key created by `slotmap::SlotMap`.
//! Keys stay valid while other nodes are inserted or removed, so the
//! topology, boundary and region structures can use them as identities
//! for the whole lifetime of a pipeline run.

use slotmap::new_key_type;

new_key_type! {
    /// Key for a node (leaf or internal) of an [`Octree`](crate::Octree).
    pub struct NodeKey;
}
