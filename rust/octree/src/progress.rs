// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Optional progress reporting for long-running stages.

/// Receives coarse progress updates. Implementations must not assume any
/// particular call frequency.
pub trait ProgressSink {
    /// A new named stage has started.
    fn stage(&mut self, name: &str);

    /// `done` of `total` work items of the current stage are complete.
    fn progress(&mut self, done: usize, total: usize);
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn stage(&mut self, _name: &str) {}

    fn progress(&mut self, _done: usize, _total: usize) {}
}
