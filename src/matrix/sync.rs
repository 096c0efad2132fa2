use std::fmt;

use serde::{Deserialize, Serialize};

use super::delta::DeltaMatrix;

/// Governs what the graph does to a matrix before handing it out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Leave the matrix untouched.
    Nop,
    /// Grow dimensions; pending buffers are carried over as-is.
    Resize,
    /// Grow dimensions and run a threshold flush of pending buffers.
    #[default]
    FlushResize,
}

impl SyncPolicy {
    pub fn strategy(self) -> &'static dyn SyncStrategy {
        match self {
            SyncPolicy::Nop => &NopSync,
            SyncPolicy::Resize => &ResizeSync,
            SyncPolicy::FlushResize => &FlushResizeSync,
        }
    }
}

/// Synchronization behaviour selected by a [`SyncPolicy`].
pub trait SyncStrategy: Send + Sync + fmt::Debug {
    fn policy(&self) -> SyncPolicy;

    /// Bring `matrix` to at least `nrows` x `ncols` according to the policy.
    fn synchronize(&self, matrix: &mut DeltaMatrix, nrows: u64, ncols: u64);
}

#[derive(Debug)]
struct NopSync;

#[derive(Debug)]
struct ResizeSync;

#[derive(Debug)]
struct FlushResizeSync;

impl SyncStrategy for NopSync {
    fn policy(&self) -> SyncPolicy {
        SyncPolicy::Nop
    }

    fn synchronize(&self, _matrix: &mut DeltaMatrix, _nrows: u64, _ncols: u64) {}
}

impl SyncStrategy for ResizeSync {
    fn policy(&self) -> SyncPolicy {
        SyncPolicy::Resize
    }

    fn synchronize(&self, matrix: &mut DeltaMatrix, nrows: u64, ncols: u64) {
        matrix.resize(nrows, ncols);
    }
}

impl SyncStrategy for FlushResizeSync {
    fn policy(&self) -> SyncPolicy {
        SyncPolicy::FlushResize
    }

    fn synchronize(&self, matrix: &mut DeltaMatrix, nrows: u64, ncols: u64) {
        matrix.synchronize(nrows, ncols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_report_their_policy() {
        for policy in [SyncPolicy::Nop, SyncPolicy::Resize, SyncPolicy::FlushResize] {
            assert_eq!(policy.strategy().policy(), policy);
        }
    }

    #[test]
    fn nop_leaves_dimensions_alone() {
        let mut m = DeltaMatrix::new(2, 2, 0, false);
        SyncPolicy::Nop.strategy().synchronize(&mut m, 8, 8);
        assert_eq!((m.nrows(), m.ncols()), (2, 2));
    }

    #[test]
    fn resize_keeps_pending_entries() {
        let mut m = DeltaMatrix::new(2, 2, 0, false);
        m.set_bool(1, 1).unwrap();
        SyncPolicy::Resize.strategy().synchronize(&mut m, 8, 8);
        assert_eq!((m.nrows(), m.ncols()), (8, 8));
        assert!(m.pending());
        assert!(m.contains(1, 1));
    }

    #[test]
    fn flush_resize_merges_past_threshold() {
        let mut m = DeltaMatrix::new(2, 2, 0, false);
        m.set_bool(1, 1).unwrap();
        SyncPolicy::FlushResize.strategy().synchronize(&mut m, 4, 4);
        assert_eq!((m.nrows(), m.ncols()), (4, 4));
        assert!(!m.pending());
        assert_eq!(m.committed().get(1, 1), Some(1));
    }
}
