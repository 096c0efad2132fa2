//! Sparse matrix with deferred insert/delete batching.
//!
//! ```text
//!   effective = (m - dm) + dp
//!
//!   get:    dp hit -> value, dm hit -> absent, else m
//!   set:    drop from dm, record in dp (unless m already holds the value)
//!   remove: drop from dp, record in dm when m holds the entry
//!   wait:   merge dm then dp into m once past the threshold, or always when forced
//! ```
//!
//! `dp` and `dm` are disjoint at all times, and only [`DeltaMatrix::wait`] writes
//! the committed form `m`.

use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::iter::Peekable;

use crate::errors::{GraphError, GraphResult};

use super::sparse::{Coord, RowEntries, SparseMatrix};

#[derive(Clone, Debug)]
pub struct DeltaMatrix {
    m: SparseMatrix,
    delta_plus: BTreeMap<Coord, u64>,
    delta_minus: BTreeSet<Coord>,
    transposed: Option<Box<DeltaMatrix>>,
    dirty: bool,
    max_pending_changes: u64,
}

impl DeltaMatrix {
    pub fn new(nrows: u64, ncols: u64, max_pending_changes: u64, maintain_transpose: bool) -> Self {
        let transposed = maintain_transpose
            .then(|| Box::new(DeltaMatrix::new(ncols, nrows, max_pending_changes, false)));
        Self {
            m: SparseMatrix::new(nrows, ncols),
            delta_plus: BTreeMap::new(),
            delta_minus: BTreeSet::new(),
            transposed,
            dirty: false,
            max_pending_changes,
        }
    }

    pub fn nrows(&self) -> u64 {
        self.m.nrows()
    }

    pub fn ncols(&self) -> u64 {
        self.m.ncols()
    }

    /// Effective number of entries.
    pub fn nvals(&self) -> usize {
        let overrides = self
            .delta_plus
            .keys()
            .filter(|&&(r, c)| self.m.get(r, c).is_some())
            .count();
        self.m.nvals() - self.delta_minus.len() + self.delta_plus.len() - overrides
    }

    pub fn transposed(&self) -> Option<&DeltaMatrix> {
        self.transposed.as_deref()
    }

    /// The committed form, ignoring pending buffers.
    pub fn committed(&self) -> &SparseMatrix {
        &self.m
    }

    pub fn set(&mut self, row: u64, col: u64, value: u64) -> GraphResult<()> {
        self.check_bounds(row, col)?;
        if let Some(t) = self.transposed.as_mut() {
            t.set(col, row, value)?;
        }
        let key = (row, col);
        self.delta_minus.remove(&key);
        if self.m.get(row, col) == Some(value) {
            self.delta_plus.remove(&key);
        } else {
            self.delta_plus.insert(key, value);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn set_bool(&mut self, row: u64, col: u64) -> GraphResult<()> {
        self.set(row, col, 1)
    }

    pub fn remove(&mut self, row: u64, col: u64) -> GraphResult<()> {
        self.check_bounds(row, col)?;
        if let Some(t) = self.transposed.as_mut() {
            t.remove(col, row)?;
        }
        let key = (row, col);
        self.delta_plus.remove(&key);
        if self.m.get(row, col).is_some() {
            self.delta_minus.insert(key);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn get(&self, row: u64, col: u64) -> Option<u64> {
        if let Some(&value) = self.delta_plus.get(&(row, col)) {
            Some(value)
        } else if self.delta_minus.contains(&(row, col)) {
            None
        } else {
            self.m.get(row, col)
        }
    }

    pub fn contains(&self, row: u64, col: u64) -> bool {
        self.get(row, col).is_some()
    }

    /// Effective `(col, value)` entries of `row`, merged lazily in column order.
    pub fn row(&self, row: u64) -> DeltaRow<'_> {
        DeltaRow {
            row,
            committed: self.m.row(row).peekable(),
            pending: self.delta_plus.range((row, 0)..=(row, u64::MAX)).peekable(),
            deleted: &self.delta_minus,
        }
    }

    /// Grow to at least `nrows` x `ncols`. Existing and pending entries keep
    /// their coordinates.
    pub fn resize(&mut self, nrows: u64, ncols: u64) {
        if let Some(t) = self.transposed.as_mut() {
            t.resize(ncols, nrows);
        }
        self.m.resize(nrows, ncols);
    }

    /// True when either pending buffer holds entries.
    pub fn pending(&self) -> bool {
        !self.delta_plus.is_empty()
            || !self.delta_minus.is_empty()
            || self.transposed.as_ref().is_some_and(|t| t.pending())
    }

    /// True when the matrix was written since the last [`DeltaMatrix::wait`].
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn pending_changes(&self) -> usize {
        self.delta_plus.len() + self.delta_minus.len()
    }

    /// Merge pending buffers into the committed form. Without `force`, each
    /// buffer is merged only once it exceeds the pending-changes threshold.
    pub fn wait(&mut self, force: bool) {
        if let Some(t) = self.transposed.as_mut() {
            t.wait(force);
        }
        let threshold = self.max_pending_changes as usize;
        let empty_set = BTreeSet::new();
        let empty_map = BTreeMap::new();

        if !self.delta_minus.is_empty() && (force || self.delta_minus.len() > threshold) {
            self.m = self.m.apply_pending(&self.delta_minus, &empty_map);
            self.delta_minus.clear();
        }
        if !self.delta_plus.is_empty() && (force || self.delta_plus.len() > threshold) {
            self.m = self.m.apply_pending(&empty_set, &self.delta_plus);
            self.delta_plus.clear();
        }
        self.dirty = false;
    }

    /// Grow when needed and run a threshold flush when dirty.
    pub fn synchronize(&mut self, nrows: u64, ncols: u64) {
        if self.nrows() < nrows || self.ncols() < ncols {
            self.resize(nrows, ncols);
        }
        if self.dirty {
            self.wait(false);
        }
    }

    /// Effective form as a standalone committed matrix. Does not modify `self`.
    pub fn export(&self) -> SparseMatrix {
        if self.delta_plus.is_empty() && self.delta_minus.is_empty() {
            return self.m.clone();
        }
        self.m.apply_pending(&self.delta_minus, &self.delta_plus)
    }

    /// Drop every entry, keeping dimensions.
    pub fn clear(&mut self) {
        if let Some(t) = self.transposed.as_mut() {
            t.clear();
        }
        self.m = SparseMatrix::new(self.nrows(), self.ncols());
        self.delta_plus.clear();
        self.delta_minus.clear();
        self.dirty = false;
    }

    /// Boolean product of two fully synchronized matrices.
    pub fn mxm(&self, other: &DeltaMatrix) -> GraphResult<SparseMatrix> {
        if self.pending() || other.pending() {
            return Err(GraphError::invalid_input(
                "matrix product requires synchronized operands",
            ));
        }
        self.m.mxm(&other.m)
    }

    fn check_bounds(&self, row: u64, col: u64) -> GraphResult<()> {
        if row >= self.nrows() {
            return Err(GraphError::out_of_range(row, self.nrows()));
        }
        if col >= self.ncols() {
            return Err(GraphError::out_of_range(col, self.ncols()));
        }
        Ok(())
    }
}

/// Lazy, restartable view over one effective row.
#[derive(Clone)]
pub struct DeltaRow<'a> {
    row: u64,
    committed: Peekable<RowEntries<'a>>,
    pending: Peekable<btree_map::Range<'a, Coord, u64>>,
    deleted: &'a BTreeSet<Coord>,
}

impl Iterator for DeltaRow<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let committed_col = self.committed.peek().map(|&(col, _)| col);
            let pending_col = self.pending.peek().map(|&(&(_, col), _)| col);
            let take_pending = match (committed_col, pending_col) {
                (None, None) => return None,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (Some(c), Some(p)) => p <= c,
            };
            if take_pending {
                if committed_col == pending_col {
                    self.committed.next();
                }
                return self.pending.next().map(|(&(_, col), &value)| (col, value));
            }
            let (col, value) = self.committed.next()?;
            if !self.deleted.contains(&(self.row, col)) {
                return Some((col, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn set_then_get_before_and_after_wait() {
        let mut m = DeltaMatrix::new(8, 8, 10000, false);
        m.set_bool(1, 2).unwrap();
        assert!(m.contains(1, 2));
        assert!(m.pending());
        assert_eq!(m.committed().nvals(), 0);

        m.wait(true);
        assert!(!m.pending());
        assert_eq!(m.committed().get(1, 2), Some(1));
        assert!(m.contains(1, 2));
    }

    #[test]
    fn removing_committed_entry_masks_it() {
        let mut m = DeltaMatrix::new(8, 8, 10000, false);
        m.set_bool(0, 0).unwrap();
        m.wait(true);
        m.remove(0, 0).unwrap();
        assert!(!m.contains(0, 0));
        assert_eq!(m.committed().get(0, 0), Some(1));
        assert_eq!(m.nvals(), 0);

        m.set_bool(0, 0).unwrap();
        assert!(m.contains(0, 0));
        assert_eq!(m.pending_changes(), 0);
    }

    #[test]
    fn removing_pending_addition_leaves_nothing_pending() {
        let mut m = DeltaMatrix::new(8, 8, 10000, false);
        m.set_bool(3, 4).unwrap();
        m.remove(3, 4).unwrap();
        assert!(!m.pending());
        assert_eq!(m.nvals(), 0);
    }

    #[test]
    fn value_update_of_committed_entry_overrides() {
        let mut m = DeltaMatrix::new(4, 4, 10000, false);
        m.set(1, 1, 1).unwrap();
        m.wait(true);
        m.set(1, 1, 2).unwrap();
        assert_eq!(m.get(1, 1), Some(2));
        assert_eq!(m.nvals(), 1);
        m.wait(true);
        assert_eq!(m.committed().get(1, 1), Some(2));
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mut m = DeltaMatrix::new(2, 2, 10000, false);
        assert!(matches!(m.set_bool(2, 0), Err(GraphError::OutOfRange { id: 2, limit: 2 })));
        m.resize(3, 3);
        assert!(m.set_bool(2, 0).is_ok());
    }

    #[test]
    fn threshold_flush_only_merges_large_buffers() {
        let mut m = DeltaMatrix::new(16, 16, 2, false);
        m.set_bool(0, 0).unwrap();
        m.set_bool(0, 1).unwrap();
        m.wait(false);
        assert_eq!(m.pending_changes(), 2);
        m.set_bool(0, 2).unwrap();
        m.wait(false);
        assert_eq!(m.pending_changes(), 0);
        assert_eq!(m.committed().nvals(), 3);
    }

    #[test]
    fn transpose_mirrors_writes() {
        let mut m = DeltaMatrix::new(4, 6, 10000, true);
        m.set_bool(1, 5).unwrap();
        m.set_bool(2, 5).unwrap();
        m.remove(1, 5).unwrap();
        let t = m.transposed().expect("transpose");
        assert_eq!(t.row(5).map(|(c, _)| c).collect::<Vec<_>>(), vec![2]);
        m.wait(true);
        let t = m.transposed().expect("transpose");
        assert!(!t.pending());
        assert_eq!(t.export(), m.export().transpose());
    }

    #[test]
    fn row_merges_committed_and_pending() {
        let mut m = DeltaMatrix::new(4, 8, 10000, false);
        for col in [1, 3, 5] {
            m.set_bool(0, col).unwrap();
        }
        m.wait(true);
        m.remove(0, 3).unwrap();
        m.set_bool(0, 4).unwrap();
        m.set(0, 5, 7).unwrap();
        m.set_bool(1, 0).unwrap();

        let row: Vec<_> = m.row(0).collect();
        assert_eq!(row, vec![(1, 1), (4, 1), (5, 7)]);

        let restart = m.row(0);
        assert_eq!(restart.clone().count(), 3);
        assert_eq!(restart.count(), 3);
    }

    #[test]
    fn export_matches_effective_view_without_flushing() {
        let mut m = DeltaMatrix::new(4, 4, 10000, false);
        m.set_bool(0, 1).unwrap();
        m.wait(true);
        m.remove(0, 1).unwrap();
        m.set_bool(2, 2).unwrap();
        let exported = m.export();
        assert!(m.pending());
        assert_eq!(exported.iter().collect::<Vec<_>>(), vec![(2, 2, 1)]);
    }

    #[test]
    fn wait_is_idempotent() {
        let mut m = DeltaMatrix::new(8, 8, 10000, false);
        m.set_bool(1, 1).unwrap();
        m.set_bool(2, 3).unwrap();
        m.wait(true);
        let first = m.committed().clone();
        m.wait(true);
        assert_eq!(m.committed(), &first);
    }

    #[test]
    fn masking_holds_under_random_operations() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut m = DeltaMatrix::new(16, 16, 8, true);
        let mut model: BTreeMap<Coord, u64> = BTreeMap::new();

        for step in 0..2000 {
            let (r, c) = (rng.gen_range(0..16), rng.gen_range(0..16));
            if rng.gen_bool(0.6) {
                let v = rng.gen_range(1..4);
                m.set(r, c, v).unwrap();
                model.insert((r, c), v);
            } else {
                m.remove(r, c).unwrap();
                model.remove(&(r, c));
            }
            match step % 97 {
                0 => m.wait(true),
                13 => m.wait(false),
                _ => {}
            }
            assert_eq!(m.get(r, c), model.get(&(r, c)).copied());
        }
        for r in 0..16 {
            let expected: Vec<_> = model
                .range((r, 0)..=(r, u64::MAX))
                .map(|(&(_, c), &v)| (c, v))
                .collect();
            assert_eq!(m.row(r).collect::<Vec<_>>(), expected);
        }
        assert_eq!(m.nvals(), model.len());
    }
}
