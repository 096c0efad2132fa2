//! Compressed sparse row storage for the committed form of a delta matrix.
//!
//! Rows past the last non-empty row are not materialized, so growing the row
//! dimension is O(1). The layout is canonical: two matrices with the same
//! dimensions and entries compare equal.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{GraphError, GraphResult};

pub type Coord = (u64, u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseMatrix {
    nrows: u64,
    ncols: u64,
    row_ptr: Vec<usize>,
    cols: Vec<u64>,
    vals: Vec<u64>,
}

impl SparseMatrix {
    pub fn new(nrows: u64, ncols: u64) -> Self {
        Self {
            nrows,
            ncols,
            row_ptr: vec![0],
            cols: Vec::new(),
            vals: Vec::new(),
        }
    }

    /// Build from entries sorted by `(row, col)` without duplicates.
    pub fn from_sorted_entries<I>(nrows: u64, ncols: u64, entries: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64, u64)>,
    {
        let mut matrix = Self::new(nrows, ncols);
        for (row, col, val) in entries {
            debug_assert!(row < nrows && col < ncols);
            while (matrix.row_ptr.len() as u64) <= row {
                matrix.row_ptr.push(matrix.cols.len());
            }
            matrix.cols.push(col);
            matrix.vals.push(val);
        }
        if !matrix.cols.is_empty() {
            matrix.row_ptr.push(matrix.cols.len());
        }
        matrix
    }

    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    pub fn ncols(&self) -> u64 {
        self.ncols
    }

    pub fn nvals(&self) -> usize {
        self.cols.len()
    }

    pub fn get(&self, row: u64, col: u64) -> Option<u64> {
        let (cols, vals) = self.row_slices(row);
        cols.binary_search(&col).ok().map(|pos| vals[pos])
    }

    pub fn row(&self, row: u64) -> RowEntries<'_> {
        let (cols, vals) = self.row_slices(row);
        RowEntries { cols, vals, pos: 0 }
    }

    /// All entries in `(row, col)` order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, u64)> + '_ {
        self.row_ptr.windows(2).enumerate().flat_map(move |(row, bounds)| {
            (bounds[0]..bounds[1]).map(move |pos| (row as u64, self.cols[pos], self.vals[pos]))
        })
    }

    /// Grow to at least `nrows` x `ncols`; never shrinks.
    pub fn resize(&mut self, nrows: u64, ncols: u64) {
        self.nrows = self.nrows.max(nrows);
        self.ncols = self.ncols.max(ncols);
    }

    /// Merge pending buffers into a new committed form. Additions override
    /// committed values at the same coordinate.
    pub fn apply_pending(
        &self,
        deletions: &BTreeSet<Coord>,
        additions: &BTreeMap<Coord, u64>,
    ) -> SparseMatrix {
        let mut merged = Vec::with_capacity(self.nvals() + additions.len());
        let mut committed = self
            .iter()
            .filter(|(r, c, _)| !deletions.contains(&(*r, *c)))
            .peekable();
        let mut pending = additions.iter().peekable();

        loop {
            let next = match (committed.peek(), pending.peek()) {
                (None, None) => break,
                (Some(_), None) => committed.next(),
                (None, Some(_)) => pending.next().map(|(&(r, c), &v)| (r, c, v)),
                (Some(&(r, c, _)), Some(&(&key, _))) => {
                    if (r, c) < key {
                        committed.next()
                    } else {
                        if (r, c) == key {
                            committed.next();
                        }
                        pending.next().map(|(&(r, c), &v)| (r, c, v))
                    }
                }
            };
            if let Some(entry) = next {
                merged.push(entry);
            }
        }
        Self::from_sorted_entries(self.nrows, self.ncols, merged)
    }

    pub fn transpose(&self) -> SparseMatrix {
        let mut entries: Vec<(u64, u64, u64)> = self.iter().map(|(r, c, v)| (c, r, v)).collect();
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));
        Self::from_sorted_entries(self.ncols, self.nrows, entries)
    }

    /// Boolean product: `out[i, j] = 1` when some `k` has `self[i, k]` and `other[k, j]`.
    pub fn mxm(&self, other: &SparseMatrix) -> GraphResult<SparseMatrix> {
        if self.ncols != other.nrows {
            return Err(GraphError::invalid_input(format!(
                "dimension mismatch: {}x{} * {}x{}",
                self.nrows, self.ncols, other.nrows, other.ncols
            )));
        }
        let mut entries = Vec::new();
        for row in 0..self.materialized_rows() {
            let reached: BTreeSet<u64> = self
                .row(row)
                .flat_map(|(k, _)| other.row(k).map(|(col, _)| col))
                .collect();
            entries.extend(reached.into_iter().map(|col| (row, col, 1)));
        }
        Ok(Self::from_sorted_entries(self.nrows, other.ncols, entries))
    }

    /// Frontier expansion: the sorted set of columns reachable in one step
    /// from any row in `frontier`.
    pub fn vxm(&self, frontier: &[u64]) -> Vec<u64> {
        let reached: BTreeSet<u64> = frontier
            .iter()
            .flat_map(|&row| self.row(row).map(|(col, _)| col))
            .collect();
        reached.into_iter().collect()
    }

    fn materialized_rows(&self) -> u64 {
        (self.row_ptr.len() - 1) as u64
    }

    fn row_slices(&self, row: u64) -> (&[u64], &[u64]) {
        let row = row as usize;
        if row + 1 >= self.row_ptr.len() {
            return (&[], &[]);
        }
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        (&self.cols[start..end], &self.vals[start..end])
    }
}

/// `(col, value)` pairs of one committed row, in column order.
#[derive(Clone, Debug)]
pub struct RowEntries<'a> {
    cols: &'a [u64],
    vals: &'a [u64],
    pos: usize,
}

impl Iterator for RowEntries<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let item = (*self.cols.get(self.pos)?, self.vals[self.pos]);
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cols.len() - self.pos;
        (left, Some(left))
    }
}
