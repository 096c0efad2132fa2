//! Per-relation-type matrix triple.
//!
//! * `R[src, dst]` counts the edges of this type from `src` to `dst`.
//! * `S[edge, src]` and `T[edge, dst]` map each edge to its endpoints.
//!
//! All three maintain transposes, so the edges leaving or entering a node are
//! one row lookup away. The count in `R` decides when the pair entry is
//! cleared: only when the last parallel edge is removed.

use crate::errors::GraphResult;

use super::delta::DeltaMatrix;
use super::sparse::SparseMatrix;
use super::sync::SyncStrategy;

#[derive(Clone, Debug)]
pub struct RelationMatrices {
    r: DeltaMatrix,
    s: DeltaMatrix,
    t: DeltaMatrix,
}

/// Effective forms of a relation's matrices, used for snapshot comparisons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationExport {
    pub r: SparseMatrix,
    pub s: SparseMatrix,
    pub t: SparseMatrix,
}

impl RelationMatrices {
    pub fn new(node_dim: u64, edge_dim: u64, max_pending_changes: u64) -> Self {
        Self {
            r: DeltaMatrix::new(node_dim, node_dim, max_pending_changes, true),
            s: DeltaMatrix::new(edge_dim, node_dim, max_pending_changes, true),
            t: DeltaMatrix::new(edge_dim, node_dim, max_pending_changes, true),
        }
    }

    pub fn r(&self) -> &DeltaMatrix {
        &self.r
    }

    pub fn s(&self) -> &DeltaMatrix {
        &self.s
    }

    pub fn t(&self) -> &DeltaMatrix {
        &self.t
    }

    /// Number of parallel edges of this type from `src` to `dst`.
    pub fn edge_count(&self, src: u64, dst: u64) -> u64 {
        self.r.get(src, dst).unwrap_or(0)
    }

    pub fn add_edge(&mut self, src: u64, dst: u64, edge: u64) -> GraphResult<()> {
        let count = self.edge_count(src, dst);
        self.r.set(src, dst, count + 1)?;
        self.s.set_bool(edge, src)?;
        self.t.set_bool(edge, dst)?;
        Ok(())
    }

    /// Remove `edge`; returns `true` when no edge of this type still connects
    /// the pair.
    pub fn remove_edge(&mut self, src: u64, dst: u64, edge: u64) -> GraphResult<bool> {
        self.s.remove(edge, src)?;
        self.t.remove(edge, dst)?;
        match self.edge_count(src, dst) {
            0 | 1 => {
                self.r.remove(src, dst)?;
                Ok(true)
            }
            count => {
                self.r.set(src, dst, count - 1)?;
                Ok(false)
            }
        }
    }

    /// Edges of this type leaving `node`, in ID order.
    pub fn outgoing_edges(&self, node: u64) -> impl Iterator<Item = u64> + Clone + '_ {
        self.s
            .transposed()
            .into_iter()
            .flat_map(move |by_node| by_node.row(node))
            .map(|(edge, _)| edge)
    }

    /// Edges of this type entering `node`, in ID order.
    pub fn incoming_edges(&self, node: u64) -> impl Iterator<Item = u64> + Clone + '_ {
        self.t
            .transposed()
            .into_iter()
            .flat_map(move |by_node| by_node.row(node))
            .map(|(edge, _)| edge)
    }

    /// Edges of this type from `src` to `dst`, in ID order.
    pub fn edges_between(&self, src: u64, dst: u64) -> impl Iterator<Item = u64> + '_ {
        self.outgoing_edges(src)
            .filter(move |&edge| self.t.contains(edge, dst))
    }

    pub fn synchronize(&mut self, strategy: &dyn SyncStrategy, node_dim: u64, edge_dim: u64) {
        strategy.synchronize(&mut self.r, node_dim, node_dim);
        strategy.synchronize(&mut self.s, edge_dim, node_dim);
        strategy.synchronize(&mut self.t, edge_dim, node_dim);
    }

    pub fn wait(&mut self, force: bool) {
        self.r.wait(force);
        self.s.wait(force);
        self.t.wait(force);
    }

    pub fn pending(&self) -> bool {
        self.r.pending() || self.s.pending() || self.t.pending()
    }

    /// Number of live edges of this type.
    pub fn nvals(&self) -> usize {
        self.s.nvals()
    }

    pub fn export(&self) -> RelationExport {
        RelationExport {
            r: self.r.export(),
            s: self.s.export(),
            t: self.t.export(),
        }
    }
}
