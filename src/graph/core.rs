//! Core Graph struct: block stores, matrices and synchronization.

use crate::{
    block_store::BlockStore,
    config::GraphConfig,
    errors::{GraphError, GraphResult},
    matrix::{DeltaMatrix, RelationExport, RelationMatrices, SparseMatrix, SyncPolicy},
};

use super::types::{EdgeRecord, GraphStatistics, LabelId, NodeRecord, RelationId};

/// Graph topology over deferred-update sparse matrices.
///
/// Node and edge records live in [`BlockStore`]s whose slot indices double as
/// matrix coordinates. The graph owns:
///
/// - one adjacency matrix (any relation type), with its transpose
/// - one diagonal matrix per label plus a combined node-by-label matrix
/// - one [`RelationMatrices`] triple per relation type
///
/// Shared access goes through [`SharedGraph`](super::SharedGraph); any holder of
/// `&mut Graph` is the single writer and is the only one allowed to synchronize.
#[derive(Clone, Debug)]
pub struct Graph {
    pub(crate) nodes: BlockStore<NodeRecord>,
    pub(crate) edges: BlockStore<EdgeRecord>,
    pub(crate) adjacency: DeltaMatrix,
    pub(crate) labels: Vec<DeltaMatrix>,
    pub(crate) node_labels: DeltaMatrix,
    pub(crate) relations: Vec<RelationMatrices>,
    pub(crate) reserved_node_count: usize,
    pub(crate) policy: SyncPolicy,
    pub(crate) stats: GraphStatistics,
    pub(crate) max_pending_changes: u64,
}

/// Effective forms of every matrix, used to compare graph states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphExport {
    pub adjacency: SparseMatrix,
    pub node_labels: SparseMatrix,
    pub labels: Vec<SparseMatrix>,
    pub relations: Vec<RelationExport>,
}

impl Graph {
    pub fn new(node_capacity: u64, edge_capacity: u64, max_pending_changes: u64) -> Self {
        let nodes = BlockStore::with_capacity(node_capacity);
        let edges = BlockStore::with_capacity(edge_capacity);
        let n = nodes.capacity();
        Self {
            adjacency: DeltaMatrix::new(n, n, max_pending_changes, true),
            labels: Vec::new(),
            node_labels: DeltaMatrix::new(n, 1, max_pending_changes, false),
            relations: Vec::new(),
            nodes,
            edges,
            reserved_node_count: 0,
            policy: SyncPolicy::FlushResize,
            stats: GraphStatistics::default(),
            max_pending_changes,
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(
            config.node_capacity,
            config.edge_capacity,
            config.delta_max_pending_changes,
        )
    }

    /// Dimension every node-indexed matrix must have.
    pub fn required_matrix_dim(&self) -> u64 {
        self.nodes.capacity()
    }

    pub(crate) fn edge_dim(&self) -> u64 {
        self.edges.capacity()
    }

    pub fn matrix_policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Install `policy`, returning the previous one.
    pub fn set_matrix_policy(&mut self, policy: SyncPolicy) -> SyncPolicy {
        std::mem::replace(&mut self.policy, policy)
    }

    /// Apply the current policy to every matrix. Called before an operation
    /// that needs a consistent committed view.
    pub fn synchronize_matrices(&mut self) {
        let strategy = self.policy.strategy();
        let n = self.required_matrix_dim();
        let e = self.edge_dim();
        let label_cols = self.label_dim();
        strategy.synchronize(&mut self.adjacency, n, n);
        strategy.synchronize(&mut self.node_labels, n, label_cols);
        for label in &mut self.labels {
            strategy.synchronize(label, n, n);
        }
        for relation in &mut self.relations {
            relation.synchronize(strategy, n, e);
        }
    }

    /// Merge pending changes of every matrix. Without `force` only buffers past
    /// the pending-changes threshold are merged.
    pub fn apply_all_pending(&mut self, force: bool) {
        self.ensure_capacity();
        self.adjacency.wait(force);
        self.node_labels.wait(force);
        for label in &mut self.labels {
            label.wait(force);
        }
        for relation in &mut self.relations {
            relation.wait(force);
        }
        tracing::debug!(force, "applied pending matrix changes");
    }

    pub fn pending(&self) -> bool {
        self.adjacency.pending()
            || self.node_labels.pending()
            || self.labels.iter().any(DeltaMatrix::pending)
            || self.relations.iter().any(RelationMatrices::pending)
    }

    /// Grow matrices whose dimensions fell behind the block stores.
    pub(crate) fn ensure_capacity(&mut self) {
        let n = self.required_matrix_dim();
        let e = self.edge_dim();
        let label_cols = self.label_dim();
        if self.adjacency.nrows() < n {
            self.adjacency.resize(n, n);
            for label in &mut self.labels {
                label.resize(n, n);
            }
        }
        if self.node_labels.nrows() < n || self.node_labels.ncols() < label_cols {
            self.node_labels.resize(n, label_cols);
        }
        let resize = SyncPolicy::Resize.strategy();
        for relation in &mut self.relations {
            if relation.r().nrows() < n || relation.s().nrows() < e {
                relation.synchronize(resize, n, e);
            }
        }
    }

    /// Pad both stores to the given high-water marks and install the free
    /// lists recorded in a snapshot.
    pub(crate) fn restore_tombstones(
        &mut self,
        node_high_water_mark: u64,
        edge_high_water_mark: u64,
        deleted_nodes: Vec<u64>,
        deleted_edges: Vec<u64>,
    ) -> GraphResult<()> {
        self.nodes.pad_to(node_high_water_mark);
        self.edges.pad_to(edge_high_water_mark);
        self.nodes.rebuild_free_list(deleted_nodes)?;
        self.edges.rebuild_free_list(deleted_edges)?;
        self.ensure_capacity();
        Ok(())
    }

    fn label_dim(&self) -> u64 {
        (self.labels.len() as u64).max(1)
    }

    pub fn adjacency_matrix(&self) -> &DeltaMatrix {
        &self.adjacency
    }

    pub fn node_label_matrix(&self) -> &DeltaMatrix {
        &self.node_labels
    }

    pub fn label_matrix(&self, label: LabelId) -> GraphResult<&DeltaMatrix> {
        self.labels
            .get(label as usize)
            .ok_or_else(|| GraphError::not_found(format!("label {label}")))
    }

    pub fn relation(&self, relation: RelationId) -> GraphResult<&RelationMatrices> {
        self.relations
            .get(relation as usize)
            .ok_or_else(|| GraphError::not_found(format!("relation type {relation}")))
    }

    pub(crate) fn relation_mut(&mut self, relation: RelationId) -> GraphResult<&mut RelationMatrices> {
        self.relations
            .get_mut(relation as usize)
            .ok_or_else(|| GraphError::not_found(format!("relation type {relation}")))
    }

    pub(crate) fn label_matrix_mut(&mut self, label: LabelId) -> GraphResult<&mut DeltaMatrix> {
        self.labels
            .get_mut(label as usize)
            .ok_or_else(|| GraphError::not_found(format!("label {label}")))
    }

    pub fn node_store(&self) -> &BlockStore<NodeRecord> {
        &self.nodes
    }

    pub fn edge_store(&self) -> &BlockStore<EdgeRecord> {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn deleted_node_count(&self) -> usize {
        self.nodes.deleted_count()
    }

    pub fn deleted_edge_count(&self) -> usize {
        self.edges.deleted_count()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn relation_type_count(&self) -> usize {
        self.relations.len()
    }

    pub fn labeled_node_count(&self, label: LabelId) -> u64 {
        self.stats.node_count.get(label as usize).copied().unwrap_or(0)
    }

    pub fn relation_edge_count(&self, relation: RelationId) -> u64 {
        self.stats.edge_count.get(relation as usize).copied().unwrap_or(0)
    }

    pub fn statistics(&self) -> &GraphStatistics {
        &self.stats
    }

    pub fn export(&self) -> GraphExport {
        GraphExport {
            adjacency: self.adjacency.export(),
            node_labels: self.node_labels.export(),
            labels: self.labels.iter().map(DeltaMatrix::export).collect(),
            relations: self.relations.iter().map(RelationMatrices::export).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_graph_is_empty_and_sized_by_capacity() {
        let graph = Graph::new(64, 32, 10000);
        assert_eq!(graph.required_matrix_dim(), 64);
        assert_eq!(graph.adjacency_matrix().nrows(), 64);
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.pending());
        assert_eq!(graph.matrix_policy(), SyncPolicy::FlushResize);
    }

    #[test]
    fn set_matrix_policy_returns_previous() {
        let mut graph = Graph::new(4, 4, 10000);
        assert_eq!(graph.set_matrix_policy(SyncPolicy::Nop), SyncPolicy::FlushResize);
        assert_eq!(graph.set_matrix_policy(SyncPolicy::Resize), SyncPolicy::Nop);
    }

    #[test]
    fn matrices_grow_with_node_store() {
        let mut graph = Graph::new(2, 2, 10000);
        let label = graph.add_label();
        for _ in 0..5 {
            graph.create_node(&[label]).expect("node");
        }
        let n = graph.required_matrix_dim();
        assert!(n >= 5);
        assert!(graph.adjacency_matrix().nrows() >= n);
        assert!(graph.label_matrix(label).unwrap().nrows() >= n);
        assert_eq!(graph.labeled_node_count(label), 5);
    }
}
