//! Label and node operations.

use serde_json::Value;

use crate::{
    block_store::Allocation,
    errors::{GraphError, GraphResult},
    matrix::DeltaMatrix,
};

use super::{
    Graph,
    types::{AttributeId, AttributeSet, Direction, LabelId, NodeId, NodeRecord},
};

/// State captured when a node is deleted, enough to restore it.
#[derive(Clone, Debug, PartialEq)]
pub struct DeletedNode {
    pub id: NodeId,
    pub labels: Vec<LabelId>,
    pub record: NodeRecord,
}

impl Graph {
    pub fn add_label(&mut self) -> LabelId {
        let n = self.required_matrix_dim();
        self.labels
            .push(DeltaMatrix::new(n, n, self.max_pending_changes, false));
        self.stats.introduce_label();
        self.ensure_capacity();
        (self.labels.len() - 1) as LabelId
    }

    /// Drop the most recently added label. The label must hold no nodes.
    pub fn remove_label(&mut self, label: LabelId) -> GraphResult<()> {
        if label as usize + 1 != self.labels.len() {
            return Err(GraphError::invalid_input(format!(
                "label {label} is not the most recently added"
            )));
        }
        if self.labels[label as usize].nvals() != 0 {
            return Err(GraphError::invalid_input(format!("label {label} still has nodes")));
        }
        self.labels.pop();
        self.stats.node_count.pop();
        Ok(())
    }

    /// Attach `labels` to a live node. Returns the labels that were not
    /// already present.
    pub fn label_node(&mut self, id: NodeId, labels: &[LabelId]) -> GraphResult<Vec<LabelId>> {
        self.nodes.get(id)?;
        self.check_labels(labels)?;
        self.ensure_capacity();
        let mut added = Vec::with_capacity(labels.len());
        for &label in labels {
            if self.has_label(id, label) || added.contains(&label) {
                continue;
            }
            self.node_labels.set_bool(id, label as u64)?;
            self.label_matrix_mut(label)?.set_bool(id, id)?;
            self.stats.increment_node_count(label, 1);
            added.push(label);
        }
        Ok(added)
    }

    /// Detach `labels` from a live node. Returns the labels that were present.
    pub fn remove_node_labels(&mut self, id: NodeId, labels: &[LabelId]) -> GraphResult<Vec<LabelId>> {
        self.nodes.get(id)?;
        self.check_labels(labels)?;
        let mut removed = Vec::with_capacity(labels.len());
        for &label in labels {
            if !self.has_label(id, label) {
                continue;
            }
            self.node_labels.remove(id, label as u64)?;
            self.label_matrix_mut(label)?.remove(id, id)?;
            self.stats.decrement_node_count(label, 1);
            removed.push(label);
        }
        Ok(removed)
    }

    pub fn has_label(&self, id: NodeId, label: LabelId) -> bool {
        self.node_labels.contains(id, label as u64)
    }

    pub fn node_labels(&self, id: NodeId) -> GraphResult<Vec<LabelId>> {
        self.nodes.get(id)?;
        Ok(self
            .node_labels
            .row(id)
            .map(|(label, _)| label as LabelId)
            .collect())
    }

    /// Hand out the ID the next staged node will use.
    pub fn reserve_node(&mut self) -> NodeId {
        let id = self.nodes.reserved_id(self.reserved_node_count);
        self.reserved_node_count += 1;
        id
    }

    pub fn reset_reserved_nodes(&mut self) {
        self.reserved_node_count = 0;
    }

    pub fn reserved_node_count(&self) -> usize {
        self.reserved_node_count
    }

    /// Allocate a node carrying `labels`.
    pub fn create_node(&mut self, labels: &[LabelId]) -> GraphResult<NodeId> {
        self.create_node_tracked(labels, AttributeSet::new())
            .map(|allocation| allocation.id)
    }

    /// Allocate a node and report how its slot was obtained.
    pub fn create_node_tracked(
        &mut self,
        labels: &[LabelId],
        attributes: AttributeSet,
    ) -> GraphResult<Allocation> {
        self.check_labels(labels)?;
        let allocation = self.nodes.allocate_tracked(NodeRecord { attributes });
        self.ensure_capacity();
        self.label_node(allocation.id, labels)?;
        Ok(allocation)
    }

    /// Materialize a node previously handed out by [`Graph::reserve_node`].
    pub fn create_reserved_node(
        &mut self,
        id: NodeId,
        labels: &[LabelId],
        attributes: AttributeSet,
    ) -> GraphResult<Allocation> {
        let allocation = self.create_node_at(id, labels, attributes)?;
        self.reserved_node_count = self.reserved_node_count.saturating_sub(1);
        Ok(allocation)
    }

    /// Place a node at a fixed ID, used when rebuilding or replaying.
    pub fn create_node_at(
        &mut self,
        id: NodeId,
        labels: &[LabelId],
        attributes: AttributeSet,
    ) -> GraphResult<Allocation> {
        self.check_labels(labels)?;
        let allocation = self.nodes.place(id, NodeRecord { attributes })?;
        self.ensure_capacity();
        self.label_node(id, labels)?;
        Ok(allocation)
    }

    /// Delete a node with no incident edges.
    pub fn delete_node(&mut self, id: NodeId) -> GraphResult<DeletedNode> {
        self.nodes.get(id)?;
        let edges = self.node_degree(id, Direction::Both, None)?;
        if edges > 0 {
            return Err(GraphError::NodeHasEdges { node: id, edges });
        }
        let labels = self.node_labels(id)?;
        self.remove_node_labels(id, &labels)?;
        let record = self.nodes.free(id)?;
        Ok(DeletedNode { id, labels, record })
    }

    /// Inverse of [`Graph::delete_node`].
    pub fn restore_node(&mut self, deleted: DeletedNode) -> GraphResult<()> {
        let DeletedNode { id, labels, record } = deleted;
        self.nodes.restore(id, record)?;
        self.label_node(id, &labels)?;
        Ok(())
    }

    /// Inverse of a node allocation: strips labels and returns the slot.
    pub fn rollback_node_creation(&mut self, allocation: Allocation) -> GraphResult<NodeRecord> {
        let labels = self.node_labels(allocation.id)?;
        self.remove_node_labels(allocation.id, &labels)?;
        self.nodes.unallocate(allocation)
    }

    pub fn get_node(&self, id: NodeId) -> GraphResult<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Set (or clear, with `None`) one attribute; returns the previous value.
    pub fn set_node_attribute(
        &mut self,
        id: NodeId,
        attribute: AttributeId,
        value: Option<Value>,
    ) -> GraphResult<Option<Value>> {
        let record = self.nodes.get_mut(id)?;
        Ok(match value {
            Some(value) => record.attributes.insert(attribute, value),
            None => record.attributes.remove(&attribute),
        })
    }

    /// Live node IDs in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|(id, _)| id)
    }

    fn check_labels(&self, labels: &[LabelId]) -> GraphResult<()> {
        match labels.iter().find(|&&l| l as usize >= self.labels.len()) {
            Some(label) => Err(GraphError::not_found(format!("label {label}"))),
            None => Ok(()),
        }
    }
}
