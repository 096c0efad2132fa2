//! Relation-type and edge operations.

use serde_json::Value;

use crate::{
    block_store::Allocation,
    errors::{GraphError, GraphResult},
    matrix::RelationMatrices,
};

use super::{
    Graph,
    types::{AttributeId, AttributeSet, Direction, Edge, EdgeId, EdgeRecord, NodeId, RelationId},
};

/// State captured when an edge is deleted, enough to restore it.
#[derive(Clone, Debug, PartialEq)]
pub struct DeletedEdge {
    pub id: EdgeId,
    pub record: EdgeRecord,
}

impl Graph {
    pub fn add_relation_type(&mut self) -> RelationId {
        let relation = RelationMatrices::new(
            self.required_matrix_dim(),
            self.edge_dim(),
            self.max_pending_changes,
        );
        self.relations.push(relation);
        self.stats.introduce_relation();
        (self.relations.len() - 1) as RelationId
    }

    /// Drop the most recently added relation type. It must hold no edges.
    pub fn remove_relation_type(&mut self, relation: RelationId) -> GraphResult<()> {
        if relation as usize + 1 != self.relations.len() {
            return Err(GraphError::invalid_input(format!(
                "relation type {relation} is not the most recently added"
            )));
        }
        if self.relations[relation as usize].nvals() != 0 {
            return Err(GraphError::invalid_input(format!(
                "relation type {relation} still has edges"
            )));
        }
        self.relations.pop();
        self.stats.edge_count.pop();
        Ok(())
    }

    /// Connect two live nodes with a new edge of type `relation`.
    pub fn create_edge(&mut self, src: NodeId, dst: NodeId, relation: RelationId) -> GraphResult<EdgeId> {
        self.create_edge_tracked(src, dst, relation, AttributeSet::new())
            .map(|allocation| allocation.id)
    }

    pub fn create_edge_tracked(
        &mut self,
        src: NodeId,
        dst: NodeId,
        relation: RelationId,
        attributes: AttributeSet,
    ) -> GraphResult<Allocation> {
        self.check_endpoints(src, dst, relation)?;
        let allocation = self.edges.allocate_tracked(EdgeRecord {
            src,
            dst,
            relation,
            attributes,
        });
        self.ensure_capacity();
        self.form_connection(src, dst, relation, allocation.id)?;
        Ok(allocation)
    }

    /// Place an edge at a fixed ID, used when rebuilding or replaying.
    pub fn create_edge_at(
        &mut self,
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        relation: RelationId,
        attributes: AttributeSet,
    ) -> GraphResult<Allocation> {
        self.check_endpoints(src, dst, relation)?;
        let allocation = self.edges.place(
            id,
            EdgeRecord {
                src,
                dst,
                relation,
                attributes,
            },
        )?;
        self.ensure_capacity();
        self.form_connection(src, dst, relation, id)?;
        Ok(allocation)
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<DeletedEdge> {
        let edge = self.get_edge(id)?;
        self.disconnect(edge)?;
        let record = self.edges.free(id)?;
        Ok(DeletedEdge { id, record })
    }

    /// Inverse of [`Graph::delete_edge`].
    pub fn restore_edge(&mut self, deleted: DeletedEdge) -> GraphResult<()> {
        let DeletedEdge { id, record } = deleted;
        let (src, dst, relation) = (record.src, record.dst, record.relation);
        self.edges.restore(id, record)?;
        self.form_connection(src, dst, relation, id)
    }

    /// Inverse of an edge allocation.
    pub fn rollback_edge_creation(&mut self, allocation: Allocation) -> GraphResult<EdgeRecord> {
        let edge = self.get_edge(allocation.id)?;
        self.disconnect(edge)?;
        self.edges.unallocate(allocation)
    }

    pub fn get_edge(&self, id: EdgeId) -> GraphResult<Edge> {
        self.edges.get(id).map(|record| record.topology(id))
    }

    pub fn edge_record(&self, id: EdgeId) -> GraphResult<&EdgeRecord> {
        self.edges.get(id)
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains(id)
    }

    pub fn set_edge_attribute(
        &mut self,
        id: EdgeId,
        attribute: AttributeId,
        value: Option<Value>,
    ) -> GraphResult<Option<Value>> {
        let record = self.edges.get_mut(id)?;
        Ok(match value {
            Some(value) => record.attributes.insert(attribute, value),
            None => record.attributes.remove(&attribute),
        })
    }

    /// Edges from `src` to `dst`, optionally restricted to one relation type.
    pub fn edges_connecting(
        &self,
        src: NodeId,
        dst: NodeId,
        relation: Option<RelationId>,
    ) -> GraphResult<Vec<Edge>> {
        self.nodes.get(src)?;
        self.nodes.get(dst)?;
        if !self.adjacency.contains(src, dst) {
            return Ok(Vec::new());
        }
        let mut edges = Vec::new();
        for (r, matrices) in self.relations_in_scope(relation)? {
            edges.extend(matrices.edges_between(src, dst).map(|id| Edge {
                id,
                src,
                dst,
                relation: r,
            }));
        }
        Ok(edges)
    }

    /// Edges touching `id` in `direction`. A self-loop is reported once.
    pub fn node_edges(
        &self,
        id: NodeId,
        direction: Direction,
        relation: Option<RelationId>,
    ) -> GraphResult<Vec<Edge>> {
        self.nodes.get(id)?;
        let mut edges = Vec::new();
        for (_, matrices) in self.relations_in_scope(relation)? {
            if matches!(direction, Direction::Outgoing | Direction::Both) {
                for edge in matrices.outgoing_edges(id) {
                    edges.push(self.get_edge(edge)?);
                }
            }
            if matches!(direction, Direction::Incoming | Direction::Both) {
                for edge in matrices.incoming_edges(id) {
                    let edge = self.get_edge(edge)?;
                    if direction == Direction::Both && edge.src == id {
                        continue;
                    }
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }

    pub fn node_degree(
        &self,
        id: NodeId,
        direction: Direction,
        relation: Option<RelationId>,
    ) -> GraphResult<usize> {
        self.nodes.get(id)?;
        let mut degree = 0;
        for (_, matrices) in self.relations_in_scope(relation)? {
            if matches!(direction, Direction::Outgoing | Direction::Both) {
                degree += matrices.outgoing_edges(id).count();
            }
            if matches!(direction, Direction::Incoming | Direction::Both) {
                degree += matrices
                    .incoming_edges(id)
                    .filter(|&edge| direction != Direction::Both || !matrices.s().contains(edge, id))
                    .count();
            }
        }
        Ok(degree)
    }

    /// Live edge IDs in ascending order.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges.iter().map(|(id, _)| id)
    }

    fn check_endpoints(&self, src: NodeId, dst: NodeId, relation: RelationId) -> GraphResult<()> {
        for endpoint in [src, dst] {
            if !self.nodes.contains(endpoint) {
                return Err(GraphError::InvalidEndpoint(endpoint));
            }
        }
        self.relation(relation).map(|_| ())
    }

    fn form_connection(
        &mut self,
        src: NodeId,
        dst: NodeId,
        relation: RelationId,
        id: EdgeId,
    ) -> GraphResult<()> {
        self.adjacency.set_bool(src, dst)?;
        self.relation_mut(relation)?.add_edge(src, dst, id)?;
        self.stats.increment_edge_count(relation, 1);
        Ok(())
    }

    fn disconnect(&mut self, edge: Edge) -> GraphResult<()> {
        let cleared = self
            .relation_mut(edge.relation)?
            .remove_edge(edge.src, edge.dst, edge.id)?;
        if cleared {
            self.clear_adjacency_entry(edge.src, edge.dst)?;
        }
        self.stats.decrement_edge_count(edge.relation, 1);
        Ok(())
    }

    /// Clear `adjacency[src, dst]` unless another relation type still connects the pair.
    fn clear_adjacency_entry(&mut self, src: NodeId, dst: NodeId) -> GraphResult<()> {
        let still_connected = self.relations.iter().any(|r| r.r().contains(src, dst));
        if !still_connected {
            self.adjacency.remove(src, dst)?;
        }
        Ok(())
    }

    fn relations_in_scope(
        &self,
        relation: Option<RelationId>,
    ) -> GraphResult<Vec<(RelationId, &RelationMatrices)>> {
        match relation {
            Some(r) => Ok(vec![(r, self.relation(r)?)]),
            None => Ok(self
                .relations
                .iter()
                .enumerate()
                .map(|(r, m)| (r as RelationId, m))
                .collect()),
        }
    }
}
