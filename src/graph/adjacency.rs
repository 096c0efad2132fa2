//! Neighbor traversal over the effective matrix view.

use std::iter::Peekable;

use crate::{
    errors::GraphResult,
    matrix::{DeltaMatrix, DeltaRow},
};

use super::{
    Graph,
    types::{Direction, NodeId, RelationId},
};

/// Lazy, restartable sequence of neighbor IDs in ascending order.
///
/// Cloning yields an independent cursor over the same view. Cost is
/// proportional to the row density of the matrices involved.
#[derive(Clone)]
pub struct Neighbors<'a> {
    outgoing: Option<Peekable<DeltaRow<'a>>>,
    incoming: Option<Peekable<DeltaRow<'a>>>,
}

impl Iterator for Neighbors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let out = self.outgoing.as_mut().and_then(|it| it.peek().map(|&(id, _)| id));
        let inc = self.incoming.as_mut().and_then(|it| it.peek().map(|&(id, _)| id));
        let next = match (out, inc) {
            (None, None) => return None,
            (Some(o), None) => o,
            (None, Some(i)) => i,
            (Some(o), Some(i)) => o.min(i),
        };
        if out == Some(next) {
            self.outgoing.as_mut().and_then(Iterator::next);
        }
        if inc == Some(next) {
            self.incoming.as_mut().and_then(Iterator::next);
        }
        Some(next)
    }
}

impl Graph {
    /// Neighbors of `id` reachable over edges of `relation` (any relation type
    /// when `None`) in `direction`. Reads the effective view, so readers see
    /// pending writes without synchronizing.
    pub fn neighbors(
        &self,
        id: NodeId,
        relation: Option<RelationId>,
        direction: Direction,
    ) -> GraphResult<Neighbors<'_>> {
        self.nodes.get(id)?;
        let matrix: &DeltaMatrix = match relation {
            Some(r) => self.relation(r)?.r(),
            None => &self.adjacency,
        };
        let outgoing = matches!(direction, Direction::Outgoing | Direction::Both)
            .then(|| matrix.row(id).peekable());
        let incoming = if matches!(direction, Direction::Incoming | Direction::Both) {
            matrix.transposed().map(|t| t.row(id).peekable())
        } else {
            None
        };
        Ok(Neighbors { outgoing, incoming })
    }

    /// Synchronize the matrices a traversal will read, then traverse.
    /// Writers call this so long traversals run over the compact form.
    pub fn synchronized_neighbors(
        &mut self,
        id: NodeId,
        relation: Option<RelationId>,
        direction: Direction,
    ) -> GraphResult<Neighbors<'_>> {
        let n = self.required_matrix_dim();
        let e = self.edge_dim();
        let strategy = self.policy.strategy();
        match relation {
            Some(r) => self.relation_mut(r)?.synchronize(strategy, n, e),
            None => strategy.synchronize(&mut self.adjacency, n, n),
        }
        self.neighbors(id, relation, direction)
    }
}
