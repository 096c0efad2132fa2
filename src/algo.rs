//! Matrix-driven traversals.

use ahash::AHashSet;

use crate::{
    errors::{GraphError, GraphResult},
    graph::{Direction, Graph, NodeId, RelationId},
    matrix::{DeltaMatrix, SparseMatrix},
};

/// Nodes reachable from `start` in one to `depth` hops, sorted ascending.
///
/// Each hop is one frontier-times-matrix product over the effective form of
/// the adjacency matrix (or the relation's R matrix), so pending writes are
/// visible without synchronizing. `start` is included only when a cycle leads
/// back to it.
pub fn k_hop(
    graph: &Graph,
    start: NodeId,
    depth: usize,
    relation: Option<RelationId>,
    direction: Direction,
) -> GraphResult<Vec<NodeId>> {
    graph.get_node(start)?;
    let matrix: &DeltaMatrix = match relation {
        Some(r) => graph.relation(r)?.r(),
        None => graph.adjacency_matrix(),
    };
    let operands = hop_operands(matrix, direction)?;

    let mut visited = AHashSet::new();
    let mut frontier = vec![start];
    for _ in 0..depth {
        let mut next: Vec<NodeId> = operands
            .iter()
            .flat_map(|m| m.vxm(&frontier))
            .filter(|&id| visited.insert(id))
            .collect();
        if next.is_empty() {
            break;
        }
        next.sort_unstable();
        frontier = next;
    }
    let mut reached: Vec<NodeId> = visited.into_iter().collect();
    reached.sort_unstable();
    Ok(reached)
}

/// Boolean product of two relations' R matrices: `out[a, c]` is set when some
/// `b` has an edge of `first` from `a` and of `second` to `c`.
pub fn two_hop_matrix(graph: &Graph, first: RelationId, second: RelationId) -> GraphResult<SparseMatrix> {
    let a = graph.relation(first)?.r().export();
    let b = graph.relation(second)?.r().export();
    a.mxm(&b)
}

fn hop_operands(matrix: &DeltaMatrix, direction: Direction) -> GraphResult<Vec<SparseMatrix>> {
    let transposed = || {
        matrix
            .transposed()
            .map(DeltaMatrix::export)
            .ok_or_else(|| GraphError::invalid_input("matrix keeps no transpose"))
    };
    Ok(match direction {
        Direction::Outgoing => vec![matrix.export()],
        Direction::Incoming => vec![transposed()?],
        Direction::Both => vec![matrix.export(), transposed()?],
    })
}
